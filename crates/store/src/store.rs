use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::profile::{ContextHit, Profile, StoreSummary, render_context_line};

/// File I/O or serialisation failed mid-operation.  The store guarantees that
/// a failed append leaves the context index and counters untouched.
#[derive(Debug, thiserror::Error)]
#[error("store operation failed: {0}")]
pub struct StoreError(String);

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self(err.to_string())
    }
}

/// A memory to be appended.  Ids and timestamps are assigned by the store.
#[derive(Debug, Clone, Default)]
pub struct NewMemory {
    pub content: String,
    pub memory_type: String,
    pub emotional_weight: HashMap<String, f64>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// On-disk shape of one immutable memory file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMemory {
    pub user_id: String,
    pub content: String,
    pub memory_type: String,
    pub timestamp: String,
    #[serde(default)]
    pub emotional_weight: HashMap<String, f64>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// File-backed per-user store.  One writer per user at a time (per-user async
/// mutex); readers are lock-free because profile replacement is atomic.
pub struct ProfileStore {
    root: PathBuf,
    user_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ProfileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            user_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn lock_for(&self, user_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.user_locks.lock().await;
        locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn profile_path(&self, user_id: &str) -> PathBuf {
        self.root.join(user_id).join("profile.json")
    }

    fn memories_dir(&self, user_id: &str) -> PathBuf {
        self.root.join(user_id).join("memories")
    }

    /// Load the user's profile, or synthesise one from the default template.
    /// A synthesised profile is not persisted until the first mutation.
    pub async fn get_profile(&self, user_id: &str) -> Result<Profile, StoreError> {
        match tokio::fs::read_to_string(self.profile_path(user_id)).await {
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Ok(Profile::template(user_id))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn has_profile(&self, user_id: &str) -> bool {
        tokio::fs::try_exists(self.profile_path(user_id))
            .await
            .unwrap_or(false)
    }

    /// Append one memory: write the immutable memory file, then atomically
    /// replace the profile with the context line appended and counters
    /// bumped.  On failure nothing is added to the index.
    pub async fn append_memory(
        &self,
        user_id: &str,
        memory: NewMemory,
    ) -> Result<String, StoreError> {
        let lock = self.lock_for(user_id).await;
        let _guard = lock.lock().await;

        let mut profile = self.get_profile(user_id).await?;

        let now = Utc::now();
        let timestamp = now.to_rfc3339();
        let mem_id = format!("mem_{}_{:08}", now.timestamp(), content_hash(&memory.content));

        let stored = StoredMemory {
            user_id: user_id.to_string(),
            content: memory.content,
            memory_type: memory.memory_type,
            timestamp: timestamp.clone(),
            emotional_weight: memory.emotional_weight,
            metadata: memory.metadata,
        };

        let memories_dir = self.memories_dir(user_id);
        tokio::fs::create_dir_all(&memories_dir).await?;
        let memory_path = memories_dir.join(format!("{mem_id}.json"));
        tokio::fs::write(&memory_path, serde_json::to_vec_pretty(&stored)?).await?;

        let line = render_context_line(&mem_id, &stored.memory_type, &timestamp, &stored.content);
        profile.memory_context_index.context_lines.push(line);
        profile.memory_context_index.total_memories =
            profile.memory_context_index.context_lines.len();
        profile.system_metadata.last_updated = timestamp;
        profile.system_metadata.interaction_count += 1;

        self.write_profile(user_id, &profile).await?;
        debug!(user = user_id, mem_id = %mem_id, "memory appended");
        Ok(mem_id)
    }

    /// Atomically replace `profile.json`: write a temp sibling, fsync, rename.
    /// A crash before the rename leaves the previous profile intact.
    async fn write_profile(&self, user_id: &str, profile: &Profile) -> Result<(), StoreError> {
        let path = self.profile_path(user_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp_path = path.with_extension("json.tmp");
        let write_result: Result<(), StoreError> = async {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)
                .await?;
            file.write_all(&serde_json::to_vec_pretty(profile)?).await?;
            file.flush().await?;
            file.sync_all().await?;
            Ok(())
        }
        .await;

        if let Err(err) = write_result {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(err);
        }

        if let Err(err) = tokio::fs::rename(&tmp_path, &path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(err.into());
        }
        Ok(())
    }

    /// Case-insensitive substring search over the context-line index.
    /// Relevance is the occurrence count of the query within the line; ties
    /// break towards the most recent line.
    pub async fn search_context(
        &self,
        user_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ContextHit>, StoreError> {
        let profile = self.get_profile(user_id).await?;
        let needle = query.to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }

        let mut hits: Vec<(usize, ContextHit)> = profile
            .memory_context_index
            .context_lines
            .iter()
            .enumerate()
            .filter_map(|(index, line)| {
                let haystack = line.to_lowercase();
                let relevance = haystack.matches(&needle).count();
                if relevance == 0 {
                    return None;
                }
                let mut parts = line.splitn(4, '|');
                let hit = ContextHit {
                    mem_id: parts.next()?.to_string(),
                    mem_type: parts.next()?.to_string(),
                    timestamp: parts.next()?.to_string(),
                    preview: parts.next()?.to_string(),
                    relevance,
                };
                Some((index, hit))
            })
            .collect();

        // Highest relevance first; equal relevance prefers the later (more
        // recent) line.
        hits.sort_by(|(ia, a), (ib, b)| b.relevance.cmp(&a.relevance).then(ib.cmp(ia)));
        Ok(hits.into_iter().take(limit).map(|(_, hit)| hit).collect())
    }

    pub async fn summary(&self, user_id: &str) -> Result<StoreSummary, StoreError> {
        if !self.has_profile(user_id).await {
            return Ok(StoreSummary {
                has_profile: false,
                memory_count: 0,
                memory_types: Vec::new(),
                last_updated: None,
            });
        }

        let profile = self.get_profile(user_id).await?;
        let mut memory_types: Vec<String> = Vec::new();
        for line in &profile.memory_context_index.context_lines {
            if let Some(mem_type) = line.split('|').nth(1) {
                if !memory_types.iter().any(|t| t == mem_type) {
                    memory_types.push(mem_type.to_string());
                }
            }
        }

        Ok(StoreSummary {
            has_profile: true,
            memory_count: profile.memory_context_index.total_memories,
            memory_types,
            last_updated: Some(profile.system_metadata.last_updated.clone()),
        })
    }

    /// Read one immutable memory file.  A missing or corrupt file leaves the
    /// context index untouched; only the content is unavailable.
    pub async fn load_memory(
        &self,
        user_id: &str,
        mem_id: &str,
    ) -> Result<StoredMemory, StoreError> {
        let path = self.memories_dir(user_id).join(format!("{mem_id}.json"));
        let raw = tokio::fs::read_to_string(&path).await.map_err(|err| {
            warn!(user = user_id, mem_id, %err, "memory file unreadable");
            StoreError::from(err)
        })?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// First eight decimal digits of the content's SHA-256, zero-padded.
fn content_hash(content: &str) -> u64 {
    let digest = Sha256::digest(content.as_bytes());
    let mut prefix = [0_u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix) % 100_000_000
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, ProfileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(dir.path());
        (dir, store)
    }

    fn memory(content: &str) -> NewMemory {
        NewMemory {
            content: content.to_string(),
            memory_type: "general".to_string(),
            ..NewMemory::default()
        }
    }

    #[tokio::test]
    async fn unknown_user_gets_template_profile() {
        let (_dir, store) = store();
        let profile = store.get_profile("nobody").await.unwrap();
        assert_eq!(profile.user_id, "nobody");
        assert_eq!(profile.memory_context_index.total_memories, 0);
        // Synthesised lazily: nothing hits the disk until a mutation.
        assert!(!store.has_profile("nobody").await);
    }

    #[tokio::test]
    async fn append_updates_index_and_persists_both_files() {
        let (dir, store) = store();
        let mem_id = store.append_memory("u1", memory("hello world")).await.unwrap();

        assert!(mem_id.starts_with("mem_"));
        assert!(dir.path().join("u1/memories").join(format!("{mem_id}.json")).exists());

        let profile = store.get_profile("u1").await.unwrap();
        assert_eq!(profile.memory_context_index.total_memories, 1);
        assert_eq!(profile.memory_context_index.context_lines.len(), 1);
        assert_eq!(profile.system_metadata.interaction_count, 1);

        let line = &profile.memory_context_index.context_lines[0];
        let parts: Vec<&str> = line.splitn(4, '|').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], mem_id);
        assert_eq!(parts[1], "general");
        assert!(parts[3].ends_with("..."));
    }

    #[tokio::test]
    async fn context_line_count_always_matches_total() {
        let (_dir, store) = store();
        for i in 0..4 {
            store.append_memory("u1", memory(&format!("note {i}"))).await.unwrap();
        }
        let profile = store.get_profile("u1").await.unwrap();
        assert_eq!(
            profile.memory_context_index.context_lines.len(),
            profile.memory_context_index.total_memories
        );
        assert_eq!(profile.memory_context_index.total_memories, 4);
    }

    #[tokio::test]
    async fn fresh_append_is_rank_one_for_unique_substring() {
        let (_dir, store) = store();
        store.append_memory("u1", memory("likes rust and tokio")).await.unwrap();
        store.append_memory("u1", memory("prefers quiet mornings")).await.unwrap();
        let new_id = store
            .append_memory("u1", memory("collects antique xylophones"))
            .await
            .unwrap();

        let hits = store.search_context("u1", "xylophone", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].mem_id, new_id);
    }

    #[tokio::test]
    async fn search_ranks_by_occurrences_then_recency() {
        let (_dir, store) = store();
        store.append_memory("u1", memory("cat")).await.unwrap();
        store.append_memory("u1", memory("cat cat cat")).await.unwrap();
        store.append_memory("u1", memory("cat cat")).await.unwrap();

        let hits = store.search_context("u1", "cat", 10).await.unwrap();
        assert_eq!(hits.len(), 3);
        assert!(hits[0].preview.starts_with("cat cat cat"));
        // "cat" vs "cat cat": fewer occurrences sorts last.
        assert!(hits[2].preview.starts_with("cat..."));
    }

    #[tokio::test]
    async fn search_is_case_insensitive() {
        let (_dir, store) = store();
        store.append_memory("u1", memory("Quantum AI rocks")).await.unwrap();
        let hits = store.search_context("u1", "quantum ai", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn summary_reports_types_and_counts() {
        let (_dir, store) = store();
        store.append_memory("u1", memory("a")).await.unwrap();
        store
            .append_memory(
                "u1",
                NewMemory {
                    content: "b".to_string(),
                    memory_type: "conversation".to_string(),
                    ..NewMemory::default()
                },
            )
            .await
            .unwrap();

        let summary = store.summary("u1").await.unwrap();
        assert!(summary.has_profile);
        assert_eq!(summary.memory_count, 2);
        assert_eq!(summary.memory_types, vec!["general", "conversation"]);
        assert!(summary.last_updated.is_some());

        let missing = store.summary("ghost").await.unwrap();
        assert!(!missing.has_profile);
        assert_eq!(missing.memory_count, 0);
    }

    #[tokio::test]
    async fn memory_files_are_immutable_and_loadable() {
        let (_dir, store) = store();
        let mem_id = store.append_memory("u1", memory("original content")).await.unwrap();
        let stored = store.load_memory("u1", &mem_id).await.unwrap();
        assert_eq!(stored.content, "original content");
        assert_eq!(stored.user_id, "u1");
    }

    #[tokio::test]
    async fn concurrent_appends_for_one_user_serialise() {
        let (_dir, store) = store();
        let store = std::sync::Arc::new(store);

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.append_memory("u1", memory(&format!("entry {i}"))).await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let profile = store.get_profile("u1").await.unwrap();
        assert_eq!(profile.memory_context_index.total_memories, 8);
        assert_eq!(profile.memory_context_index.context_lines.len(), 8);
    }

    #[test]
    fn content_hash_is_stable_and_eight_digits() {
        let a = content_hash("same content");
        let b = content_hash("same content");
        assert_eq!(a, b);
        assert!(a < 100_000_000);
    }
}
