//! Nearest-neighbour lookup over stored memories.
//!
//! Vectors are L2-normalised at insert and compared by inner product.  When
//! the embedding backend is down the index switches to a deterministic
//! degraded path: a hash-derived pseudo-embedding plus keyword-overlap
//! search, with scores capped below 1.0.  Degradation is always visible to
//! the caller via the `fallback` flag.

use std::path::{Path, PathBuf};
use std::time::Duration;

use sha2::{Digest, Sha256};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use lyra_client::{CallError, ModelBackend};

/// Fallback pseudo-embeddings are this many dimensions.
pub const FALLBACK_DIMS: usize = 16;

/// Ceiling for degraded-mode scores; fallback hits never reach 1.0.
const FALLBACK_SCORE_CAP: f32 = 0.95;

/// Snapshot the index after this many log appends.
const SNAPSHOT_EVERY: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("index persistence failed: {0}")]
    Persist(String),
    #[error("embedding call cancelled")]
    Cancelled,
}

impl From<std::io::Error> for IndexError {
    fn from(err: std::io::Error) -> Self {
        Self::Persist(err.to_string())
    }
}

impl From<serde_json::Error> for IndexError {
    fn from(err: serde_json::Error) -> Self {
        Self::Persist(err.to_string())
    }
}

/// One indexed memory.  `vector` is stored L2-normalised.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedMemory {
    pub mem_id: String,
    pub content: String,
    pub timestamp: String,
    pub vector: Vec<f32>,
}

/// A search hit with its inner-product (or degraded keyword) score.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryHit {
    pub mem_id: String,
    pub score: f32,
    pub content: String,
    pub timestamp: String,
}

/// Outcome of `embed`: the vector plus whether the degraded path produced it.
#[derive(Debug, Clone)]
pub struct EmbeddingOutcome {
    pub vector: Vec<f32>,
    pub fallback: bool,
    pub latency: Duration,
}

#[derive(Default, Serialize, Deserialize)]
struct IndexState {
    entries: Vec<IndexedMemory>,
}

/// In-memory vector index with snapshot + append-only sidecar persistence.
///
/// Concurrency: many readers, one writer (`RwLock`); a `top_k` racing an
/// `index` sees the new entry fully or not at all.
pub struct EmbeddingIndex {
    state: RwLock<IndexState>,
    snapshot_path: PathBuf,
    log_path: PathBuf,
    similarity_threshold: f32,
    appends_since_snapshot: RwLock<usize>,
}

impl EmbeddingIndex {
    /// Open (or create) the index under `<root>/_index/`, loading the
    /// snapshot and replaying the sidecar log.
    pub async fn open(root: impl AsRef<Path>, similarity_threshold: f32) -> Result<Self, IndexError> {
        let index_dir = root.as_ref().join("_index");
        tokio::fs::create_dir_all(&index_dir).await?;

        let index = Self {
            state: RwLock::new(IndexState::default()),
            snapshot_path: index_dir.join("embeddings.snapshot"),
            log_path: index_dir.join("embeddings.log"),
            similarity_threshold,
            appends_since_snapshot: RwLock::new(0),
        };
        index.load().await?;
        Ok(index)
    }

    async fn load(&self) -> Result<(), IndexError> {
        let mut state = self.state.write().await;

        if let Ok(raw) = tokio::fs::read_to_string(&self.snapshot_path).await {
            match serde_json::from_str::<IndexState>(&raw) {
                Ok(snapshot) => state.entries = snapshot.entries,
                Err(err) => warn!(%err, "embedding snapshot unreadable; starting from log only"),
            }
        }

        if let Ok(raw) = tokio::fs::read_to_string(&self.log_path).await {
            let mut corrupt = 0_usize;
            for line in raw.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<IndexedMemory>(line) {
                    Ok(entry) => state.entries.push(entry),
                    Err(_) => corrupt += 1,
                }
            }
            if corrupt > 0 {
                warn!(corrupt, "skipped corrupt embedding log lines");
            }
        }

        info!(entries = state.entries.len(), "embedding index loaded");
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Embed `text` via the remote endpoint, degrading to the deterministic
    /// hash embedding when the backend is unreachable, times out, or replies
    /// malformed.  Cancellation is propagated, never masked by the fallback.
    pub async fn embed(
        &self,
        backend: &dyn ModelBackend,
        text: &str,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<EmbeddingOutcome, IndexError> {
        let started = Instant::now();
        match backend.embed(text, deadline, cancel).await {
            Ok(completion) => Ok(EmbeddingOutcome {
                vector: l2_normalized(completion.vector),
                fallback: false,
                latency: completion.latency,
            }),
            Err(CallError::Cancelled) => Err(IndexError::Cancelled),
            Err(err) => {
                debug!(%err, "embedding backend degraded; using hash fallback");
                Ok(EmbeddingOutcome {
                    vector: fallback_embedding(text),
                    fallback: true,
                    latency: started.elapsed(),
                })
            }
        }
    }

    /// Append a memory to the index and its sidecar log.  Periodically folds
    /// the log into a fresh snapshot.
    pub async fn index(
        &self,
        mem_id: &str,
        vector: Vec<f32>,
        content: &str,
        timestamp: &str,
    ) -> Result<(), IndexError> {
        let entry = IndexedMemory {
            mem_id: mem_id.to_string(),
            content: content.to_string(),
            timestamp: timestamp.to_string(),
            vector: l2_normalized(vector),
        };

        {
            let mut state = self.state.write().await;
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.log_path)
                .await?;
            file.write_all(serde_json::to_string(&entry)?.as_bytes()).await?;
            file.write_all(b"\n").await?;
            file.flush().await?;
            state.entries.push(entry);
        }

        let due = {
            let mut appends = self.appends_since_snapshot.write().await;
            *appends += 1;
            if *appends >= SNAPSHOT_EVERY {
                *appends = 0;
                true
            } else {
                false
            }
        };
        if due {
            self.snapshot().await?;
        }
        Ok(())
    }

    /// Write the full index to the snapshot file (temp + rename) and truncate
    /// the sidecar log.  Holds the write lock so no append lands between the
    /// snapshot and the log truncation.
    pub async fn snapshot(&self) -> Result<(), IndexError> {
        let state = self.state.write().await;
        let rendered = serde_json::to_vec(&IndexState {
            entries: state.entries.clone(),
        })?;

        let tmp_path = self.snapshot_path.with_extension("snapshot.tmp");
        tokio::fs::write(&tmp_path, rendered).await?;
        tokio::fs::rename(&tmp_path, &self.snapshot_path).await?;
        tokio::fs::write(&self.log_path, b"").await?;
        debug!("embedding index snapshot written");
        Ok(())
    }

    /// Inner-product top-k.  Hits below the similarity threshold are dropped.
    pub async fn top_k(&self, query: &[f32], k: usize) -> Vec<MemoryHit> {
        let query = l2_normalized(query.to_vec());
        let state = self.state.read().await;

        let mut hits: Vec<MemoryHit> = state
            .entries
            .iter()
            .map(|entry| MemoryHit {
                mem_id: entry.mem_id.clone(),
                score: inner_product(&query, &entry.vector),
                content: entry.content.clone(),
                timestamp: entry.timestamp.clone(),
            })
            .filter(|hit| hit.score >= self.similarity_threshold)
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(k);
        hits
    }

    /// Degraded-mode search: keyword overlap between the query and the most
    /// recent memories.  One overlapping word scores at the similarity
    /// threshold; each further word adds 0.1, capped below 1.0.
    pub async fn top_k_fallback(&self, query_text: &str, k: usize) -> Vec<MemoryHit> {
        let query_words = keywords(query_text);
        if query_words.is_empty() {
            return Vec::new();
        }

        let state = self.state.read().await;
        let recent = state.entries.iter().rev().take(50);

        let mut hits: Vec<MemoryHit> = recent
            .filter_map(|entry| {
                let content_words = keywords(&entry.content);
                let overlap = query_words.intersection(&content_words).count();
                if overlap == 0 {
                    return None;
                }
                let score = (self.similarity_threshold + 0.1 * (overlap as f32 - 1.0))
                    .min(FALLBACK_SCORE_CAP);
                Some(MemoryHit {
                    mem_id: entry.mem_id.clone(),
                    score,
                    content: entry.content.clone(),
                    timestamp: entry.timestamp.clone(),
                })
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(k);
        hits
    }
}

/// Deterministic 16-dimensional pseudo-embedding: the first 16 bytes of the
/// SHA-256 of the text, each scaled into [0,1].
pub fn fallback_embedding(text: &str) -> Vec<f32> {
    let digest = Sha256::digest(text.as_bytes());
    digest[..FALLBACK_DIMS]
        .iter()
        .map(|byte| f32::from(*byte) / 255.0)
        .collect()
}

fn l2_normalized(mut vector: Vec<f32>) -> Vec<f32> {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }
    vector
}

fn inner_product(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn keywords(text: &str) -> std::collections::BTreeSet<String> {
    text.split(|ch: char| !ch.is_alphanumeric())
        .filter(|word| word.len() >= 3)
        .map(|word| word.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn index(threshold: f32) -> (tempfile::TempDir, EmbeddingIndex) {
        let dir = tempfile::tempdir().unwrap();
        let index = EmbeddingIndex::open(dir.path(), threshold).await.unwrap();
        (dir, index)
    }

    #[test]
    fn fallback_embedding_is_deterministic_and_bounded() {
        let a = fallback_embedding("some search key");
        let b = fallback_embedding("some search key");
        assert_eq!(a, b);
        assert_eq!(a.len(), FALLBACK_DIMS);
        assert!(a.iter().all(|v| (0.0..=1.0).contains(v)));

        let c = fallback_embedding("different key");
        assert_ne!(a, c);
    }

    #[test]
    fn normalised_vectors_have_unit_norm() {
        let v = l2_normalized(vec![3.0, 4.0]);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn top_k_ranks_by_inner_product_and_applies_threshold() {
        let (_dir, index) = index(0.7).await;
        index.index("m1", vec![1.0, 0.0], "aligned", "t1").await.unwrap();
        index.index("m2", vec![0.8, 0.6], "close", "t2").await.unwrap();
        index.index("m3", vec![0.0, 1.0], "orthogonal", "t3").await.unwrap();

        let hits = index.top_k(&[1.0, 0.0], 3).await;
        let ids: Vec<&str> = hits.iter().map(|h| h.mem_id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2"]);
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn top_k_respects_k() {
        let (_dir, index) = index(0.0).await;
        for i in 0..5 {
            index
                .index(&format!("m{i}"), vec![1.0, 0.1 * i as f32], "c", "t")
                .await
                .unwrap();
        }
        assert_eq!(index.top_k(&[1.0, 0.0], 2).await.len(), 2);
    }

    #[tokio::test]
    async fn fallback_search_caps_scores_below_one() {
        let (_dir, index) = index(0.7).await;
        index
            .index(
                "m1",
                fallback_embedding("quantum"),
                "quantum superposition architecture systems innovation concepts",
                "t1",
            )
            .await
            .unwrap();

        let hits = index
            .top_k_fallback("quantum superposition architecture systems innovation concepts", 3)
            .await;
        assert_eq!(hits.len(), 1);
        assert!(hits[0].score <= 0.95);
        assert!(hits[0].score < 1.0);
    }

    #[tokio::test]
    async fn fallback_single_overlap_meets_threshold() {
        let (_dir, index) = index(0.7).await;
        index
            .index("m1", fallback_embedding("x"), "user likes quantum things", "t1")
            .await
            .unwrap();

        let hits = index.top_k_fallback("tell me about quantum", 3).await;
        assert_eq!(hits.len(), 1);
        assert!((hits[0].score - 0.7).abs() < 1e-6);
    }

    #[tokio::test]
    async fn fallback_no_overlap_returns_nothing() {
        let (_dir, index) = index(0.7).await;
        index
            .index("m1", fallback_embedding("x"), "gardening tips", "t1")
            .await
            .unwrap();
        assert!(index.top_k_fallback("rust compilers", 3).await.is_empty());
    }

    #[tokio::test]
    async fn index_persists_across_reopen_via_log_replay() {
        let dir = tempfile::tempdir().unwrap();
        {
            let index = EmbeddingIndex::open(dir.path(), 0.0).await.unwrap();
            index.index("m1", vec![1.0, 0.0], "first", "t1").await.unwrap();
            index.index("m2", vec![0.0, 1.0], "second", "t2").await.unwrap();
        }

        let reopened = EmbeddingIndex::open(dir.path(), 0.0).await.unwrap();
        assert_eq!(reopened.len().await, 2);
        let hits = reopened.top_k(&[0.0, 1.0], 1).await;
        assert_eq!(hits[0].mem_id, "m2");
    }

    #[tokio::test]
    async fn snapshot_folds_log_and_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let index = EmbeddingIndex::open(dir.path(), 0.0).await.unwrap();
            index.index("m1", vec![1.0], "only", "t1").await.unwrap();
            index.snapshot().await.unwrap();

            let log = std::fs::read_to_string(dir.path().join("_index/embeddings.log")).unwrap();
            assert!(log.is_empty());
        }

        let reopened = EmbeddingIndex::open(dir.path(), 0.0).await.unwrap();
        assert_eq!(reopened.len().await, 1);
    }

    #[tokio::test]
    async fn embed_degrades_to_hash_fallback_on_backend_failure() {
        struct DownBackend;

        #[async_trait::async_trait]
        impl ModelBackend for DownBackend {
            async fn generate(
                &self,
                _prompt: &lyra_client::ChatPrompt,
                _deadline: Instant,
                _cancel: &CancellationToken,
            ) -> Result<lyra_client::Completion, CallError> {
                Err(CallError::Unavailable)
            }
            async fn contextualize(
                &self,
                _prompt: &str,
                _deadline: Instant,
                _cancel: &CancellationToken,
            ) -> Result<lyra_client::Completion, CallError> {
                Err(CallError::Unavailable)
            }
            async fn embed(
                &self,
                _input: &str,
                _deadline: Instant,
                _cancel: &CancellationToken,
            ) -> Result<lyra_client::EmbeddingCompletion, CallError> {
                Err(CallError::Unavailable)
            }
        }

        let (_dir, index) = index(0.7).await;
        let cancel = CancellationToken::new();
        let outcome = index
            .embed(
                &DownBackend,
                "search key",
                Instant::now() + std::time::Duration::from_secs(1),
                &cancel,
            )
            .await
            .unwrap();

        assert!(outcome.fallback);
        assert_eq!(outcome.vector.len(), FALLBACK_DIMS);
    }
}
