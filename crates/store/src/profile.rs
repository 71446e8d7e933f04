use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Preview length for context lines; the stored preview is this many chars
/// plus a literal `"..."` marker.
pub(crate) const CONTEXT_PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BasicInformation {
    pub name: String,
    pub age: String,
    pub role: String,
}

impl Default for BasicInformation {
    fn default() -> Self {
        Self {
            name: "Unknown".to_string(),
            age: "Unknown".to_string(),
            role: "User".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CognitiveProfile {
    pub cognitive_style: String,
    pub notes: Vec<String>,
}

impl Default for CognitiveProfile {
    fn default() -> Self {
        Self {
            cognitive_style: "Standard".to_string(),
            notes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CommunicationGuidelines {
    pub tone: String,
    pub notes: Vec<String>,
}

impl Default for CommunicationGuidelines {
    fn default() -> Self {
        Self {
            tone: "Professional".to_string(),
            notes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelationshipToAi {
    pub role: String,
    pub expectation: String,
}

impl Default for RelationshipToAi {
    fn default() -> Self {
        Self {
            role: "User".to_string(),
            expectation: "Standard assistance".to_string(),
        }
    }
}

/// Rolling index of a user's memories: one pipe-delimited line per memory.
///
/// Invariant: `context_lines.len() == total_memories`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct MemoryContextIndex {
    pub total_memories: usize,
    pub context_lines: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SystemMetadata {
    pub created_date: String,
    pub last_updated: String,
    pub interaction_count: u64,
    pub profile_completeness: f64,
    pub trust_level: f64,
}

impl Default for SystemMetadata {
    fn default() -> Self {
        Self {
            created_date: String::new(),
            last_updated: String::new(),
            interaction_count: 0,
            profile_completeness: 0.0,
            trust_level: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Profile {
    pub user_id: String,
    pub basic_information: BasicInformation,
    pub cognitive_profile: CognitiveProfile,
    pub communication_guidelines: CommunicationGuidelines,
    pub relationship_to_ai: RelationshipToAi,
    pub memory_context_index: MemoryContextIndex,
    pub system_metadata: SystemMetadata,
}

impl Profile {
    /// Synthesise a fresh profile from the default template.  Not persisted
    /// until the first mutation.
    pub fn template(user_id: &str) -> Self {
        let now = Utc::now().to_rfc3339();
        Self {
            user_id: user_id.to_string(),
            system_metadata: SystemMetadata {
                created_date: now.clone(),
                last_updated: now,
                ..SystemMetadata::default()
            },
            ..Self::default()
        }
    }

    /// The last `k` context lines rendered as `[timestamp] preview` rows for
    /// prompt injection.
    pub fn recent_memory_timeline(&self, k: usize) -> Vec<String> {
        let lines = &self.memory_context_index.context_lines;
        lines
            .iter()
            .skip(lines.len().saturating_sub(k))
            .filter_map(|line| {
                let mut parts = line.splitn(4, '|');
                let _mem_id = parts.next()?;
                let _mem_type = parts.next()?;
                let timestamp = parts.next()?;
                let preview = parts.next()?;
                Some(format!("[{timestamp}] {preview}"))
            })
            .collect()
    }
}

/// One hit from a context-line search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextHit {
    pub mem_id: String,
    pub mem_type: String,
    pub timestamp: String,
    pub preview: String,
    /// Occurrences of the query substring within the line.
    pub relevance: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSummary {
    pub has_profile: bool,
    pub memory_count: usize,
    pub memory_types: Vec<String>,
    pub last_updated: Option<String>,
}

/// Render the fixed-format context line for a stored memory.
///
/// Format is bit-exact: `<memId>|<memType>|<iso8601>|<first 100 chars>...`
/// The `...` marker is appended unconditionally, so the fourth field never
/// exceeds 103 chars.
pub(crate) fn render_context_line(
    mem_id: &str,
    mem_type: &str,
    timestamp: &str,
    content: &str,
) -> String {
    let preview: String = content.chars().take(CONTEXT_PREVIEW_CHARS).collect();
    format!("{mem_id}|{mem_type}|{timestamp}|{preview}...")
}
