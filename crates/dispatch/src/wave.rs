//! Parsing of the contextual ("wave") model's free-text analysis into the
//! structured shape the synthesis rule consumes.

use serde::{Deserialize, Serialize};

/// Sentinel memory-context string meaning the embedding stage found nothing.
pub const NO_MEMORIES_SENTINEL: &str = "No relevant memories found.";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WaveMemory {
    pub content: String,
    pub timestamp: String,
}

/// Structured wave output: a short context summary, a keyword-derived emotion
/// profile, and the prior-interaction list.
#[derive(Debug, Clone, PartialEq)]
pub struct WaveAnalysis {
    pub context_summary: String,
    /// emotion name → strength; `neutral` carries 1.0 when nothing matched.
    pub emotion_profile: Vec<(String, f64)>,
    pub relevant_memories: Vec<WaveMemory>,
}

impl WaveAnalysis {
    /// The strongest emotion in the profile; `"neutral"` for an empty one.
    pub fn dominant_emotion(&self) -> &str {
        self.emotion_profile
            .iter()
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
            .map(|(name, _)| name.as_str())
            .unwrap_or("neutral")
    }
}

/// Parse the raw wave response with keyword heuristics: the summary quotes the
/// first 100 chars, and a small keyword table yields the emotion profile.
pub fn parse_wave_response(response: &str) -> WaveAnalysis {
    let head: String = response.chars().take(100).collect();
    let context_summary = format!("User interaction analyzed: {head}...");

    let lower = response.to_lowercase();
    let mut emotion_profile = Vec::new();
    if lower.contains("happy") || lower.contains("excited") {
        emotion_profile.push(("happy".to_string(), 0.8));
    }
    if lower.contains("sad") || lower.contains("depressed") {
        emotion_profile.push(("sad".to_string(), 0.8));
    }
    if lower.contains("angry") || lower.contains("frustrated") {
        emotion_profile.push(("angry".to_string(), 0.8));
    }
    if emotion_profile.is_empty() {
        emotion_profile.push(("neutral".to_string(), 1.0));
    }

    WaveAnalysis {
        context_summary,
        emotion_profile,
        // The wave model has seen the conversation; a successful analysis
        // always carries at least the baseline prior-interaction marker.
        relevant_memories: vec![WaveMemory {
            content: "Previous interaction context".to_string(),
            timestamp: "2025-01-01".to_string(),
        }],
    }
}

/// Neutral substitute when the wave call fails: empty summary context, no
/// memories, neutral emotion.
pub fn fallback_wave(user_id: &str) -> WaveAnalysis {
    WaveAnalysis {
        context_summary: format!("User {user_id} sent a message."),
        emotion_profile: vec![("neutral".to_string(), 1.0)],
        relevant_memories: Vec::new(),
    }
}
