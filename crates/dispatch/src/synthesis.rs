//! The deterministic collapse rule: particle text, wave analysis, and memory
//! context fuse into one reply.  Pure functions only — same inputs, same
//! reply, byte for byte.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

use crate::wave::{NO_MEMORIES_SENTINEL, WaveAnalysis};

fn think_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<think>.*?</think>").expect("static regex compiles"))
}

fn tagged_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)<[a-zA-Z][a-zA-Z0-9_-]*>.*?</[a-zA-Z][a-zA-Z0-9_-]*>")
            .expect("static regex compiles")
    })
}

fn newline_run_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n{3,}").expect("static regex compiles"))
}

/// Strip `<think>…</think>` and remaining angle-bracket tagged blocks,
/// collapse runs of three or more newlines to exactly two, trim.
pub fn clean_particle_text(raw: &str) -> String {
    let without_think = think_block_re().replace_all(raw, "");
    let without_tags = tagged_block_re().replace_all(&without_think, "");
    let collapsed = newline_run_re().replace_all(&without_tags, "\n\n");
    collapsed.trim().to_string()
}

/// Render retrieved memory snippets for the reply, or the sentinel when the
/// retrieval came back empty.
pub fn render_memory_context(hits: &[lyra_embed::MemoryHit]) -> String {
    if hits.is_empty() {
        return NO_MEMORIES_SENTINEL.to_string();
    }

    let lines = hits
        .iter()
        .enumerate()
        .map(|(i, hit)| format!("{}. {} (relevance: {:.2})", i + 1, hit.content, hit.score))
        .collect::<Vec<_>>()
        .join("\n");
    format!("Relevant memories:\n{lines}")
}

/// Collapse the three contributions into the final reply:
///
/// 1. clean the particle text;
/// 2. "returning customer" in the wave summary prepends a welcome;
/// 3. a dominant non-neutral wave emotion appends a resonance sentence;
/// 4. wave-known prior interactions prepend the continuity prefix;
/// 5. a non-sentinel memory context appends the shared-memories block.
pub fn synthesize(particle_text: &str, wave: &WaveAnalysis, memory_context: &str) -> String {
    let mut reply = clean_particle_text(particle_text);

    if wave
        .context_summary
        .to_lowercase()
        .contains("returning customer")
    {
        reply = format!("Welcome back! {reply}");
    }

    let dominant = wave.dominant_emotion();
    if dominant != "neutral" {
        reply.push_str(&format!(
            " I can sense your {dominant} energy and I'm here with you."
        ));
    }

    if !wave.relevant_memories.is_empty() {
        reply = format!("Based on our previous interactions, {reply}");
    }

    if memory_context != NO_MEMORIES_SENTINEL {
        reply.push_str(&format!(" Drawing from our shared memories: {memory_context}"));
    }

    reply
}

/// Metadata-only personalisation estimate for a collapse.
///
/// `emotion_axes` is the number of entries in the wave emotion profile.
pub fn personalization_score(
    particle_confidence: f64,
    emotion_axes: usize,
    particle_time: Duration,
    wave_time: Duration,
) -> f64 {
    let mut level = 0.3 + particle_confidence * 0.3;

    if emotion_axes > 3 {
        level += 0.2;
    } else if emotion_axes > 1 {
        level += 0.1;
    }

    if particle_time < Duration::from_secs(5) && wave_time < Duration::from_secs(3) {
        level += 0.2;
    }

    level.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wave::{WaveMemory, fallback_wave, parse_wave_response};
    use lyra_embed::MemoryHit;

    fn neutral_wave_no_memories() -> WaveAnalysis {
        fallback_wave("u")
    }

    #[test]
    fn think_blocks_are_stripped() {
        assert_eq!(clean_particle_text("<think>x</think>Hi!"), "Hi!");
        assert_eq!(
            clean_particle_text("<think>line\nline</think>Answer"),
            "Answer"
        );
    }

    #[test]
    fn other_tagged_blocks_are_stripped() {
        assert_eq!(
            clean_particle_text("<scratch>notes</scratch>Reply text"),
            "Reply text"
        );
    }

    #[test]
    fn newline_runs_collapse_to_two() {
        assert_eq!(clean_particle_text("a\n\n\n\nb"), "a\n\nb");
        assert_eq!(clean_particle_text("a\n\nb"), "a\n\nb");
    }

    #[test]
    fn returning_customer_prepends_welcome() {
        let wave = WaveAnalysis {
            context_summary: "This is a RETURNING customer".to_string(),
            emotion_profile: vec![("neutral".to_string(), 1.0)],
            relevant_memories: Vec::new(),
        };
        let reply = synthesize("Hello.", &wave, NO_MEMORIES_SENTINEL);
        assert_eq!(reply, "Welcome back! Hello.");
    }

    #[test]
    fn non_neutral_emotion_appends_resonance() {
        let wave = WaveAnalysis {
            context_summary: String::new(),
            emotion_profile: vec![("happy".to_string(), 0.8)],
            relevant_memories: Vec::new(),
        };
        let reply = synthesize("Hello.", &wave, NO_MEMORIES_SENTINEL);
        assert_eq!(
            reply,
            "Hello. I can sense your happy energy and I'm here with you."
        );
    }

    #[test]
    fn neutral_emotion_appends_nothing() {
        let reply = synthesize("Hello.", &neutral_wave_no_memories(), NO_MEMORIES_SENTINEL);
        assert_eq!(reply, "Hello.");
    }

    #[test]
    fn memories_prepend_continuity_prefix() {
        let wave = WaveAnalysis {
            context_summary: String::new(),
            emotion_profile: vec![("neutral".to_string(), 1.0)],
            relevant_memories: vec![WaveMemory {
                content: "c".to_string(),
                timestamp: "t".to_string(),
            }],
        };
        let reply = synthesize("Hello.", &wave, NO_MEMORIES_SENTINEL);
        assert_eq!(reply, "Based on our previous interactions, Hello.");
    }

    #[test]
    fn full_collapse_matches_reference_scenario() {
        let wave = parse_wave_response("Context: this is a returning customer with history");
        let hits = vec![MemoryHit {
            mem_id: "m1".to_string(),
            score: 0.82,
            content: "User likes quantum AI and superposition concepts".to_string(),
            timestamp: "t".to_string(),
        }];
        let memory_context = render_memory_context(&hits);

        let reply = synthesize("<think>x</think>Hi!", &wave, &memory_context);
        assert_eq!(
            reply,
            "Based on our previous interactions, Welcome back! Hi! \
             Drawing from our shared memories: Relevant memories:\n\
             1. User likes quantum AI and superposition concepts (relevance: 0.82)"
        );
    }

    #[test]
    fn empty_hits_render_the_sentinel() {
        assert_eq!(render_memory_context(&[]), NO_MEMORIES_SENTINEL);
    }

    #[test]
    fn synthesis_is_pure() {
        let wave = parse_wave_response("neutral words");
        let a = synthesize("Some reply", &wave, NO_MEMORIES_SENTINEL);
        let b = synthesize("Some reply", &wave, NO_MEMORIES_SENTINEL);
        assert_eq!(a, b);
    }

    #[test]
    fn personalization_rewards_confidence_complexity_and_speed() {
        let fast = Duration::from_secs(1);
        let slow = Duration::from_secs(60);

        // Base + confidence only.
        let base = personalization_score(0.5, 1, slow, slow);
        assert!((base - 0.45).abs() < 1e-9);

        // Two emotions adds 0.1; fast calls add 0.2.
        let rich = personalization_score(0.85, 2, fast, fast);
        assert!((rich - (0.3 + 0.255 + 0.1 + 0.2)).abs() < 1e-9);

        // Clamped at 1.0.
        let maxed = personalization_score(1.0, 5, fast, fast);
        assert!(maxed <= 1.0);
    }
}
