//! Prompt assembly for the particle and wave positions.

use lyra_persona::{FragmentActivation, ScoreOutcome, fragment_profile, persona_prompt_block};
use lyra_store::Profile;

use lyra_persona::EmotionAxis;

/// Build the user-side particle prompt: query, profile identity, recent
/// memory timeline, persona fusion block, active fragments and the
/// normalised emotional axes.
pub fn particle_prompt(
    user_id: &str,
    message: &str,
    profile: &Profile,
    recent_context_lines: usize,
    score: &ScoreOutcome,
) -> String {
    let memory_timeline = profile.recent_memory_timeline(recent_context_lines);
    let memory_block = if memory_timeline.is_empty() {
        "(no stored memories yet)".to_string()
    } else {
        memory_timeline.join("\n")
    };

    let persona_block = persona_prompt_block(&score.fragments);
    let fragments = render_fragments(&score.fragments);
    let axes = render_axes(score);

    format!(
        "PARTICLE POSITION - CREATIVE RESPONSE GENERATION\n\n\
         User Query: \"{message}\"\n\
         User ID: {user_id}\n\n\
         USER PROFILE:\n\
         Name: {name}\n\
         Age: {age}\n\
         Role: {role}\n\
         Cognitive Style: {cognitive}\n\
         Communication Style: {tone}\n\
         AI Relationship: {ai_role}\n\
         Expectation: {expectation}\n\n\
         MEMORY TIMELINE (Recent):\n{memory_block}\n\n\
         {persona_block}\n\n\
         Create a creative, deterministic response that embodies the active \
         personality fragments and addresses the user's query with emotional \
         resonance and recursive depth.\n\n\
         Active Fragments: {fragments}\n\
         Emotional Profile: {axes}\n\n\
         PARTICLE RESPONSE:",
        name = profile.basic_information.name,
        age = profile.basic_information.age,
        role = profile.basic_information.role,
        cognitive = profile.cognitive_profile.cognitive_style,
        tone = profile.communication_guidelines.tone,
        ai_role = profile.relationship_to_ai.role,
        expectation = profile.relationship_to_ai.expectation,
    )
}

/// Build the wave prompt: a short, conservative context-analysis request.
pub fn wave_prompt(user_id: &str, message: &str) -> String {
    format!(
        "WAVE POSITION - CONTEXT AND MEMORY ANALYSIS\n\n\
         User Query: \"{message}\"\n\
         User ID: {user_id}\n\n\
         Analyze the context, emotions, and memory patterns for this user. Provide:\n\
         1. Context summary\n\
         2. Emotion profile\n\
         3. Relevant memories\n\
         4. Interaction patterns\n\n\
         WAVE ANALYSIS:"
    )
}

fn render_fragments(fragments: &[FragmentActivation]) -> String {
    fragments
        .iter()
        .map(|activation| fragment_profile(activation.id).display_name)
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_axes(score: &ScoreOutcome) -> String {
    if score.emotions.is_zero() {
        return "(neutral)".to_string();
    }
    EmotionAxis::ALL
        .iter()
        .filter(|axis| score.emotions.weight(**axis) > 0.0)
        .map(|axis| format!("{}={:.2}", axis.name(), score.emotions.weight(*axis)))
        .collect::<Vec<_>>()
        .join(", ")
}
