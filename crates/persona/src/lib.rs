//! Deterministic personality scoring.
//!
//! A static lexicon maps words to emotional-axis weights; accumulated weights
//! select which personality fragments speak for a given message.  Everything
//! in this crate is pure — no I/O, no clocks, no randomness — so repeated
//! calls on the same text yield byte-identical results.

mod axes;
mod fragments;
mod lexicon;
mod prompt;
mod scorer;

pub use axes::{EmotionAxis, EmotionState};
pub use fragments::{FragmentActivation, FragmentId, FragmentProfile, fragment_profile};
pub use prompt::{PARTICLE_SYSTEM_PROMPT, persona_prompt_block};
pub use scorer::{ScoreOutcome, score};
