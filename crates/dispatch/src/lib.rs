//! Per-request orchestration: the observer that fans a message out to the
//! particle, wave, and embedding backends and collapses their outputs into a
//! single reply.
//!
//! One dispatch is a unit that can be awaited or cancelled.  Sub-call
//! failures are recovered locally by substitution and surface only as
//! `degraded` metadata; the dispatcher itself fails a request only on
//! cancellation or when the request deadline is spent with nothing to say.

mod dispatcher;
mod prompts;
mod synthesis;
mod wave;

pub use dispatcher::{
    DispatchError, DispatchMetadata, DispatchOutcome, DispatchSettings, DispatchState, Dispatcher,
    ObserverMetrics,
};
pub use synthesis::{clean_particle_text, personalization_score, render_memory_context, synthesize};
pub use wave::{NO_MEMORIES_SENTINEL, WaveAnalysis, WaveMemory, fallback_wave, parse_wave_response};
