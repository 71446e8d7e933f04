//! Per-user profile and memory persistence.
//!
//! This crate is the only owner of the on-disk layout:
//!
//! ```text
//! <root>/<userId>/profile.json
//! <root>/<userId>/memories/<memId>.json
//! ```
//!
//! Memory files are written once and never modified.  Profile updates are
//! crash-safe: the new profile is written to a temp sibling, fsync'd, then
//! renamed over the live file, so readers never observe a partial profile.

mod profile;
mod store;

pub use profile::{
    BasicInformation, CognitiveProfile, CommunicationGuidelines, ContextHit, MemoryContextIndex,
    Profile, RelationshipToAi, StoreSummary, SystemMetadata,
};
pub use store::{NewMemory, ProfileStore, StoreError, StoredMemory};
