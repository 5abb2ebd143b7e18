//! HTTP polling ingest modules and the fan-out manager that runs them (§4.7).

pub mod client;
pub mod manager;
pub mod patch_notes;

pub use client::build_client;
pub use manager::{IngestError, IngestManager, IngestModule, PollOutcome};
pub use patch_notes::RsiPatchNotesIngest;
