//! Job-level composition used by an outer transport
//!
//! Ingests uploads, scopes a progress channel per job, runs the orchestrator
//! and keeps display metadata for the project history.

pub mod naming;
pub mod separation;

pub use naming::{ascii_prefix, project_id_for, sanitize_filename};
pub use separation::{
    list_stems, load_catalog, open_store, ProcessOutcome, ProjectSummary, SeparationService,
    UploadRequest,
};
