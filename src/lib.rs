// Core infrastructure modules
pub mod core;

pub mod catalog; // Module definitions and dependency chains
pub mod ledger; // Per-project execution ledger
pub mod orchestrator; // Idempotent module execution
pub mod progress; // Live progress channels
pub mod service; // Job-level composition

// Re-exports for convenience
pub use catalog::{Catalog, ModuleDefinition, ModuleId, StemKey};
pub use crate::core::config::{Config, LedgerBackend};
pub use crate::core::errors::{CatalogError, LedgerError, Result, StemflowError};
pub use ledger::{
    DisplayMetadata, JsonLedgerStore, LedgerStore, ModuleResult, Project, ProjectState,
    SledLedgerStore,
};
pub use orchestrator::{
    CommandExecutor, ExecutionObserver, Executor, ModuleFailure, Orchestrator, RunReport,
    SeparationRequest,
};
pub use progress::{JobChannel, ProgressBus, ProgressEvent, ProgressSink};
pub use service::{ProcessOutcome, ProjectSummary, SeparationService, UploadRequest};
