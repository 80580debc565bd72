//! Orchestrator
//!
//! Resolves requested modules against a project's ledger, materializes
//! missing ancestors, and drives the executor capability.

pub mod command;
pub mod executor;
pub mod orchestrator;
pub mod report;

pub use command::CommandExecutor;
pub use executor::{ExecutionObserver, Executor, SeparationRequest};
pub use orchestrator::{AttemptState, Orchestrator};
pub use report::{ModuleFailure, RunReport};
