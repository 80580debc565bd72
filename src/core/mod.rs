// Infrastructure shared by the catalog, ledger, orchestrator and progress bus

pub mod config;
pub mod errors;

pub use config::{Config, LedgerBackend};
pub use errors::{CatalogError, LedgerError, Result, StemflowError};
