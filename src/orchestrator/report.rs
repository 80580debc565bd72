use serde::{Deserialize, Serialize};

use crate::catalog::ModuleId;
use crate::core::errors::StemflowError;

/// Per-module error entry of a batch run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleFailure {
    pub module: ModuleId,
    pub category: String,
    pub message: String,
}

impl ModuleFailure {
    pub fn new(module: impl Into<ModuleId>, error: &StemflowError) -> Self {
        Self {
            module: module.into(),
            category: error.category().to_string(),
            message: error.to_string(),
        }
    }
}

/// Outcome of `run_many`: successes and failures always travel together
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// Requested modules that are complete, cached ones included
    pub completed: Vec<ModuleId>,
    pub failures: Vec<ModuleFailure>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failed_modules(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.module.as_str()).collect()
    }
}
