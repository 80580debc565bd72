use std::path::PathBuf;
use thiserror::Error;

/// Unified error type for the stemflow library
#[derive(Debug, Error)]
pub enum StemflowError {
    /// Requested module id is absent from the catalog
    #[error("Unknown module: {module}")]
    UnknownModule { module: String },

    /// No ledger snapshot exists for the project
    #[error("Project not found: {project_id}")]
    ProjectNotFound { project_id: String },

    /// A ledger snapshot exists but cannot be parsed
    #[error("Corrupt ledger for project {project_id}")]
    CorruptLedger {
        project_id: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Root module requested but the project has no original input
    #[error("Original input is missing for module {module}")]
    MissingOriginalInput { module: String },

    /// Parent ran but did not produce the stem this module consumes
    #[error(
        "Module '{module}' requires '{stem}' from '{parent}', but it was not found. Available: {available:?}"
    )]
    DependencyOutputMissing {
        module: String,
        parent: String,
        stem: String,
        available: Vec<String>,
    },

    /// The executor capability failed
    #[error("Execution failed for module {module}: {source}")]
    Execution {
        module: String,
        #[source]
        source: anyhow::Error,
    },

    /// Ledger persistence failed
    #[error("Ledger storage failed during {operation}")]
    Storage {
        operation: String,
        #[source]
        source: LedgerError,
    },

    /// Invalid configuration value
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Progress channel misuse (unknown job, closed channel)
    #[error("Channel error: {job_id} - {message}")]
    Channel { job_id: String, message: String },

    /// Filesystem work done by the service layer
    #[error("IO operation failed: {operation}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },
}

impl StemflowError {
    pub fn unknown_module<S: Into<String>>(module: S) -> Self {
        Self::UnknownModule {
            module: module.into(),
        }
    }

    pub fn project_not_found<S: Into<String>>(project_id: S) -> Self {
        Self::ProjectNotFound {
            project_id: project_id.into(),
        }
    }

    pub fn corrupt_ledger<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
        project_id: S,
        source: E,
    ) -> Self {
        Self::CorruptLedger {
            project_id: project_id.into(),
            source: Box::new(source),
        }
    }

    pub fn missing_original_input<S: Into<String>>(module: S) -> Self {
        Self::MissingOriginalInput {
            module: module.into(),
        }
    }

    pub fn execution<S: Into<String>>(module: S, source: anyhow::Error) -> Self {
        Self::Execution {
            module: module.into(),
            source,
        }
    }

    pub fn storage<S: Into<String>>(operation: S, source: LedgerError) -> Self {
        Self::Storage {
            operation: operation.into(),
            source,
        }
    }

    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn channel<S: Into<String>, M: Into<String>>(job_id: S, message: M) -> Self {
        Self::Channel {
            job_id: job_id.into(),
            message: message.into(),
        }
    }

    pub fn io<S: Into<String>>(operation: S, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    /// Errors that abort the whole request rather than a single module
    pub fn is_fatal_to_request(&self) -> bool {
        matches!(
            self,
            Self::ProjectNotFound { .. } | Self::CorruptLedger { .. } | Self::Storage { .. }
        )
    }

    /// Get error category for reports and logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::UnknownModule { .. } | Self::Configuration { .. } => "configuration",
            Self::ProjectNotFound { .. }
            | Self::CorruptLedger { .. }
            | Self::MissingOriginalInput { .. } => "state",
            Self::DependencyOutputMissing { .. } => "dependency",
            Self::Execution { .. } => "execution",
            Self::Storage { .. } | Self::Io { .. } => "storage",
            Self::Channel { .. } => "channel",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, StemflowError>;

/// Errors raised while building a catalog
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Duplicate module id: {0}")]
    DuplicateModule(String),

    #[error("Module '{module}' depends on unknown module '{depends_on}'")]
    DanglingDependency { module: String, depends_on: String },

    #[error("Module '{0}' must declare input_stem together with depends_on")]
    InputStemMismatch(String),

    #[error("Module '{module}' consumes stem '{stem}' which '{parent}' does not declare")]
    UndeclaredInputStem {
        module: String,
        parent: String,
        stem: String,
    },

    #[error("Dependency relation contains a cycle")]
    Cycle,

    #[error("Failed to read catalog {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse catalog: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Errors raised by ledger stores
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("Compression error: {0}")]
    Compression(std::io::Error),

    #[error("Path escapes the library root: {0}")]
    OutsideLibrary(PathBuf),
}

impl LedgerError {
    pub fn io<P: Into<PathBuf>>(path: P, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(StemflowError::unknown_module("x").category(), "configuration");
        assert_eq!(StemflowError::project_not_found("p").category(), "state");
        assert_eq!(StemflowError::missing_original_input("m").category(), "state");
        assert_eq!(
            StemflowError::execution("m", anyhow::anyhow!("boom")).category(),
            "execution"
        );
        let err = StemflowError::DependencyOutputMissing {
            module: "child".into(),
            parent: "root".into(),
            stem: "X".into(),
            available: vec!["Y".into()],
        };
        assert_eq!(err.category(), "dependency");
    }

    #[test]
    fn test_request_fatality() {
        assert!(StemflowError::project_not_found("p").is_fatal_to_request());
        assert!(!StemflowError::missing_original_input("m").is_fatal_to_request());
        assert!(!StemflowError::unknown_module("m").is_fatal_to_request());
    }

    #[test]
    fn test_dependency_message_lists_available_stems() {
        let err = StemflowError::DependencyOutputMissing {
            module: "child".into(),
            parent: "root".into(),
            stem: "X".into(),
            available: vec!["Y".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("'X'"));
        assert!(msg.contains("\"Y\""));
    }
}
