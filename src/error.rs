use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Transport, status or decode failure that survived every retry.
    #[error("fetch failed after {attempts} attempt(s): {cause}")]
    Fetch {
        attempts: u32,
        #[source]
        cause: FetchCause,
    },

    /// Rejected before any network call.
    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    /// The existing ledger cannot be merged into.
    #[error("ledger {path:?} has no '{column}' column")]
    Schema { path: PathBuf, column: String },

    #[error("ledger {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("ledger {path:?}: malformed CSV: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// Last underlying failure of a fetch attempt.
#[derive(Error, Debug)]
pub enum FetchCause {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP status {0}")]
    Status(reqwest::StatusCode),

    #[error("invalid JSON body: {0}")]
    Decode(#[from] serde_json::Error),
}

impl EngineError {
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        EngineError::Validation {
            field,
            reason: reason.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EngineError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        EngineError::Csv {
            path: path.into(),
            source,
        }
    }
}
