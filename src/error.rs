// ABOUTME: Error types shared by the load engine
// ABOUTME: Run-scoped failures vs. per-object failures that end up in the report

use thiserror::Error;

/// Failures that abort a whole run (or prevent one from starting).
///
/// Per-object failures (one table, view or sequence) never surface through
/// this type; they are converted into report statuses inside their phase.
#[derive(Error, Debug)]
pub enum LoaderError {
    /// Invalid or missing configuration, detected before any run begins
    #[error("Configuration error: {0}")]
    Config(String),

    /// Catalog discovery failed, so there is nothing to process
    #[error("Discovery failed for schema {schema}: {source}")]
    Discovery {
        schema: String,
        #[source]
        source: anyhow::Error,
    },

    /// Source database could not be reached
    #[error("Source database error: {0}")]
    Source(#[source] anyhow::Error),

    /// Target database could not be opened or used
    #[error("Target database error: {0}")]
    Target(#[from] duckdb::Error),

    /// A blocking worker panicked or was cancelled by the runtime
    #[error("Worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl LoaderError {
    pub fn config(message: impl Into<String>) -> Self {
        LoaderError::Config(message.into())
    }

    pub fn discovery(schema: impl Into<String>, source: anyhow::Error) -> Self {
        LoaderError::Discovery {
            schema: schema.into(),
            source,
        }
    }
}

/// Failure to translate one view definition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TranslateError {
    #[error("view SQL is empty after cleaning")]
    Empty,
}

pub type Result<T> = std::result::Result<T, LoaderError>;
