// ABOUTME: Library root for oracle-duckdb-loader
// ABOUTME: Copies an Oracle schema into DuckDB and reconciles the result

pub mod config;
pub mod error;
pub mod filters;
pub mod loader;
pub mod report;
pub mod source;
pub mod target;
pub mod transfer;
pub mod trigger;
pub mod typemap;
pub mod utils;
pub mod views;

pub use error::{LoaderError, Result};
pub use loader::{LoadMode, LoadOrchestrator, RunSummary};
pub use trigger::{RefreshTrigger, ShutdownHook, TriggerResult};
