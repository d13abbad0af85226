//! Structured error types for the analyzer.
//!
//! Using thiserror for automatic Display implementation and error chaining.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzeError {
    /// The trace file held no `TRACE:` line at all.
    #[error("incomplete input")]
    IncompleteInput,

    /// The runtime wrote `ERROR:` lines; the data cannot be trusted.
    #[error("instrumentation reported errors")]
    InstrumentationFailed,

    #[error("failed to spawn {command} for {object}: {source}")]
    ResolverSpawn { command: String, object: String, source: std::io::Error },

    #[error("symbol resolver pipe closed unexpectedly for {object}")]
    ResolverPipe { object: String },

    #[error("function {0} not found")]
    FunctionNotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
