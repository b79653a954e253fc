//! Error types for the revenant heap analyzer.
//!
//! Structured error taxonomy built on thiserror. Every fatal condition a
//! caller can observe maps to one variant here; benign outcomes (target
//! already collected, target unreachable) are never errors.

use std::collections::TryReserveError;
use thiserror::Error;

/// Main error type for analyzer operations.
#[derive(Debug, Error)]
pub enum AnalyzerError {
    /// Corrupt or unrecognized heap dump
    #[error("Invalid dump format: {0}")]
    InvalidFormat(String),

    /// Parse error with location information
    #[error("Parse error at offset {offset:#x}: {message}")]
    ParseError { offset: u64, message: String },

    /// Dump uses a record layout this analyzer does not understand
    #[error("Unsupported dump version: {0}")]
    UnsupportedVersion(String),

    /// No marker record carries the requested key. A benign race between
    /// capture and analysis; callers treat it as "couldn't verify", not
    /// "definitely safe".
    #[error("Marker record not found: {0}")]
    MarkerNotFound(String),

    /// Wall-clock budget exceeded
    #[error("Analysis timeout after {seconds}s")]
    Timeout { seconds: u64 },

    /// Allocation failure while building the graph or search state
    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AnalyzerError {
    /// Stable machine-readable code, used in serialized failure reports so
    /// callers can distinguish error classes without string matching.
    pub fn code(&self) -> &'static str {
        match self {
            AnalyzerError::InvalidFormat(_) => "invalid_format",
            AnalyzerError::ParseError { .. } => "parse_error",
            AnalyzerError::UnsupportedVersion(_) => "unsupported_version",
            AnalyzerError::MarkerNotFound(_) => "marker_not_found",
            AnalyzerError::Timeout { .. } => "timeout",
            AnalyzerError::OutOfMemory(_) => "out_of_memory",
            AnalyzerError::Io(_) => "io_error",
        }
    }
}

impl From<TryReserveError> for AnalyzerError {
    fn from(err: TryReserveError) -> Self {
        AnalyzerError::OutOfMemory(err.to_string())
    }
}

/// Result type alias for analyzer operations
pub type Result<T> = std::result::Result<T, AnalyzerError>;
