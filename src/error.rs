//! Error types for the Smaug memory analyzer.
//!
//! This module provides structured error handling using thiserror. Only the
//! two mandatory toolchain inputs (the section listing and the symbol
//! listing) produce fatal errors; every optional stage degrades to a no-op
//! and is logged instead of erroring.

use thiserror::Error;

/// Main error type for Smaug operations.
#[derive(Debug, Error)]
pub enum SmaugError {
    /// A required input file does not exist.
    #[error("Missing input: {0}")]
    MissingInput(String),

    /// A mandatory toolchain listing could not be parsed.
    #[error("Unparsable output from {tool}: {message}")]
    ToolOutput { tool: String, message: String },

    /// A toolchain invocation failed outright (spawn error or non-zero exit).
    #[error("Tool {tool} failed: {message}")]
    ToolFailed { tool: String, message: String },

    /// A toolchain invocation exceeded its bounded timeout.
    #[error("Tool {tool} timed out after {seconds}s")]
    Timeout { tool: String, seconds: u64 },

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Report serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for Smaug operations
pub type Result<T> = std::result::Result<T, SmaugError>;
