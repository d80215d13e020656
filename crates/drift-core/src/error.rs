//! Error types for drift-core.

use thiserror::Error;

/// Errors that can occur while handling client input.
///
/// Nothing here is fatal: the relay absorbs these per-connection,
/// typically by dropping the offending frame.
#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed client frame: {0}")]
    MalformedFrame(String),
}

/// Result type alias for drift-core operations.
pub type Result<T> = std::result::Result<T, Error>;
