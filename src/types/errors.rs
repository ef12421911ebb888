//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation and provide
//! clear error messages with context.

use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the tick kernel.
///
/// There is no variant for expired topic messages: they are pruned silently and
/// only show up in tracing output.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed spawn request. Fatal to that spawn attempt only.
    #[error("config error: {0}")]
    Config(String),

    /// A routine failed (returned an error or panicked) during its invocation.
    #[error("routine fault: {0}")]
    RoutineFault(String),

    /// A handle held by a consumer no longer resolves.
    #[error("stale reference: {0}")]
    StaleReference(String),

    /// Process or topic not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Persisted state could not be rehydrated.
    #[error("snapshot error: {0}")]
    Snapshot(String),

    /// Internal errors.
    #[error("internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

// Convenience constructors
impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn routine_fault(msg: impl Into<String>) -> Self {
        Self::RoutineFault(msg.into())
    }

    pub fn stale_reference(msg: impl Into<String>) -> Self {
        Self::StaleReference(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn snapshot(msg: impl Into<String>) -> Self {
        Self::Snapshot(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_category() {
        assert_eq!(
            Error::config("priority must be finite").to_string(),
            "config error: priority must be finite"
        );
        assert_eq!(
            Error::stale_reference("lab-7").to_string(),
            "stale reference: lab-7"
        );
    }

    #[test]
    fn test_serde_json_error_converts() {
        let err: Error = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
