//! Engine error types
//!
//! Decode and analysis failures reach callers through `EngineEvent::Error`.
//! Cache failures are recovered inside the cache store and only logged.
//! `Cancelled` is a normal terminal state and never produces an event.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while generating waveform artifacts
#[derive(Error, Debug)]
pub enum EngineError {
    /// No compiled-in decoder understands this file
    #[error("No decoder available for '{}': {reason}", path.display())]
    DecodeUnavailable { path: PathBuf, reason: String },

    /// File is missing, unreadable, truncated or malformed
    #[error("Failed to decode '{}': {reason}", path.display())]
    DecodeFailed { path: PathBuf, reason: String },

    /// Cache index could not be parsed
    #[error("Cache index '{}' is corrupt: {reason}", path.display())]
    CacheCorrupt { path: PathBuf, reason: String },

    /// Spectral backend not compiled in
    #[error("Spectral analysis unavailable: {0}")]
    AnalysisUnavailable(String),

    /// Job was cancelled before completion
    #[error("Generation cancelled")]
    Cancelled,

    /// Worker did not stop within the join timeout
    #[error("Worker for '{}' did not stop within {waited_ms} ms", path.display())]
    GenerationTimeout { path: PathBuf, waited_ms: u64 },

    /// Worker thread could not be spawned
    #[error("Failed to spawn worker: {0}")]
    Spawn(String),

    /// Engine configuration rejected at construction
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Error category carried on error events
///
/// A `Copy` mirror of the `EngineError` variants so events stay cheap to
/// clone and compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    DecodeUnavailable,
    DecodeFailed,
    CacheCorrupt,
    AnalysisUnavailable,
    Cancelled,
    GenerationTimeout,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DecodeUnavailable => write!(f, "Decode Unavailable"),
            Self::DecodeFailed => write!(f, "Decode Failed"),
            Self::CacheCorrupt => write!(f, "Cache Corrupt"),
            Self::AnalysisUnavailable => write!(f, "Analysis Unavailable"),
            Self::Cancelled => write!(f, "Cancelled"),
            Self::GenerationTimeout => write!(f, "Generation Timeout"),
            Self::Internal => write!(f, "Internal"),
        }
    }
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DecodeUnavailable { .. } => ErrorKind::DecodeUnavailable,
            Self::DecodeFailed { .. } => ErrorKind::DecodeFailed,
            Self::CacheCorrupt { .. } => ErrorKind::CacheCorrupt,
            Self::AnalysisUnavailable(_) => ErrorKind::AnalysisUnavailable,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::GenerationTimeout { .. } => ErrorKind::GenerationTimeout,
            Self::Spawn(_) | Self::Config(_) | Self::Io(_) | Self::Serialization(_) => {
                ErrorKind::Internal
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        let err = EngineError::DecodeFailed {
            path: PathBuf::from("x.wav"),
            reason: "truncated".into(),
        };
        assert_eq!(err.kind(), ErrorKind::DecodeFailed);
        assert!(err.to_string().contains("x.wav"));
        assert!(EngineError::Cancelled.is_cancelled());
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(ErrorKind::DecodeUnavailable.to_string(), "Decode Unavailable");
        assert_eq!(ErrorKind::GenerationTimeout.to_string(), "Generation Timeout");
    }
}
