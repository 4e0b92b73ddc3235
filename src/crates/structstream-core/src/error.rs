//! Error types for the streaming engine
//!
//! All errors implement `std::error::Error` via the `thiserror` crate and
//! expose a stable discriminator through [`EngineError::kind`].
//!
//! # Error Hierarchy
//!
//! ```text
//! EngineError
//! ├── Provider            - Upstream source failures (already-opened stream)
//! ├── Streaming           - Lexical and grammatical stream errors
//! ├── SchemaResolution    - Schema lacks a required capability
//! ├── SnapshotValidation  - Accumulated snapshot failed schema validation
//! └── Observer            - User snapshot callback raised
//! ```
//!
//! Lexical and grammatical errors terminate the offending pipeline
//! deterministically; consumers receive the error in-order after any
//! snapshots already emitted. The engine never retries.

use crate::schema::SchemaIssue;
use thiserror::Error;

/// Convenience result type using [`EngineError`].
pub type Result<T> = std::result::Result<T, EngineError>;

/// Lexical or grammatical failure while consuming the token stream.
///
/// `Lexical` covers malformed UTF-8 after stream end, bad escapes, invalid
/// keyword characters, and unexpected characters outside strings. `Grammar`
/// covers tokens that are inadmissible in the recognizer's current state,
/// a non-object root under strict-root, and unterminated containers at
/// end-of-stream.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StreamingError {
    /// The byte/character stream is not valid JSON lexically.
    #[error("lexical error at byte {offset}: {reason}")]
    Lexical {
        /// Byte offset of the offending input (decoded stream position)
        offset: u64,
        /// Human-readable failure description
        reason: String,
    },

    /// A lexically valid token arrived in a state that does not admit it.
    #[error("grammar error in state {state}: {reason}")]
    Grammar {
        /// Recognizer state name at the point of failure
        state: &'static str,
        /// Human-readable failure description
        reason: String,
    },
}

impl StreamingError {
    /// Construct a lexical error.
    pub fn lexical(offset: u64, reason: impl Into<String>) -> Self {
        StreamingError::Lexical {
            offset,
            reason: reason.into(),
        }
    }

    /// Construct a grammatical error.
    pub fn grammar(state: &'static str, reason: impl Into<String>) -> Self {
        StreamingError::Grammar {
            state,
            reason: reason.into(),
        }
    }

    /// Whether this error was raised by the tokenizer.
    pub fn is_lexical(&self) -> bool {
        matches!(self, StreamingError::Lexical { .. })
    }
}

/// The supplied schema does not provide a capability the engine requires.
///
/// Raised at pipeline construction, before any bytes are consumed: the root
/// schema must be object-shaped and enumerable.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("schema resolution failed: {reason}")]
pub struct SchemaResolutionError {
    /// What capability was missing or which shape was unexpected
    pub reason: String,
}

impl SchemaResolutionError {
    /// Construct a resolution error.
    pub fn new(reason: impl Into<String>) -> Self {
        SchemaResolutionError {
            reason: reason.into(),
        }
    }
}

/// The accumulated snapshot failed schema validation.
///
/// Only produced in `on-complete` and `final` validation modes. Carries the
/// schema library's issues verbatim.
#[derive(Debug, Clone, Error)]
#[error("snapshot validation failed: {reason}")]
pub struct SnapshotValidationError {
    /// Summary of the failure
    pub reason: String,
    /// Library-native issues, in schema traversal order
    pub issues: Vec<SchemaIssue>,
}

impl SnapshotValidationError {
    /// Construct a validation error from schema issues.
    pub fn new(reason: impl Into<String>, issues: Vec<SchemaIssue>) -> Self {
        SnapshotValidationError {
            reason: reason.into(),
            issues,
        }
    }
}

/// Umbrella error for everything a snapshot stream can yield.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The upstream source failed (network, provider, transport).
    #[error("provider error: {0}")]
    Provider(String),

    /// Lexical or grammatical stream failure.
    #[error(transparent)]
    Streaming(#[from] StreamingError),

    /// The schema lacks a required introspection capability.
    #[error(transparent)]
    SchemaResolution(#[from] SchemaResolutionError),

    /// The final or per-completion validation rejected the snapshot.
    #[error(transparent)]
    SnapshotValidation(#[from] SnapshotValidationError),

    /// A user-provided snapshot observer returned an error.
    #[error("snapshot observer failed: {0}")]
    Observer(#[source] anyhow::Error),
}

impl EngineError {
    /// Stable discriminator for matching without destructuring.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Provider(_) => "provider",
            EngineError::Streaming(_) => "streaming",
            EngineError::SchemaResolution(_) => "schema-resolution",
            EngineError::SnapshotValidation(_) => "snapshot-validation",
            EngineError::Observer(_) => "observer",
        }
    }

    /// Whether this error terminated the stream for lexical/grammatical reasons.
    pub fn is_streaming(&self) -> bool {
        matches!(self, EngineError::Streaming(_))
    }

    /// Whether this error is a validation rejection.
    pub fn is_validation(&self) -> bool {
        matches!(self, EngineError::SnapshotValidation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StreamingError::lexical(12, "invalid escape");
        assert_eq!(err.to_string(), "lexical error at byte 12: invalid escape");

        let err = StreamingError::grammar("KEY", "expected string key");
        assert_eq!(
            err.to_string(),
            "grammar error in state KEY: expected string key"
        );
    }

    #[test]
    fn test_kind_discriminator() {
        let err: EngineError = StreamingError::lexical(0, "x").into();
        assert_eq!(err.kind(), "streaming");
        assert!(err.is_streaming());

        let err: EngineError = SchemaResolutionError::new("no shape").into();
        assert_eq!(err.kind(), "schema-resolution");

        let err: EngineError = SnapshotValidationError::new("bad", vec![]).into();
        assert_eq!(err.kind(), "snapshot-validation");
        assert!(err.is_validation());
    }

    #[test]
    fn test_cause_chain_preserved() {
        use std::error::Error as _;

        let inner = anyhow::anyhow!("callback exploded");
        let err = EngineError::Observer(inner);
        assert!(err.source().is_some());
        assert_eq!(err.kind(), "observer");
    }
}
