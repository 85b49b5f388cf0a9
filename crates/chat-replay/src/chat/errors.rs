use std::path::PathBuf;

/// Failure from producing a reply, validating inputs, or reading the example cache.
///
/// Errors fall into two groups, and which group tells you when you'll see them:
///
/// 1. **Configuration** ([`SchemaMismatch`](ChatError::SchemaMismatch),
///    [`InvalidFunctionSignature`](ChatError::InvalidFunctionSignature)) surface while
///    building a [`ResponseProducer`](crate::ResponseProducer) or
///    [`ChatInterface`](crate::ChatInterface), or when a call passes extras that don't
///    fit the declared schema.
/// 2. **Runtime** (everything else) surface from `produce`, session events and cache
///    lookups.
///
/// The type is `Clone` so that a failed cache slot can hand the same error to every
/// later `load` of that index. Nothing in this crate retries on any variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    /// Extra parameters don't match the declared schema (count or kind).
    #[error("extra parameters do not match the declared schema: {reason}")]
    SchemaMismatch { reason: String },

    /// The declared parameter count isn't `message, history` plus one per extra.
    #[error("function declares {declared} parameter(s), expected {expected}")]
    InvalidFunctionSignature { declared: usize, expected: usize },

    /// The wrapped function failed. `message` holds the rendered error chain.
    #[error("producer `{producer}` failed: {message}")]
    ProducerFailure { producer: String, message: String },

    #[error("example index {index} is out of range for {len} example(s)")]
    IndexOutOfRange { index: usize, len: usize },

    /// The slot for this example is empty or still being built.
    #[error("example {index} has not been cached")]
    CacheNotBuilt { index: usize },

    /// Retry or undo was requested on a session with no turns.
    #[error("conversation history is empty")]
    EmptyHistory,

    /// The persistence backend couldn't read or write a cache document.
    #[error("cache store failure at {}: {message}", .path.display())]
    Store { path: PathBuf, message: String },
}

impl ChatError {
    pub(crate) fn producer_failure(producer: &str, error: &anyhow::Error) -> Self {
        Self::ProducerFailure {
            producer: producer.to_string(),
            message: format!("{error:#}"),
        }
    }

    pub(crate) fn store(path: impl Into<PathBuf>, error: impl std::fmt::Display) -> Self {
        Self::Store {
            path: path.into(),
            message: error.to_string(),
        }
    }

    /// True for the variants raised before any request can be served.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::SchemaMismatch { .. } | Self::InvalidFunctionSignature { .. }
        )
    }
}
