//! Embedding provider seam.
//!
//! Embedding generation is an external collaborator: the vault takes a
//! finished vector wherever possible, and only calls out through this
//! trait for text inserts/searches. Failures propagate to the caller;
//! the core never retries on the provider's behalf.

use std::fmt;

/// Produces embedding vectors for raw text.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed `text` into a vector of the provider's fixed dimension.
    fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;
}

/// Embedding generation failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The provider throttled the request; retry is the caller's call.
    RateLimited,
    /// Any other provider-side failure.
    Failed(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::RateLimited => write!(f, "rate limited"),
            ProviderError::Failed(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for ProviderError {}
