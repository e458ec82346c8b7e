use thiserror::Error;

use crate::feed::{FetchError, OpmlError};
use crate::outline::{MergeError, TreeError};
use crate::storage::StoreError;

/// Errors surfaced by the resolver and the reconciler.
///
/// On any error the caller's subscription tree is left as it was; nothing
/// partial is returned.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The requested URL does not parse
    #[error("Invalid feed URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// The feed was unknown and fetching it failed
    #[error("Failed to fetch feed {url}: {source}")]
    FeedFetchFailed {
        url: String,
        #[source]
        source: FetchError,
    },

    /// Entity store failure, passed through unchanged
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The stored subscription tree could not be decoded or encoded
    #[error("Malformed subscription tree: {0}")]
    MalformedTree(#[from] TreeError),

    /// An incoming outline batch is structurally invalid
    #[error("Malformed outline: {0}")]
    Malformed(#[from] MergeError),

    /// The OPML document could not be read
    #[error("Invalid OPML document: {0}")]
    Opml(#[from] OpmlError),
}

impl ReconcileError {
    /// Whether repeating the same request may succeed.
    ///
    /// Fetch failures and a locked database are transient; malformed input
    /// is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            ReconcileError::FeedFetchFailed { .. } => true,
            ReconcileError::Store(StoreError::Locked) => true,
            _ => false,
        }
    }
}
