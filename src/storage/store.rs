//! Storage contracts consumed by the reconciliation core.
//!
//! The resolver and reconciler only see these traits; [`Database`] is the
//! production implementation and tests substitute in-memory doubles.
//!
//! [`Database`]: super::Database

use super::types::{Feed, StoreError, Story, StoredTree};

/// Keyed entity store for feeds and their stories.
#[allow(async_fn_in_trait)]
pub trait FeedStore: Send + Sync {
    /// Looks up a feed by canonical URL. `Ok(None)` means absent.
    async fn get_feed(&self, url: &str) -> Result<Option<Feed>, StoreError>;

    /// Writes a feed record. Last writer wins on a concurrent create.
    async fn put_feed(&self, feed: &Feed) -> Result<(), StoreError>;

    /// Persists stories for an existing feed, returning how many were written.
    async fn put_stories(&self, feed_url: &str, stories: &[Story]) -> Result<usize, StoreError>;
}

/// Per-user storage for serialized subscription trees.
#[allow(async_fn_in_trait)]
pub trait TreeStore: Send + Sync {
    /// Loads a user's tree. A user with no tree gets an empty blob at version 0.
    async fn load_tree(&self, user_id: &str) -> Result<StoredTree, StoreError>;

    /// Replaces a user's tree only if its version still equals `expected`.
    ///
    /// Returns `false` when another writer got there first; the caller should
    /// reload and reconcile again.
    async fn save_tree_if_version(
        &self,
        user_id: &str,
        tree: &[u8],
        expected: i64,
    ) -> Result<bool, StoreError>;
}
