use chrono::{DateTime, Utc};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Entity store errors with user-friendly messages.
///
/// A missing feed or tree is not an error: lookups return `Option` (or an
/// empty [`StoredTree`]) so absence is handled as a normal case.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another writer holds the database lock
    #[error("The database is locked by another writer. Please retry the request.")]
    Locked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// A stored timestamp cannot be represented
    #[error("Stored timestamp {value} for {url} is out of range")]
    Timestamp { url: String, value: i64 },

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl StoreError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5): database is locked
        // SQLITE_LOCKED (6): database table is locked
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
        {
            return StoreError::Locked;
        }

        StoreError::Other(err)
    }
}

// ============================================================================
// Helper Types
// ============================================================================

/// Internal row type for Feed queries (used by sqlx FromRow)
/// Converts to Feed via into_feed() with timestamp validation
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FeedDbRow {
    pub url: String,
    pub title: String,
    pub link: Option<String>,
    pub updated: i64,
    pub checked: i64,
    pub next_update: i64,
    pub last_viewed: i64,
}

impl FeedDbRow {
    pub(crate) fn into_feed(self) -> Result<Feed, StoreError> {
        let url = self.url;
        let to_time = |value: i64| {
            DateTime::<Utc>::from_timestamp(value, 0).ok_or_else(|| StoreError::Timestamp {
                url: url.clone(),
                value,
            })
        };
        let updated = to_time(self.updated)?;
        let checked = to_time(self.checked)?;
        let next_update = to_time(self.next_update)?;
        let last_viewed = to_time(self.last_viewed)?;

        Ok(Feed {
            url,
            title: self.title,
            link: self.link,
            updated,
            checked,
            next_update,
            last_viewed,
        })
    }
}

/// Internal row type for Story queries
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct StoryDbRow {
    pub feed_url: String,
    pub id: String,
    pub title: String,
    pub link: Option<String>,
    pub summary: Option<String>,
    pub published: i64,
    pub created: i64,
}

impl StoryDbRow {
    pub(crate) fn into_story(self) -> Result<Story, StoreError> {
        let published = DateTime::<Utc>::from_timestamp(self.published, 0).ok_or(
            StoreError::Timestamp {
                url: self.feed_url.clone(),
                value: self.published,
            },
        )?;
        let created = DateTime::<Utc>::from_timestamp(self.created, 0).ok_or(
            StoreError::Timestamp {
                url: self.feed_url.clone(),
                value: self.created,
            },
        )?;

        Ok(Story {
            id: self.id,
            title: self.title,
            link: self.link,
            summary: self.summary,
            published,
            created,
        })
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// A syndicated feed, keyed by its canonical (fragment-free) URL.
///
/// Created once per unique URL by the resolver. The four timestamps drive
/// the update scheduler, which lives outside this crate; a freshly created
/// feed carries the Unix epoch in `updated`, `checked` and `next_update`
/// so the scheduler treats it as never checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feed {
    pub url: String,
    pub title: String,
    /// Site (HTML) link advertised by the feed document
    pub link: Option<String>,
    /// Last time new content was seen
    pub updated: DateTime<Utc>,
    /// Last time the feed was fetched
    pub checked: DateTime<Utc>,
    /// Next scheduled fetch
    pub next_update: DateTime<Utc>,
    /// Last time a user looked at the feed
    pub last_viewed: DateTime<Utc>,
}

/// A single item of a feed. Owned by exactly one [`Feed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Story {
    /// Stable identifier: the entry id, or a content hash when absent
    pub id: String,
    pub title: String,
    pub link: Option<String>,
    pub summary: Option<String>,
    pub published: DateTime<Utc>,
    /// When the story was first ingested
    pub created: DateTime<Utc>,
}

/// A user's serialized subscription tree together with its write version.
///
/// `version` is 0 when the user has never saved a tree; it increases by one
/// with every successful save and is the token for compare-and-swap writes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredTree {
    pub tree: Vec<u8>,
    pub version: i64,
}
