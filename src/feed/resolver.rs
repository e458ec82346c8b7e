use chrono::{DateTime, Utc};

use crate::error::ReconcileError;
use crate::feed::fetcher::FeedFetcher;
use crate::storage::{Feed, FeedStore};

/// Outcome of resolving a canonical feed URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub feed: Feed,
    /// `true` when this call created the feed record
    pub created: bool,
}

/// Maps a canonical feed URL to its feed record, creating the record the
/// first time the URL is seen.
///
/// Holds no state of its own; both collaborators are borrowed per request.
pub struct Resolver<'a, S, F> {
    store: &'a S,
    fetcher: &'a F,
}

impl<'a, S: FeedStore, F: FeedFetcher> Resolver<'a, S, F> {
    pub fn new(store: &'a S, fetcher: &'a F) -> Self {
        Self { store, fetcher }
    }

    /// Resolves an already-normalized feed URL.
    ///
    /// A known feed is returned unchanged without touching the network. An
    /// unknown feed is fetched once, stored with its schedule timestamps at
    /// the epoch ("never updated") and `last_viewed` at now, and its stories
    /// stored after it with `created` equal to `published`.
    ///
    /// Two concurrent first resolutions of the same URL may both fetch and
    /// both write; the store keeps the last write.
    ///
    /// # Errors
    ///
    /// - [`ReconcileError::FeedFetchFailed`] if the feed is unknown and the
    ///   fetch fails; nothing is written.
    /// - [`ReconcileError::Store`] for any store failure.
    pub async fn resolve(&self, url: &str) -> Result<Resolved, ReconcileError> {
        if let Some(feed) = self.store.get_feed(url).await? {
            tracing::debug!(url = %url, "Feed already known");
            return Ok(Resolved {
                feed,
                created: false,
            });
        }

        let fetched = self
            .fetcher
            .fetch(url, url)
            .await
            .map_err(|source| ReconcileError::FeedFetchFailed {
                url: url.to_string(),
                source,
            })?;

        let never = DateTime::<Utc>::UNIX_EPOCH;
        let feed = Feed {
            url: url.to_string(),
            title: fetched.title,
            link: fetched.link,
            updated: never,
            checked: never,
            next_update: never,
            last_viewed: Utc::now(),
        };
        self.store.put_feed(&feed).await?;

        let mut stories = fetched.stories;
        for story in &mut stories {
            story.created = story.published;
        }
        let stored = self.store.put_stories(url, &stories).await?;

        tracing::info!(url = %url, title = %feed.title, stories = stored, "Created feed");
        Ok(Resolved {
            feed,
            created: true,
        })
    }
}
