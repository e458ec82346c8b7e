//! In-memory collaborators for unit tests.

use chrono::{TimeZone, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::feed::{FeedFetcher, FetchError, FetchedFeed};
use crate::storage::{Feed, FeedStore, StoreError, Story};

/// Feed store backed by hash maps, counting writes.
#[derive(Default)]
pub struct MemoryStore {
    feeds: Mutex<HashMap<String, Feed>>,
    stories: Mutex<HashMap<String, Vec<Story>>>,
    feed_writes: AtomicUsize,
    require_feed: bool,
    fail: bool,
}

impl MemoryStore {
    /// Rejects `put_stories` for feeds that were never written.
    pub fn require_feed_for_stories(mut self) -> Self {
        self.require_feed = true;
        self
    }

    /// Fails every call with `StoreError::Locked`.
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn feed_writes(&self) -> usize {
        self.feed_writes.load(Ordering::SeqCst)
    }

    pub fn feed(&self, url: &str) -> Option<Feed> {
        self.feeds.lock().unwrap().get(url).cloned()
    }

    pub fn stories(&self, url: &str) -> Vec<Story> {
        self.stories
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or_default()
    }
}

impl FeedStore for MemoryStore {
    async fn get_feed(&self, url: &str) -> Result<Option<Feed>, StoreError> {
        if self.fail {
            return Err(StoreError::Locked);
        }
        Ok(self.feed(url))
    }

    async fn put_feed(&self, feed: &Feed) -> Result<(), StoreError> {
        if self.fail {
            return Err(StoreError::Locked);
        }
        self.feed_writes.fetch_add(1, Ordering::SeqCst);
        self.feeds
            .lock()
            .unwrap()
            .insert(feed.url.clone(), feed.clone());
        Ok(())
    }

    async fn put_stories(&self, feed_url: &str, stories: &[Story]) -> Result<usize, StoreError> {
        if self.fail {
            return Err(StoreError::Locked);
        }
        if self.require_feed && self.feed(feed_url).is_none() {
            return Err(StoreError::Other(sqlx::Error::RowNotFound));
        }
        self.stories
            .lock()
            .unwrap()
            .entry(feed_url.to_string())
            .or_default()
            .extend_from_slice(stories);
        Ok(stories.len())
    }
}

/// Fetcher serving canned feeds; unknown URLs fail with HTTP 404.
#[derive(Default)]
pub struct StubFetcher {
    feeds: HashMap<String, FetchedFeed>,
    calls: AtomicUsize,
}

impl StubFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_feed(mut self, url: &str, feed: FetchedFeed) -> Self {
        self.feeds.insert(url.to_string(), feed);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FeedFetcher for StubFetcher {
    async fn fetch(&self, _feed_url: &str, source_url: &str) -> Result<FetchedFeed, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.feeds
            .get(source_url)
            .cloned()
            .ok_or(FetchError::HttpStatus(404))
    }
}

/// A fetched feed with two dated stories whose `created` differs from
/// `published`, as the parser leaves them.
pub fn sample_fetched(title: &str) -> FetchedFeed {
    let fetched_at = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
    let story = |id: &str, day: u32| Story {
        id: id.to_string(),
        title: format!("Story {}", id),
        link: Some(format!("http://x.com/{}", id)),
        summary: None,
        published: Utc.with_ymd_and_hms(2024, 1, day, 12, 0, 0).unwrap(),
        created: fetched_at,
    };

    FetchedFeed {
        title: title.to_string(),
        link: Some("http://x.com/".to_string()),
        stories: vec![story("1", 1), story("2", 2)],
    }
}
