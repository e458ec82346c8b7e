//! Application state and per-user subscription operations.
//!
//! [`AppState`] owns the configuration, database handle and HTTP fetcher,
//! constructed once at startup and passed by reference. Each write follows
//! the same cycle: load the user's tree, reconcile, then store it only if
//! nobody else changed it in between.

use reqwest::redirect::Policy;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::config::Config;
use crate::error::ReconcileError;
use crate::feed::{opml, FetchOptions, HttpFetcher};
use crate::outline::{FeedReference, SubscriptionTree, TreeError};
use crate::reconcile::{ImportReport, Reconciler, SubscriptionRequest};
use crate::storage::{Database, Feed, StoreError, Story, TreeStore};
use crate::util::{normalize_url, validate_url};

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Malformed subscription tree: {0}")]
    Tree(#[from] TreeError),

    /// Another writer saved the user's tree between load and save
    #[error("Subscriptions for '{0}' changed concurrently; please retry")]
    Conflict(String),

    #[error("Failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to export OPML: {0:#}")]
    Export(anyhow::Error),
}

impl AppError {
    /// Whether running the same command again may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Conflict(_) | AppError::Store(StoreError::Locked) => true,
            AppError::Reconcile(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Follows at most 3 redirects, rejecting loops and, unless private hosts
/// are allowed, redirects into localhost or private networks.
fn create_redirect_policy(allow_private_hosts: bool) -> Policy {
    Policy::custom(move |attempt| {
        if attempt.previous().len() >= 3 {
            return attempt.error("Too many redirects (max 3)");
        }

        let url = attempt.url();
        for prev in attempt.previous() {
            if prev.as_str() == url.as_str() {
                return attempt.error("Redirect loop detected");
            }
        }

        if !allow_private_hosts {
            if let Err(e) = validate_url(url.as_str()) {
                return attempt.error(format!("Redirect target rejected: {}", e));
            }
        }

        tracing::debug!(
            from = %attempt.previous().last().map(|u| u.as_str()).unwrap_or("initial"),
            to = %url,
            hop = attempt.previous().len() + 1,
            "Following redirect"
        );

        attempt.follow()
    })
}

pub struct AppState {
    pub config: Config,
    pub db: Database,
    pub fetcher: HttpFetcher,
}

impl AppState {
    pub fn new(config: Config, db: Database) -> Result<Self, AppError> {
        let http_client = reqwest::Client::builder()
            .redirect(create_redirect_policy(config.allow_private_hosts))
            .user_agent(config.user_agent.clone())
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(60))
            .build()?;
        let fetcher = HttpFetcher::new(http_client, FetchOptions::from(&config));

        Ok(Self {
            config,
            db,
            fetcher,
        })
    }

    pub fn reconciler(&self) -> Reconciler<'_, Database, HttpFetcher> {
        Reconciler::new(&self.db, &self.fetcher)
            .with_import_concurrency(self.config.import_concurrency)
    }

    /// Subscribes `user_id` to one feed and returns the merged reference.
    pub async fn add_subscription(
        &self,
        user_id: &str,
        request: SubscriptionRequest,
    ) -> Result<FeedReference, AppError> {
        let stored = self.db.load_tree(user_id).await?;
        let (tree, reference) = self
            .reconciler()
            .add_subscription(&stored.tree, request)
            .await?;
        self.save(user_id, &tree, stored.version).await?;
        Ok(reference)
    }

    /// Imports an OPML document into `user_id`'s subscriptions.
    pub async fn import_opml(&self, user_id: &str, document: &str) -> Result<ImportReport, AppError> {
        let stored = self.db.load_tree(user_id).await?;
        let (tree, report) = self.reconciler().import_opml(&stored.tree, document).await?;
        self.save(user_id, &tree, stored.version).await?;
        Ok(report)
    }

    pub async fn subscriptions(&self, user_id: &str) -> Result<SubscriptionTree, AppError> {
        let stored = self.db.load_tree(user_id).await?;
        Ok(SubscriptionTree::from_bytes(&stored.tree)?)
    }

    /// Renders `user_id`'s subscriptions as an OPML document.
    pub async fn export_opml(&self, user_id: &str) -> Result<String, AppError> {
        let tree = self.subscriptions(user_id).await?;
        opml::export_tree(&tree).map_err(AppError::Export)
    }

    /// Writes `user_id`'s subscriptions to an OPML file, returning the number
    /// of feeds exported.
    pub async fn export_to_file(&self, user_id: &str, path: &Path) -> Result<usize, AppError> {
        let tree = self.subscriptions(user_id).await?;
        opml::export_to_file(&tree, path).map_err(AppError::Export)?;
        Ok(tree.feed_count())
    }

    /// Every feed record known to the store, shared across users.
    pub async fn feeds(&self) -> Result<Vec<Feed>, AppError> {
        Ok(self.db.list_feeds().await?)
    }

    /// Stored stories of one feed, newest first.
    pub async fn stories(&self, feed_url: &str) -> Result<Vec<Story>, AppError> {
        let url = normalize_url(feed_url).map_err(|source| ReconcileError::InvalidUrl {
            url: feed_url.to_string(),
            source,
        })?;
        Ok(self.db.get_stories(&url).await?)
    }

    async fn save(&self, user_id: &str, tree: &[u8], version: i64) -> Result<(), AppError> {
        if self.db.save_tree_if_version(user_id, tree, version).await? {
            Ok(())
        } else {
            Err(AppError::Conflict(user_id.to_string()))
        }
    }
}
