//! Subscription reconciliation: adding one feed, merging outline batches and
//! importing OPML documents into a user's serialized subscription tree.
//!
//! Every operation takes the stored tree bytes and returns new bytes for the
//! caller to persist. Nothing is written to the tree store here, and on any
//! error the caller keeps its original bytes.

use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};

use crate::error::ReconcileError;
use crate::feed::{opml, FeedFetcher, Resolved, Resolver};
use crate::outline::{merge, FeedReference, Folder, MergeReport, OutlineNode, SubscriptionTree};
use crate::storage::{Feed, FeedStore};
use crate::util::{clean_title, normalize_url};

/// Feeds resolved at once during an OPML import.
pub const DEFAULT_IMPORT_CONCURRENCY: usize = 8;

/// A request to subscribe to one feed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionRequest {
    /// Feed URL as typed by the user
    pub url: String,
    /// Display title; the feed's own title is used when absent
    pub title: Option<String>,
    /// Folder label; the feed goes to the top level when absent
    pub folder: Option<String>,
}

impl SubscriptionRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_folder(mut self, folder: impl Into<String>) -> Self {
        self.folder = Some(folder.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// A feed reference dropped from an OPML import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportFailure {
    /// URL as it appeared in the document
    pub url: String,
    pub reason: String,
}

/// Outcome of an OPML import.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportReport {
    pub merged: MergeReport,
    pub failed: Vec<ImportFailure>,
}

/// Orchestrates normalization, resolution and merging for one request.
pub struct Reconciler<'a, S, F> {
    store: &'a S,
    fetcher: &'a F,
    import_concurrency: usize,
}

impl<'a, S: FeedStore, F: FeedFetcher> Reconciler<'a, S, F> {
    pub fn new(store: &'a S, fetcher: &'a F) -> Self {
        Self {
            store,
            fetcher,
            import_concurrency: DEFAULT_IMPORT_CONCURRENCY,
        }
    }

    /// Bounds how many feeds an OPML import resolves concurrently.
    pub fn with_import_concurrency(mut self, limit: usize) -> Self {
        self.import_concurrency = limit.max(1);
        self
    }

    fn resolver(&self) -> Resolver<'a, S, F> {
        Resolver::new(self.store, self.fetcher)
    }

    /// Subscribes to one feed.
    ///
    /// The URL is normalized and resolved (fetching the feed if it is new),
    /// then a reference carrying the feed's link, and its title unless the
    /// request names one, is merged under the requested folder label.
    /// Subscribing to a feed that is already in the tree leaves the tree
    /// unchanged.
    ///
    /// Returns the updated tree bytes and the reference that was merged.
    ///
    /// # Errors
    ///
    /// - [`ReconcileError::InvalidUrl`] if the URL does not parse
    /// - [`ReconcileError::MalformedTree`] if `tree` cannot be decoded
    /// - [`ReconcileError::FeedFetchFailed`] or [`ReconcileError::Store`]
    ///   from resolution
    pub async fn add_subscription(
        &self,
        tree: &[u8],
        request: SubscriptionRequest,
    ) -> Result<(Vec<u8>, FeedReference), ReconcileError> {
        let url = normalize(&request.url)?;
        let mut current = SubscriptionTree::from_bytes(tree)?;

        let Resolved { feed, created } = self.resolver().resolve(&url).await?;

        let title = request
            .title
            .map(|t| clean_title(&t).into_owned())
            .filter(|t| !t.is_empty());
        let reference = FeedReference {
            title: title.unwrap_or_else(|| feed.title.clone()),
            url: feed.url,
            link: feed.link,
        };

        let node = match request.folder.filter(|label| !label.is_empty()) {
            Some(label) => Folder::new(label, vec![reference.clone().into()]).into(),
            None => OutlineNode::from(reference.clone()),
        };
        let report = merge(&mut current, [node])?;

        tracing::info!(
            url = %reference.url,
            created_feed = created,
            added = report.added > 0,
            "Subscription reconciled"
        );
        Ok((current.to_bytes()?, reference))
    }

    /// Imports an OPML document.
    ///
    /// Each distinct URL in the document is normalized and resolved exactly
    /// once, at most `import_concurrency` at a time. References are rewritten
    /// with the canonical URL and the feed's link (and title, when the
    /// document has none) and merged with their folders. References whose
    /// URL is invalid or whose fetch fails are dropped and reported.
    ///
    /// # Errors
    ///
    /// - [`ReconcileError::Opml`] if the document cannot be parsed
    /// - [`ReconcileError::MalformedTree`] if `tree` cannot be decoded
    /// - [`ReconcileError::Store`] if the store fails; the import is
    ///   abandoned rather than merged partially
    pub async fn import_opml(
        &self,
        tree: &[u8],
        document: &str,
    ) -> Result<(Vec<u8>, ImportReport), ReconcileError> {
        let outlines = opml::parse_document(document)?;
        // Decode up front so a malformed tree fails before any fetching
        let current = SubscriptionTree::from_bytes(tree)?;

        let mut failed = Vec::new();
        let mut canonical: HashMap<String, String> = HashMap::new();
        let mut pending: Vec<String> = Vec::new();
        let mut seen = HashSet::new();

        for raw in document_urls(&outlines) {
            if canonical.contains_key(raw) || failed.iter().any(|f: &ImportFailure| f.url == raw) {
                continue;
            }
            match normalize(raw) {
                Ok(url) => {
                    if seen.insert(url.clone()) {
                        pending.push(url.clone());
                    }
                    canonical.insert(raw.to_string(), url);
                }
                Err(e) => {
                    tracing::warn!(url = %raw, error = %e, "Skipping OPML entry");
                    failed.push(ImportFailure {
                        url: raw.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let resolver = self.resolver();
        let results: Vec<(String, Result<Resolved, ReconcileError>)> = stream::iter(pending)
            .map(|url| {
                let resolver = &resolver;
                async move {
                    let result = resolver.resolve(&url).await;
                    (url, result)
                }
            })
            .buffered(self.import_concurrency)
            .collect()
            .await;

        let mut resolved: HashMap<String, Feed> = HashMap::new();
        for (url, result) in results {
            match result {
                Ok(Resolved { feed, .. }) => {
                    resolved.insert(url, feed);
                }
                Err(ReconcileError::Store(e)) => return Err(ReconcileError::Store(e)),
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "Dropping feed from import");
                    failed.push(ImportFailure {
                        url,
                        reason: e.to_string(),
                    });
                }
            }
        }

        let batch = rewrite_outlines(outlines, &canonical, &resolved);
        let (bytes, merged) = merge_tree(current, batch)?;

        tracing::info!(
            added = merged.added,
            skipped = merged.skipped,
            failed = failed.len(),
            "OPML import reconciled"
        );
        Ok((bytes, ImportReport { merged, failed }))
    }
}

/// Merges a batch of outlines into a serialized tree.
///
/// The batch is merged as given; no URL in it is normalized or resolved.
///
/// # Errors
///
/// [`ReconcileError::MalformedTree`] if `tree` cannot be decoded, or
/// [`ReconcileError::Malformed`] if the batch is structurally invalid. The
/// input bytes are never modified.
pub fn merge_all(tree: &[u8], batch: Vec<OutlineNode>) -> Result<Vec<u8>, ReconcileError> {
    let current = SubscriptionTree::from_bytes(tree)?;
    let (bytes, _) = merge_tree(current, batch)?;
    Ok(bytes)
}

fn merge_tree(
    mut tree: SubscriptionTree,
    batch: Vec<OutlineNode>,
) -> Result<(Vec<u8>, MergeReport), ReconcileError> {
    let report = merge(&mut tree, batch)?;
    Ok((tree.to_bytes()?, report))
}

fn normalize(raw: &str) -> Result<String, ReconcileError> {
    normalize_url(raw.trim()).map_err(|source| ReconcileError::InvalidUrl {
        url: raw.to_string(),
        source,
    })
}

/// Feed URLs of a parsed document in document order, duplicates included.
fn document_urls(outlines: &[OutlineNode]) -> Vec<&str> {
    let mut urls = Vec::new();
    for node in outlines {
        match node {
            OutlineNode::FeedReference(feed) => urls.push(feed.url.as_str()),
            OutlineNode::Folder(folder) => urls.extend(document_urls(&folder.children)),
        }
    }
    urls
}

/// Replaces document URLs with canonical ones and fills display fields from
/// resolved feeds, dropping references that did not resolve.
fn rewrite_outlines(
    outlines: Vec<OutlineNode>,
    canonical: &HashMap<String, String>,
    resolved: &HashMap<String, Feed>,
) -> Vec<OutlineNode> {
    outlines
        .into_iter()
        .filter_map(|node| match node {
            OutlineNode::FeedReference(reference) => {
                let url = canonical.get(&reference.url)?;
                let feed = resolved.get(url)?;
                let title = if reference.title.is_empty() {
                    feed.title.clone()
                } else {
                    reference.title
                };
                Some(OutlineNode::FeedReference(FeedReference {
                    url: feed.url.clone(),
                    title,
                    link: feed.link.clone().or(reference.link),
                }))
            }
            OutlineNode::Folder(folder) => Some(OutlineNode::Folder(Folder {
                title: folder.title,
                children: rewrite_outlines(folder.children, canonical, resolved),
            })),
        })
        .collect()
}
