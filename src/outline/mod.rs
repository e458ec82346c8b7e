//! Subscription outlines: the per-user tree of feed references and folders.
//!
//! In memory a node is an explicit [`OutlineNode`] variant. On disk the tree
//! is the loosely-typed JSON document the web front end exchanges, where a
//! node with an `xmlUrl` is a feed and a node without one is a folder. The
//! conversion between the two happens only in [`SubscriptionTree::from_bytes`]
//! and [`SubscriptionTree::to_bytes`].

mod merge;

pub use merge::{merge, MergeError, MergeReport};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors decoding or encoding a stored subscription tree.
#[derive(Debug, Error)]
pub enum TreeError {
    /// The blob is not a valid outline document
    #[error("Invalid outline JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A node carries both a feed URL and children
    #[error("Feed {0} has child outlines; only folders may have children")]
    FeedWithChildren(String),
}

/// A reference to one feed inside a subscription tree.
///
/// `title` and `link` are display copies taken from the feed record when the
/// subscription was made; the feed itself stays authoritative.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedReference {
    /// Canonical feed URL, the reference's identity
    pub url: String,
    pub title: String,
    /// Site (HTML) link
    pub link: Option<String>,
}

impl FeedReference {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }
}

/// A labeled group of outlines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Folder {
    pub title: String,
    pub children: Vec<OutlineNode>,
}

impl Folder {
    pub fn new(title: impl Into<String>, children: Vec<OutlineNode>) -> Self {
        Self {
            title: title.into(),
            children,
        }
    }
}

/// One node of a subscription tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutlineNode {
    FeedReference(FeedReference),
    Folder(Folder),
}

impl From<FeedReference> for OutlineNode {
    fn from(feed: FeedReference) -> Self {
        OutlineNode::FeedReference(feed)
    }
}

impl From<Folder> for OutlineNode {
    fn from(folder: Folder) -> Self {
        OutlineNode::Folder(folder)
    }
}

/// A user's subscriptions: an ordered list of top-level outlines.
///
/// Invariant (maintained by [`merge`]): no two feed references share a URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionTree {
    pub outlines: Vec<OutlineNode>,
}

impl SubscriptionTree {
    pub fn new(outlines: Vec<OutlineNode>) -> Self {
        Self { outlines }
    }

    /// Decodes a stored tree. An empty blob is an empty tree.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TreeError> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }

        let document: WireDocument = serde_json::from_slice(bytes)?;
        let outlines = document
            .outline
            .into_iter()
            .map(OutlineNode::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { outlines })
    }

    /// Encodes the tree for storage.
    pub fn to_bytes(&self) -> Result<Vec<u8>, TreeError> {
        let document = WireDocument {
            outline: self.outlines.iter().map(WireOutline::from).collect(),
        };
        Ok(serde_json::to_vec(&document)?)
    }

    /// Canonical URLs of every feed reference, at any depth.
    #[cfg(test)]
    pub(crate) fn feed_urls(&self) -> std::collections::HashSet<&str> {
        use std::collections::HashSet;

        fn walk<'a>(nodes: &'a [OutlineNode], urls: &mut HashSet<&'a str>) {
            for node in nodes {
                match node {
                    OutlineNode::FeedReference(feed) => {
                        urls.insert(feed.url.as_str());
                    }
                    OutlineNode::Folder(folder) => walk(&folder.children, urls),
                }
            }
        }

        let mut urls = HashSet::new();
        walk(&self.outlines, &mut urls);
        urls
    }

    /// Number of feed references at any depth.
    pub fn feed_count(&self) -> usize {
        fn count(nodes: &[OutlineNode]) -> usize {
            nodes
                .iter()
                .map(|node| match node {
                    OutlineNode::FeedReference(_) => 1,
                    OutlineNode::Folder(folder) => count(&folder.children),
                })
                .sum()
        }
        count(&self.outlines)
    }
}

// ============================================================================
// Wire format
// ============================================================================

/// Stored document: `{"outline": [...]}`
#[derive(Debug, Default, Serialize, Deserialize)]
struct WireDocument {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    outline: Vec<WireOutline>,
}

/// One loosely-typed node; empty fields are omitted on write.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireOutline {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    xml_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    html_url: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    outline: Vec<WireOutline>,
}

impl TryFrom<WireOutline> for OutlineNode {
    type Error = TreeError;

    fn try_from(wire: WireOutline) -> Result<Self, Self::Error> {
        if wire.xml_url.is_empty() {
            let children = wire
                .outline
                .into_iter()
                .map(OutlineNode::try_from)
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(OutlineNode::Folder(Folder {
                title: wire.title,
                children,
            }));
        }

        if !wire.outline.is_empty() {
            return Err(TreeError::FeedWithChildren(wire.xml_url));
        }

        Ok(OutlineNode::FeedReference(FeedReference {
            url: wire.xml_url,
            title: wire.title,
            link: Some(wire.html_url).filter(|link| !link.is_empty()),
        }))
    }
}

impl From<&OutlineNode> for WireOutline {
    fn from(node: &OutlineNode) -> Self {
        match node {
            OutlineNode::FeedReference(feed) => WireOutline {
                title: feed.title.clone(),
                xml_url: feed.url.clone(),
                html_url: feed.link.clone().unwrap_or_default(),
                ..WireOutline::default()
            },
            OutlineNode::Folder(folder) => WireOutline {
                title: folder.title.clone(),
                outline: folder.children.iter().map(WireOutline::from).collect(),
                ..WireOutline::default()
            },
        }
    }
}
