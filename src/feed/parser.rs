use chrono::{DateTime, Utc};
use feed_rs::model::Link;
use feed_rs::parser::{self, ParseFeedError};
use sha2::{Digest, Sha256};

use crate::storage::Story;
use crate::util::clean_title;

/// A feed document reduced to what the reconciliation engine stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedFeed {
    pub title: String,
    /// Site (HTML) link of the feed
    pub link: Option<String>,
    pub stories: Vec<Story>,
}

/// Parses RSS or Atom bytes.
///
/// `fetched_at` stamps entries without a date and becomes every story's
/// `created` time; callers adjust `created` for first-time ingestion.
pub fn parse_feed(bytes: &[u8], fetched_at: DateTime<Utc>) -> Result<FetchedFeed, ParseFeedError> {
    let feed = parser::parse(bytes)?;

    let title = feed
        .title
        .map(|t| clean_title(&t.content).into_owned())
        .unwrap_or_default();
    let link = site_link(&feed.links);

    let stories = feed
        .entries
        .into_iter()
        .map(|entry| {
            let link = entry.links.first().map(|l| l.href.clone());
            let published = entry.published.or(entry.updated).unwrap_or(fetched_at);
            let summary = entry
                .summary
                .map(|s| s.content)
                .or_else(|| entry.content.and_then(|c| c.body));
            let title = entry
                .title
                .map(|t| clean_title(&t.content).into_owned())
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "Untitled".to_string());

            let existing_id = if entry.id.is_empty() {
                None
            } else {
                Some(entry.id.as_str())
            };
            let id = generate_guid(existing_id, link.as_deref(), &title, published.timestamp());

            Story {
                id,
                title,
                link,
                summary,
                published,
                created: fetched_at,
            }
        })
        .collect();

    Ok(FetchedFeed {
        title,
        link,
        stories,
    })
}

/// Picks the feed's HTML link: the first `alternate` (or rel-less) link,
/// falling back to the first link of any kind.
fn site_link(links: &[Link]) -> Option<String> {
    links
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
        .or_else(|| links.first())
        .map(|l| l.href.clone())
}

fn generate_guid(existing: Option<&str>, url: Option<&str>, title: &str, published: i64) -> String {
    if let Some(guid) = existing {
        let trimmed = guid.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let input = format!("{}|{}|{}", url.unwrap_or(""), title, published);
    let hash = Sha256::digest(input.as_bytes());
    format!("{:x}", hash)
}
