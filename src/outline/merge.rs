use std::collections::HashSet;
use thiserror::Error;

use super::{FeedReference, Folder, OutlineNode, SubscriptionTree};

/// Incoming outlines the merger refuses to apply.
///
/// Validation runs over the whole batch before the tree is touched, so an
/// error always leaves the tree exactly as it was.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MergeError {
    /// A feed reference without a URL has no identity to deduplicate on
    #[error("Feed reference {title:?} has an empty URL")]
    EmptyUrl { title: String },

    /// Only one level of folders is supported
    #[error("Folder {parent:?} contains nested folder {child:?}")]
    NestedFolder { parent: String, child: String },
}

/// Outcome counts of one merge.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeReport {
    /// Feed references inserted into the tree
    pub added: usize,
    /// Feed references skipped because their URL was already present
    pub skipped: usize,
}

/// Merges incoming outlines into a subscription tree.
///
/// - A bare feed reference is appended to the top level.
/// - A folder contributes each of its feed references under the folder's
///   title: into the first top-level folder with that exact title, or into a
///   new folder appended to the top level.
/// - A feed whose URL is already in the tree (top level, or a direct child
///   of a top-level folder) or earlier in the same batch is skipped.
///
/// Insertion order follows the order of `incoming`; nothing is sorted.
/// Merging the same outlines twice leaves the tree as after the first merge.
///
/// # Errors
///
/// Returns [`MergeError`] without modifying `tree` when any incoming feed
/// reference has an empty URL or an incoming folder nests another folder.
///
/// # Examples
///
/// ```
/// use foldread::outline::{merge, FeedReference, Folder, SubscriptionTree};
///
/// let mut tree = SubscriptionTree::default();
/// merge(&mut tree, [Folder::new("Tech", vec![FeedReference::new("http://b.com/rss").into()]).into()]).unwrap();
/// merge(&mut tree, [Folder::new("Tech", vec![FeedReference::new("http://c.com/rss").into()]).into()]).unwrap();
///
/// assert_eq!(tree.outlines.len(), 1);
/// assert_eq!(tree.feed_count(), 2);
/// ```
pub fn merge<I>(tree: &mut SubscriptionTree, incoming: I) -> Result<MergeReport, MergeError>
where
    I: IntoIterator<Item = OutlineNode>,
{
    let incoming: Vec<OutlineNode> = incoming.into_iter().collect();
    validate(&incoming)?;

    let mut present = present_urls(tree);
    let mut report = MergeReport::default();

    for outline in incoming {
        match outline {
            OutlineNode::FeedReference(feed) => {
                merge_one(tree, &mut present, &mut report, "", feed);
            }
            OutlineNode::Folder(Folder { title, children }) => {
                for child in children {
                    if let OutlineNode::FeedReference(feed) = child {
                        merge_one(tree, &mut present, &mut report, &title, feed);
                    }
                }
            }
        }
    }

    Ok(report)
}

fn validate(incoming: &[OutlineNode]) -> Result<(), MergeError> {
    let check_feed = |feed: &FeedReference| {
        if feed.url.is_empty() {
            Err(MergeError::EmptyUrl {
                title: feed.title.clone(),
            })
        } else {
            Ok(())
        }
    };

    for outline in incoming {
        match outline {
            OutlineNode::FeedReference(feed) => check_feed(feed)?,
            OutlineNode::Folder(folder) => {
                for child in &folder.children {
                    match child {
                        OutlineNode::FeedReference(feed) => check_feed(feed)?,
                        OutlineNode::Folder(nested) => {
                            return Err(MergeError::NestedFolder {
                                parent: folder.title.clone(),
                                child: nested.title.clone(),
                            })
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

/// URLs already subscribed: top-level feeds and the feeds directly inside
/// top-level folders.
fn present_urls(tree: &SubscriptionTree) -> HashSet<String> {
    let mut urls = HashSet::new();
    for outline in &tree.outlines {
        match outline {
            OutlineNode::FeedReference(feed) => {
                urls.insert(feed.url.clone());
            }
            OutlineNode::Folder(folder) => {
                for child in &folder.children {
                    if let OutlineNode::FeedReference(feed) = child {
                        urls.insert(feed.url.clone());
                    }
                }
            }
        }
    }
    urls
}

fn merge_one(
    tree: &mut SubscriptionTree,
    present: &mut HashSet<String>,
    report: &mut MergeReport,
    label: &str,
    feed: FeedReference,
) {
    if !present.insert(feed.url.clone()) {
        tracing::debug!(url = %feed.url, "Feed already subscribed, skipping");
        report.skipped += 1;
        return;
    }
    report.added += 1;

    if label.is_empty() {
        tree.outlines.push(feed.into());
        return;
    }

    let is_label = |node: &OutlineNode| matches!(node, OutlineNode::Folder(f) if f.title == label);

    match tree.outlines.iter().position(is_label) {
        Some(index) => {
            if tree.outlines[index + 1..].iter().any(is_label) {
                tracing::warn!(
                    label = %label,
                    "Several folders share this label, merging into the first"
                );
            }
            if let OutlineNode::Folder(folder) = &mut tree.outlines[index] {
                folder.children.push(feed.into());
            }
        }
        None => tree
            .outlines
            .push(Folder::new(label, vec![feed.into()]).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn feed(url: &str) -> OutlineNode {
        FeedReference::new(url).into()
    }

    fn labeled(label: &str, url: &str) -> OutlineNode {
        Folder::new(label, vec![feed(url)]).into()
    }

    #[test]
    fn test_bare_feed_added_once() {
        let mut tree = SubscriptionTree::default();

        let report = merge(&mut tree, [feed("http://a.com/rss")]).unwrap();
        assert_eq!(report, MergeReport { added: 1, skipped: 0 });
        assert_eq!(tree.outlines, vec![feed("http://a.com/rss")]);

        let report = merge(&mut tree, [feed("http://a.com/rss")]).unwrap();
        assert_eq!(report, MergeReport { added: 0, skipped: 1 });
        assert_eq!(tree.outlines, vec![feed("http://a.com/rss")]);
    }

    #[test]
    fn test_folder_consolidation() {
        let mut tree = SubscriptionTree::default();
        merge(&mut tree, [labeled("Tech", "http://b.com/rss")]).unwrap();
        merge(&mut tree, [labeled("Tech", "http://c.com/rss")]).unwrap();

        assert_eq!(
            tree.outlines,
            vec![Folder::new("Tech", vec![feed("http://b.com/rss"), feed("http://c.com/rss")]).into()]
        );
    }

    #[test]
    fn test_existing_folder_receives_feed_without_duplicates() {
        let mut tree =
            SubscriptionTree::new(vec![Folder::new("News", vec![feed("http://x.com/rss")]).into()]);

        merge(&mut tree, [labeled("News", "http://y.com/rss")]).unwrap();
        let expected = vec![OutlineNode::from(Folder::new(
            "News",
            vec![feed("http://x.com/rss"), feed("http://y.com/rss")],
        ))];
        assert_eq!(tree.outlines, expected);

        merge(&mut tree, [labeled("News", "http://x.com/rss")]).unwrap();
        assert_eq!(tree.outlines, expected);
    }

    #[test]
    fn test_dedup_across_levels() {
        // A top-level feed is not re-added inside a folder, and vice versa
        let mut tree = SubscriptionTree::new(vec![
            feed("http://a.com/rss"),
            Folder::new("Tech", vec![feed("http://b.com/rss")]).into(),
        ]);
        let before = tree.clone();

        let report = merge(
            &mut tree,
            [labeled("Other", "http://a.com/rss"), feed("http://b.com/rss")],
        )
        .unwrap();
        assert_eq!(report.skipped, 2);
        assert_eq!(tree, before);
    }

    #[test]
    fn test_dedup_within_one_batch() {
        let mut tree = SubscriptionTree::default();
        let report = merge(
            &mut tree,
            [
                feed("http://a.com/rss"),
                Folder::new("Tech", vec![feed("http://a.com/rss"), feed("http://b.com/rss")]).into(),
            ],
        )
        .unwrap();

        assert_eq!(report, MergeReport { added: 2, skipped: 1 });
        assert_eq!(
            tree.outlines,
            vec![
                feed("http://a.com/rss"),
                Folder::new("Tech", vec![feed("http://b.com/rss")]).into(),
            ]
        );
    }

    #[test]
    fn test_insertion_order_follows_input() {
        let mut tree = SubscriptionTree::new(vec![feed("http://z.com/rss")]);
        merge(
            &mut tree,
            [
                feed("http://m.com/rss"),
                labeled("B", "http://b.com/rss"),
                feed("http://a.com/rss"),
                labeled("A", "http://c.com/rss"),
            ],
        )
        .unwrap();

        assert_eq!(
            tree.outlines,
            vec![
                feed("http://z.com/rss"),
                feed("http://m.com/rss"),
                labeled("B", "http://b.com/rss"),
                feed("http://a.com/rss"),
                labeled("A", "http://c.com/rss"),
            ]
        );
    }

    #[test]
    fn test_untitled_folder_merges_to_top_level() {
        let mut tree = SubscriptionTree::default();
        merge(
            &mut tree,
            [Folder::new("", vec![feed("http://a.com/rss"), feed("http://b.com/rss")]).into()],
        )
        .unwrap();
        assert_eq!(
            tree.outlines,
            vec![feed("http://a.com/rss"), feed("http://b.com/rss")]
        );
    }

    #[test]
    fn test_label_matches_folders_only() {
        // A feed titled "Tech" is not a folder and must not absorb children
        let mut tree = SubscriptionTree::new(vec![FeedReference::new("http://t.com/rss")
            .with_title("Tech")
            .into()]);
        merge(&mut tree, [labeled("Tech", "http://b.com/rss")]).unwrap();

        assert_eq!(tree.outlines.len(), 2);
        assert_eq!(tree.outlines[1], labeled("Tech", "http://b.com/rss"));
    }

    #[test]
    fn test_label_match_is_exact() {
        let mut tree =
            SubscriptionTree::new(vec![Folder::new("tech", vec![feed("http://a.com/rss")]).into()]);
        merge(&mut tree, [labeled("Tech", "http://b.com/rss")]).unwrap();
        assert_eq!(tree.outlines.len(), 2);
    }

    #[test]
    fn test_duplicate_folders_first_match_wins() {
        let mut tree = SubscriptionTree::new(vec![
            Folder::new("News", vec![feed("http://x.com/rss")]).into(),
            Folder::new("News", vec![feed("http://y.com/rss")]).into(),
        ]);
        merge(&mut tree, [labeled("News", "http://z.com/rss")]).unwrap();

        assert_eq!(
            tree.outlines,
            vec![
                Folder::new("News", vec![feed("http://x.com/rss"), feed("http://z.com/rss")]).into(),
                Folder::new("News", vec![feed("http://y.com/rss")]).into(),
            ]
        );
    }

    #[test]
    fn test_empty_url_fails_closed() {
        let mut tree = SubscriptionTree::new(vec![feed("http://a.com/rss")]);
        let before = tree.clone();

        let err = merge(
            &mut tree,
            [
                feed("http://b.com/rss"),
                Folder::new(
                    "Tech",
                    vec![FeedReference::new("").with_title("Broken").into()],
                )
                .into(),
            ],
        )
        .unwrap_err();

        assert_eq!(
            err,
            MergeError::EmptyUrl {
                title: "Broken".to_string()
            }
        );
        assert_eq!(tree, before, "Tree must be untouched on error");
    }

    #[test]
    fn test_nested_folder_fails_closed() {
        let mut tree = SubscriptionTree::default();
        let err = merge(
            &mut tree,
            [
                feed("http://a.com/rss"),
                Folder::new("Outer", vec![labeled("Inner", "http://b.com/rss")]).into(),
            ],
        )
        .unwrap_err();

        assert!(matches!(err, MergeError::NestedFolder { .. }));
        assert!(tree.outlines.is_empty());
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let mut tree = SubscriptionTree::new(vec![feed("http://a.com/rss")]);
        let before = tree.clone();
        let report = merge(&mut tree, Vec::new()).unwrap();
        assert_eq!(report, MergeReport::default());
        assert_eq!(tree, before);
    }

    fn arb_outline() -> impl Strategy<Value = OutlineNode> {
        let url = (0..6u8).prop_map(|i| format!("http://feed{}.example.com/rss", i));
        let label = prop_oneof![Just(""), Just("News"), Just("Tech")];
        (label, url).prop_map(|(label, url)| {
            if label.is_empty() {
                feed(&url)
            } else {
                labeled(label, &url)
            }
        })
    }

    proptest! {
        #[test]
        fn prop_merge_is_idempotent(
            existing in prop::collection::vec(arb_outline(), 0..12),
            incoming in arb_outline(),
        ) {
            let mut tree = SubscriptionTree::default();
            merge(&mut tree, existing).unwrap();

            let mut once = tree.clone();
            merge(&mut once, [incoming.clone()]).unwrap();

            let mut twice = once.clone();
            let report = merge(&mut twice, [incoming]).unwrap();

            prop_assert_eq!(report.added, 0);
            prop_assert_eq!(twice, once);
        }

        #[test]
        fn prop_merge_never_duplicates_urls(
            batches in prop::collection::vec(prop::collection::vec(arb_outline(), 0..6), 0..6),
        ) {
            let mut tree = SubscriptionTree::default();
            for batch in batches {
                merge(&mut tree, batch).unwrap();
            }
            prop_assert_eq!(tree.feed_urls().len(), tree.feed_count());
        }
    }
}
