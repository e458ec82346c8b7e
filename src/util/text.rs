use std::borrow::Cow;

/// Cleans a display title taken from a remote document.
///
/// Feed and OPML titles are untrusted: they may carry control characters,
/// embedded newlines, or runs of whitespace from pretty-printed XML. This
/// strips C0/C1 control characters and DEL, folds every whitespace run into a
/// single space, and trims both ends.
///
/// Returns `Cow::Borrowed` when the input is already clean.
///
/// # Examples
///
/// ```
/// use foldread::util::clean_title;
///
/// assert_eq!(clean_title("  Hacker\n   News \u{7}"), "Hacker News");
/// assert_eq!(clean_title("Plain"), "Plain");
/// ```
pub fn clean_title(s: &str) -> Cow<'_, str> {
    let needs_clean = s.trim() != s
        || s.chars().any(|c| c.is_control() || (c.is_whitespace() && c != ' '))
        || s.contains("  ");

    if !needs_clean {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut pending_space = false;

    for c in s.chars() {
        if c.is_whitespace() {
            pending_space = true;
            continue;
        }
        if c.is_control() {
            continue;
        }
        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        out.push(c);
    }

    Cow::Owned(out)
}
