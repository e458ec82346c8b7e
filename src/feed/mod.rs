//! Feed identity and retrieval.
//!
//! - [`parser`] - RSS/Atom parsing with `feed-rs` into title, link and stories
//! - [`fetcher`] - the [`FeedFetcher`] seam and its HTTP implementation
//! - [`resolver`] - canonical URL to feed record, creating it on first sight
//! - [`opml`] - OPML import and export of subscription trees
//!
//! # Example
//!
//! ```ignore
//! use foldread::feed::{FetchOptions, HttpFetcher, Resolver};
//!
//! let fetcher = HttpFetcher::new(reqwest::Client::new(), FetchOptions::default());
//! let resolved = Resolver::new(&db, &fetcher).resolve("https://blog.rust-lang.org/feed.xml").await?;
//! ```

mod fetcher;
pub mod opml;
mod parser;
mod resolver;

pub use fetcher::{FeedFetcher, FetchError, FetchOptions, HttpFetcher};
pub use opml::OpmlError;
pub use parser::{parse_feed, FetchedFeed};
pub use resolver::{Resolved, Resolver};
