//! Utility functions for common operations.
//!
//! This module provides reusable utilities for:
//!
//! - **URL identity**: fragment-insensitive canonical URLs for feed records
//! - **URL validation**: Security-focused validation to prevent SSRF attacks
//! - **Text processing**: cleanup of untrusted titles from feeds and OPML
//!
//! # Examples
//!
//! ```
//! use foldread::util::{clean_title, normalize_url, validate_url};
//!
//! // Canonical identity for a feed
//! let url = normalize_url("https://example.com/feed.xml#latest").unwrap();
//! assert_eq!(url, "https://example.com/feed.xml");
//!
//! // Validate before fetching
//! assert!(validate_url("http://localhost/feed").is_err());
//!
//! // Tidy a remote title
//! assert_eq!(clean_title(" Example \n Blog "), "Example Blog");
//! ```

mod text;
mod url_validator;

pub use text::clean_title;
pub use url_validator::{normalize_url, validate_url, UrlValidationError};
