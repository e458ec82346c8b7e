//! Feed subscription reconciliation.
//!
//! Resolves feed URLs to canonical feed records (fetching a feed the first
//! time it is seen) and merges feed references into per-user foldered
//! subscription trees without duplicates.
//!
//! - [`util`] - URL normalization and validation
//! - [`feed`] - fetching, parsing, resolution and OPML
//! - [`outline`] - the subscription tree and its merge
//! - [`reconcile`] - add-subscription and import use cases
//! - [`storage`] - SQLite entity and tree store
//! - [`app`] - application state wiring for the CLI

pub mod app;
pub mod config;
pub mod error;
pub mod feed;
pub mod outline;
pub mod reconcile;
pub mod storage;
pub mod util;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::ReconcileError;
