mod feeds;
mod schema;
mod store;
mod trees;
mod types;

pub use schema::Database;
pub use store::{FeedStore, TreeStore};
pub use types::{Feed, StoreError, Story, StoredTree};
