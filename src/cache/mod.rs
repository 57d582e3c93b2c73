//! Client-side entity cache.
//!
//! This module provides the passive half of the sync layer:
//! - Hierarchical query keys addressing entities and collections
//! - An in-memory store of serialized values with freshness bookkeeping
//! - A fetch claim protocol that serializes fetches per key and lets
//!   superseded completions be discarded
//!
//! The active half (bindings, mutations) lives in [`crate::sync`].

mod keys;
mod store;
mod traits;

pub use keys::QueryKey;
pub use store::{CacheStore, EntrySnapshot, EntryStatus, EntryView};
pub use traits::Entity;
