//! Hierarchical query keys for cached entities.
//!
//! Every cacheable entity or collection is addressed by an ordered list of
//! string segments forming a prefix tree rooted at `lists` (plus the parallel
//! `me` root for the signed-in user):
//!
//! ```text
//! lists
//! lists/<list_id>
//! lists/<list_id>/categories
//! lists/<list_id>/categories/<category_id>
//! lists/<list_id>/items
//! lists/<list_id>/items/<item_id>
//! lists/<list_id>/items/<item_id>/content
//! me
//! ```
//!
//! A child key is always a strict extension of its parent's key, so
//! [`QueryKey::is_prefix_of`] can answer "does this key cover that entry"
//! for subtree eviction. The store itself never walks the tree on its own;
//! cascading is always an explicit caller decision.

use std::fmt;

/// Identifies one cache entry: an entity, a collection, or the signed-in user.
///
/// Two distinct entities never share a key and the same entity always maps to
/// the same key. Keys are cheap to clone and are used directly as map keys in
/// [`CacheStore`](crate::cache::CacheStore).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey(Vec<String>);

impl QueryKey {
  /// Key for the collection of all lists visible to the user.
  pub fn lists() -> Self {
    Self(vec!["lists".to_string()])
  }

  /// Key for a single list.
  pub fn list(list_id: &str) -> Self {
    Self::lists().child(list_id)
  }

  /// Key for the categories of a list.
  pub fn categories(list_id: &str) -> Self {
    Self::list(list_id).child("categories")
  }

  /// Key for a single category.
  pub fn category(list_id: &str, category_id: &str) -> Self {
    Self::categories(list_id).child(category_id)
  }

  /// Key for the items of a list.
  pub fn items(list_id: &str) -> Self {
    Self::list(list_id).child("items")
  }

  /// Key for a single item.
  pub fn item(list_id: &str, item_id: &str) -> Self {
    Self::items(list_id).child(item_id)
  }

  /// Key for the markdown body of an item, cached separately from the item
  /// record so list views never transfer it.
  pub fn item_content(list_id: &str, item_id: &str) -> Self {
    Self::item(list_id, item_id).child("content")
  }

  /// Key for the signed-in user (`/me`).
  pub fn me() -> Self {
    Self(vec!["me".to_string()])
  }

  /// Whether `self` addresses `other` or one of its ancestors.
  ///
  /// Reflexive: every key is a prefix of itself.
  pub fn is_prefix_of(&self, other: &QueryKey) -> bool {
    other.0.len() >= self.0.len() && self.0[..] == other.0[..self.0.len()]
  }

  /// The raw segments, root first.
  pub fn segments(&self) -> &[String] {
    &self.0
  }

  fn child(mut self, segment: &str) -> Self {
    self.0.push(segment.to_string());
    self
  }
}

impl fmt::Display for QueryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0.join("/"))
  }
}
