//! Core trait for entities that live in cached collections.

use serde::{de::DeserializeOwned, Serialize};

/// Trait for entities that appear both as a collection element and as a
/// standalone detail entry.
///
/// The id is what mutation write-backs match on when they replace-or-append
/// an element inside a cached collection.
pub trait Entity: Clone + Send + Sync + Serialize + DeserializeOwned {
  /// Server-assigned identifier, unique within the entity's collection.
  fn id(&self) -> &str;

  /// Entity type name for log lines (e.g., "list", "item").
  fn entity_type() -> &'static str;
}
