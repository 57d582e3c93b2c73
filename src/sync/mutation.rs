//! Write intents with cache reconciliation.
//!
//! Every mutation runs the same protocol:
//!
//! 1. validate the draft locally, failing fast without network traffic
//! 2. for optimistic mutations: supersede in-flight fetches on the touched
//!    keys, snapshot them, and apply the synthesized value
//! 3. perform the remote call
//! 4. on success, write the server-confirmed entity back into both the
//!    collection entry (replace-or-append by id) and the detail entry
//! 5. on failure, restore the snapshots
//!
//! Snapshots of concurrently pending optimistic writes to the same key form
//! a chain: when a write settles out of order, its snapshot is handed to the
//! next pending write instead of the store, so any combination of failures
//! converges on the last confirmed state.
//!
//! The store never cascades between keys, so the dual write in step 4 and
//! subtree evictions after deletes are this module's responsibility.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::api::types::{Category, CategoryDraft, Item, ItemContent, ItemDraft, List, ListDraft};
use crate::api::Remote;
use crate::cache::{CacheStore, Entity, EntrySnapshot, QueryKey};
use crate::error::{AccessRole, ApiError};

struct PendingSnapshot {
  mutation: u64,
  snapshot: Option<EntrySnapshot>,
}

/// Token for one optimistic write in progress; settles via
/// `commit_optimistic` or `rollback_optimistic`.
struct OptimisticWrite {
  mutation: u64,
  keys: Vec<QueryKey>,
}

/// Executes write intents against the remote and keeps the cache observably
/// consistent around them.
#[derive(Clone)]
pub struct Mutator {
  store: CacheStore,
  remote: Arc<dyn Remote>,
  pending: Arc<Mutex<HashMap<QueryKey, Vec<PendingSnapshot>>>>,
  mutation_seq: Arc<AtomicU64>,
}

impl Mutator {
  pub fn new(store: CacheStore, remote: Arc<dyn Remote>) -> Self {
    Self {
      store,
      remote,
      pending: Arc::new(Mutex::new(HashMap::new())),
      mutation_seq: Arc::new(AtomicU64::new(0)),
    }
  }

  // ==========================================================================
  // Lists
  // ==========================================================================

  pub async fn create_list(&self, draft: &ListDraft) -> Result<List, ApiError> {
    draft.validate()?;
    let list = self.remote.create_list(draft).await?;
    self.reconcile(&QueryKey::lists(), &QueryKey::list(&list.id), &list);
    Ok(list)
  }

  pub async fn edit_list(&self, list_id: &str, draft: &ListDraft) -> Result<List, ApiError> {
    draft.validate()?;
    let list = self.remote.update_list(list_id, draft).await?;
    self.reconcile(&QueryKey::lists(), &QueryKey::list(&list.id), &list);
    Ok(list)
  }

  /// Delete a list. The server cascades to categories, items and content,
  /// so the whole cached subtree is evicted.
  pub async fn delete_list(&self, list_id: &str) -> Result<(), ApiError> {
    self.remote.delete_list(list_id).await?;
    self.remove_element::<List>(&QueryKey::lists(), list_id);
    self.store.evict_prefix(&QueryKey::list(list_id));
    Ok(())
  }

  // ==========================================================================
  // Categories
  // ==========================================================================

  pub async fn create_category(
    &self,
    list_id: &str,
    draft: &CategoryDraft,
  ) -> Result<Category, ApiError> {
    draft.validate()?;
    let category = self.remote.create_category(list_id, draft).await?;
    self.reconcile(
      &QueryKey::categories(list_id),
      &QueryKey::category(list_id, &category.id),
      &category,
    );
    Ok(category)
  }

  pub async fn edit_category(
    &self,
    list_id: &str,
    category_id: &str,
    draft: &CategoryDraft,
  ) -> Result<Category, ApiError> {
    draft.validate()?;
    let category = self.remote.update_category(list_id, category_id, draft).await?;
    self.reconcile(
      &QueryKey::categories(list_id),
      &QueryKey::category(list_id, &category.id),
      &category,
    );
    Ok(category)
  }

  pub async fn delete_category(&self, list_id: &str, category_id: &str) -> Result<(), ApiError> {
    self.remote.delete_category(list_id, category_id).await?;
    self.remove_element::<Category>(&QueryKey::categories(list_id), category_id);
    self.store.evict_prefix(&QueryKey::category(list_id, category_id));
    Ok(())
  }

  // ==========================================================================
  // Items
  // ==========================================================================

  pub async fn create_item(&self, list_id: &str, draft: &ItemDraft) -> Result<Item, ApiError> {
    draft.validate()?;
    let item = self.remote.create_item(list_id, draft).await?;
    self.reconcile(&QueryKey::items(list_id), &QueryKey::item(list_id, &item.id), &item);
    Ok(item)
  }

  pub async fn edit_item(
    &self,
    list_id: &str,
    item_id: &str,
    draft: &ItemDraft,
  ) -> Result<Item, ApiError> {
    draft.validate()?;
    let item = self.remote.update_item(list_id, item_id, draft).await?;
    self.reconcile(&QueryKey::items(list_id), &QueryKey::item(list_id, &item.id), &item);
    Ok(item)
  }

  /// Delete an item, evicting its detail entry and markdown content.
  pub async fn delete_item(&self, list_id: &str, item_id: &str) -> Result<(), ApiError> {
    self.remote.delete_item(list_id, item_id).await?;
    self.remove_element::<Item>(&QueryKey::items(list_id), item_id);
    self.store.evict_prefix(&QueryKey::item(list_id, item_id));
    Ok(())
  }

  /// Toggle an item's completion, optimistically.
  ///
  /// The flag flips in the cache before the request is sent; `completed_at`
  /// is left untouched until the server's answer lands, since only the
  /// server assigns it. On failure both touched entries roll back to their
  /// pre-mutation state.
  pub async fn set_item_completion(
    &self,
    list_id: &str,
    item_id: &str,
    completed: bool,
  ) -> Result<Item, ApiError> {
    let collection = QueryKey::items(list_id);
    let detail = QueryKey::item(list_id, item_id);
    let write = self.begin_optimistic(&[collection.clone(), detail.clone()]);

    self.store.update(&collection, |items: Option<Vec<Item>>| {
      let mut items = items?;
      if let Some(item) = items.iter_mut().find(|item| item.id == item_id) {
        item.completed = completed;
      }
      Some(items)
    });
    self.store.update(&detail, |item: Option<Item>| {
      let mut item = item?;
      item.completed = completed;
      Some(item)
    });

    match self.remote.set_item_completion(list_id, item_id, completed).await {
      Ok(item) => {
        self.commit_optimistic(write, || self.reconcile(&collection, &detail, &item));
        Ok(item)
      }
      Err(err) => {
        self.rollback_optimistic(write);
        Err(err)
      }
    }
  }

  /// Replace an item's markdown body. The content entry has no collection
  /// counterpart, so reconciliation is a single write.
  pub async fn edit_item_content(
    &self,
    list_id: &str,
    item_id: &str,
    content: &str,
  ) -> Result<ItemContent, ApiError> {
    let content = self.remote.update_item_content(list_id, item_id, content).await?;
    self.store.set(&QueryKey::item_content(list_id, item_id), &content);
    Ok(content)
  }

  // ==========================================================================
  // Sharing
  // ==========================================================================

  /// Grant `email` access to a list. Ownership is not grantable.
  pub async fn invite_member(
    &self,
    list_id: &str,
    email: &str,
    role: AccessRole,
  ) -> Result<List, ApiError> {
    if role == AccessRole::Owner {
      debug!("rejecting invitation with owner role");
      return Err(ApiError::InvalidParameters);
    }
    let list = self.remote.invite_member(list_id, email, role).await?;
    self.reconcile(&QueryKey::lists(), &QueryKey::list(&list.id), &list);
    Ok(list)
  }

  pub async fn remove_member(&self, list_id: &str, user_id: &str) -> Result<List, ApiError> {
    let list = self.remote.remove_member(list_id, user_id).await?;
    self.reconcile(&QueryKey::lists(), &QueryKey::list(&list.id), &list);
    Ok(list)
  }

  /// Walk away from a shared list. The subtree is evicted because the
  /// server will refuse further reads of it.
  pub async fn leave_list(&self, list_id: &str) -> Result<(), ApiError> {
    self.remote.leave_list(list_id).await?;
    self.remove_element::<List>(&QueryKey::lists(), list_id);
    self.store.evict_prefix(&QueryKey::list(list_id));
    Ok(())
  }

  pub async fn accept_invitation(&self, token: &str) -> Result<List, ApiError> {
    let list = self.remote.accept_invitation(token).await?;
    self.reconcile(&QueryKey::lists(), &QueryKey::list(&list.id), &list);
    Ok(list)
  }

  // ==========================================================================
  // Reconciliation
  // ==========================================================================

  /// Server-confirmed write-back: replace-or-append in the collection entry,
  /// full replace of the detail entry.
  fn reconcile<T: Entity>(&self, collection: &QueryKey, detail: &QueryKey, confirmed: &T) {
    debug!(entity = T::entity_type(), id = confirmed.id(), "writing back confirmed entity");
    let element = confirmed.clone();
    self.store.update(collection, move |old: Option<Vec<T>>| {
      let mut elements = old.unwrap_or_default();
      match elements.iter_mut().find(|e| e.id() == element.id()) {
        Some(slot) => *slot = element,
        None => elements.push(element),
      }
      Some(elements)
    });
    self.store.set(detail, confirmed);
  }

  /// Drop `id` from a cached collection, if the collection is cached at all.
  fn remove_element<T: Entity>(&self, collection: &QueryKey, id: &str) {
    debug!(entity = T::entity_type(), id, "removing entity from cached collection");
    self.store.update(collection, |old: Option<Vec<T>>| {
      let mut elements = old?;
      elements.retain(|e| e.id() != id);
      Some(elements)
    });
  }

  // ==========================================================================
  // Optimistic protocol
  // ==========================================================================

  /// Supersede in-flight fetches on `keys`, snapshot them, and register this
  /// write on each key's pending chain. The caller applies its synthesized
  /// value right after, before any await point.
  fn begin_optimistic(&self, keys: &[QueryKey]) -> OptimisticWrite {
    let mutation = self.mutation_seq.fetch_add(1, Ordering::Relaxed);
    let mut pending = self.lock_pending();
    for key in keys {
      self.store.cancel(key);
      let snapshot = self.store.snapshot(key);
      pending
        .entry(key.clone())
        .or_default()
        .push(PendingSnapshot { mutation, snapshot });
    }
    OptimisticWrite {
      mutation,
      keys: keys.to_vec(),
    }
  }

  /// Success path: run the reconciliation writes, then retire this write's
  /// snapshots. A later write still pending on the same key inherits the
  /// confirmed state as its rollback target, not the pre-mutation snapshot.
  /// The writes run under the pending lock so no rollback can interleave
  /// between the confirmed value landing and the chain being re-parented.
  fn commit_optimistic(&self, write: OptimisticWrite, writes: impl FnOnce()) {
    let mut pending = self.lock_pending();
    writes();
    for key in &write.keys {
      let Some(chain) = pending.get_mut(key) else {
        continue;
      };
      let Some(index) = chain.iter().position(|p| p.mutation == write.mutation) else {
        continue;
      };
      chain.remove(index);
      if index < chain.len() {
        chain[index].snapshot = self.store.snapshot(key);
      }
      if chain.is_empty() {
        pending.remove(key);
      }
    }
  }

  /// Failure path: restore each key to this write's snapshot. If a later
  /// write is still pending on the key, the cache currently shows that
  /// write's value; hand the snapshot down the chain instead so chained
  /// failures converge on the oldest pre-mutation state.
  fn rollback_optimistic(&self, write: OptimisticWrite) {
    debug!(mutation = write.mutation, "rolling back optimistic write");
    let mut pending = self.lock_pending();
    for key in &write.keys {
      let Some(chain) = pending.get_mut(key) else {
        continue;
      };
      let Some(index) = chain.iter().position(|p| p.mutation == write.mutation) else {
        continue;
      };
      let entry = chain.remove(index);
      if index == chain.len() {
        self.store.restore(key, entry.snapshot);
      } else {
        chain[index].snapshot = entry.snapshot;
      }
      if chain.is_empty() {
        pending.remove(key);
      }
    }
  }

  fn lock_pending(&self) -> MutexGuard<'_, HashMap<QueryKey, Vec<PendingSnapshot>>> {
    self.pending.lock().unwrap_or_else(PoisonError::into_inner)
  }
}
