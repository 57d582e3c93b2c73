//! In-memory cache store keyed by [`QueryKey`].
//!
//! The store holds serialized JSON blobs plus per-entry bookkeeping, and is
//! deliberately passive: it never fetches, retries, or cascades on its own.
//! Read bindings and the mutation coordinator drive it through a small
//! protocol:
//!
//! 1. `begin_fetch` claims an entry (at most one fetch per key in flight)
//! 2. `complete_fetch` settles the claim, unless the claim was superseded
//! 3. `set`/`update` write confirmed or optimistic values
//! 4. `invalidate`/`evict` mark or drop entries
//!
//! Claims carry a generation number. `cancel` and `invalidate` advance the
//! generation, so a completion for a superseded claim is discarded instead of
//! clobbering newer state. Every observable change bumps a revision counter
//! published through a watch channel, which is how bindings wait for
//! settlement without polling.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, error, warn};

use super::keys::QueryKey;
use crate::error::ApiError;

/// Freshness of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
  /// Value reflects the most recent confirmed read or write.
  Fresh,
  /// Value may be out of date; the next read should refetch.
  Stale,
  /// A fetch for this key is in flight.
  Fetching,
}

#[derive(Debug, Clone)]
struct CacheEntry {
  value: Option<Value>,
  status: EntryStatus,
  last_error: Option<ApiError>,
  /// Matches the claim handed out by `begin_fetch`. Zero means no claim has
  /// ever been issued for this entry.
  generation: u64,
}

impl CacheEntry {
  fn vacant() -> Self {
    Self {
      value: None,
      status: EntryStatus::Stale,
      last_error: None,
      generation: 0,
    }
  }
}

/// Read-only view of one entry, for bindings.
#[derive(Debug, Clone)]
pub struct EntryView {
  pub value: Option<Value>,
  pub status: EntryStatus,
  pub last_error: Option<ApiError>,
}

/// State of one entry captured before an optimistic write, so a failed
/// mutation can put things back. `restore` with the snapshot of a missing
/// entry evicts.
#[derive(Debug, Clone)]
pub struct EntrySnapshot {
  value: Option<Value>,
  status: EntryStatus,
  last_error: Option<ApiError>,
}

/// The process-wide entity cache.
///
/// Cloning is cheap and shares the underlying entries, so the store can be
/// handed to bindings, the mutation coordinator and the session teardown path
/// without further wrapping.
#[derive(Clone)]
pub struct CacheStore {
  inner: Arc<StoreInner>,
}

struct StoreInner {
  entries: Mutex<HashMap<QueryKey, CacheEntry>>,
  revision: watch::Sender<u64>,
  /// Source of claim generations, global so a re-created entry can never
  /// collide with a claim issued before its eviction.
  fetch_seq: AtomicU64,
}

impl CacheStore {
  pub fn new() -> Self {
    let (revision, _) = watch::channel(0);
    Self {
      inner: Arc::new(StoreInner {
        entries: Mutex::new(HashMap::new()),
        revision,
        fetch_seq: AtomicU64::new(0),
      }),
    }
  }

  // ==========================================================================
  // Reads
  // ==========================================================================

  /// Decoded value for `key`, regardless of freshness. `None` when the entry
  /// is missing, holds no value yet, or does not decode as `T`.
  pub fn get<T: DeserializeOwned>(&self, key: &QueryKey) -> Option<T> {
    let value = {
      let entries = self.lock();
      entries.get(key)?.value.clone()?
    };
    decode(key, value)
  }

  /// Raw entry state for `key`, or `None` if the entry does not exist.
  pub fn entry(&self, key: &QueryKey) -> Option<EntryView> {
    let entries = self.lock();
    let entry = entries.get(key)?;
    Some(EntryView {
      value: entry.value.clone(),
      status: entry.status,
      last_error: entry.last_error.clone(),
    })
  }

  /// Watch channel that ticks on every observable store change.
  pub fn subscribe(&self) -> watch::Receiver<u64> {
    self.inner.revision.subscribe()
  }

  // ==========================================================================
  // Writes
  // ==========================================================================

  /// Store a confirmed value, marking the entry fresh and clearing any held
  /// error. A value that fails to serialize is dropped with a log line
  /// rather than poisoning the entry.
  pub fn set<T: Serialize>(&self, key: &QueryKey, value: &T) {
    let Some(value) = encode(key, value) else {
      return;
    };
    self.set_value(key, value);
  }

  pub(crate) fn set_value(&self, key: &QueryKey, value: Value) {
    {
      let mut entries = self.lock();
      let entry = entries.entry(key.clone()).or_insert_with(CacheEntry::vacant);
      entry.value = Some(value);
      entry.status = EntryStatus::Fresh;
      entry.last_error = None;
    }
    self.bump();
  }

  /// Read-modify-write on the decoded value. The closure sees `None` when
  /// the entry is missing or empty; returning `None` leaves the store
  /// untouched, so "patch only if present" is the natural usage.
  pub fn update<T>(&self, key: &QueryKey, f: impl FnOnce(Option<T>) -> Option<T>)
  where
    T: Serialize + DeserializeOwned,
  {
    let mut changed = false;
    {
      let mut entries = self.lock();
      let current = entries
        .get(key)
        .and_then(|entry| entry.value.clone())
        .and_then(|value| decode(key, value));
      if let Some(next) = f(current) {
        if let Some(value) = encode(key, &next) {
          let entry = entries.entry(key.clone()).or_insert_with(CacheEntry::vacant);
          entry.value = Some(value);
          entry.status = EntryStatus::Fresh;
          entry.last_error = None;
          changed = true;
        }
      }
    }
    if changed {
      self.bump();
    }
  }

  // ==========================================================================
  // Lifecycle
  // ==========================================================================

  /// Mark `key` stale so the next read refetches. The held value stays
  /// readable in the meantime and any held error is cleared. Invalidating a
  /// missing entry, or one already stale, is a no-op beyond that.
  pub fn invalidate(&self, key: &QueryKey) {
    let mut changed = false;
    {
      let mut entries = self.lock();
      if let Some(entry) = entries.get_mut(key) {
        if entry.status == EntryStatus::Fetching {
          // the in-flight result predates the invalidation reason
          entry.generation = self.next_generation();
        }
        entry.status = EntryStatus::Stale;
        entry.last_error = None;
        changed = true;
      }
    }
    if changed {
      self.bump();
    }
  }

  /// Remove the entry for `key` entirely. A fetch value arriving after the
  /// eviction is discarded; a late fetch failure is still recorded (see
  /// [`CacheStore::complete_fetch`]).
  pub fn evict(&self, key: &QueryKey) {
    let removed = {
      let mut entries = self.lock();
      entries.remove(key).is_some()
    };
    if removed {
      self.bump();
    }
  }

  /// Remove every entry at or under `prefix`.
  pub fn evict_prefix(&self, prefix: &QueryKey) {
    let removed = {
      let mut entries = self.lock();
      let before = entries.len();
      entries.retain(|key, _| !prefix.is_prefix_of(key));
      before - entries.len()
    };
    if removed > 0 {
      debug!(%prefix, removed, "evicted cache subtree");
      self.bump();
    }
  }

  /// Drop every entry. Used on logout and session expiry.
  pub fn evict_all(&self) {
    {
      let mut entries = self.lock();
      entries.clear();
    }
    self.bump();
  }

  /// Supersede the in-flight fetch for `key`, if any, leaving the entry
  /// stale. The superseded completion will be discarded on arrival.
  pub fn cancel(&self, key: &QueryKey) {
    let mut changed = false;
    {
      let mut entries = self.lock();
      if let Some(entry) = entries.get_mut(key) {
        if entry.status == EntryStatus::Fetching {
          entry.generation = self.next_generation();
          entry.status = EntryStatus::Stale;
          changed = true;
        }
      }
    }
    if changed {
      self.bump();
    }
  }

  // ==========================================================================
  // Fetch protocol
  // ==========================================================================

  /// Claim the right to fetch `key`. Returns the claim generation to pass to
  /// [`CacheStore::complete_fetch`], or `None` when no fetch is warranted:
  /// the entry is fresh, another fetch is already in flight, or the last
  /// fetch failed and the error has not been cleared. `force` claims
  /// unconditionally, superseding any in-flight fetch.
  pub fn begin_fetch(&self, key: &QueryKey, force: bool) -> Option<u64> {
    let generation = {
      let mut entries = self.lock();
      let entry = entries.entry(key.clone()).or_insert_with(CacheEntry::vacant);
      if !force {
        match entry.status {
          EntryStatus::Fresh | EntryStatus::Fetching => return None,
          // errors hold until an invalidate or a forced refetch
          EntryStatus::Stale if entry.last_error.is_some() => return None,
          EntryStatus::Stale => {}
        }
      }
      entry.status = EntryStatus::Fetching;
      entry.generation = self.next_generation();
      entry.generation
    };
    self.bump();
    Some(generation)
  }

  /// Settle the claim issued by [`CacheStore::begin_fetch`]. Success stores
  /// the value fresh; failure keeps the previous value and parks the error
  /// on the entry. A completion whose claim was superseded (cancel,
  /// invalidate, forced refetch) is discarded. When the entry was evicted
  /// mid-flight, a value is discarded too, but a failure is parked on a
  /// re-created empty entry so bindings waiting on the fetch observe it.
  pub fn complete_fetch(&self, key: &QueryKey, generation: u64, result: Result<Value, ApiError>) {
    {
      let mut entries = self.lock();
      match entries.get_mut(key) {
        None => {
          // Evicted mid-flight: the value must not come back, but the
          // failure still has to land where waiters can see it (session
          // teardown evicts before its 401 reaches the store).
          let Err(err) = result else {
            debug!(%key, "discarding fetch value for evicted entry");
            return;
          };
          debug!(%key, %err, "parking fetch failure on evicted entry");
          entries.insert(
            key.clone(),
            CacheEntry {
              value: None,
              status: EntryStatus::Stale,
              last_error: Some(err),
              generation,
            },
          );
        }
        Some(entry) => {
          if entry.generation != generation {
            debug!(%key, "discarding superseded fetch completion");
            return;
          }
          match result {
            Ok(value) => {
              entry.value = Some(value);
              entry.status = EntryStatus::Fresh;
              entry.last_error = None;
            }
            Err(err) => {
              entry.status = EntryStatus::Stale;
              entry.last_error = Some(err);
            }
          }
        }
      }
    }
    self.bump();
  }

  // ==========================================================================
  // Snapshots
  // ==========================================================================

  /// Capture the rollback target for `key`. `None` records that the entry
  /// did not exist.
  pub(crate) fn snapshot(&self, key: &QueryKey) -> Option<EntrySnapshot> {
    let entries = self.lock();
    entries.get(key).map(|entry| EntrySnapshot {
      value: entry.value.clone(),
      status: entry.status,
      last_error: entry.last_error.clone(),
    })
  }

  /// Put `key` back to a previously captured snapshot. Generations are not
  /// restored; they only ever move forward.
  pub(crate) fn restore(&self, key: &QueryKey, snapshot: Option<EntrySnapshot>) {
    let Some(snapshot) = snapshot else {
      self.evict(key);
      return;
    };
    {
      let mut entries = self.lock();
      let entry = entries.entry(key.clone()).or_insert_with(CacheEntry::vacant);
      entry.value = snapshot.value;
      entry.status = snapshot.status;
      entry.last_error = snapshot.last_error;
    }
    self.bump();
  }

  // ==========================================================================
  // Internals
  // ==========================================================================

  fn lock(&self) -> MutexGuard<'_, HashMap<QueryKey, CacheEntry>> {
    // entries stay consistent across a panicking writer; keep serving
    self.inner.entries.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn next_generation(&self) -> u64 {
    self.inner.fetch_seq.fetch_add(1, Ordering::Relaxed) + 1
  }

  fn bump(&self) {
    self.inner.revision.send_modify(|revision| *revision += 1);
  }
}

impl Default for CacheStore {
  fn default() -> Self {
    Self::new()
  }
}

fn encode<T: Serialize>(key: &QueryKey, value: &T) -> Option<Value> {
  match serde_json::to_value(value) {
    Ok(value) => Some(value),
    Err(err) => {
      error!(%key, %err, "dropping cache write that failed to serialize");
      None
    }
  }
}

fn decode<T: DeserializeOwned>(key: &QueryKey, value: Value) -> Option<T> {
  match serde_json::from_value(value) {
    Ok(value) => Some(value),
    Err(err) => {
      warn!(%key, %err, "cached value does not decode as the requested type");
      None
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn store() -> CacheStore {
    CacheStore::new()
  }

  fn value(n: u64) -> Value {
    serde_json::json!({ "n": n })
  }

  #[test]
  fn test_set_then_get_round_trips() {
    let store = store();
    let key = QueryKey::list("L1");
    store.set(&key, &vec!["a".to_string(), "b".to_string()]);
    assert_eq!(
      store.get::<Vec<String>>(&key),
      Some(vec!["a".to_string(), "b".to_string()])
    );
    assert_eq!(store.entry(&key).unwrap().status, EntryStatus::Fresh);
  }

  #[test]
  fn test_get_missing_is_none() {
    let store = store();
    assert_eq!(store.get::<Vec<String>>(&QueryKey::lists()), None);
    assert!(store.entry(&QueryKey::lists()).is_none());
  }

  #[test]
  fn test_update_patches_in_place() {
    let store = store();
    let key = QueryKey::lists();
    store.set(&key, &vec![1u64, 2]);
    store.update(&key, |old: Option<Vec<u64>>| {
      let mut old = old.unwrap_or_default();
      old.push(3);
      Some(old)
    });
    assert_eq!(store.get::<Vec<u64>>(&key), Some(vec![1, 2, 3]));
  }

  #[test]
  fn test_update_returning_none_leaves_store_untouched() {
    let store = store();
    let key = QueryKey::lists();
    let mut revisions = store.subscribe();
    store.update(&key, |old: Option<Vec<u64>>| old.map(|v| v));
    assert!(store.entry(&key).is_none());
    assert!(!revisions.has_changed().unwrap());
  }

  #[test]
  fn test_invalidate_keeps_value_and_is_idempotent() {
    let store = store();
    let key = QueryKey::items("L1");
    store.set(&key, &vec![1u64]);
    store.invalidate(&key);
    store.invalidate(&key);
    let view = store.entry(&key).unwrap();
    assert_eq!(view.status, EntryStatus::Stale);
    assert_eq!(store.get::<Vec<u64>>(&key), Some(vec![1]));
    // still exactly one claim available afterwards
    assert!(store.begin_fetch(&key, false).is_some());
    assert!(store.begin_fetch(&key, false).is_none());
  }

  #[test]
  fn test_begin_fetch_claims_once() {
    let store = store();
    let key = QueryKey::lists();
    let first = store.begin_fetch(&key, false);
    assert!(first.is_some());
    assert!(store.begin_fetch(&key, false).is_none());
    assert_eq!(store.entry(&key).unwrap().status, EntryStatus::Fetching);
  }

  #[test]
  fn test_complete_fetch_success_and_fresh_entries_do_not_refetch() {
    let store = store();
    let key = QueryKey::lists();
    let generation = store.begin_fetch(&key, false).unwrap();
    store.complete_fetch(&key, generation, Ok(value(1)));
    let view = store.entry(&key).unwrap();
    assert_eq!(view.status, EntryStatus::Fresh);
    assert_eq!(view.value, Some(value(1)));
    assert!(store.begin_fetch(&key, false).is_none());
  }

  #[test]
  fn test_failed_fetch_keeps_value_and_parks_error() {
    let store = store();
    let key = QueryKey::lists();
    store.set(&key, &value(1));
    store.invalidate(&key);
    let generation = store.begin_fetch(&key, false).unwrap();
    store.complete_fetch(&key, generation, Err(ApiError::Unknown));
    let view = store.entry(&key).unwrap();
    assert_eq!(view.status, EntryStatus::Stale);
    assert_eq!(view.value, Some(value(1)));
    assert_eq!(view.last_error, Some(ApiError::Unknown));
    // held errors block further claims until cleared
    assert!(store.begin_fetch(&key, false).is_none());
    store.invalidate(&key);
    assert!(store.begin_fetch(&key, false).is_some());
  }

  #[test]
  fn test_cancel_discards_late_completion() {
    let store = store();
    let key = QueryKey::items("L1");
    store.set(&key, &value(1));
    store.invalidate(&key);
    let generation = store.begin_fetch(&key, false).unwrap();
    store.cancel(&key);
    store.complete_fetch(&key, generation, Ok(value(2)));
    // the superseded result must not land
    assert_eq!(store.entry(&key).unwrap().value, Some(value(1)));
    assert_eq!(store.entry(&key).unwrap().status, EntryStatus::Stale);
  }

  #[test]
  fn test_forced_refetch_supersedes_previous_claim() {
    let store = store();
    let key = QueryKey::lists();
    let stale_claim = store.begin_fetch(&key, false).unwrap();
    let fresh_claim = store.begin_fetch(&key, true).unwrap();
    assert_ne!(stale_claim, fresh_claim);
    store.complete_fetch(&key, stale_claim, Ok(value(1)));
    assert_eq!(store.entry(&key).unwrap().value, None);
    store.complete_fetch(&key, fresh_claim, Ok(value(2)));
    assert_eq!(store.entry(&key).unwrap().value, Some(value(2)));
  }

  #[test]
  fn test_evict_drops_entry_and_late_completion() {
    let store = store();
    let key = QueryKey::item("L1", "I1");
    let generation = store.begin_fetch(&key, false).unwrap();
    store.evict(&key);
    store.complete_fetch(&key, generation, Ok(value(1)));
    assert!(store.entry(&key).is_none());
  }

  #[test]
  fn test_evicted_key_still_reports_fetch_failure() {
    let store = store();
    let key = QueryKey::me();
    let generation = store.begin_fetch(&key, false).unwrap();
    // session teardown between the claim and its completion
    store.evict_all();
    store.complete_fetch(&key, generation, Err(ApiError::NotAuthenticated));
    let view = store.entry(&key).unwrap();
    assert_eq!(view.value, None);
    assert_eq!(view.status, EntryStatus::Stale);
    assert_eq!(view.last_error, Some(ApiError::NotAuthenticated));
    // parked like any other failure until invalidated
    assert!(store.begin_fetch(&key, false).is_none());
  }

  #[test]
  fn test_evict_prefix_clears_subtree_only() {
    let store = store();
    store.set(&QueryKey::list("L1"), &value(1));
    store.set(&QueryKey::items("L1"), &value(2));
    store.set(&QueryKey::item_content("L1", "I1"), &value(3));
    store.set(&QueryKey::list("L2"), &value(4));
    store.set(&QueryKey::lists(), &value(5));

    store.evict_prefix(&QueryKey::list("L1"));

    assert!(store.entry(&QueryKey::list("L1")).is_none());
    assert!(store.entry(&QueryKey::items("L1")).is_none());
    assert!(store.entry(&QueryKey::item_content("L1", "I1")).is_none());
    assert!(store.entry(&QueryKey::list("L2")).is_some());
    assert!(store.entry(&QueryKey::lists()).is_some());
  }

  #[test]
  fn test_evict_all_clears_everything() {
    let store = store();
    store.set(&QueryKey::lists(), &value(1));
    store.set(&QueryKey::me(), &value(2));
    store.evict_all();
    assert!(store.entry(&QueryKey::lists()).is_none());
    assert!(store.entry(&QueryKey::me()).is_none());
  }

  #[test]
  fn test_snapshot_restore_round_trip() {
    let store = store();
    let key = QueryKey::item("L1", "I1");
    store.set(&key, &value(1));
    let snapshot = store.snapshot(&key);
    store.set(&key, &value(2));
    store.restore(&key, snapshot);
    assert_eq!(store.entry(&key).unwrap().value, Some(value(1)));
  }

  #[test]
  fn test_restore_of_missing_snapshot_evicts() {
    let store = store();
    let key = QueryKey::item("L1", "I1");
    let snapshot = store.snapshot(&key);
    assert!(snapshot.is_none());
    store.set(&key, &value(1));
    store.restore(&key, snapshot);
    assert!(store.entry(&key).is_none());
  }

  #[test]
  fn test_every_write_bumps_the_revision() {
    let store = store();
    let key = QueryKey::lists();
    let mut revisions = store.subscribe();

    store.set(&key, &value(1));
    assert!(revisions.has_changed().unwrap());
    revisions.mark_unchanged();

    store.invalidate(&key);
    assert!(revisions.has_changed().unwrap());
    revisions.mark_unchanged();

    store.evict(&key);
    assert!(revisions.has_changed().unwrap());
  }
}
