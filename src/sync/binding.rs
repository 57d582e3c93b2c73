//! Read bindings: cached async reads with staleness and retry handling.
//!
//! Inspired by TanStack Query, a `ReadBinding<T>` ties a query key to a
//! fetcher closure. Its state lives entirely in the shared [`CacheStore`],
//! so any number of bindings for the same key observe one entry and share
//! one in-flight fetch.
//!
//! # Example
//!
//! ```ignore
//! let lists = client.lists();
//!
//! // Fire-and-forget: start a fetch if the entry is missing or stale
//! lists.ensure();
//!
//! // Or wait for settlement
//! let state = lists.resolve().await;
//! match state.data {
//!   Some(data) => render(data),
//!   None if state.is_error => render_error(state.error),
//!   None => render_empty(),
//! }
//! ```

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error};

use crate::cache::{CacheStore, EntryStatus, QueryKey};
use crate::error::ApiError;

/// Retry behavior for failed fetches.
///
/// Only [`ApiError::Unknown`] is ever retried; every other kind is a
/// definitive answer and surfaces immediately regardless of this policy.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
  /// Additional attempts after the initial one.
  pub max_retries: u32,
  /// Backoff base; attempt `n` waits `base_delay * 2^n` before retrying.
  pub base_delay: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_retries: 2,
      base_delay: Duration::from_millis(250),
    }
  }
}

/// Point-in-time view of a binding, decoded for presentation.
///
/// `data` can be present together with `is_pending` (stale value shown while
/// revalidating) or with `is_error` (stale value shown while the last fetch's
/// failure is held).
#[derive(Debug, Clone)]
pub struct BindingState<T> {
  pub data: Option<T>,
  pub is_pending: bool,
  pub is_error: bool,
  pub error: Option<ApiError>,
}

impl<T> BindingState<T> {
  fn idle() -> Self {
    Self {
      data: None,
      is_pending: false,
      is_error: false,
      error: None,
    }
  }
}

/// A boxed future that resolves to a fetched value
type BoxFuture<T> = Pin<Box<dyn Future<Output = Result<T, ApiError>> + Send>>;

/// A factory function that creates futures for fetching data
type FetcherFn<T> = Arc<dyn Fn() -> BoxFuture<T> + Send + Sync>;

/// A cached read of one query key.
///
/// Bindings are cheap to clone and share their fetcher, so a view can hold
/// one per rendered collection without coordination.
pub struct ReadBinding<T> {
  store: CacheStore,
  key: QueryKey,
  fetcher: FetcherFn<T>,
  retry: RetryPolicy,
}

impl<T> ReadBinding<T>
where
  T: Serialize + DeserializeOwned + Send + 'static,
{
  /// Create a binding with the given fetcher function.
  ///
  /// The fetcher is called each time this binding (or a clone of it) claims
  /// a fetch, plus once per retry.
  pub fn new<F, Fut>(store: CacheStore, key: QueryKey, fetcher: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
  {
    Self {
      store,
      key,
      fetcher: Arc::new(move || Box::pin(fetcher())),
      retry: RetryPolicy::default(),
    }
  }

  /// Override the retry policy for this binding.
  pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
    self.retry = retry;
    self
  }

  pub fn key(&self) -> &QueryKey {
    &self.key
  }

  /// Current state. Never triggers a fetch.
  pub fn snapshot(&self) -> BindingState<T> {
    let Some(view) = self.store.entry(&self.key) else {
      return BindingState::idle();
    };
    BindingState {
      data: self.store.get(&self.key),
      is_pending: view.status == EntryStatus::Fetching,
      is_error: view.last_error.is_some(),
      error: view.last_error,
    }
  }

  /// Start a background fetch if the entry is missing or stale.
  ///
  /// This is a no-op while the entry is fresh, while a fetch is already in
  /// flight, and while a failed fetch's error is held (errors clear on
  /// [`CacheStore::invalidate`] or [`ReadBinding::refetch`]).
  pub fn ensure(&self) {
    self.spawn_fetch(false);
  }

  /// Force a new fetch, superseding any in-flight one.
  pub fn refetch(&self) {
    self.spawn_fetch(true);
  }

  /// [`ReadBinding::ensure`] plus waiting until the entry settles.
  ///
  /// Settled means not fetching: either fresh data or a held error. Other
  /// writers may settle the entry too (a mutation writing the key, an
  /// eviction); whatever state the entry settles in is returned.
  pub async fn resolve(&self) -> BindingState<T> {
    let mut revisions = self.store.subscribe();
    self.ensure();
    loop {
      let state = self.snapshot();
      if !state.is_pending {
        return state;
      }
      if revisions.changed().await.is_err() {
        return self.snapshot();
      }
    }
  }

  fn spawn_fetch(&self, force: bool) {
    let Some(generation) = self.store.begin_fetch(&self.key, force) else {
      return;
    };
    let store = self.store.clone();
    let key = self.key.clone();
    let fetcher = Arc::clone(&self.fetcher);
    let retry = self.retry;
    tokio::spawn(async move {
      let result = fetch_with_retries(&key, fetcher.as_ref(), retry).await;
      let result = result.and_then(|data| {
        serde_json::to_value(&data).map_err(|err| {
          error!(%key, %err, "fetched value failed to serialize");
          ApiError::Unknown
        })
      });
      store.complete_fetch(&key, generation, result);
    });
  }
}

async fn fetch_with_retries<T>(
  key: &QueryKey,
  fetcher: &(dyn Fn() -> BoxFuture<T> + Send + Sync),
  retry: RetryPolicy,
) -> Result<T, ApiError> {
  let mut attempt = 0;
  loop {
    match fetcher().await {
      Ok(data) => return Ok(data),
      Err(err) if err.is_retryable() && attempt < retry.max_retries => {
        let delay = retry.base_delay * 2u32.saturating_pow(attempt);
        debug!(%key, %err, attempt, "retrying failed fetch");
        tokio::time::sleep(delay).await;
        attempt += 1;
      }
      Err(err) => return Err(err),
    }
  }
}

impl<T> Clone for ReadBinding<T> {
  fn clone(&self) -> Self {
    Self {
      store: self.store.clone(),
      key: self.key.clone(),
      fetcher: Arc::clone(&self.fetcher),
      retry: self.retry,
    }
  }
}

impl<T> fmt::Debug for ReadBinding<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ReadBinding")
      .field("key", &self.key)
      .field("retry", &self.retry)
      .finish_non_exhaustive()
  }
}
