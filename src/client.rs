//! High-level client facade.
//!
//! Wires the cache store, the HTTP adapter, the mutation coordinator, and the
//! session scratchpad together, and hands out ready-made read bindings for
//! every entity the service exposes. Most consumers only ever touch this type.

use std::sync::Arc;

use color_eyre::Result;
use tracing::{debug, warn};

use crate::api::types::{Category, Item, ItemContent, List, User};
use crate::api::{HttpRemote, Remote};
use crate::cache::{CacheStore, QueryKey};
use crate::config::Config;
use crate::error::ApiError;
use crate::session::SessionStore;
use crate::sync::{Mutator, ReadBinding};

/// One connected Tally client: cache, transport, mutations, session.
///
/// Cloning is cheap; all clones share the same cache and session.
#[derive(Clone)]
pub struct TallyClient {
  store: CacheStore,
  remote: Arc<HttpRemote>,
  mutator: Mutator,
  session: SessionStore,
}

impl TallyClient {
  pub fn new(config: &Config) -> Result<Self> {
    let store = CacheStore::new();
    let session = SessionStore::open()?;

    // A session operation answered 401 means the cookie died server-side.
    // Everything cached belongs to that session, so drop it all.
    let hook_store = store.clone();
    let remote = Arc::new(HttpRemote::new(config)?.with_auth_expired_hook(move || {
      debug!("session expired, dropping cached state");
      hook_store.evict_all();
    }));

    let mutator = Mutator::new(store.clone(), remote.clone() as Arc<dyn Remote>);

    Ok(Self {
      store,
      remote,
      mutator,
      session,
    })
  }

  pub fn store(&self) -> &CacheStore {
    &self.store
  }

  pub fn mutator(&self) -> &Mutator {
    &self.mutator
  }

  /// Direct access to the HTTP adapter, for onboarding endpoints and one-off
  /// listings that bypass the cache.
  pub fn api(&self) -> &HttpRemote {
    &self.remote
  }

  pub fn session(&self) -> &SessionStore {
    &self.session
  }

  // ==========================================================================
  // Session flow
  // ==========================================================================

  /// Log in and start a fresh cache. Anything cached before this call belonged
  /// to another session (or none) and must not leak into this one.
  pub async fn login(&self, email: &str, password: &str) -> Result<(), ApiError> {
    self.remote.login(email, password).await?;
    self.store.evict_all();
    if let Err(e) = self.session.clear_credentials() {
      warn!("failed to clear onboarding credentials: {}", e);
    }
    Ok(())
  }

  /// End the session. Local state is torn down even when the server call
  /// fails; the cookie is gone either way once the process exits.
  pub async fn logout(&self) -> Result<(), ApiError> {
    let result = self.remote.logout().await;
    self.store.evict_all();
    if let Err(e) = self.session.clear() {
      warn!("failed to clear session state: {}", e);
    }
    result
  }

  // ==========================================================================
  // Read bindings
  // ==========================================================================

  pub fn lists(&self) -> ReadBinding<Vec<List>> {
    let remote = self.remote.clone();
    ReadBinding::new(self.store.clone(), QueryKey::lists(), move || {
      let remote = remote.clone();
      async move { remote.fetch_lists().await }
    })
  }

  pub fn list(&self, list_id: &str) -> ReadBinding<List> {
    let remote = self.remote.clone();
    let list = list_id.to_string();
    ReadBinding::new(self.store.clone(), QueryKey::list(list_id), move || {
      let remote = remote.clone();
      let list = list.clone();
      async move { remote.fetch_list(&list).await }
    })
  }

  pub fn categories(&self, list_id: &str) -> ReadBinding<Vec<Category>> {
    let remote = self.remote.clone();
    let list = list_id.to_string();
    ReadBinding::new(self.store.clone(), QueryKey::categories(list_id), move || {
      let remote = remote.clone();
      let list = list.clone();
      async move { remote.fetch_categories(&list).await }
    })
  }

  /// Items of a list, unfiltered. The cache holds the whole collection;
  /// filtered views are derived from it or fetched directly via [`Self::api`].
  pub fn items(&self, list_id: &str) -> ReadBinding<Vec<Item>> {
    let remote = self.remote.clone();
    let list = list_id.to_string();
    ReadBinding::new(self.store.clone(), QueryKey::items(list_id), move || {
      let remote = remote.clone();
      let list = list.clone();
      async move { remote.fetch_items(&list, None).await }
    })
  }

  pub fn item(&self, list_id: &str, item_id: &str) -> ReadBinding<Item> {
    let remote = self.remote.clone();
    let list = list_id.to_string();
    let item = item_id.to_string();
    ReadBinding::new(
      self.store.clone(),
      QueryKey::item(list_id, item_id),
      move || {
        let remote = remote.clone();
        let list = list.clone();
        let item = item.clone();
        async move { remote.fetch_item(&list, &item).await }
      },
    )
  }

  pub fn item_content(&self, list_id: &str, item_id: &str) -> ReadBinding<ItemContent> {
    let remote = self.remote.clone();
    let list = list_id.to_string();
    let item = item_id.to_string();
    ReadBinding::new(
      self.store.clone(),
      QueryKey::item_content(list_id, item_id),
      move || {
        let remote = remote.clone();
        let list = list.clone();
        let item = item.clone();
        async move { remote.fetch_item_content(&list, &item).await }
      },
    )
  }

  pub fn me(&self) -> ReadBinding<User> {
    let remote = self.remote.clone();
    ReadBinding::new(self.store.clone(), QueryKey::me(), move || {
      let remote = remote.clone();
      async move { remote.fetch_me().await }
    })
  }
}
