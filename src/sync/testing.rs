//! Test doubles for the remote boundary.
//!
//! `MockRemote` behaves like a tiny in-memory Tally service: ids are
//! assigned sequentially, timestamps tick a fake millisecond clock, and
//! edits set `edited_at` the way the real service does. Two knobs steer it:
//!
//! - `script(result)` queues a per-call outcome; `Err` short-circuits the
//!   call, `Ok` lets it hit the in-memory state
//! - `push_gate()` queues a gate the next call blocks on until released,
//!   for interleaving tests

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::api::types::{
  Category, CategoryDraft, CreationSource, Item, ItemContent, ItemDraft, List, ListDraft, User,
};
use crate::api::Remote;
use crate::error::{AccessRole, ApiError, EntityKind, RuleViolation};

/// Fixed test epoch, far enough from zero to catch unit mixups.
const EPOCH_MS: i64 = 1_700_000_000_000;

/// Millisecond-precision timestamp `offset` ms after the test epoch.
/// Millisecond precision matters: cached values round-trip through the wire
/// encoding, so sub-millisecond timestamps would break equality asserts.
pub fn ts(offset: i64) -> DateTime<Utc> {
  DateTime::from_timestamp_millis(EPOCH_MS + offset).unwrap()
}

pub fn sample_list(id: &str) -> List {
  List {
    id: id.to_string(),
    owner: "U1".to_string(),
    name: format!("List {id}"),
    color: "#336699".to_string(),
    icon: "L".to_string(),
    is_public: false,
    created_at: ts(0),
    edited_at: None,
    viewers: Vec::new(),
    editors: Vec::new(),
  }
}

pub fn sample_item(id: &str) -> Item {
  Item {
    id: id.to_string(),
    list_id: "L1".to_string(),
    category_id: None,
    owner: "U1".to_string(),
    name: format!("Item {id}"),
    link: None,
    completed: false,
    completed_at: None,
    created_at: ts(0),
    edited_at: None,
  }
}

pub fn sample_items<const N: usize>(ids: [&str; N]) -> [Item; N] {
  ids.map(sample_item)
}

#[derive(Default)]
struct Inner {
  lists: Vec<List>,
  categories: Vec<Category>,
  items: Vec<Item>,
  contents: HashMap<(String, String), String>,
  next_id: u32,
  clock_ms: i64,
}

impl Inner {
  fn tick(&mut self) -> DateTime<Utc> {
    self.clock_ms += 1_000;
    ts(self.clock_ms)
  }

  fn next_id(&mut self, prefix: &str) -> String {
    self.next_id += 1;
    format!("{prefix}{}", self.next_id)
  }
}

pub struct MockRemote {
  inner: Mutex<Inner>,
  script: Mutex<VecDeque<Result<(), ApiError>>>,
  gates: Mutex<VecDeque<watch::Receiver<bool>>>,
  calls: AtomicU32,
}

impl MockRemote {
  pub fn new() -> Arc<Self> {
    Arc::new(Self {
      inner: Mutex::new(Inner::default()),
      script: Mutex::new(VecDeque::new()),
      gates: Mutex::new(VecDeque::new()),
      calls: AtomicU32::new(0),
    })
  }

  pub fn seed_list(&self, list: List) {
    self.inner.lock().unwrap().lists.push(list);
  }

  pub fn seed_item(&self, item: Item) {
    self.inner.lock().unwrap().items.push(item);
  }

  /// Queue the outcome for an upcoming call, in call order.
  pub fn script(&self, result: Result<(), ApiError>) {
    self.script.lock().unwrap().push_back(result);
  }

  /// Queue a gate for an upcoming call, in call order. The call blocks
  /// until `send(true)` on the returned handle.
  pub fn push_gate(&self) -> watch::Sender<bool> {
    let (release, gate) = watch::channel(false);
    self.gates.lock().unwrap().push_back(gate);
    release
  }

  pub fn call_count(&self) -> u32 {
    self.calls.load(Ordering::SeqCst)
  }

  /// Call-order bookkeeping shared by every method: assign the scripted
  /// outcome first, then block on the gate, then report the outcome.
  async fn enter(&self) -> Result<(), ApiError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    let scripted = self.script.lock().unwrap().pop_front();
    let gate = self.gates.lock().unwrap().pop_front();
    if let Some(mut gate) = gate {
      let _ = gate.wait_for(|open| *open).await;
    }
    match scripted {
      Some(result) => result,
      None => Ok(()),
    }
  }
}

#[async_trait]
impl Remote for MockRemote {
  async fn fetch_lists(&self) -> Result<Vec<List>, ApiError> {
    self.enter().await?;
    Ok(self.inner.lock().unwrap().lists.clone())
  }

  async fn fetch_list(&self, list_id: &str) -> Result<List, ApiError> {
    self.enter().await?;
    let inner = self.inner.lock().unwrap();
    inner
      .lists
      .iter()
      .find(|l| l.id == list_id)
      .cloned()
      .ok_or(ApiError::NotFound(EntityKind::List))
  }

  async fn create_list(&self, draft: &ListDraft) -> Result<List, ApiError> {
    self.enter().await?;
    let mut inner = self.inner.lock().unwrap();
    let list = List {
      id: inner.next_id("L"),
      owner: "U1".to_string(),
      name: draft.name.clone(),
      color: draft.color.clone(),
      icon: draft.icon.clone(),
      is_public: draft.is_public,
      created_at: inner.tick(),
      edited_at: None,
      viewers: Vec::new(),
      editors: Vec::new(),
    };
    inner.lists.push(list.clone());
    Ok(list)
  }

  async fn update_list(&self, list_id: &str, draft: &ListDraft) -> Result<List, ApiError> {
    self.enter().await?;
    let mut inner = self.inner.lock().unwrap();
    let edited_at = inner.tick();
    let list = inner
      .lists
      .iter_mut()
      .find(|l| l.id == list_id)
      .ok_or(ApiError::NotFound(EntityKind::List))?;
    list.name = draft.name.clone();
    list.color = draft.color.clone();
    list.icon = draft.icon.clone();
    list.is_public = draft.is_public;
    list.edited_at = Some(edited_at);
    Ok(list.clone())
  }

  async fn delete_list(&self, list_id: &str) -> Result<(), ApiError> {
    self.enter().await?;
    let mut inner = self.inner.lock().unwrap();
    if !inner.lists.iter().any(|l| l.id == list_id) {
      return Err(ApiError::NotFound(EntityKind::List));
    }
    inner.lists.retain(|l| l.id != list_id);
    inner.categories.retain(|c| c.list_id != list_id);
    inner.items.retain(|i| i.list_id != list_id);
    inner.contents.retain(|(list, _), _| list != list_id);
    Ok(())
  }

  async fn fetch_categories(&self, list_id: &str) -> Result<Vec<Category>, ApiError> {
    self.enter().await?;
    let inner = self.inner.lock().unwrap();
    Ok(
      inner
        .categories
        .iter()
        .filter(|c| c.list_id == list_id)
        .cloned()
        .collect(),
    )
  }

  async fn create_category(
    &self,
    list_id: &str,
    draft: &CategoryDraft,
  ) -> Result<Category, ApiError> {
    self.enter().await?;
    let mut inner = self.inner.lock().unwrap();
    let category = Category {
      id: inner.next_id("C"),
      list_id: list_id.to_string(),
      name: draft.name.clone(),
      color: draft.color.clone(),
    };
    inner.categories.push(category.clone());
    Ok(category)
  }

  async fn update_category(
    &self,
    list_id: &str,
    category_id: &str,
    draft: &CategoryDraft,
  ) -> Result<Category, ApiError> {
    self.enter().await?;
    let mut inner = self.inner.lock().unwrap();
    let category = inner
      .categories
      .iter_mut()
      .find(|c| c.list_id == list_id && c.id == category_id)
      .ok_or(ApiError::NotFound(EntityKind::Category))?;
    category.name = draft.name.clone();
    category.color = draft.color.clone();
    Ok(category.clone())
  }

  async fn delete_category(&self, list_id: &str, category_id: &str) -> Result<(), ApiError> {
    self.enter().await?;
    let mut inner = self.inner.lock().unwrap();
    let before = inner.categories.len();
    inner
      .categories
      .retain(|c| !(c.list_id == list_id && c.id == category_id));
    if inner.categories.len() == before {
      return Err(ApiError::NotFound(EntityKind::Category));
    }
    for item in inner.items.iter_mut() {
      if item.category_id.as_deref() == Some(category_id) {
        item.category_id = None;
      }
    }
    Ok(())
  }

  async fn fetch_items(
    &self,
    list_id: &str,
    completed: Option<bool>,
  ) -> Result<Vec<Item>, ApiError> {
    self.enter().await?;
    let inner = self.inner.lock().unwrap();
    Ok(
      inner
        .items
        .iter()
        .filter(|i| i.list_id == list_id)
        .filter(|i| completed.map_or(true, |wanted| i.completed == wanted))
        .cloned()
        .collect(),
    )
  }

  async fn fetch_item(&self, list_id: &str, item_id: &str) -> Result<Item, ApiError> {
    self.enter().await?;
    let inner = self.inner.lock().unwrap();
    inner
      .items
      .iter()
      .find(|i| i.list_id == list_id && i.id == item_id)
      .cloned()
      .ok_or(ApiError::NotFound(EntityKind::Item))
  }

  async fn create_item(&self, list_id: &str, draft: &ItemDraft) -> Result<Item, ApiError> {
    self.enter().await?;
    let mut inner = self.inner.lock().unwrap();
    if !inner.lists.iter().any(|l| l.id == list_id) {
      return Err(ApiError::NotFound(EntityKind::List));
    }
    let item = Item {
      id: inner.next_id("I"),
      list_id: list_id.to_string(),
      category_id: draft.category_id.clone(),
      owner: "U1".to_string(),
      name: draft.name.clone(),
      link: draft.link.clone(),
      completed: false,
      completed_at: None,
      created_at: inner.tick(),
      edited_at: None,
    };
    inner.items.push(item.clone());
    Ok(item)
  }

  async fn update_item(
    &self,
    list_id: &str,
    item_id: &str,
    draft: &ItemDraft,
  ) -> Result<Item, ApiError> {
    self.enter().await?;
    let mut inner = self.inner.lock().unwrap();
    let edited_at = inner.tick();
    let item = inner
      .items
      .iter_mut()
      .find(|i| i.list_id == list_id && i.id == item_id)
      .ok_or(ApiError::NotFound(EntityKind::Item))?;
    item.name = draft.name.clone();
    item.category_id = draft.category_id.clone();
    item.link = draft.link.clone();
    item.edited_at = Some(edited_at);
    Ok(item.clone())
  }

  async fn delete_item(&self, list_id: &str, item_id: &str) -> Result<(), ApiError> {
    self.enter().await?;
    let mut inner = self.inner.lock().unwrap();
    let before = inner.items.len();
    inner
      .items
      .retain(|i| !(i.list_id == list_id && i.id == item_id));
    if inner.items.len() == before {
      return Err(ApiError::NotFound(EntityKind::Item));
    }
    inner
      .contents
      .remove(&(list_id.to_string(), item_id.to_string()));
    Ok(())
  }

  async fn set_item_completion(
    &self,
    list_id: &str,
    item_id: &str,
    completed: bool,
  ) -> Result<Item, ApiError> {
    self.enter().await?;
    let mut inner = self.inner.lock().unwrap();
    let now = inner.tick();
    let item = inner
      .items
      .iter_mut()
      .find(|i| i.list_id == list_id && i.id == item_id)
      .ok_or(ApiError::NotFound(EntityKind::Item))?;
    item.completed = completed;
    item.completed_at = completed.then_some(now);
    item.edited_at = Some(now);
    Ok(item.clone())
  }

  async fn fetch_item_content(
    &self,
    list_id: &str,
    item_id: &str,
  ) -> Result<ItemContent, ApiError> {
    self.enter().await?;
    let inner = self.inner.lock().unwrap();
    let content = inner
      .contents
      .get(&(list_id.to_string(), item_id.to_string()))
      .cloned()
      .unwrap_or_default();
    Ok(ItemContent { content })
  }

  async fn update_item_content(
    &self,
    list_id: &str,
    item_id: &str,
    content: &str,
  ) -> Result<ItemContent, ApiError> {
    self.enter().await?;
    let mut inner = self.inner.lock().unwrap();
    inner
      .contents
      .insert((list_id.to_string(), item_id.to_string()), content.to_string());
    Ok(ItemContent {
      content: content.to_string(),
    })
  }

  async fn invite_member(
    &self,
    list_id: &str,
    email: &str,
    role: AccessRole,
  ) -> Result<List, ApiError> {
    self.enter().await?;
    let mut inner = self.inner.lock().unwrap();
    let list = inner
      .lists
      .iter_mut()
      .find(|l| l.id == list_id)
      .ok_or(ApiError::NotFound(EntityKind::List))?;
    // the mock uses the email as the member id directly
    match role {
      AccessRole::Viewer => list.viewers.push(email.to_string()),
      AccessRole::Editor => list.editors.push(email.to_string()),
      AccessRole::Owner => return Err(ApiError::InvalidParameters),
    }
    Ok(list.clone())
  }

  async fn remove_member(&self, list_id: &str, user_id: &str) -> Result<List, ApiError> {
    self.enter().await?;
    let mut inner = self.inner.lock().unwrap();
    let list = inner
      .lists
      .iter_mut()
      .find(|l| l.id == list_id)
      .ok_or(ApiError::NotFound(EntityKind::List))?;
    list.viewers.retain(|member| member != user_id);
    list.editors.retain(|member| member != user_id);
    Ok(list.clone())
  }

  async fn leave_list(&self, list_id: &str) -> Result<(), ApiError> {
    self.enter().await?;
    let mut inner = self.inner.lock().unwrap();
    if !inner.lists.iter().any(|l| l.id == list_id) {
      return Err(ApiError::NotFound(EntityKind::List));
    }
    inner.lists.retain(|l| l.id != list_id);
    Ok(())
  }

  async fn accept_invitation(&self, token: &str) -> Result<List, ApiError> {
    self.enter().await?;
    let mut inner = self.inner.lock().unwrap();
    let list_id = token.strip_prefix("invite:").unwrap_or(token).to_string();
    let list = inner
      .lists
      .iter_mut()
      .find(|l| l.id == list_id)
      .ok_or(ApiError::BusinessRule(RuleViolation::WrongAccountForInvitation))?;
    list.viewers.push("U1".to_string());
    Ok(list.clone())
  }

  async fn fetch_me(&self) -> Result<User, ApiError> {
    self.enter().await?;
    Ok(User {
      id: "U1".to_string(),
      email: "me@tally.test".to_string(),
      created_at: ts(0),
      creation_source: CreationSource::None,
    })
  }
}
