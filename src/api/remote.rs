//! The remote API boundary.

use async_trait::async_trait;

use super::types::{Category, CategoryDraft, Item, ItemContent, ItemDraft, List, ListDraft, User};
use crate::error::{AccessRole, ApiError};

/// Entity operations against the Tally service, one method per logical
/// operation.
///
/// Implementations translate calls into transport requests and map failures
/// into the closed [`ApiError`] taxonomy. Nothing behind this trait caches,
/// retries, or applies optimistic state; that all happens above it, which is
/// also what makes the sync layer testable against an in-memory double.
#[async_trait]
pub trait Remote: Send + Sync {
  // lists
  async fn fetch_lists(&self) -> Result<Vec<List>, ApiError>;
  async fn fetch_list(&self, list_id: &str) -> Result<List, ApiError>;
  async fn create_list(&self, draft: &ListDraft) -> Result<List, ApiError>;
  async fn update_list(&self, list_id: &str, draft: &ListDraft) -> Result<List, ApiError>;
  async fn delete_list(&self, list_id: &str) -> Result<(), ApiError>;

  // categories
  async fn fetch_categories(&self, list_id: &str) -> Result<Vec<Category>, ApiError>;
  async fn create_category(
    &self,
    list_id: &str,
    draft: &CategoryDraft,
  ) -> Result<Category, ApiError>;
  async fn update_category(
    &self,
    list_id: &str,
    category_id: &str,
    draft: &CategoryDraft,
  ) -> Result<Category, ApiError>;
  async fn delete_category(&self, list_id: &str, category_id: &str) -> Result<(), ApiError>;

  // items
  async fn fetch_items(&self, list_id: &str, completed: Option<bool>)
    -> Result<Vec<Item>, ApiError>;
  async fn fetch_item(&self, list_id: &str, item_id: &str) -> Result<Item, ApiError>;
  async fn create_item(&self, list_id: &str, draft: &ItemDraft) -> Result<Item, ApiError>;
  async fn update_item(
    &self,
    list_id: &str,
    item_id: &str,
    draft: &ItemDraft,
  ) -> Result<Item, ApiError>;
  async fn delete_item(&self, list_id: &str, item_id: &str) -> Result<(), ApiError>;
  async fn set_item_completion(
    &self,
    list_id: &str,
    item_id: &str,
    completed: bool,
  ) -> Result<Item, ApiError>;

  // item content
  async fn fetch_item_content(&self, list_id: &str, item_id: &str)
    -> Result<ItemContent, ApiError>;
  async fn update_item_content(
    &self,
    list_id: &str,
    item_id: &str,
    content: &str,
  ) -> Result<ItemContent, ApiError>;

  // sharing
  async fn invite_member(
    &self,
    list_id: &str,
    email: &str,
    role: AccessRole,
  ) -> Result<List, ApiError>;
  async fn remove_member(&self, list_id: &str, user_id: &str) -> Result<List, ApiError>;
  async fn leave_list(&self, list_id: &str) -> Result<(), ApiError>;
  async fn accept_invitation(&self, token: &str) -> Result<List, ApiError>;

  // session
  async fn fetch_me(&self) -> Result<User, ApiError>;
}
