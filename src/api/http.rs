//! HTTP fetch adapter for the Tally service.
//!
//! This is the only module that sees HTTP. Every outcome is translated into
//! the closed [`ApiError`] taxonomy via [`classify`] before it leaves, so
//! status codes and transport errors never reach the sync layer. The session
//! rides in a cookie jar owned by the underlying client.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use super::remote::Remote;
use super::types::{
  Category, CategoryDraft, Item, ItemContent, ItemDraft, List, ListDraft, User, WelcomeAction,
};
use crate::config::Config;
use crate::error::{classify, AccessRole, ApiError, Operation};

/// Called when a session operation comes back 401: the session expired or
/// never existed. Wired by the client facade to tear down cached state and
/// park a resume target.
pub type AuthExpiredHook = Arc<dyn Fn() + Send + Sync>;

#[derive(serde::Deserialize)]
struct WelcomeActionResponse {
  action: WelcomeAction,
}

/// Tally API client over HTTP.
pub struct HttpRemote {
  http: reqwest::Client,
  base_url: Url,
  auth_expired: Option<AuthExpiredHook>,
}

impl HttpRemote {
  pub fn new(config: &Config) -> Result<Self> {
    let base_url = Url::parse(&config.api.base_url)
      .map_err(|e| eyre!("Invalid API base URL {}: {}", config.api.base_url, e))?;
    if base_url.cannot_be_a_base() {
      return Err(eyre!(
        "API base URL must be an http(s) URL: {}",
        config.api.base_url
      ));
    }

    let http = reqwest::Client::builder()
      .cookie_store(true)
      .timeout(Duration::from_secs(config.api.request_timeout_secs))
      .user_agent(concat!("tally/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    Ok(Self {
      http,
      base_url,
      auth_expired: None,
    })
  }

  /// Install the session-expiry callback. At most one; later calls replace.
  pub fn with_auth_expired_hook(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
    self.auth_expired = Some(Arc::new(hook));
    self
  }

  // ==========================================================================
  // Onboarding and session endpoints
  // ==========================================================================

  /// Ask the service whether `email` should log in or register.
  pub async fn welcome_action(&self, email: &str) -> Result<WelcomeAction, ApiError> {
    let mut url = self.endpoint(&["welcome-action"])?;
    url.query_pairs_mut().append_pair("email", email);
    let response: WelcomeActionResponse = self
      .send_json(Operation::WelcomeAction, self.http.get(url))
      .await?;
    Ok(response.action)
  }

  /// Create an account. Returns whether a verification email was sent (it is
  /// not for accounts created through a federated identity).
  pub async fn register(&self, email: &str, password: &str) -> Result<bool, ApiError> {
    super::types::validate_password(password)?;
    let url = self.endpoint(&["register"])?;
    let body = serde_json::json!({ "email": email, "password": password });
    let response = self
      .send(Operation::Register, self.http.post(url).json(&body))
      .await?;
    Ok(response.status() == StatusCode::OK)
  }

  /// Establish a session. The cookie jar keeps it from here on.
  pub async fn login(&self, email: &str, password: &str) -> Result<(), ApiError> {
    let url = self.endpoint(&["login"])?;
    let body = serde_json::json!({ "email": email, "password": password });
    self
      .send(Operation::Login, self.http.post(url).json(&body))
      .await?;
    Ok(())
  }

  /// End the server-side session and drop the cookie.
  pub async fn logout(&self) -> Result<(), ApiError> {
    let url = self.endpoint(&["logout"])?;
    self.send(Operation::Logout, self.http.post(url)).await?;
    Ok(())
  }

  /// Re-send the address verification email. Returns whether one went out.
  pub async fn send_verification_email(&self, email: &str, password: &str) -> Result<bool, ApiError> {
    let url = self.endpoint(&["send-verification-email"])?;
    let form = [("email", email), ("password", password)];
    let response = self
      .send(
        Operation::SendVerificationEmail,
        self.http.post(url).form(&form),
      )
      .await?;
    Ok(response.status() == StatusCode::CREATED)
  }

  /// Whether the address for these credentials has been verified yet.
  /// The service answers 404 while it is not, which is an answer, not an
  /// error.
  pub async fn is_email_verified(&self, email: &str, password: &str) -> Result<bool, ApiError> {
    let url = self.endpoint(&["is-email-verified"])?;
    let form = [("email", email), ("password", password)];
    let response = self.http.post(url).form(&form).send().await.map_err(|err| {
      warn!(%err, "transport failure");
      ApiError::Unknown
    })?;
    match response.status() {
      status if status.is_success() => Ok(true),
      StatusCode::NOT_FOUND => Ok(false),
      status => Err(classify(Operation::CheckEmailVerified, status.as_u16())),
    }
  }

  /// Trigger the password reset email.
  pub async fn send_password_forgotten_email(&self, email: &str) -> Result<(), ApiError> {
    let mut url = self.endpoint(&["password-forgotten"])?;
    url.query_pairs_mut().append_pair("email", email);
    self
      .send(Operation::PasswordForgotten, self.http.get(url))
      .await?;
    Ok(())
  }

  /// Redeem a reset token (carried as a query parameter, straight from the
  /// emailed link) for a new password.
  pub async fn reset_password(&self, token: &str, password: &str) -> Result<(), ApiError> {
    super::types::validate_password(password)?;
    let mut url = self.endpoint(&["reset-password"])?;
    url.query_pairs_mut().append_pair("token", token);
    let body = serde_json::json!({ "password": password });
    self
      .send(Operation::ResetPassword, self.http.post(url).json(&body))
      .await?;
    Ok(())
  }

  // ==========================================================================
  // Request plumbing
  // ==========================================================================

  fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
    build_endpoint(&self.base_url, segments)
  }

  async fn send(&self, op: Operation, request: RequestBuilder) -> Result<Response, ApiError> {
    let response = request.send().await.map_err(|err| {
      warn!(?op, %err, "transport failure");
      ApiError::Unknown
    })?;
    let status = response.status();
    if status.is_success() {
      return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED && op.uses_session() {
      // session gone: tear down first, then fail fast so nothing retries
      if let Some(hook) = &self.auth_expired {
        hook();
      }
      debug!(?op, "session expired");
      return Err(ApiError::NotAuthenticated);
    }
    let kind = classify(op, status.as_u16());
    debug!(?op, status = status.as_u16(), error = %kind, "request rejected");
    Err(kind)
  }

  async fn send_json<T: DeserializeOwned>(
    &self,
    op: Operation,
    request: RequestBuilder,
  ) -> Result<T, ApiError> {
    let response = self.send(op, request).await?;
    response.json::<T>().await.map_err(|err| {
      warn!(?op, %err, "malformed response body");
      ApiError::Unknown
    })
  }
}

/// Join path segments onto the API base URL, percent-encoding each segment.
fn build_endpoint(base: &Url, segments: &[&str]) -> Result<Url, ApiError> {
  let mut url = base.clone();
  url
    .path_segments_mut()
    .map_err(|_| {
      warn!(%base, "API base URL cannot carry paths");
      ApiError::Unknown
    })?
    .pop_if_empty()
    .extend(segments);
  Ok(url)
}

#[async_trait]
impl Remote for HttpRemote {
  async fn fetch_lists(&self) -> Result<Vec<List>, ApiError> {
    let url = self.endpoint(&["lists"])?;
    self.send_json(Operation::FetchLists, self.http.get(url)).await
  }

  async fn fetch_list(&self, list_id: &str) -> Result<List, ApiError> {
    let url = self.endpoint(&["lists", list_id])?;
    self.send_json(Operation::FetchList, self.http.get(url)).await
  }

  async fn create_list(&self, draft: &ListDraft) -> Result<List, ApiError> {
    let url = self.endpoint(&["lists"])?;
    self
      .send_json(Operation::CreateList, self.http.post(url).json(draft))
      .await
  }

  async fn update_list(&self, list_id: &str, draft: &ListDraft) -> Result<List, ApiError> {
    let url = self.endpoint(&["lists", list_id])?;
    self
      .send_json(Operation::EditList, self.http.put(url).json(draft))
      .await
  }

  async fn delete_list(&self, list_id: &str) -> Result<(), ApiError> {
    let url = self.endpoint(&["lists", list_id])?;
    self.send(Operation::DeleteList, self.http.delete(url)).await?;
    Ok(())
  }

  async fn fetch_categories(&self, list_id: &str) -> Result<Vec<Category>, ApiError> {
    let url = self.endpoint(&["lists", list_id, "categories"])?;
    self.send_json(Operation::FetchCategories, self.http.get(url)).await
  }

  async fn create_category(
    &self,
    list_id: &str,
    draft: &CategoryDraft,
  ) -> Result<Category, ApiError> {
    let url = self.endpoint(&["lists", list_id, "categories"])?;
    self
      .send_json(Operation::CreateCategory, self.http.post(url).json(draft))
      .await
  }

  async fn update_category(
    &self,
    list_id: &str,
    category_id: &str,
    draft: &CategoryDraft,
  ) -> Result<Category, ApiError> {
    let url = self.endpoint(&["lists", list_id, "categories", category_id])?;
    self
      .send_json(Operation::EditCategory, self.http.put(url).json(draft))
      .await
  }

  async fn delete_category(&self, list_id: &str, category_id: &str) -> Result<(), ApiError> {
    let url = self.endpoint(&["lists", list_id, "categories", category_id])?;
    self.send(Operation::DeleteCategory, self.http.delete(url)).await?;
    Ok(())
  }

  async fn fetch_items(
    &self,
    list_id: &str,
    completed: Option<bool>,
  ) -> Result<Vec<Item>, ApiError> {
    let mut url = self.endpoint(&["lists", list_id, "items"])?;
    if let Some(completed) = completed {
      url
        .query_pairs_mut()
        .append_pair("completed", if completed { "true" } else { "false" });
    }
    self.send_json(Operation::FetchItems, self.http.get(url)).await
  }

  async fn fetch_item(&self, list_id: &str, item_id: &str) -> Result<Item, ApiError> {
    let url = self.endpoint(&["lists", list_id, "items", item_id])?;
    self.send_json(Operation::FetchItem, self.http.get(url)).await
  }

  async fn create_item(&self, list_id: &str, draft: &ItemDraft) -> Result<Item, ApiError> {
    let url = self.endpoint(&["lists", list_id, "items"])?;
    self
      .send_json(Operation::CreateItem, self.http.post(url).json(draft))
      .await
  }

  async fn update_item(
    &self,
    list_id: &str,
    item_id: &str,
    draft: &ItemDraft,
  ) -> Result<Item, ApiError> {
    let url = self.endpoint(&["lists", list_id, "items", item_id])?;
    self
      .send_json(Operation::EditItem, self.http.put(url).json(draft))
      .await
  }

  async fn delete_item(&self, list_id: &str, item_id: &str) -> Result<(), ApiError> {
    let url = self.endpoint(&["lists", list_id, "items", item_id])?;
    self.send(Operation::DeleteItem, self.http.delete(url)).await?;
    Ok(())
  }

  async fn set_item_completion(
    &self,
    list_id: &str,
    item_id: &str,
    completed: bool,
  ) -> Result<Item, ApiError> {
    let url = self.endpoint(&["lists", list_id, "items", item_id, "completion"])?;
    let body = serde_json::json!({ "completed": completed });
    self
      .send_json(Operation::SetItemCompletion, self.http.put(url).json(&body))
      .await
  }

  async fn fetch_item_content(
    &self,
    list_id: &str,
    item_id: &str,
  ) -> Result<ItemContent, ApiError> {
    let url = self.endpoint(&["lists", list_id, "items", item_id, "content"])?;
    self.send_json(Operation::FetchItemContent, self.http.get(url)).await
  }

  async fn update_item_content(
    &self,
    list_id: &str,
    item_id: &str,
    content: &str,
  ) -> Result<ItemContent, ApiError> {
    let url = self.endpoint(&["lists", list_id, "items", item_id, "content"])?;
    let body = serde_json::json!({ "content": content });
    self
      .send_json(Operation::EditItemContent, self.http.put(url).json(&body))
      .await
  }

  async fn invite_member(
    &self,
    list_id: &str,
    email: &str,
    role: AccessRole,
  ) -> Result<List, ApiError> {
    let url = self.endpoint(&["lists", list_id, "access"])?;
    let body = serde_json::json!({ "email": email, "role": role.to_string() });
    self
      .send_json(Operation::InviteMember, self.http.post(url).json(&body))
      .await
  }

  async fn remove_member(&self, list_id: &str, user_id: &str) -> Result<List, ApiError> {
    let url = self.endpoint(&["lists", list_id, "access", user_id])?;
    self.send_json(Operation::RemoveMember, self.http.delete(url)).await
  }

  async fn leave_list(&self, list_id: &str) -> Result<(), ApiError> {
    let url = self.endpoint(&["lists", list_id, "leave"])?;
    self.send(Operation::LeaveList, self.http.post(url)).await?;
    Ok(())
  }

  async fn accept_invitation(&self, token: &str) -> Result<List, ApiError> {
    let url = self.endpoint(&["lists", "accept-invitation"])?;
    let body = serde_json::json!({ "token": token });
    self
      .send_json(Operation::AcceptInvitation, self.http.post(url).json(&body))
      .await
  }

  async fn fetch_me(&self) -> Result<User, ApiError> {
    let url = self.endpoint(&["me"])?;
    self.send_json(Operation::FetchMe, self.http.get(url)).await
  }
}
