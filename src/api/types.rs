//! Domain types for the Tally API.
//!
//! These mirror the server's JSON wire format directly: snake_case member
//! names and timestamps as milliseconds since the Unix epoch. The same serde
//! shapes are reused for cache storage, so a value round-trips unchanged
//! between the wire and the store. Where a wire name is unhelpfully terse the
//! field carries a serde rename rather than inheriting the terseness.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::Entity;
use crate::error::ApiError;

// ============================================================================
// Entities
// ============================================================================

/// A list: the root of the entity hierarchy, owned by its creator and
/// optionally shared with viewers and editors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct List {
  pub id: String,
  /// User id of the owner.
  #[serde(rename = "user_id")]
  pub owner: String,
  pub name: String,
  /// Display color, `#RRGGBB`.
  pub color: String,
  /// Short emoji or glyph shown next to the name.
  pub icon: String,
  #[serde(rename = "public")]
  pub is_public: bool,
  #[serde(with = "chrono::serde::ts_milliseconds")]
  pub created_at: DateTime<Utc>,
  #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
  pub edited_at: Option<DateTime<Utc>>,
  /// User ids with read access.
  pub viewers: Vec<String>,
  /// User ids with write access.
  pub editors: Vec<String>,
}

/// A grouping of items within a list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
  pub id: String,
  pub list_id: String,
  pub name: String,
  /// Display color, `#RRGGBB`.
  pub color: String,
}

/// A single entry in a list.
///
/// The markdown body is not part of this record; it lives under its own
/// query key (see [`ItemContent`]) so collection reads stay small.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
  pub id: String,
  pub list_id: String,
  pub category_id: Option<String>,
  /// User id of the creator.
  #[serde(rename = "user_id")]
  pub owner: String,
  pub name: String,
  pub link: Option<String>,
  pub completed: bool,
  #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
  pub completed_at: Option<DateTime<Utc>>,
  #[serde(with = "chrono::serde::ts_milliseconds")]
  pub created_at: DateTime<Utc>,
  #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
  pub edited_at: Option<DateTime<Utc>>,
}

/// The markdown body of an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemContent {
  pub content: String,
}

/// The signed-in user as reported by `/me`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
  pub id: String,
  pub email: String,
  #[serde(rename = "creation_timestamp", with = "chrono::serde::ts_milliseconds")]
  pub created_at: DateTime<Utc>,
  pub creation_source: CreationSource,
}

/// How an account was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreationSource {
  Google,
  Apple,
  Facebook,
  /// Plain email and password registration.
  None,
}

/// What the onboarding flow should do for a given email.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WelcomeAction {
  /// The email has an account; ask for the password.
  Login,
  /// Unknown email; offer registration.
  Register,
}

// ============================================================================
// Drafts
// ============================================================================
//
// Drafts carry the caller-editable fields of an entity. Creation and edits
// send the same shape; partial updates are not supported, so an edit always
// sends the complete draft.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListDraft {
  pub name: String,
  pub icon: String,
  pub color: String,
  #[serde(rename = "public")]
  pub is_public: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryDraft {
  pub name: String,
  pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemDraft {
  pub name: String,
  pub category_id: Option<String>,
  pub link: Option<String>,
}

impl ListDraft {
  /// Local validation, run before any network traffic.
  pub fn validate(&self) -> Result<(), ApiError> {
    check(char_len_in(&self.name, 1, 100), "list name length")?;
    check(char_len_in(&self.icon, 1, 10), "list icon length")?;
    check(is_hex_color(&self.color), "list color format")?;
    Ok(())
  }
}

impl CategoryDraft {
  /// Local validation, run before any network traffic.
  pub fn validate(&self) -> Result<(), ApiError> {
    check(char_len_in(&self.name, 1, 100), "category name length")?;
    check(is_hex_color(&self.color), "category color format")?;
    Ok(())
  }
}

impl ItemDraft {
  /// Local validation, run before any network traffic.
  pub fn validate(&self) -> Result<(), ApiError> {
    check(char_len_in(&self.name, 1, 200), "item name length")?;
    if let Some(link) = &self.link {
      check(char_len_in(link, 0, 200), "item link length")?;
    }
    Ok(())
  }
}

/// Password policy shared by registration and password reset: 8 to 100
/// characters with at least one uppercase letter, one lowercase letter and
/// one digit.
pub fn validate_password(password: &str) -> Result<(), ApiError> {
  check(char_len_in(password, 8, 100), "password length")?;
  check(password.chars().any(|c| c.is_ascii_uppercase()), "password uppercase")?;
  check(password.chars().any(|c| c.is_ascii_lowercase()), "password lowercase")?;
  check(password.chars().any(|c| c.is_ascii_digit()), "password digit")?;
  Ok(())
}

fn check(ok: bool, rule: &str) -> Result<(), ApiError> {
  if ok {
    Ok(())
  } else {
    tracing::debug!(rule, "draft rejected locally");
    Err(ApiError::InvalidParameters)
  }
}

fn char_len_in(value: &str, min: usize, max: usize) -> bool {
  let len = value.chars().count();
  len >= min && len <= max
}

fn is_hex_color(value: &str) -> bool {
  let mut chars = value.chars();
  chars.next() == Some('#') && {
    let rest: Vec<char> = chars.collect();
    rest.len() == 6 && rest.iter().all(|c| c.is_ascii_hexdigit())
  }
}

// ============================================================================
// Cache integration
// ============================================================================

impl Entity for List {
  fn id(&self) -> &str {
    &self.id
  }

  fn entity_type() -> &'static str {
    "list"
  }
}

impl Entity for Category {
  fn id(&self) -> &str {
    &self.id
  }

  fn entity_type() -> &'static str {
    "category"
  }
}

impl Entity for Item {
  fn id(&self) -> &str {
    &self.id
  }

  fn entity_type() -> &'static str {
    "item"
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_item_round_trips_through_wire_format() {
    let json = serde_json::json!({
      "id": "I1",
      "list_id": "L1",
      "category_id": null,
      "user_id": "U1",
      "name": "Buy milk",
      "link": "https://example.com",
      "completed": true,
      "completed_at": 1_700_000_100_000_i64,
      "created_at": 1_700_000_000_000_i64,
      "edited_at": null,
    });
    let item: Item = serde_json::from_value(json.clone()).unwrap();
    assert_eq!(item.id, "I1");
    assert_eq!(item.owner, "U1");
    assert_eq!(item.created_at.timestamp_millis(), 1_700_000_000_000);
    assert_eq!(
      item.completed_at.map(|t| t.timestamp_millis()),
      Some(1_700_000_100_000)
    );
    assert_eq!(serde_json::to_value(&item).unwrap(), json);
  }

  #[test]
  fn test_optional_timestamps_tolerate_missing_fields() {
    let json = serde_json::json!({
      "id": "I1",
      "list_id": "L1",
      "category_id": null,
      "user_id": "U1",
      "name": "Buy milk",
      "link": null,
      "completed": false,
      "created_at": 1_700_000_000_000_i64,
    });
    let item: Item = serde_json::from_value(json).unwrap();
    assert_eq!(item.completed_at, None);
    assert_eq!(item.edited_at, None);
  }

  #[test]
  fn test_list_wire_names_for_renamed_fields() {
    let json = serde_json::json!({
      "id": "L1",
      "user_id": "U1",
      "name": "Groceries",
      "color": "#AABB01",
      "icon": "🛒",
      "public": true,
      "created_at": 1_700_000_000_000_i64,
      "edited_at": null,
      "viewers": ["U2"],
      "editors": [],
    });
    let list: List = serde_json::from_value(json.clone()).unwrap();
    assert_eq!(list.owner, "U1");
    assert!(list.is_public);
    assert_eq!(serde_json::to_value(&list).unwrap(), json);
  }

  #[test]
  fn test_welcome_action_wire_names() {
    assert_eq!(
      serde_json::from_value::<WelcomeAction>(serde_json::json!("register")).unwrap(),
      WelcomeAction::Register
    );
    assert_eq!(
      serde_json::to_value(CreationSource::None).unwrap(),
      serde_json::json!("none")
    );
  }

  #[test]
  fn test_list_draft_validation() {
    let draft = ListDraft {
      name: "Groceries".to_string(),
      icon: "🛒".to_string(),
      color: "#AABB01".to_string(),
      is_public: false,
    };
    assert!(draft.validate().is_ok());

    let empty_name = ListDraft {
      name: String::new(),
      ..draft.clone()
    };
    assert_eq!(empty_name.validate(), Err(ApiError::InvalidParameters));

    let bad_color = ListDraft {
      color: "AABB01".to_string(),
      ..draft.clone()
    };
    assert_eq!(bad_color.validate(), Err(ApiError::InvalidParameters));

    let long_icon = ListDraft {
      icon: "x".repeat(11),
      ..draft
    };
    assert_eq!(long_icon.validate(), Err(ApiError::InvalidParameters));
  }

  #[test]
  fn test_item_draft_validation() {
    let draft = ItemDraft {
      name: "Buy milk".to_string(),
      category_id: None,
      link: None,
    };
    assert!(draft.validate().is_ok());

    let long_name = ItemDraft {
      name: "x".repeat(201),
      ..draft.clone()
    };
    assert_eq!(long_name.validate(), Err(ApiError::InvalidParameters));

    let long_link = ItemDraft {
      link: Some("x".repeat(201)),
      ..draft
    };
    assert_eq!(long_link.validate(), Err(ApiError::InvalidParameters));
  }

  #[test]
  fn test_password_policy() {
    assert!(validate_password("Abcdefg1").is_ok());
    assert!(validate_password("abcdefg1").is_err());
    assert!(validate_password("ABCDEFG1").is_err());
    assert!(validate_password("Abcdefgh").is_err());
    assert!(validate_password("Ab1").is_err());
  }
}
