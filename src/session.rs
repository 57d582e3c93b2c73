//! On-disk session scratchpad.
//!
//! The HTTP session itself lives in the client's cookie jar. This store keeps
//! the small state around it: the email and password captured mid-onboarding
//! (so the verification flow can resend without re-prompting) and the resume
//! target parked when a request comes back unauthenticated, so the next login
//! can land the user where they were.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionState {
  /// Email captured during onboarding, kept until the address is verified.
  pub pending_email: Option<String>,
  /// Password captured during onboarding, kept until the address is verified.
  pub pending_password: Option<String>,
  /// Where to land after the next successful login.
  pub resume_target: Option<String>,
}

/// File-backed store for [`SessionState`].
#[derive(Debug, Clone)]
pub struct SessionStore {
  path: PathBuf,
}

impl SessionStore {
  /// Open the store at the default location, creating parents as needed.
  pub fn open() -> Result<Self> {
    Self::at_path(Self::default_path()?)
  }

  /// Open the store at an explicit path.
  pub fn at_path(path: impl Into<PathBuf>) -> Result<Self> {
    let path = path.into();
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create session directory: {}", e))?;
    }
    Ok(Self { path })
  }

  /// Get the default session file path
  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("tally").join("session.json"))
  }

  /// Read the current state. A missing or unreadable file is an empty state,
  /// never an error: losing the scratchpad only costs a re-prompt.
  pub fn load(&self) -> SessionState {
    let contents = match std::fs::read_to_string(&self.path) {
      Ok(contents) => contents,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return SessionState::default(),
      Err(e) => {
        warn!("failed to read session state at {}: {}", self.path.display(), e);
        return SessionState::default();
      }
    };

    match serde_json::from_str(&contents) {
      Ok(state) => state,
      Err(e) => {
        warn!(
          "discarding malformed session state at {}: {}",
          self.path.display(),
          e
        );
        SessionState::default()
      }
    }
  }

  /// Persist `state` to disk.
  pub fn save(&self, state: &SessionState) -> Result<()> {
    let contents = serde_json::to_string_pretty(state)
      .map_err(|e| eyre!("Failed to serialize session state: {}", e))?;
    std::fs::write(&self.path, contents)
      .map_err(|e| eyre!("Failed to write session state to {}: {}", self.path.display(), e))?;
    Ok(())
  }

  /// Load, apply `f`, save.
  pub fn update(&self, f: impl FnOnce(&mut SessionState)) -> Result<()> {
    let mut state = self.load();
    f(&mut state);
    self.save(&state)
  }

  /// Park a location to land on after the next successful login.
  pub fn set_resume_target(&self, target: &str) -> Result<()> {
    self.update(|state| state.resume_target = Some(target.to_string()))
  }

  /// Take the parked location, clearing it.
  pub fn take_resume_target(&self) -> Result<Option<String>> {
    let mut state = self.load();
    let target = state.resume_target.take();
    if target.is_some() {
      self.save(&state)?;
    }
    Ok(target)
  }

  /// Remember onboarding credentials so the verification flow can resend the
  /// email and finish the login without re-prompting.
  pub fn remember_credentials(&self, email: &str, password: &str) -> Result<()> {
    self.update(|state| {
      state.pending_email = Some(email.to_string());
      state.pending_password = Some(password.to_string());
    })
  }

  /// Forget any remembered onboarding credentials.
  pub fn clear_credentials(&self) -> Result<()> {
    self.update(|state| {
      state.pending_email = None;
      state.pending_password = None;
    })
  }

  /// Drop all session state, file included.
  pub fn clear(&self) -> Result<()> {
    match std::fs::remove_file(&self.path) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(eyre!(
        "Failed to remove session state at {}: {}",
        self.path.display(),
        e
      )),
    }
  }
}
