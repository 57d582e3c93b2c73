//! The closed error taxonomy for remote operations.
//!
//! Raw transport and status-code details never escape the fetch adapter.
//! Every failing operation is classified into exactly one [`ApiError`]
//! variant, and every variant renders a fixed human-readable message, so
//! callers match on kind instead of parsing strings or status codes.

use std::fmt;

use thiserror::Error;

/// Which entity a not-found error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
  List,
  Category,
  Item,
}

impl fmt::Display for EntityKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      EntityKind::List => "list",
      EntityKind::Category => "category",
      EntityKind::Item => "item",
    };
    write!(f, "{name}")
  }
}

/// Access level on a list. Also names the level a rejected caller was
/// missing in [`ApiError::PermissionDenied`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessRole {
  Viewer,
  Editor,
  Owner,
}

impl fmt::Display for AccessRole {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      AccessRole::Viewer => "viewer",
      AccessRole::Editor => "editor",
      AccessRole::Owner => "owner",
    };
    write!(f, "{name}")
  }
}

/// Service-side rules that reject an otherwise well-formed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RuleViolation {
  #[error("You cannot invite yourself")]
  CannotInviteSelf,
  #[error("The owner cannot leave their own list")]
  OwnerCannotLeave,
  #[error("Your plan does not allow any more lists")]
  PlanLimitReached,
  #[error("Email or password are incorrect")]
  InvalidCredentials,
  #[error("You must verify your email to login")]
  EmailNotVerified,
  #[error("This email cannot be used to register")]
  UnusableEmail,
  #[error("No user with the provided email has been found")]
  UnknownEmail,
  #[error("You are not logged in the correct account to accept this invitation")]
  WrongAccountForInvitation,
}

/// Closed set of failure kinds surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ApiError {
  /// Transport failure, unexpected status, or malformed response body.
  /// The only kind worth retrying.
  #[error("Something went wrong, please try again later")]
  Unknown,
  /// The request payload failed validation, locally or on the server.
  #[error("The request has some invalid data")]
  InvalidParameters,
  /// No session, or the session expired mid-flight.
  #[error("You are not logged in")]
  NotAuthenticated,
  /// The session is valid but lacks the named access level.
  #[error("You need {0} access to do this")]
  PermissionDenied(AccessRole),
  /// The addressed entity (or an ancestor) does not exist.
  #[error("This {0} does not exist or has been deleted")]
  NotFound(EntityKind),
  /// The server is throttling the caller.
  #[error("Too many requests, please slow down and try again")]
  RateLimited,
  /// A service-side business rule rejected the request.
  #[error("{0}")]
  BusinessRule(RuleViolation),
}

impl ApiError {
  /// Whether an automatic retry could plausibly succeed.
  ///
  /// Everything except [`ApiError::Unknown`] is deterministic: the server
  /// gave a definitive answer and repeating the request unchanged would only
  /// repeat the answer.
  pub fn is_retryable(&self) -> bool {
    matches!(self, ApiError::Unknown)
  }
}

// ============================================================================
// Classification
// ============================================================================

/// Every remote operation the client performs, for status classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
  // onboarding and session
  WelcomeAction,
  Register,
  Login,
  Logout,
  SendVerificationEmail,
  CheckEmailVerified,
  PasswordForgotten,
  ResetPassword,
  FetchMe,
  // reads
  FetchLists,
  FetchList,
  FetchCategories,
  FetchItems,
  FetchItem,
  FetchItemContent,
  // writes
  CreateList,
  EditList,
  DeleteList,
  CreateCategory,
  EditCategory,
  DeleteCategory,
  CreateItem,
  EditItem,
  DeleteItem,
  SetItemCompletion,
  EditItemContent,
  // sharing
  InviteMember,
  RemoveMember,
  LeaveList,
  AcceptInvitation,
}

impl Operation {
  /// Whether the operation rides on an established session.
  ///
  /// A 401 on a session operation means the session expired: the adapter
  /// fires its auth-expired hook and fails with `NotAuthenticated` without
  /// retrying. Onboarding operations authenticate inline (or not at all), so
  /// a 401 there is part of the flow, never an expiry signal.
  pub fn uses_session(&self) -> bool {
    !matches!(
      self,
      Operation::WelcomeAction
        | Operation::Register
        | Operation::Login
        | Operation::SendVerificationEmail
        | Operation::CheckEmailVerified
        | Operation::PasswordForgotten
        | Operation::ResetPassword
    )
  }
}

/// Maps a non-success HTTP status to the error kind for the given operation.
///
/// Status codes mean different things on different routes: a 403 is
/// `PermissionDenied(Viewer)` on an entity read, `PermissionDenied(Editor)`
/// on an item write, and `PlanLimitReached` on list creation. Anything a
/// route does not explicitly map falls through to `Unknown`.
pub fn classify(op: Operation, status: u16) -> ApiError {
  use ApiError::*;
  use Operation::*;

  if status == 429 {
    return RateLimited;
  }
  if status == 401 && op.uses_session() {
    return NotAuthenticated;
  }

  match op {
    WelcomeAction => Unknown,
    Register => match status {
      400 => InvalidParameters,
      403 => BusinessRule(RuleViolation::UnusableEmail),
      _ => Unknown,
    },
    Login => match status {
      401 => BusinessRule(RuleViolation::InvalidCredentials),
      405 => BusinessRule(RuleViolation::EmailNotVerified),
      _ => Unknown,
    },
    Logout | FetchMe => Unknown,
    SendVerificationEmail | CheckEmailVerified => match status {
      403 => NotAuthenticated,
      _ => Unknown,
    },
    PasswordForgotten => match status {
      404 => BusinessRule(RuleViolation::UnknownEmail),
      _ => Unknown,
    },
    ResetPassword => match status {
      400 => InvalidParameters,
      _ => Unknown,
    },

    FetchLists => Unknown,
    FetchList => read_error(status, EntityKind::List),
    // collection reads 404 when the owning list is gone
    FetchCategories | FetchItems => read_error(status, EntityKind::List),
    FetchItem | FetchItemContent => read_error(status, EntityKind::Item),

    CreateList => match status {
      400 => InvalidParameters,
      403 => BusinessRule(RuleViolation::PlanLimitReached),
      _ => Unknown,
    },
    EditList => write_error(status, AccessRole::Owner, EntityKind::List),
    DeleteList => write_error(status, AccessRole::Owner, EntityKind::List),
    CreateCategory => write_error(status, AccessRole::Editor, EntityKind::List),
    EditCategory | DeleteCategory => write_error(status, AccessRole::Editor, EntityKind::Category),
    CreateItem => write_error(status, AccessRole::Editor, EntityKind::List),
    EditItem | DeleteItem | SetItemCompletion | EditItemContent => {
      write_error(status, AccessRole::Editor, EntityKind::Item)
    }

    InviteMember => match status {
      400 => InvalidParameters,
      403 => PermissionDenied(AccessRole::Owner),
      404 => NotFound(EntityKind::List),
      409 => BusinessRule(RuleViolation::CannotInviteSelf),
      _ => Unknown,
    },
    RemoveMember => write_error(status, AccessRole::Owner, EntityKind::List),
    LeaveList => match status {
      403 => BusinessRule(RuleViolation::OwnerCannotLeave),
      404 => NotFound(EntityKind::List),
      _ => Unknown,
    },
    AcceptInvitation => match status {
      400 => InvalidParameters,
      404 => BusinessRule(RuleViolation::WrongAccountForInvitation),
      _ => Unknown,
    },
  }
}

fn read_error(status: u16, kind: EntityKind) -> ApiError {
  match status {
    403 => ApiError::PermissionDenied(AccessRole::Viewer),
    404 => ApiError::NotFound(kind),
    _ => ApiError::Unknown,
  }
}

fn write_error(status: u16, role: AccessRole, kind: EntityKind) -> ApiError {
  match status {
    400 => ApiError::InvalidParameters,
    403 => ApiError::PermissionDenied(role),
    404 => ApiError::NotFound(kind),
    _ => ApiError::Unknown,
  }
}
