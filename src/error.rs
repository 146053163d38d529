//! Request failure taxonomy and the error shape delivered to callers.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use thiserror::Error;

use crate::cache::StoreError;
use crate::value::{PathError, PathValue};
use crate::youtube::ApiError;

/// Code used for every failure that did not originate at the remote API.
pub const UNEXPECTED_CODE: i64 = -1;

/// Why a single request failed. Never escapes the worker loop; converted into
/// [`ErrorInfo`] before delivery.
#[derive(Debug, Error)]
pub enum RequestError {
  #[error("Unknown request '{0}'")]
  UnknownRequest(String),

  #[error("missing required arguments: {}", .0.join(", "))]
  MissingArgument(Vec<String>),

  #[error("arguments require at least one of: {}", .0.join(", "))]
  MissingAlternative(Vec<String>),

  #[error("invalid argument '{name}': {reason}")]
  InvalidArgument { name: String, reason: String },

  #[error("not authorized; an 'authorize' request must succeed first")]
  NotAuthorized,

  #[error("{0}")]
  NotFound(String),

  #[error("{message}")]
  Remote { code: i64, message: String },

  #[error("cache persistence failed: {0}")]
  Persistence(#[from] StoreError),

  #[error(transparent)]
  Path(#[from] PathError),

  #[error("{0}")]
  Unexpected(String),
}

impl RequestError {
  pub fn invalid_argument(name: impl Into<String>, reason: impl Into<String>) -> Self {
    Self::InvalidArgument {
      name: name.into(),
      reason: reason.into(),
    }
  }

  pub fn code(&self) -> i64 {
    match self {
      Self::Remote { code, .. } => *code,
      _ => UNEXPECTED_CODE,
    }
  }
}

impl From<ApiError> for RequestError {
  fn from(err: ApiError) -> Self {
    match err {
      ApiError::Remote { code, message } => Self::Remote { code, message },
      other => Self::Unexpected(other.to_string()),
    }
  }
}

/// Structured error delivered through the result callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
  pub code: i64,
  pub message: String,
}

impl ErrorInfo {
  pub fn new(code: i64, message: impl Into<String>) -> Self {
    Self {
      code,
      message: message.into(),
    }
  }

  /// Render in the remote API's own envelope, `{"error": {"code", "message"}}`.
  pub fn to_path_value(&self) -> PathValue {
    PathValue::new(json!({
      "error": { "code": self.code, "message": self.message }
    }))
  }
}

impl From<RequestError> for ErrorInfo {
  fn from(err: RequestError) -> Self {
    Self::new(err.code(), err.to_string())
  }
}

impl fmt::Display for ErrorInfo {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "[{}] {}", self.code, self.message)
  }
}
