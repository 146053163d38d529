//! Request descriptions submitted to the worker.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use crate::error::RequestError;
use crate::value::{canonical_json, PathValue};

/// Named parameters of a request, keyed uniquely.
pub type Parameters = BTreeMap<String, Value>;

/// An immutable description of one unit of work.
///
/// Identity (equality, hashing, [`fingerprint`](Self::fingerprint)) covers
/// only the name and the parameters; `handler`, `reason` and `refresh` are
/// carried along for the caller and the worker but do not distinguish two
/// requests.
#[derive(Debug, Clone)]
pub struct RequestSpec {
  name: String,
  handler: String,
  reason: String,
  parameters: Parameters,
  refresh: bool,
}

impl RequestSpec {
  pub fn new(name: impl Into<String>) -> Self {
    let name = name.into();
    Self {
      handler: format!("_{}", name),
      reason: name.clone(),
      name,
      parameters: Parameters::new(),
      refresh: false,
    }
  }

  /// Tag used by the caller to route the result.
  pub fn with_handler(mut self, handler: impl Into<String>) -> Self {
    self.handler = handler.into();
    self
  }

  /// Human-readable description used in logs and status displays.
  pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
    self.reason = reason.into();
    self
  }

  pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
    self.parameters.insert(key.into(), value.into());
    self
  }

  /// Ask the worker to drop cached data for this request before fetching.
  pub fn with_refresh(mut self, refresh: bool) -> Self {
    self.refresh = refresh;
    self
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn handler(&self) -> &str {
    &self.handler
  }

  pub fn reason(&self) -> &str {
    &self.reason
  }

  /// Parameter lookup; absent keys yield `None`.
  pub fn param(&self, key: &str) -> Option<&Value> {
    self.parameters.get(key)
  }

  pub fn refresh(&self) -> bool {
    self.refresh
  }

  /// Stable, fixed-length identity key.
  pub fn fingerprint(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.name.as_bytes());
    for (key, value) in &self.parameters {
      hasher.update([0u8]);
      hasher.update(key.as_bytes());
      hasher.update([0u8]);
      hasher.update(canonical_json(value).as_bytes());
    }
    hex::encode(hasher.finalize())
  }

  /// Check required keys, and that at least one of `any_of` is present.
  fn validate(&self, required: &[&str], any_of: &[&str]) -> Result<(), RequestError> {
    let missing: Vec<String> = required
      .iter()
      .filter(|key| !self.parameters.contains_key(**key))
      .map(|key| key.to_string())
      .collect();
    if !missing.is_empty() {
      return Err(RequestError::MissingArgument(missing));
    }

    if !any_of.is_empty() && !any_of.iter().any(|key| self.parameters.contains_key(*key)) {
      return Err(RequestError::MissingAlternative(
        any_of.iter().map(|key| key.to_string()).collect(),
      ));
    }

    Ok(())
  }

  fn string_param(&self, key: &str) -> Result<String, RequestError> {
    match self.param(key) {
      Some(Value::String(s)) => Ok(s.clone()),
      Some(_) => Err(RequestError::invalid_argument(key, "expected a string")),
      None => Err(RequestError::MissingArgument(vec![key.to_string()])),
    }
  }

  fn id_list_param(&self, key: &str) -> Result<Vec<String>, RequestError> {
    match self.param(key) {
      Some(Value::String(s)) => Ok(vec![s.clone()]),
      Some(Value::Array(items)) => items
        .iter()
        .map(|item| {
          item
            .as_str()
            .map(String::from)
            .ok_or_else(|| RequestError::invalid_argument(key, "expected a list of strings"))
        })
        .collect(),
      Some(_) => Err(RequestError::invalid_argument(
        key,
        "expected a string or a list of strings",
      )),
      None => Ok(Vec::new()),
    }
  }
}

impl PartialEq for RequestSpec {
  fn eq(&self, other: &Self) -> bool {
    self.name == other.name && self.parameters == other.parameters
  }
}

impl Eq for RequestSpec {}

impl Hash for RequestSpec {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.name.hash(state);
    for (key, value) in &self.parameters {
      key.hash(state);
      canonical_json(value).hash(state);
    }
  }
}

/// The closed set of requests the worker knows how to service, each with
/// its parameters already validated and typed.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
  Authorize,
  Deauthorize,
  FlushCache,
  ChannelList,
  ChannelDetails { channel_id: String },
  UploadsPlaylist { channel_id: String },
  PlaylistList { channel_id: String },
  PlaylistContents { playlist_id: String },
  VideoDetails { video_ids: Vec<String> },
  SetVideoDetails { part: String, details: PathValue },
}

impl Request {
  pub const AUTHORIZE: &'static str = "authorize";
  pub const DEAUTHORIZE: &'static str = "deauthorize";
  pub const FLUSH_CACHE: &'static str = "flush_cache";
  pub const CHANNEL_LIST: &'static str = "channel_list";
  pub const CHANNEL_DETAILS: &'static str = "channel_details";
  pub const UPLOADS_PLAYLIST: &'static str = "uploads_playlist";
  pub const PLAYLIST_LIST: &'static str = "playlist_list";
  pub const PLAYLIST_CONTENTS: &'static str = "playlist_contents";
  pub const VIDEO_DETAILS: &'static str = "video_details";
  pub const SET_VIDEO_DETAILS: &'static str = "set_video_details";

  /// Resolve a submitted request into its typed form, validating parameters.
  pub fn parse(spec: &RequestSpec) -> Result<Self, RequestError> {
    let request = match spec.name() {
      Self::AUTHORIZE => Self::Authorize,
      Self::DEAUTHORIZE => Self::Deauthorize,
      Self::FLUSH_CACHE => Self::FlushCache,
      Self::CHANNEL_LIST => Self::ChannelList,
      Self::CHANNEL_DETAILS => {
        spec.validate(&["channel_id"], &[])?;
        Self::ChannelDetails {
          channel_id: spec.string_param("channel_id")?,
        }
      }
      Self::UPLOADS_PLAYLIST => {
        spec.validate(&["channel_id"], &[])?;
        Self::UploadsPlaylist {
          channel_id: spec.string_param("channel_id")?,
        }
      }
      Self::PLAYLIST_LIST => {
        spec.validate(&["channel_id"], &[])?;
        Self::PlaylistList {
          channel_id: spec.string_param("channel_id")?,
        }
      }
      Self::PLAYLIST_CONTENTS => {
        spec.validate(&["playlist_id"], &[])?;
        Self::PlaylistContents {
          playlist_id: spec.string_param("playlist_id")?,
        }
      }
      Self::VIDEO_DETAILS => {
        spec.validate(&[], &["video_id", "video_ids"])?;
        let mut video_ids = spec.id_list_param("video_id")?;
        video_ids.extend(spec.id_list_param("video_ids")?);
        Self::VideoDetails { video_ids }
      }
      Self::SET_VIDEO_DETAILS => {
        spec.validate(&["part", "video_details"], &[])?;
        let details = match spec.param("video_details") {
          Some(value @ Value::Object(_)) => PathValue::new(value.clone()),
          _ => {
            return Err(RequestError::invalid_argument(
              "video_details",
              "expected an object",
            ))
          }
        };
        if details.str_at("id").is_none() {
          return Err(RequestError::invalid_argument(
            "video_details",
            "missing the video 'id'",
          ));
        }
        Self::SetVideoDetails {
          part: spec.string_param("part")?,
          details,
        }
      }
      other => return Err(RequestError::UnknownRequest(other.to_string())),
    };
    Ok(request)
  }

  pub fn name(&self) -> &'static str {
    match self {
      Self::Authorize => Self::AUTHORIZE,
      Self::Deauthorize => Self::DEAUTHORIZE,
      Self::FlushCache => Self::FLUSH_CACHE,
      Self::ChannelList => Self::CHANNEL_LIST,
      Self::ChannelDetails { .. } => Self::CHANNEL_DETAILS,
      Self::UploadsPlaylist { .. } => Self::UPLOADS_PLAYLIST,
      Self::PlaylistList { .. } => Self::PLAYLIST_LIST,
      Self::PlaylistContents { .. } => Self::PLAYLIST_CONTENTS,
      Self::VideoDetails { .. } => Self::VIDEO_DETAILS,
      Self::SetVideoDetails { .. } => Self::SET_VIDEO_DETAILS,
    }
  }

  /// Session-management requests that never touch the data cache.
  pub fn is_session(&self) -> bool {
    matches!(self, Self::Authorize | Self::Deauthorize | Self::FlushCache)
  }

  /// Data requests whose outcome depends only on their identity and the
  /// cache, so identical concurrent submissions may share one execution.
  pub fn is_read_only(&self) -> bool {
    !self.is_session() && !matches!(self, Self::SetVideoDetails { .. })
  }
}
