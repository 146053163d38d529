//! The remote API surface consumed by the worker.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::value::PathValue;

/// Remote resource collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
  Channels,
  Playlists,
  PlaylistItems,
  Videos,
}

impl Resource {
  pub fn path(&self) -> &'static str {
    match self {
      Self::Channels => "channels",
      Self::Playlists => "playlists",
      Self::PlaylistItems => "playlistItems",
      Self::Videos => "videos",
    }
  }
}

/// Selector for list calls.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ListFilter {
  /// Resources owned by the authenticated user
  Mine,
  ChannelId(String),
  PlaylistId(String),
}

impl ListFilter {
  /// Query parameter for this filter.
  pub fn query_pair(&self) -> (&'static str, &str) {
    match self {
      Self::Mine => ("mine", "true"),
      Self::ChannelId(id) => ("channelId", id),
      Self::PlaylistId(id) => ("playlistId", id),
    }
  }
}

/// One page request of a list call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
  pub resource: Resource,
  pub filter: ListFilter,
  pub part: String,
  pub page_token: Option<String>,
  pub max_results: u32,
}

/// One page of list results.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Page {
  #[serde(default)]
  pub items: Vec<PathValue>,
  #[serde(rename = "nextPageToken")]
  pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Error)]
pub enum ApiError {
  /// The API rejected or failed the call
  #[error("{message}")]
  Remote { code: i64, message: String },
  /// The call never produced an API response
  #[error("request failed: {0}")]
  Transport(String),
  /// The response could not be understood
  #[error("unexpected response: {0}")]
  Decode(String),
}

/// Authenticated handle to the remote API.
#[async_trait]
pub trait YouTubeApi: Send + Sync {
  /// Fetch one page of a list call.
  async fn list(&self, query: &ListQuery) -> Result<Page, ApiError>;

  /// Fetch resources by id. Callers keep `ids` within the per-call cap.
  async fn get(
    &self,
    resource: Resource,
    ids: &[String],
    part: &str,
  ) -> Result<Vec<PathValue>, ApiError>;

  /// Replace the `part` sections of the resource identified by `body.id`.
  async fn update(
    &self,
    resource: Resource,
    part: &str,
    body: &PathValue,
  ) -> Result<PathValue, ApiError>;
}
