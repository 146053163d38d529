//! Request handlers executed on the worker thread.
//!
//! The engine owns the API handle and the cache. Only the worker thread ever
//! touches it, so neither needs locking.

use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::{Cache, CacheStorage, PlaylistVideoPurge, VideoSection};
use crate::error::RequestError;
use crate::request::{Request, RequestSpec};
use crate::value::PathValue;
use crate::youtube::{filter_video_update, Authenticator, ListFilter, Resource, YouTubeApi};

use super::paging::{get_batched, list_all};

/// Parts requested per resource. `snippet` and `brandingSettings` overlap,
/// but each carries fields the other lacks.
const CHANNEL_PARTS: &str = "id,snippet,brandingSettings,contentDetails,statistics,status";
const PLAYLIST_PARTS: &str = "id,snippet,contentDetails,status";
const PLAYLIST_ITEM_PARTS: &str = "contentDetails";
const PLAYLIST_VIDEO_PARTS: &str = "id,snippet,status,statistics";
const VIDEO_DETAIL_PARTS: &str = "snippet,contentDetails,status,statistics";

/// Tunables for remote calls and cache invalidation.
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
  /// Items requested per page of a list call
  pub page_size: u32,
  /// Ids per call for endpoints that cap id lists
  pub batch_size: usize,
  pub playlist_video_purge: PlaylistVideoPurge,
}

impl Default for EngineSettings {
  fn default() -> Self {
    Self {
      page_size: 50,
      batch_size: 50,
      playlist_video_purge: PlaylistVideoPurge::default(),
    }
  }
}

pub struct Engine {
  authenticator: Arc<dyn Authenticator>,
  storage: Box<dyn CacheStorage>,
  settings: EngineSettings,
  api: Option<Arc<dyn YouTubeApi>>,
  /// Loaded lazily by the first request that needs data
  cache: Option<Cache>,
}

impl Engine {
  pub fn new(
    authenticator: Arc<dyn Authenticator>,
    storage: Box<dyn CacheStorage>,
    settings: EngineSettings,
  ) -> Self {
    Self {
      authenticator,
      storage,
      settings,
      api: None,
      cache: None,
    }
  }

  /// Run one request to completion.
  pub async fn execute(&mut self, spec: &RequestSpec) -> Result<PathValue, RequestError> {
    let request = Request::parse(spec)?;
    let refresh = spec.refresh();

    // Session requests may discard the cache, so don't spend time loading it.
    if !request.is_session() && self.cache.is_none() {
      self.load_cache()?;
    }

    match request {
      Request::Authorize => self.authorize().await,
      Request::Deauthorize => Ok(self.deauthorize()),
      Request::FlushCache => Ok(self.flush_cache()),
      Request::ChannelList => self.channel_list(refresh).await.map(PathValue::from),
      Request::ChannelDetails { channel_id } => self.channel_details(&channel_id, refresh).await,
      Request::UploadsPlaylist { channel_id } => self.uploads_playlist(&channel_id, refresh).await,
      Request::PlaylistList { channel_id } => self.playlist_list(&channel_id, refresh).await,
      Request::PlaylistContents { playlist_id } => {
        self.playlist_contents(&playlist_id, refresh).await
      }
      Request::VideoDetails { video_ids } => self.video_details(&video_ids, refresh).await,
      Request::SetVideoDetails { part, details } => self.set_video_details(&part, &details).await,
    }
  }

  fn load_cache(&mut self) -> Result<(), RequestError> {
    debug!("Initializing the data cache");
    let cache = self.storage.load()?.unwrap_or_default();
    debug!(empty = cache.is_empty(), "Data cache ready");
    self.cache = Some(cache);
    Ok(())
  }

  fn cache_mut(&mut self) -> &mut Cache {
    self.cache.get_or_insert_with(Cache::default)
  }

  fn persist(&mut self) -> Result<(), RequestError> {
    if let Some(cache) = &self.cache {
      self.storage.store(cache)?;
    }
    Ok(())
  }

  fn api(&self) -> Result<Arc<dyn YouTubeApi>, RequestError> {
    self.api.clone().ok_or(RequestError::NotAuthorized)
  }

  async fn authorize(&mut self) -> Result<PathValue, RequestError> {
    info!("Requesting authorization");
    self.api = Some(self.authenticator.authenticate().await?);
    Ok(PathValue::new(json!("Authenticated")))
  }

  /// Forget the user entirely. Cleanup failures are logged, never reported.
  fn deauthorize(&mut self) -> PathValue {
    info!("Removing stored login credentials");
    self.api = None;

    if let Err(e) = self.authenticator.forget() {
      warn!(error = %e, "Failed to remove stored credentials");
    }
    if let Err(e) = self.storage.clear() {
      warn!(error = %e, "Failed to remove cache file");
    }
    self.cache = Some(Cache::default());

    PathValue::new(json!("Deauthenticated"))
  }

  fn flush_cache(&mut self) -> PathValue {
    info!("Flushing cached data");
    if let Err(e) = self.storage.clear() {
      warn!(error = %e, "Failed to remove cache file");
    }
    self.cache = Some(Cache::default());

    PathValue::new(json!("Flushed"))
  }

  async fn channel_list(&mut self, refresh: bool) -> Result<Vec<PathValue>, RequestError> {
    if refresh {
      self.cache_mut().invalidate_channels();
      self.persist()?;
    } else if let Some(channels) = self.cache_mut().channels() {
      debug!(count = channels.len(), "Channel list served from cache");
      return Ok(channels.to_vec());
    }

    let api = self.api()?;
    let channels = list_all(
      api.as_ref(),
      Resource::Channels,
      ListFilter::Mine,
      CHANNEL_PARTS,
      self.settings.page_size,
    )
    .await?;

    if channels.is_empty() {
      return Err(RequestError::NotFound(
        "No channels available for the current user".into(),
      ));
    }

    info!(
      count = channels.len(),
      titles = ?channels
        .iter()
        .filter_map(|c| c.str_at("brandingSettings.channel.title"))
        .collect::<Vec<_>>(),
      "Retrieved channel information"
    );

    self.cache_mut().store_channels(channels.clone());
    self.persist()?;
    Ok(channels)
  }

  async fn channel_details(
    &mut self,
    channel_id: &str,
    refresh: bool,
  ) -> Result<PathValue, RequestError> {
    if refresh {
      // Details are derived from the list; drop both so they are rebuilt together.
      self.cache_mut().invalidate_channels();
      self.persist()?;
    } else if let Some(channel) = self.cache_mut().channel_details.get(channel_id) {
      return Ok(channel.clone());
    }

    self.channel_list(false).await?;
    self
      .cache_mut()
      .channel_details
      .get(channel_id)
      .cloned()
      .ok_or_else(|| RequestError::NotFound(format!("No channel with id {} found", channel_id)))
  }

  async fn uploads_playlist(
    &mut self,
    channel_id: &str,
    refresh: bool,
  ) -> Result<PathValue, RequestError> {
    let channel = self.channel_details(channel_id, refresh).await?;
    let uploads = channel
      .get("contentDetails.relatedPlaylists.uploads")
      .cloned()
      .unwrap_or(Value::Null);
    Ok(PathValue::new(uploads))
  }

  async fn playlist_list(
    &mut self,
    channel_id: &str,
    refresh: bool,
  ) -> Result<PathValue, RequestError> {
    if refresh {
      self.cache_mut().invalidate_playlists(channel_id);
      self.persist()?;
    } else if let Some(playlists) = self.cache_mut().playlists(channel_id) {
      return Ok(playlists.to_vec().into());
    }

    info!(channel_id, "Fetching playlists");
    let api = self.api()?;
    let playlists = list_all(
      api.as_ref(),
      Resource::Playlists,
      ListFilter::ChannelId(channel_id.to_string()),
      PLAYLIST_PARTS,
      self.settings.page_size,
    )
    .await?;
    info!(count = playlists.len(), "Found playlists");

    self
      .cache_mut()
      .store_playlists(channel_id, playlists.clone());
    self.persist()?;
    Ok(playlists.into())
  }

  async fn playlist_contents(
    &mut self,
    playlist_id: &str,
    refresh: bool,
  ) -> Result<PathValue, RequestError> {
    let purge = self.settings.playlist_video_purge;
    if refresh {
      self.cache_mut().invalidate_playlist_items(playlist_id, purge);
      self.persist()?;
    } else if let Some(videos) = self.cache_mut().playlist_items(playlist_id) {
      return Ok(videos.to_vec().into());
    }

    info!(playlist_id, "Fetching playlist contents");
    let api = self.api()?;
    // Item ids are not video ids; the video id lives in contentDetails.
    let entries = list_all(
      api.as_ref(),
      Resource::PlaylistItems,
      ListFilter::PlaylistId(playlist_id.to_string()),
      PLAYLIST_ITEM_PARTS,
      self.settings.page_size,
    )
    .await?;
    info!(count = entries.len(), "Playlist items listed");

    let video_ids: Vec<String> = entries
      .iter()
      .filter_map(|entry| entry.str_at("contentDetails.videoId"))
      .map(String::from)
      .collect();

    let (videos, _) = self
      .fetch_videos(&video_ids, PLAYLIST_VIDEO_PARTS, VideoSection::PlaylistVideos)
      .await?;

    self
      .cache_mut()
      .store_playlist_items(playlist_id, videos.clone());
    self.persist()?;
    Ok(videos.into())
  }

  async fn video_details(
    &mut self,
    video_ids: &[String],
    refresh: bool,
  ) -> Result<PathValue, RequestError> {
    if refresh {
      self
        .cache_mut()
        .invalidate_videos(VideoSection::VideoDetails, video_ids);
      self.persist()?;
    }

    let (videos, fetched) = self
      .fetch_videos(video_ids, VIDEO_DETAIL_PARTS, VideoSection::VideoDetails)
      .await?;
    // Pure cache hits leave the stored file alone.
    if fetched {
      self.persist()?;
    }
    Ok(videos.into())
  }

  /// Resolve `video_ids` against `section`, fetching only the ids not
  /// already cached. The result follows the order of `video_ids`; ids the
  /// API does not know are skipped. Also reports whether the API was
  /// called.
  async fn fetch_videos(
    &mut self,
    video_ids: &[String],
    part: &str,
    section: VideoSection,
  ) -> Result<(Vec<PathValue>, bool), RequestError> {
    let mut missing: Vec<String> = Vec::new();
    {
      let known = self.cache_mut().videos(section);
      for id in video_ids {
        if !known.contains_key(id) && !missing.contains(id) {
          missing.push(id.clone());
        }
      }
    }

    debug!(
      cached = video_ids.len().saturating_sub(missing.len()),
      fetching = missing.len(),
      total = video_ids.len(),
      "Fetching video details"
    );

    if !missing.is_empty() {
      let api = self.api()?;
      let fetched = get_batched(
        api.as_ref(),
        Resource::Videos,
        &missing,
        part,
        self.settings.batch_size,
      )
      .await?;

      let videos = self.cache_mut().videos_mut(section);
      for video in fetched {
        if let Some(id) = video.str_at("id") {
          videos.insert(id.to_string(), video.clone());
        }
      }
    }

    let known = self.cache_mut().videos(section);
    let mut result = Vec::with_capacity(video_ids.len());
    for id in video_ids {
      match known.get(id) {
        Some(video) => result.push(video.clone()),
        None => warn!(video_id = %id, "Video not returned by the API"),
      }
    }
    Ok((result, !missing.is_empty()))
  }

  async fn set_video_details(
    &mut self,
    part: &str,
    details: &PathValue,
  ) -> Result<PathValue, RequestError> {
    let body = filter_video_update(details);
    info!(video_id = body.str_at("id").unwrap_or_default(), "Updating video details");

    let api = self.api()?;
    let updated = api.update(Resource::Videos, part, &body).await?;

    if let Some(id) = updated.str_at("id") {
      self
        .cache_mut()
        .video_details
        .insert(id.to_string(), updated.clone());
    }
    self.persist()?;
    Ok(updated)
  }
}
