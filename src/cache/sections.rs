//! Cache sections and their invalidation rules.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::value::PathValue;

/// What happens to cached playlist videos when a playlist is refreshed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaylistVideoPurge {
  /// Drop every cached playlist video, whichever playlist it came from
  #[default]
  All,
  /// Drop only the videos that were part of the refreshed playlist
  Playlist,
  /// Keep cached playlist videos; only the item listing is re-fetched
  None,
}

/// The two keyed video sections, which hold different slices of video data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoSection {
  /// Display data fetched while listing playlist contents
  PlaylistVideos,
  /// Full details fetched explicitly per video
  VideoDetails,
}

/// Session cache of fetched results, partitioned by result kind.
///
/// The serialized form is the persisted cache file layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Cache {
  /// Channels of the authenticated user; empty means not fetched
  pub channel_list: Vec<PathValue>,
  /// Channel id -> channel details, derived from `channel_list`
  pub channel_details: BTreeMap<String, PathValue>,
  /// Channel id -> playlists on that channel
  pub playlist_list: BTreeMap<String, Vec<PathValue>>,
  /// Playlist id -> details of each video in the playlist
  pub playlist_contents: BTreeMap<String, Vec<PathValue>>,
  /// Video id -> display data used for playlist contents
  pub playlist_videos: BTreeMap<String, PathValue>,
  /// Video id -> full video details
  pub video_details: BTreeMap<String, PathValue>,
}

impl Cache {
  pub fn channels(&self) -> Option<&[PathValue]> {
    if self.channel_list.is_empty() {
      None
    } else {
      Some(&self.channel_list)
    }
  }

  /// Replace the channel list and rebuild the per-channel details from it in
  /// one step, so the two sections always agree.
  pub fn store_channels(&mut self, channels: Vec<PathValue>) {
    self.channel_details = channels
      .iter()
      .filter_map(|channel| {
        channel
          .str_at("id")
          .map(|id| (id.to_string(), channel.clone()))
      })
      .collect();
    self.channel_list = channels;
  }

  pub fn invalidate_channels(&mut self) {
    self.channel_list.clear();
    self.channel_details.clear();
  }

  pub fn playlists(&self, channel_id: &str) -> Option<&[PathValue]> {
    self.playlist_list.get(channel_id).map(Vec::as_slice)
  }

  pub fn store_playlists(&mut self, channel_id: &str, playlists: Vec<PathValue>) {
    self.playlist_list.insert(channel_id.to_string(), playlists);
  }

  pub fn invalidate_playlists(&mut self, channel_id: &str) {
    self.playlist_list.remove(channel_id);
  }

  pub fn playlist_items(&self, playlist_id: &str) -> Option<&[PathValue]> {
    self.playlist_contents.get(playlist_id).map(Vec::as_slice)
  }

  pub fn store_playlist_items(&mut self, playlist_id: &str, videos: Vec<PathValue>) {
    self.playlist_contents.insert(playlist_id.to_string(), videos);
  }

  /// Drop a playlist's contents along with dependent video entries as
  /// dictated by `purge`.
  pub fn invalidate_playlist_items(&mut self, playlist_id: &str, purge: PlaylistVideoPurge) {
    let removed = self.playlist_contents.remove(playlist_id);

    match purge {
      PlaylistVideoPurge::All => self.playlist_videos.clear(),
      PlaylistVideoPurge::Playlist => {
        for video in removed.iter().flatten() {
          if let Some(id) = video.str_at("id") {
            self.playlist_videos.remove(id);
          }
        }
      }
      PlaylistVideoPurge::None => {}
    }
  }

  pub fn videos(&self, section: VideoSection) -> &BTreeMap<String, PathValue> {
    match section {
      VideoSection::PlaylistVideos => &self.playlist_videos,
      VideoSection::VideoDetails => &self.video_details,
    }
  }

  pub fn videos_mut(&mut self, section: VideoSection) -> &mut BTreeMap<String, PathValue> {
    match section {
      VideoSection::PlaylistVideos => &mut self.playlist_videos,
      VideoSection::VideoDetails => &mut self.video_details,
    }
  }

  pub fn invalidate_videos(&mut self, section: VideoSection, video_ids: &[String]) {
    let videos = self.videos_mut(section);
    for id in video_ids {
      videos.remove(id);
    }
  }

  pub fn is_empty(&self) -> bool {
    self == &Self::default()
  }
}
