mod cache;
mod config;
mod crypto;
mod error;
mod logging;
mod manager;
mod request;
mod value;
mod worker;
mod youtube;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::path::PathBuf;
use tokio::sync::mpsc;

use crate::manager::Manager;
use crate::request::{Request, RequestSpec};
use crate::value::PathValue;
use crate::worker::Outcome;

#[derive(Parser, Debug)]
#[command(name = "yte")]
#[command(about = "Browse and edit your YouTube channel from the terminal")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/yte/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Ignore cached data and fetch again
  #[arg(short, long, global = true)]
  refresh: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Authenticate and store credentials
  Login,
  /// Remove stored credentials and cached data
  Logout,
  /// Remove cached data
  Flush,
  /// List your channels
  Channels,
  /// Show one of your channels
  Channel { channel_id: String },
  /// Show the uploads playlist id of a channel
  Uploads { channel_id: String },
  /// List the playlists of a channel
  Playlists { channel_id: String },
  /// List the videos in a playlist
  Playlist { playlist_id: String },
  /// Show video details
  Videos {
    #[arg(required = true)]
    video_ids: Vec<String>,
  },
  /// Update a video from a JSON file (as printed by `videos`)
  Update {
    /// File holding the video resource; `-` reads stdin
    file: PathBuf,
    /// Resource parts being updated
    #[arg(long, default_value = "snippet,status")]
    part: String,
  },
}

impl Command {
  fn into_spec(self) -> Result<RequestSpec> {
    let spec = match self {
      Self::Login => RequestSpec::new(Request::AUTHORIZE),
      Self::Logout => RequestSpec::new(Request::DEAUTHORIZE),
      Self::Flush => RequestSpec::new(Request::FLUSH_CACHE),
      Self::Channels => RequestSpec::new(Request::CHANNEL_LIST),
      Self::Channel { channel_id } => {
        RequestSpec::new(Request::CHANNEL_DETAILS).with_param("channel_id", channel_id)
      }
      Self::Uploads { channel_id } => {
        RequestSpec::new(Request::UPLOADS_PLAYLIST).with_param("channel_id", channel_id)
      }
      Self::Playlists { channel_id } => {
        RequestSpec::new(Request::PLAYLIST_LIST).with_param("channel_id", channel_id)
      }
      Self::Playlist { playlist_id } => {
        RequestSpec::new(Request::PLAYLIST_CONTENTS).with_param("playlist_id", playlist_id)
      }
      Self::Videos { video_ids } => {
        RequestSpec::new(Request::VIDEO_DETAILS).with_param("video_ids", video_ids)
      }
      Self::Update { file, part } => {
        let contents = if file.as_os_str() == "-" {
          std::io::read_to_string(std::io::stdin())
            .map_err(|e| eyre!("Failed to read video from stdin: {}", e))?
        } else {
          std::fs::read_to_string(&file)
            .map_err(|e| eyre!("Failed to read {}: {}", file.display(), e))?
        };
        let parsed: Value = serde_json::from_str(&contents)
          .map_err(|e| eyre!("Invalid video JSON: {}", e))?;
        let mut details = PathValue::new(parsed);
        // A `videos` result is a list; accept its single entry as well.
        if let Some(list) = details.as_array().cloned() {
          if list.len() != 1 {
            return Err(eyre!("Expected exactly one video, found {}", list.len()));
          }
          details = list.into_iter().next().map(PathValue::new).unwrap_or_default();
        }
        if !details.contains("id") {
          return Err(eyre!("Video JSON has no 'id'"));
        }
        RequestSpec::new(Request::SET_VIDEO_DETAILS)
          .with_param("part", part)
          .with_param("video_details", details.into_value())
      }
    };
    Ok(spec)
  }

  /// Session commands run without authorizing first.
  fn needs_authorization(&self) -> bool {
    !matches!(self, Self::Login | Self::Logout | Self::Flush)
  }
}

/// Handler tags routing results back to their purpose.
const SESSION: &str = "session";
const OUTPUT: &str = "output";

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let config = config::Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&config.logging, &config.cache_dir()?)?;

  let authorize_first = args.command.needs_authorization();
  let spec = args
    .command
    .into_spec()?
    .with_handler(OUTPUT)
    .with_refresh(args.refresh);

  let mut manager = Manager::new(&config)?;
  let can_authorize = manager.has_credentials() || config::Config::bootstrap_refresh_token().is_some();
  if authorize_first && !can_authorize {
    return Err(eyre!("Not logged in. Set YTE_REFRESH_TOKEN and run `yte login` first."));
  }

  let (tx, mut rx) = mpsc::unbounded_channel::<(RequestSpec, Outcome)>();
  let mut submit = |spec: RequestSpec| {
    let tx = tx.clone();
    manager.request(spec, move |spec, outcome| {
      let _ = tx.send((spec.clone(), outcome));
    })
  };

  // Both go on the queue at once; the worker runs them in order.
  let mut expected = 1;
  if authorize_first {
    submit(
      RequestSpec::new(Request::AUTHORIZE)
        .with_handler(SESSION)
        .with_reason("Authorizing with stored credentials"),
    )?;
    expected += 1;
  }
  submit(spec)?;

  for _ in 0..expected {
    let (spec, outcome) = rx
      .recv()
      .await
      .ok_or_else(|| eyre!("Worker stopped before answering"))?;
    match (spec.handler(), outcome) {
      (_, Err(err)) => {
        println!("{}", err.to_path_value());
        return Err(eyre!("{} failed: {}", spec.reason(), err));
      }
      (SESSION, Ok(result)) => {
        tracing::debug!(%result, authorized = manager.is_authorized(), "Session ready");
      }
      (_, Ok(result)) => println!("{}", result),
    }
  }

  Ok(())
}
