use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Install the global tracing subscriber.
///
/// With `logging.file` set, output goes to a daily `yte.log.<date>` file in
/// `log_dir` and the returned guard must be held until exit to flush it.
/// Otherwise logs go to stderr, keeping stdout for command results.
pub fn init(logging: &LoggingConfig, log_dir: &Path) -> Result<Option<WorkerGuard>> {
  let env_filter = EnvFilter::builder()
    .parse(&logging.level)
    .map_err(|e| eyre!("Invalid logging.level '{}': {}", logging.level, e))?;
  // RUST_LOG wins over the configured level when set.
  let env_filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
    Ok(directives) if !directives.is_empty() => EnvFilter::new(directives),
    _ => env_filter,
  };

  if logging.file {
    std::fs::create_dir_all(log_dir)
      .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;
    let appender = tracing_appender::rolling::daily(log_dir, "yte.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
      .with(env_filter)
      .with(fmt::layer().with_writer(writer).with_ansi(false).with_target(true))
      .try_init()
      .map_err(|e| eyre!("Failed to install tracing subscriber: {}", e))?;
    Ok(Some(guard))
  } else {
    tracing_subscriber::registry()
      .with(env_filter)
      .with(fmt::layer().compact().with_writer(std::io::stderr))
      .try_init()
      .map_err(|e| eyre!("Failed to install tracing subscriber: {}", e))?;
    Ok(None)
  }
}
