//! Logging setup for the grepmux daemon.

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Directory for background-mode log files.
fn log_dir() -> PathBuf {
  dirs::data_dir().unwrap_or_else(|| PathBuf::from(".")).join("grepmux")
}

/// Initialize logging.
///
/// Foreground mode logs to the console with colors; background mode logs to
/// a daily-rolling file. Returns the guard that must stay alive for the
/// lifetime of the process.
pub fn init_logging(foreground: bool) -> Option<WorkerGuard> {
  let env_filter = EnvFilter::builder()
    .with_default_directive(tracing::Level::INFO.into())
    .from_env_lossy();

  if foreground {
    tracing_subscriber::fmt()
      .with_env_filter(env_filter)
      .with_target(true)
      .with_ansi(true)
      .init();
    return None;
  }

  let log_dir = log_dir();
  if std::fs::create_dir_all(&log_dir).is_err() {
    // Fall back to console-only logging
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
    return None;
  }

  let file_appender = tracing_appender::rolling::daily(&log_dir, "grepmux.log");
  let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

  tracing_subscriber::fmt()
    .with_env_filter(env_filter)
    .with_target(true)
    .with_ansi(false)
    .with_writer(file_writer)
    .init();

  Some(guard)
}
