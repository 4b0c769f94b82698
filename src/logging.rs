use std::fs;

use tracing::Level;
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{filter, fmt, prelude::*, EnvFilter};

use crate::CONFIG;

/// Install the process-wide subscriber.
///
/// Text goes to stderr (INFO and up, `RUST_LOG` overridable). JSONL files go
/// to the configured directory: `5DEBUG` and `4INFO` rotate daily and keep
/// ten files, `3WARNING` and `2ERROR` append indefinitely. Each file captures
/// exactly its own level.
///
/// The returned guards flush the non-blocking writers; keep them alive for
/// the life of the process.
pub fn init() -> Vec<WorkerGuard> {
  let dir = &CONFIG.log.dir;
  fs::create_dir_all(dir).unwrap();

  let mut guards = Vec::new();

  let console = fmt::layer()
    .with_writer(std::io::stderr)
    .with_target(true)
    .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")));

  let rotated = |prefix: &str| {
    rolling::RollingFileAppender::builder()
      .rotation(rolling::Rotation::DAILY)
      .filename_prefix(prefix)
      .filename_suffix("log")
      .max_log_files(10)
      .build(dir)
      .unwrap()
  };

  let (debug_writer, guard) = tracing_appender::non_blocking(rotated("5DEBUG"));
  guards.push(guard);
  let (info_writer, guard) = tracing_appender::non_blocking(rotated("4INFO"));
  guards.push(guard);
  let (warn_writer, guard) = tracing_appender::non_blocking(rolling::never(dir, "3WARNING.log"));
  guards.push(guard);
  let (error_writer, guard) = tracing_appender::non_blocking(rolling::never(dir, "2ERROR.log"));
  guards.push(guard);

  macro_rules! json_layer {
    ($writer:expr, $level:expr) => {
      fmt::layer()
        .json()
        .with_writer($writer)
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_target(true)
        .with_filter(filter::filter_fn(|meta| *meta.level() == $level))
    };
  }

  tracing_subscriber::registry()
    .with(console)
    .with(json_layer!(debug_writer, Level::DEBUG))
    .with(json_layer!(info_writer, Level::INFO))
    .with(json_layer!(warn_writer, Level::WARN))
    .with(json_layer!(error_writer, Level::ERROR))
    .init();

  return guards;
}
