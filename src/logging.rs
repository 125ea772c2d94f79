//! Tracing setup.
//!
//! Filter comes from `STEWARD_LOG`, then `RUST_LOG`, then a default of `warn`
//! (`info` with `--verbose`). Events go to stderr in compact form and, when a
//! log directory is available, to a daily rolling file of JSON lines under it.
//!
//! ```bash
//! STEWARD_LOG=steward=debug steward run 42
//! ```

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub const LOG_ENV: &str = "STEWARD_LOG";

fn build_filter(verbose: bool) -> EnvFilter {
    let default = if verbose { "info" } else { "warn" };
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default))
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop; hold it for the life
/// of the process. Calling this twice is harmless: the second install fails
/// silently.
pub fn init(verbose: bool, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();

    let (file_layer, guard) = match log_dir {
        Some(dir) if std::fs::create_dir_all(dir).is_ok() => {
            let appender = tracing_appender::rolling::daily(dir, "steward.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        _ => (None, None),
    };

    let _ = tracing_subscriber::registry()
        .with(build_filter(verbose))
        .with(stderr_layer)
        .with(file_layer)
        .try_init();

    guard
}
