//! Tracing subscriber setup

use crate::config::{app_data_dir, LoggingConfig};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Log file prefix inside `<app data dir>/logs/`
const LOG_FILE_PREFIX: &str = "tempmon.log";

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over the configured filter. When file logging
/// is enabled the returned guard must be kept alive until shutdown, otherwise
/// buffered lines are lost.
pub fn init(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = if config.log_to_file {
        match app_data_dir() {
            Some(dir) => {
                let appender = tracing_appender::rolling::daily(dir.join("logs"), LOG_FILE_PREFIX);
                let (writer, guard) = tracing_appender::non_blocking(appender);
                let layer = tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(writer)
                    .boxed();
                (Some(layer), Some(guard))
            }
            None => (None, None),
        }
    } else {
        (None, None)
    };

    let result = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .try_init();

    if let Err(e) = result {
        // Already installed (tests, embedding applications)
        tracing::debug!("Tracing subscriber not installed: {}", e);
    }

    guard
}
