//! Tracing subscriber setup for applications embedding postkit.

use std::path::Path;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::{cache_dir, Config};

/// Install a global subscriber: `RUST_LOG` (or `level`) filter, stderr
/// output and, when `log_dir` can be created, a plain-text `postkit.log`.
///
/// Returns whether the file layer was installed. A second call leaves the
/// first subscriber in place.
pub fn init_logging(level: &str, log_dir: &Path) -> bool {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    if std::fs::create_dir_all(log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(log_dir, "postkit.log");
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .try_init()
            .is_ok()
    } else {
        // Fall back to stderr only
        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .try_init();
        false
    }
}

/// [`init_logging`] with the level and directory from `config`.
pub fn init_from_config(config: &Config) -> bool {
    init_logging(&config.logging.level, &cache_dir(config))
}
