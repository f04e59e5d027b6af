//! Logging initialisation.
//!
//! Log lines always go to stderr, filtered by `RUST_LOG` (default `info`).
//! When `V2V_HELPER_LOG_DIR` is set, or the config names a `[logging] dir`,
//! the same lines are also appended to `v2v-helper.log` in that directory.

use std::path::{Path, PathBuf};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub const LOG_DIR_ENV: &str = "V2V_HELPER_LOG_DIR";
pub const LOG_FILE_NAME: &str = "v2v-helper.log";

/// Keeps the file writer alive; hold it until the process exits.
pub struct LogGuard {
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// The environment variable wins over the config file.
pub fn resolve_log_dir(env_value: Option<&str>, configured: Option<&Path>) -> Option<PathBuf> {
    env_value
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .or_else(|| configured.map(Path::to_path_buf))
}

/// Install the global subscriber. Call once from `main`.
pub fn init(configured_dir: Option<&Path>) -> LogGuard {
    let env_dir = std::env::var(LOG_DIR_ENV).ok();
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_guard = match resolve_log_dir(env_dir.as_deref(), configured_dir) {
        Some(dir) => {
            let _ = std::fs::create_dir_all(&dir);
            let file_appender = tracing_appender::rolling::never(dir, LOG_FILE_NAME);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            let file_layer = fmt::layer().with_writer(non_blocking).with_ansi(false);

            tracing_subscriber::registry()
                .with(filter())
                .with(fmt::layer().with_writer(std::io::stderr))
                .with(file_layer)
                .init();

            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter())
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();

            None
        }
    };

    LogGuard {
        _file_guard: file_guard,
    }
}
