//! Optional logging bootstrap for host applications

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

/// Configuration for the logging system
pub struct LogConfig {
    /// Directory where log files will be stored
    pub log_dir: PathBuf,
    /// Prefix for log file names
    pub file_prefix: String,
    /// Maximum number of log files to keep (rotation)
    pub max_files: usize,
    /// Whether to write logs to file
    pub log_to_file: bool,
    /// Log level filter string
    pub log_level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        let log_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".mega-uploader")
            .join("logs");

        Self {
            log_dir,
            file_prefix: "mega-uploader".to_string(),
            max_files: 5,
            log_to_file: false,
            log_level: "info".to_string(),
        }
    }
}

/// Install the global tracing subscriber: a compact stdout layer, plus a
/// daily-rotated file layer when `log_to_file` is set.
///
/// `RUST_LOG` overrides `log_level` when present.
///
/// # Log Targets
/// - `uploader` - upload lifecycle
/// - `uploader::transfer` - chunk POSTs and retries
/// - `uploader::mac` - integrity pipeline
/// - `uploader::node` - node registration
/// - `api` - opaque RPC boundary
///
/// # Example
/// ```bash
/// RUST_LOG=uploader=debug,uploader::transfer=trace cargo run
/// ```
pub fn init_logging(config: LogConfig) -> Result<LogGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    // the file layer is optional; keep its flush guard alive either way
    let mut file_guard = None;
    let file_layer = config
        .log_to_file
        .then(|| -> Result<_> {
            std::fs::create_dir_all(&config.log_dir).with_context(|| {
                format!("creating log directory {}", config.log_dir.display())
            })?;

            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix(&config.file_prefix)
                .filename_suffix("log")
                .max_log_files(config.max_files)
                .build(&config.log_dir)
                .context("building rolling file appender")?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            file_guard = Some(guard);

            Ok(fmt::layer()
                .compact()
                .with_ansi(false)
                .with_writer(writer)
                .with_thread_names(true))
        })
        .transpose()?;

    let stdout_layer = fmt::layer().compact().with_line_number(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    tracing::info!(
        target: "uploader",
        log_to_file = config.log_to_file,
        log_dir = %config.log_dir.display(),
        log_level = %config.log_level,
        "Logging initialized"
    );

    Ok(LogGuard { _file_guard: file_guard })
}

/// Keeps the non-blocking file writer flushing until the host drops it.
/// Hold on to this for the lifetime of the application.
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_logs_to_stdout_only() {
        let config = LogConfig::default();
        assert!(!config.log_to_file);
        assert_eq!(config.file_prefix, "mega-uploader");
        assert_eq!(config.max_files, 5);
        assert_eq!(config.log_level, "info");
        assert!(config.log_dir.ends_with("logs"));
    }
}
