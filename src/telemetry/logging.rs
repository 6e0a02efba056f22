//! Logging configuration and initialization
//!
//! Structured logging with tracing: compact console output for development,
//! JSON for log aggregation, and an optional non-blocking log file.

use std::path::PathBuf;

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use crate::settings::LoggingSettings;

/// Log filter override, checked before `RUST_LOG`
pub const LOG_ENV: &str = "HANDPOSE_LOG";

/// Set to "json" for JSON output
pub const LOG_FORMAT_ENV: &str = "HANDPOSE_LOG_FORMAT";

// Re-export WorkerGuard so callers can store it
pub use tracing_appender::non_blocking::WorkerGuard as LogGuard;

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("failed to open log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to install tracing subscriber: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Enable console output (default: true)
    pub console_enabled: bool,
    /// Enable file logging (default: false)
    pub file_enabled: bool,
    /// Path for the log file (default: None, uses the cache directory)
    pub file_path: Option<PathBuf>,
    /// Use JSON format for console logs (default: false)
    pub json_format: bool,
    /// Default log level filter (default: "info")
    pub default_level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            console_enabled: true,
            file_enabled: false,
            file_path: None,
            json_format: false,
            default_level: "info".to_string(),
        }
    }
}

impl From<&LoggingSettings> for LogConfig {
    fn from(settings: &LoggingSettings) -> Self {
        Self {
            console_enabled: true,
            file_enabled: settings.file_enabled,
            file_path: settings.file_path.clone(),
            json_format: settings.json_format,
            default_level: settings.default_level.clone(),
        }
    }
}

impl LogConfig {
    /// Where the log file goes when no path is configured
    pub fn resolved_file_path(&self) -> PathBuf {
        self.file_path.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .map(|dir| dir.join("hand-pose-viewer"))
                .unwrap_or_default()
                .join("hand-pose-viewer.log")
        })
    }
}

/// Whether the format override selects JSON, falling back to `default`
fn wants_json(format_override: Option<&str>, default: bool) -> bool {
    format_override
        .map(|v| v.trim().eq_ignore_ascii_case("json"))
        .unwrap_or(default)
}

/// Initialize the logging system with the given configuration
///
/// Returns a guard that must be kept alive for the duration of the program
/// so the log file is flushed.
///
/// # Environment Variables
///
/// - `HANDPOSE_LOG`: log level filter (e.g. "debug", "info,hand_pose_viewer=debug")
/// - `HANDPOSE_LOG_FORMAT`: set to "json" for JSON output
pub fn init_logging(config: &LogConfig) -> Result<Option<LogGuard>, LoggingError> {
    // HANDPOSE_LOG first, then RUST_LOG, then the config default
    let env_filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_env("RUST_LOG"))
        .unwrap_or_else(|_| EnvFilter::new(&config.default_level));

    let use_json = wants_json(std::env::var(LOG_FORMAT_ENV).ok().as_deref(), config.json_format);

    let mut file_guard: Option<WorkerGuard> = None;
    let mut log_path = None;

    let file_layer = if config.file_enabled {
        let path = config.resolved_file_path();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| LoggingError::LogFile {
                path: path.clone(),
                source,
            })?;
        }
        let file = std::fs::File::create(&path).map_err(|source| LoggingError::LogFile {
            path: path.clone(),
            source,
        })?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        file_guard = Some(guard);
        log_path = Some(path);

        Some(
            fmt::layer()
                .with_writer(non_blocking)
                .with_target(true)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true)
                .with_ansi(false),
        )
    } else {
        None
    };

    let json_layer = (config.console_enabled && use_json).then(|| {
        fmt::layer()
            .json()
            .with_target(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
    });

    let console_layer = (config.console_enabled && !use_json).then(|| {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(json_layer)
        .with(console_layer)
        .try_init()?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        json_format = use_json,
        file = ?log_path,
        "Logging initialized"
    );

    Ok(file_guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_config_default() {
        let config = LogConfig::default();
        assert!(config.console_enabled);
        assert!(!config.file_enabled);
        assert!(!config.json_format);
        assert_eq!(config.default_level, "info");
    }

    #[test]
    fn test_log_config_from_settings() {
        let settings = LoggingSettings {
            default_level: "debug".to_string(),
            json_format: true,
            file_enabled: true,
            file_path: Some(PathBuf::from("/tmp/hands.log")),
        };
        let config = LogConfig::from(&settings);
        assert!(config.console_enabled);
        assert!(config.json_format);
        assert_eq!(config.default_level, "debug");
        assert_eq!(config.resolved_file_path(), PathBuf::from("/tmp/hands.log"));
    }

    #[test]
    fn test_default_file_name() {
        let path = LogConfig::default().resolved_file_path();
        assert_eq!(path.file_name().and_then(|n| n.to_str()), Some("hand-pose-viewer.log"));
    }

    #[test]
    fn test_format_override() {
        assert!(wants_json(Some("json"), false));
        assert!(wants_json(Some(" JSON "), false));
        assert!(!wants_json(Some("pretty"), true));
        assert!(wants_json(None, true));
        assert!(!wants_json(None, false));
    }
}
