//! Logging bootstrap for vbs processes.
//!
//! Call [`init_logging`] once at startup and hold the returned guard for the
//! process lifetime; unit tests use [`init_test_logging`] instead.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{self, InitError, RollingFileAppender};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub use tracing::{debug, error, info, trace, warn};

/// How often the log file rolls over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rotation {
    Hourly,
    #[default]
    Daily,
    Never,
}

impl Rotation {
    fn to_appender(self) -> rolling::Rotation {
        match self {
            Rotation::Hourly => rolling::Rotation::HOURLY,
            Rotation::Daily => rolling::Rotation::DAILY,
            Rotation::Never => rolling::Rotation::NEVER,
        }
    }
}

/// File output section of [`LogConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileLogConfig {
    /// Directory the rolling log files land in.
    pub dir: PathBuf,

    /// Log file name prefix.
    #[serde(default = "default_file_prefix")]
    pub prefix: String,

    #[serde(default)]
    pub rotation: Rotation,
}

fn default_file_prefix() -> String {
    "vbs".into()
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Level filter (trace, debug, info, warn, error); `RUST_LOG` overrides
    /// it when set.
    pub level: String,

    /// Whether to mirror logs to stdout.
    pub console: bool,

    /// Rolling file output; `None` keeps console-only logging.
    pub file: Option<FileLogConfig>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            console: true,
            file: None,
        }
    }
}

fn build_appender(file: &FileLogConfig) -> Result<RollingFileAppender, InitError> {
    RollingFileAppender::builder()
        .rotation(file.rotation.to_appender())
        .filename_prefix(file.prefix.as_str())
        .filename_suffix("log")
        .build(&file.dir)
}

/// Install the global subscriber. The returned guard flushes the file writer
/// on drop; keep it alive for the whole process when file logging is on.
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>, InitError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let base = tracing_subscriber::registry().with(filter);

    let file = match config.file {
        Some(ref file_cfg) => {
            let (writer, guard) = tracing_appender::non_blocking(build_appender(file_cfg)?);
            Some((writer, guard))
        }
        None => None,
    };

    match (config.console, file) {
        (true, Some((writer, guard))) => {
            base.with(fmt::layer())
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Ok(Some(guard))
        }
        (false, Some((writer, guard))) => {
            base.with(fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Ok(Some(guard))
        }
        (true, None) => {
            base.with(fmt::layer()).init();
            Ok(None)
        }
        (false, None) => {
            base.init();
            Ok(None)
        }
    }
}

/// Route logs through the test harness's captured writer. Safe to call from
/// every test; only the first call installs a subscriber.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = LogConfig::default();
        assert_eq!(cfg.level, "info");
        assert!(cfg.console);
        assert!(cfg.file.is_none());
    }

    #[test]
    fn test_config_parses_with_defaults() {
        let cfg: LogConfig = serde_json::from_str(r#"{}"#).unwrap();
        assert_eq!(cfg.level, "info");
        assert!(cfg.console);

        let cfg: LogConfig = serde_json::from_str(
            r#"{"level": "warn", "file": {"dir": "/var/log/vbs", "rotation": "hourly"}}"#,
        )
        .unwrap();
        assert_eq!(cfg.level, "warn");
        let file = cfg.file.unwrap();
        assert_eq!(file.dir, PathBuf::from("/var/log/vbs"));
        assert_eq!(file.prefix, "vbs");
        assert_eq!(file.rotation, Rotation::Hourly);
    }

    #[test]
    fn test_rotation_default() {
        assert_eq!(Rotation::default(), Rotation::Daily);
    }

    #[test]
    fn test_init_test_logging_idempotent() {
        init_test_logging();
        init_test_logging();
        tracing::info!("logging initialized twice without panic");
    }
}
