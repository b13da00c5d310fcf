//! Structured logging setup built on `tracing-subscriber`.
//!
//! `DISKMAP_LOG` takes precedence over the configured level. The TUI owns the
//! terminal, so it logs to a file or not at all.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::config::LoggingConfig;
use crate::error::{Error, Result};

pub const LOG_ENV: &str = "DISKMAP_LOG";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    Stderr,
    File(PathBuf),
    Off,
}

impl LogTarget {
    /// Target for an interactive session: the configured file, else nothing.
    pub fn for_terminal_ui(config: &LoggingConfig) -> Self {
        match &config.file {
            Some(path) if !path.as_os_str().is_empty() => Self::File(path.clone()),
            _ => Self::Off,
        }
    }
}

pub fn init_logging(config: &LoggingConfig, target: LogTarget) -> Result<()> {
    let filter = build_env_filter(config)?;

    match target {
        LogTarget::Off => {
            Registry::default()
                .with(EnvFilter::new("off"))
                .with(fmt::layer().with_writer(std::io::sink))
                .init();
        }
        LogTarget::Stderr => {
            Registry::default()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_writer(std::io::stderr),
                )
                .init();
        }
        LogTarget::File(path) => {
            let file = open_log_file(&path)?;
            Registry::default()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_ansi(false)
                        .with_writer(Mutex::new(file)),
                )
                .init();
        }
    }

    Ok(())
}

fn build_env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_env(LOG_ENV) {
        return Ok(filter);
    }

    EnvFilter::try_new(&config.level).map_err(|e| Error::LogFilter(format!("{}: {}", config.level, e)))
}

fn open_log_file(path: &Path) -> Result<std::fs::File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?)
}
