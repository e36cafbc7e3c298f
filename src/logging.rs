//! Logging bootstrap, configured by the CLI before any verb runs.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use crate::error::{Error, Result};

/// Logging configuration gathered from the global CLI flags.
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    /// Enable debug-level logging.
    pub debug: bool,
    /// Append logs to this file instead of stderr.
    pub file: Option<PathBuf>,
    /// `text` (default) or `json`.
    pub format: String,
}

/// Installs the global tracing subscriber.
pub fn init(config: &LogConfig) -> Result<()> {
    let level = if config.debug {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let (writer, ansi) = match &config.file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            (BoxMakeWriter::new(Arc::new(file)), false)
        }
        None => (BoxMakeWriter::new(std::io::stderr), true),
    };

    let builder = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(writer)
        .with_ansi(ansi)
        .with_target(false);

    match config.format.as_str() {
        "" | "text" => builder.init(),
        "json" => builder.json().init(),
        other => return Err(Error::InvalidLogFormat(other.to_string())),
    }

    Ok(())
}
