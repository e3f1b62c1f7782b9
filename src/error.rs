use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LoggerError>;

#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Config file not found: {0}")]
    ConfigNotFound(PathBuf),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Config section not found: {0}")]
    SectionNotFound(String),
    #[error("Can't create {transport} listener on port {port}: {source}")]
    Bind {
        transport: &'static str,
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("Snapshot from {0} ended before the EOF marker")]
    TruncatedSnapshot(String),
    #[error("Worker exited unexpectedly: {0}")]
    WorkerExited(&'static str),
    #[error("Worker panicked: {0}")]
    WorkerPanicked(String),
    #[error("CLI usage error: {0}")]
    Usage(String),
}
