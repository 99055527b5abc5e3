//! Core error types for the job access gateway

use std::path::PathBuf;
use thiserror::Error;

/// Errors from the scheduler collaborator
#[derive(Error, Debug, Clone)]
pub enum SchedulerError {
    /// The scheduler could not be reached or the RPC failed
    #[error("Scheduler unavailable: {0}")]
    Unavailable(String),

    /// The scheduler answered but refused the request
    #[error("Scheduler rejected request: {description}")]
    Rejected { description: String },

    /// The job is unknown to the scheduler
    #[error("Job not found: {0}")]
    NotFound(u32),
}

/// Persistence errors from a [`crate::JsonStore`]
#[derive(Error, Debug)]
pub enum StoreError {
    /// Filesystem error
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file holds something other than a JSON array of records
    #[error("Malformed store file {path:?}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A previous holder of the store lock panicked
    #[error("Store lock poisoned for {0:?}")]
    Poisoned(PathBuf),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
