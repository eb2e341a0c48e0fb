//! Configuration-time error types

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading configuration or run inputs.
///
/// Every variant is fatal: the run aborts before any worker starts.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("input file not found: {}", .0.display())]
    InputMissing(PathBuf),

    #[error("input file has no entries: {}", .0.display())]
    InputEmpty(PathBuf),
}

/// Result alias using common Error
pub type Result<T> = std::result::Result<T, Error>;
