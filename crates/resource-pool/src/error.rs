//! Error types for pool construction

/// Errors from building a pool.
///
/// Running out of active resources is not an error: `acquire` returns `None`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("pool {0} has no resources")]
    Empty(String),

    #[error("pool {pool}: {setting} must be greater than 0")]
    InvalidSetting { pool: String, setting: &'static str },
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;
