/// Errors raised while building collaborators. Request-time failures are
/// mapped to `PageError` / `LookupError` / `ValuationError` instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid proxy {proxy}: {reason}")]
    InvalidProxy { proxy: String, reason: String },

    #[error("invalid header {name}: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("HTTP client error: {0}")]
    Client(String),

    #[error("pattern compile error: {0}")]
    Pattern(#[from] regex::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
