//! Service-specific error types

use std::path::PathBuf;

use thiserror::Error;

/// Input-loading failures. All of them abort the run before any worker starts.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Input(#[from] common::Error),

    #[error("invalid identities file {}: {reason}", path.display())]
    Identities { path: PathBuf, reason: String },

    #[error("invalid proxy on line {line} of {}: {source}", path.display())]
    Proxy {
        path: PathBuf,
        line: usize,
        #[source]
        source: sources::Error,
    },
}

/// Result alias using service Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages_are_descriptive() {
        let missing = Error::from(common::Error::InputMissing(PathBuf::from("config/proxies.txt")));
        assert_eq!(missing.to_string(), "input file not found: config/proxies.txt");

        let identities = Error::Identities {
            path: PathBuf::from("config/identities.json"),
            reason: "expected an array".into(),
        };
        assert_eq!(
            identities.to_string(),
            "invalid identities file config/identities.json: expected an array"
        );
    }

    #[test]
    fn proxy_error_names_the_line() {
        let err = Error::Proxy {
            path: PathBuf::from("proxies.txt"),
            line: 4,
            source: sources::Error::Client("boom".into()),
        };
        let msg = err.to_string();
        assert!(msg.contains("line 4"), "{msg}");
        assert!(msg.contains("proxies.txt"), "{msg}");
    }
}
