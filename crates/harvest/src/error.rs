/// Run-level failures. Everything per-unit is an outcome code, not an error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no work units to process")]
    EmptyInput,

    #[error("invalid run setting {setting}: must be greater than zero")]
    InvalidSetting { setting: &'static str },
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_setting() {
        let err = Error::InvalidSetting {
            setting: "chunk_size",
        };
        assert_eq!(
            err.to_string(),
            "invalid run setting chunk_size: must be greater than zero"
        );
    }
}
