//! Redacting wrapper for credential-bearing values
//!
//! Proxy URLs routinely embed `user:password@` and identity header sets carry
//! session tokens. Both flow through pools and log lines, so the raw value is
//! only reachable through `expose()`.

use std::fmt;
use zeroize::Zeroize;

/// Sensitive value - redacted in Debug/Display, zeroed on drop
pub struct Secret<T: Zeroize>(T);

impl<T: Zeroize> Secret<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Expose the inner value (use sparingly)
    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl<T: Zeroize> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl<T: Zeroize> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl<T: Zeroize> Drop for Secret<T> {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl<T: Zeroize + Clone> Clone for Secret<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: Zeroize + PartialEq> PartialEq for Secret<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

/// Render an endpoint URL for logs with any userinfo replaced by `***`.
///
/// `http://user:pw@10.0.0.1:8080` becomes `http://***@10.0.0.1:8080`; URLs
/// without credentials pass through unchanged.
pub fn mask_endpoint(url: &str) -> String {
    let (scheme, rest) = match url.split_once("://") {
        Some((scheme, rest)) => (Some(scheme), rest),
        None => (None, url),
    };
    let authority_end = rest.find('/').unwrap_or(rest.len());
    let (authority, path) = rest.split_at(authority_end);
    let masked = match authority.rsplit_once('@') {
        Some((_, host)) => format!("***@{host}{path}"),
        None => format!("{authority}{path}"),
    };
    match scheme {
        Some(scheme) => format!("{scheme}://{masked}"),
        None => masked,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_redacts_debug_and_display() {
        let secret = Secret::new(String::from("http://u:p@proxy:3128"));
        assert_eq!(format!("{secret:?}"), "[REDACTED]");
        assert_eq!(format!("{secret}"), "[REDACTED]");
        assert_eq!(secret.expose(), "http://u:p@proxy:3128");
    }

    #[test]
    fn mask_endpoint_hides_userinfo() {
        assert_eq!(
            mask_endpoint("http://user:pw@10.0.0.1:8080"),
            "http://***@10.0.0.1:8080"
        );
        assert_eq!(
            mask_endpoint("socks5://a:b@host:1080/path"),
            "socks5://***@host:1080/path"
        );
    }

    #[test]
    fn mask_endpoint_passes_plain_urls_through() {
        assert_eq!(mask_endpoint("http://10.0.0.1:8080"), "http://10.0.0.1:8080");
        assert_eq!(mask_endpoint("10.0.0.1:8080"), "10.0.0.1:8080");
    }

    #[test]
    fn mask_endpoint_ignores_at_sign_in_path() {
        assert_eq!(
            mask_endpoint("http://host:80/a@b"),
            "http://host:80/a@b"
        );
    }
}
