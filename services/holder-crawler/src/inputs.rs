//! Run inputs: contract list, proxy list, identity header sets
//!
//! A missing or empty input file is fatal; the run never starts with an
//! empty pool or nothing to crawl.

use std::collections::BTreeMap;
use std::path::Path;

use sources::{IdentityHeaders, ProxyEndpoint};
use tracing::info;

use crate::error::{Error, Result};

/// Non-blank lines of `path`, trimmed.
pub fn load_lines(path: &Path) -> common::Result<Vec<String>> {
    if !path.exists() {
        return Err(common::Error::InputMissing(path.to_path_buf()));
    }
    let contents = std::fs::read_to_string(path)?;
    let lines: Vec<String> = contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect();
    if lines.is_empty() {
        return Err(common::Error::InputEmpty(path.to_path_buf()));
    }
    Ok(lines)
}

pub fn load_contracts(path: &Path) -> Result<Vec<String>> {
    let contracts = load_lines(path)?;
    info!(path = %path.display(), contracts = contracts.len(), "contracts loaded");
    Ok(contracts)
}

/// One proxy URL per line; each gets its own client.
pub fn load_proxies(path: &Path) -> Result<Vec<ProxyEndpoint>> {
    let proxies = load_lines(path)?
        .iter()
        .enumerate()
        .map(|(idx, url)| {
            ProxyEndpoint::new(url).map_err(|source| Error::Proxy {
                path: path.to_path_buf(),
                line: idx + 1,
                source,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    info!(path = %path.display(), proxies = proxies.len(), "proxies loaded");
    Ok(proxies)
}

/// JSON array of header-name to value objects, one object per identity.
pub fn load_identities(path: &Path) -> Result<Vec<IdentityHeaders>> {
    if !path.exists() {
        return Err(common::Error::InputMissing(path.to_path_buf()).into());
    }
    let contents = std::fs::read_to_string(path).map_err(common::Error::from)?;
    let invalid = |reason: String| Error::Identities {
        path: path.to_path_buf(),
        reason,
    };

    let raw: Vec<BTreeMap<String, String>> =
        serde_json::from_str(&contents).map_err(|e| invalid(e.to_string()))?;
    if raw.is_empty() {
        return Err(common::Error::InputEmpty(path.to_path_buf()).into());
    }

    let identities = raw
        .iter()
        .enumerate()
        .map(|(idx, headers)| {
            if headers.is_empty() {
                return Err(invalid(format!("entry {idx} has no headers")));
            }
            IdentityHeaders::new(
                headers
                    .iter()
                    .map(|(name, value)| (name.as_str(), value.as_str())),
            )
            .map_err(|e| invalid(format!("entry {idx}: {e}")))
        })
        .collect::<Result<Vec<_>>>()?;
    info!(path = %path.display(), identities = identities.len(), "identities loaded");
    Ok(identities)
}
