//! Solscan token-holder pages
//!
//! `GET {base}/v2/token/holders?address=<mint>&page_size=<n>&page=<p>`
//!
//! ```json
//! {"success": true,
//!  "data": [{"address": "...", "amount": 1000, "decimals": 6, "owner": "...", "rank": 1}],
//!  "metadata": {"total": 1234}}
//! ```
//!
//! An empty body or an empty `data` array ends pagination.

use std::time::Duration;

use common::BoxFuture;
use harvest::Holder;
use pagination::{Page, PageCursor, PageError, PageSource};
use reqwest::Url;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use tracing::warn;

use crate::endpoint::ProxyEndpoint;
use crate::error::{Error, Result};

#[derive(Debug, Deserialize)]
struct HolderPageBody {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    data: Option<Vec<HolderRow>>,
    #[serde(default)]
    metadata: Option<PageMetadata>,
}

#[derive(Debug, Deserialize)]
struct PageMetadata {
    #[serde(default)]
    total: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct HolderRow {
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    amount: Option<RawAmount>,
    #[serde(default)]
    decimals: Option<u8>,
    #[serde(default)]
    owner: Option<String>,
    #[serde(default)]
    rank: Option<u32>,
}

/// Amounts arrive as integers, floats or strings depending on token size.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawAmount {
    Integer(u64),
    Float(f64),
    Text(String),
}

impl RawAmount {
    fn to_u64(&self) -> u64 {
        match self {
            RawAmount::Integer(n) => *n,
            RawAmount::Float(f) if *f >= 0.0 => *f as u64,
            RawAmount::Float(f) => {
                warn!(amount = f, "holder amount is negative or NaN, recorded as 0");
                0
            }
            RawAmount::Text(s) => s.trim().parse().unwrap_or_else(|e| {
                warn!(amount = %s, error = %e, "unparseable holder amount, recorded as 0");
                0
            }),
        }
    }
}

fn decode_row(row: HolderRow) -> Option<Holder> {
    let owner = row.owner.filter(|owner| !owner.trim().is_empty())?;
    Some(Holder {
        owner,
        token_account: row.address.unwrap_or_default(),
        amount: row.amount.as_ref().map(RawAmount::to_u64).unwrap_or(0),
        decimals: row.decimals.unwrap_or(0),
        rank: row.rank,
    })
}

/// Decode one holder page body. Rows without an owner are dropped.
pub fn decode_holder_page(body: &str) -> std::result::Result<Page<Holder>, PageError> {
    if body.trim().is_empty() {
        return Ok(Page::empty());
    }

    let page: HolderPageBody = serde_json::from_str(body)
        .map_err(|e| PageError::Malformed(format!("holder page: {e}")))?;
    if page.success == Some(false) {
        return Err(PageError::Transient(
            "holders endpoint reported success=false".into(),
        ));
    }

    let items = page
        .data
        .unwrap_or_default()
        .into_iter()
        .filter_map(decode_row)
        .collect();
    let total = page.metadata.and_then(|metadata| metadata.total);
    Ok(Page::new(items).with_total_hint(total))
}

/// `PageSource` for holder lists, routed through pooled proxies.
pub struct HolderPageSource {
    endpoint: Url,
    headers: HeaderMap,
    timeout: Duration,
}

impl HolderPageSource {
    pub fn new(base_url: &str, headers: HeaderMap, timeout: Duration) -> Result<Self> {
        let raw = format!("{}/v2/token/holders", base_url.trim_end_matches('/'));
        let endpoint = Url::parse(&raw).map_err(|e| Error::InvalidUrl {
            url: raw.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            endpoint,
            headers,
            timeout,
        })
    }

    fn page_url(&self, contract: &str, cursor: PageCursor) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("address", contract)
            .append_pair("page_size", &cursor.page_size.to_string())
            .append_pair("page", &cursor.page_number().to_string());
        url
    }
}

impl PageSource<ProxyEndpoint> for HolderPageSource {
    type Query = str;
    type Item = Holder;

    fn fetch_page<'a>(
        &'a self,
        proxy: &'a ProxyEndpoint,
        contract: &'a str,
        cursor: PageCursor,
    ) -> BoxFuture<'a, std::result::Result<Page<Holder>, PageError>> {
        let url = self.page_url(contract, cursor);
        Box::pin(async move {
            let response = proxy
                .client()
                .get(url)
                .headers(self.headers.clone())
                .timeout(self.timeout)
                .send()
                .await
                .map_err(|e| {
                    PageError::Transient(format!("holders request via {} failed: {e}", proxy.label()))
                })?;

            let status = response.status();
            if !status.is_success() {
                return Err(PageError::Transient(format!(
                    "holders endpoint returned {status}"
                )));
            }

            let body = response
                .text()
                .await
                .map_err(|e| PageError::Transient(format!("failed to read holders body: {e}")))?;
            decode_holder_page(&body)
        })
    }
}
