//! Wallet valuation over Solana JSON-RPC and CoinGecko prices
//!
//! Balances: `getBalance` for SOL and one `getTokenAccountsByOwner` call
//! (jsonParsed, by token program) covering every SPL account the wallet holds.
//! Prices: tracked assets come from one CoinGecko `simple/price` call, cached
//! for `price_cache_ttl`; any other mint is priced through `simple/token_price`
//! and cached per mint, including "no price known". Stablecoins fall back to
//! 1.0 when their price is missing.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use common::{BoxFuture, Secret, mask_endpoint};
use harvest::{Valuation, ValuationError, ValuationSource};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{Error, Result};

const LAMPORTS_PER_SOL: f64 = 1_000_000_000.0;
const TOKEN_PROGRAM_ID: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";
const NATIVE_SYMBOL: &str = "SOL";
/// Mints per `simple/token_price` request.
const MINTS_PER_PRICE_CALL: usize = 30;

struct TrackedAsset {
    symbol: &'static str,
    price_id: &'static str,
    /// `None` for the native asset.
    mint: Option<&'static str>,
    stable: bool,
}

const TRACKED: &[TrackedAsset] = &[
    TrackedAsset {
        symbol: NATIVE_SYMBOL,
        price_id: "solana",
        mint: None,
        stable: false,
    },
    TrackedAsset {
        symbol: "USDC",
        price_id: "usd-coin",
        mint: Some("EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v"),
        stable: true,
    },
    TrackedAsset {
        symbol: "USDT",
        price_id: "tether",
        mint: Some("Es9vMFrzaCERmJfrF4H2FYD4KCoNkY11McCe8BenwNYB"),
        stable: true,
    },
    TrackedAsset {
        symbol: "RAY",
        price_id: "raydium",
        mint: Some("4k3Dyjzvzp8eMZWUXbBCjEvwSkkk59S5iCNLY3QrkX6R"),
        stable: false,
    },
];

/// A priced holding: a tracked symbol, or the mint address of anything else.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum AssetKey {
    Tracked(&'static str),
    Mint(String),
}

impl AssetKey {
    fn for_mint(mint: &str) -> Self {
        match TRACKED.iter().find(|asset| asset.mint == Some(mint)) {
            Some(asset) => AssetKey::Tracked(asset.symbol),
            None => AssetKey::Mint(mint.to_string()),
        }
    }

    fn label(&self) -> String {
        match self {
            AssetKey::Tracked(symbol) => symbol.to_string(),
            AssetKey::Mint(mint) => mint.clone(),
        }
    }

    fn is_stable(&self) -> bool {
        let AssetKey::Tracked(symbol) = self else {
            return false;
        };
        TRACKED
            .iter()
            .any(|asset| asset.symbol == *symbol && asset.stable)
    }
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope<T> {
    result: Option<T>,
    error: Option<RpcFault>,
}

#[derive(Debug, Deserialize)]
struct RpcFault {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct ContextValue<T> {
    value: T,
}

#[derive(Debug, Deserialize)]
struct TokenAccount {
    account: TokenAccountData,
}

#[derive(Debug, Deserialize)]
struct TokenAccountData {
    data: ParsedAccount,
}

#[derive(Debug, Deserialize)]
struct ParsedAccount {
    parsed: ParsedTokenAccount,
}

#[derive(Debug, Deserialize)]
struct ParsedTokenAccount {
    info: TokenAccountInfo,
}

#[derive(Debug, Deserialize)]
struct TokenAccountInfo {
    #[serde(default)]
    mint: Option<String>,
    #[serde(rename = "tokenAmount")]
    token_amount: TokenAmount,
}

#[derive(Debug, Deserialize)]
struct TokenAmount {
    #[serde(rename = "uiAmount", default)]
    ui_amount: Option<f64>,
}

fn decode_rpc<T: DeserializeOwned>(
    method: &str,
    body: &str,
) -> std::result::Result<T, ValuationError> {
    let envelope: RpcEnvelope<T> = serde_json::from_str(body)
        .map_err(|e| ValuationError(format!("{method}: undecodable response: {e}")))?;
    if let Some(fault) = envelope.error {
        return Err(ValuationError(format!(
            "{method}: rpc error {}: {}",
            fault.code, fault.message
        )));
    }
    envelope
        .result
        .ok_or_else(|| ValuationError(format!("{method}: response has no result")))
}

/// Positive balances per asset; several accounts of one mint are summed.
fn token_balances(accounts: &[TokenAccount]) -> BTreeMap<AssetKey, f64> {
    let mut balances = BTreeMap::new();
    for account in accounts {
        let info = &account.account.data.parsed.info;
        let (Some(mint), Some(amount)) = (info.mint.as_deref(), info.token_amount.ui_amount)
        else {
            continue;
        };
        if amount > 0.0 {
            *balances.entry(AssetKey::for_mint(mint)).or_insert(0.0) += amount;
        }
    }
    balances
}

/// `{"<key>": {"usd": 1.5}, ...}` → key → price. Entries without a usd price
/// are left out.
fn decode_usd_table(body: &str) -> std::result::Result<HashMap<String, f64>, ValuationError> {
    let raw: HashMap<String, HashMap<String, Option<f64>>> = serde_json::from_str(body)
        .map_err(|e| ValuationError(format!("price response: {e}")))?;
    Ok(raw
        .into_iter()
        .filter_map(|(key, quotes)| Some((key, quotes.get("usd").copied().flatten()?)))
        .collect())
}

/// `simple/price` body → tracked asset → price.
fn decode_prices(body: &str) -> std::result::Result<HashMap<AssetKey, f64>, ValuationError> {
    let raw = decode_usd_table(body)?;
    Ok(TRACKED
        .iter()
        .filter_map(|asset| Some((AssetKey::Tracked(asset.symbol), *raw.get(asset.price_id)?)))
        .collect())
}

/// `simple/token_price` body → price per requested mint. Contract addresses
/// come back lowercased, so they are matched case-insensitively.
fn decode_mint_prices(
    body: &str,
    mints: &[String],
) -> std::result::Result<HashMap<String, f64>, ValuationError> {
    let raw: HashMap<String, f64> = decode_usd_table(body)?
        .into_iter()
        .map(|(key, price)| (key.to_lowercase(), price))
        .collect();
    Ok(mints
        .iter()
        .filter_map(|mint| Some((mint.clone(), *raw.get(&mint.to_lowercase())?)))
        .collect())
}

/// USD value per asset with a positive balance and a known price.
fn compute_valuation(
    balances: &BTreeMap<AssetKey, f64>,
    prices: &HashMap<AssetKey, f64>,
) -> Valuation {
    balances
        .iter()
        .filter(|(_, balance)| **balance > 0.0)
        .filter_map(|(key, balance)| {
            let price = prices
                .get(key)
                .copied()
                .or_else(|| key.is_stable().then_some(1.0))?;
            Some((key.label(), balance * price))
        })
        .collect()
}

#[derive(Default)]
struct PriceCache {
    tracked: Option<(Instant, HashMap<AssetKey, f64>)>,
    /// `None` records a mint the price source does not know.
    mints: HashMap<String, (Instant, Option<f64>)>,
}

impl PriceCache {
    fn fresh_mint(&self, mint: &str, ttl: Duration) -> Option<Option<f64>> {
        self.mints
            .get(mint)
            .filter(|(fetched_at, _)| fetched_at.elapsed() < ttl)
            .map(|(_, price)| *price)
    }
}

/// Price endpoints and client limits for `RpcValuation`.
#[derive(Debug, Clone)]
pub struct ValuationSettings {
    /// CoinGecko `simple/price`.
    pub price_url: String,
    /// CoinGecko `simple/token_price/solana`.
    pub token_price_url: String,
    pub price_cache_ttl: Duration,
    pub timeout: Duration,
}

pub struct RpcValuation {
    client: reqwest::Client,
    rpc_url: Secret<String>,
    rpc_label: String,
    price_url: String,
    token_price_url: String,
    price_cache_ttl: Duration,
    prices: Mutex<PriceCache>,
}

impl RpcValuation {
    pub fn new(rpc_url: Secret<String>, settings: ValuationSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| Error::Client(format!("failed to build valuation client: {e}")))?;
        Ok(Self {
            client,
            rpc_label: mask_endpoint(rpc_url.expose()),
            rpc_url,
            price_url: settings.price_url,
            token_price_url: settings.token_price_url,
            price_cache_ttl: settings.price_cache_ttl,
            prices: Mutex::new(PriceCache::default()),
        })
    }

    async fn rpc<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> std::result::Result<T, ValuationError> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let response = self
            .client
            .post(self.rpc_url.expose().as_str())
            .json(&request)
            .send()
            .await
            .map_err(|e| ValuationError(format!("{method} via {}: {e}", self.rpc_label)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ValuationError(format!("{method}: rpc returned {status}")));
        }
        let body = response
            .text()
            .await
            .map_err(|e| ValuationError(format!("{method}: failed to read body: {e}")))?;
        decode_rpc(method, &body)
    }

    async fn balances(
        &self,
        address: &str,
    ) -> std::result::Result<BTreeMap<AssetKey, f64>, ValuationError> {
        let lamports: ContextValue<u64> = self.rpc("getBalance", json!([address])).await?;
        let accounts: ContextValue<Vec<TokenAccount>> = self
            .rpc(
                "getTokenAccountsByOwner",
                json!([address, {"programId": TOKEN_PROGRAM_ID}, {"encoding": "jsonParsed"}]),
            )
            .await?;

        let mut balances = token_balances(&accounts.value);
        let sol = lamports.value as f64 / LAMPORTS_PER_SOL;
        if sol > 0.0 {
            balances.insert(AssetKey::Tracked(NATIVE_SYMBOL), sol);
        }
        debug!(address, assets = balances.len(), "balances fetched");
        Ok(balances)
    }

    /// Prices for every asset in `balances` that the sources know. Failed
    /// refreshes are logged, not cached, and retried on the next call.
    async fn prices(&self, balances: &BTreeMap<AssetKey, f64>) -> HashMap<AssetKey, f64> {
        let mut cache = self.prices.lock().await;

        let tracked_fresh = cache
            .tracked
            .as_ref()
            .is_some_and(|(fetched_at, _)| fetched_at.elapsed() < self.price_cache_ttl);
        if !tracked_fresh {
            match self.fetch_prices().await {
                Ok(prices) => {
                    debug!(assets = prices.len(), "price table refreshed");
                    cache.tracked = Some((Instant::now(), prices));
                }
                Err(err) => warn!(error = %err, "price refresh failed"),
            }
        }
        let mut prices = cache
            .tracked
            .as_ref()
            .filter(|(fetched_at, _)| fetched_at.elapsed() < self.price_cache_ttl)
            .map(|(_, prices)| prices.clone())
            .unwrap_or_default();

        let mut missing = Vec::new();
        for key in balances.keys() {
            let AssetKey::Mint(mint) = key else { continue };
            match cache.fresh_mint(mint, self.price_cache_ttl) {
                Some(Some(price)) => {
                    prices.insert(key.clone(), price);
                }
                Some(None) => {}
                None => missing.push(mint.clone()),
            }
        }

        for batch in missing.chunks(MINTS_PER_PRICE_CALL) {
            match self.fetch_mint_prices(batch).await {
                Ok(found) => {
                    let now = Instant::now();
                    for mint in batch {
                        let price = found.get(mint).copied();
                        cache.mints.insert(mint.clone(), (now, price));
                        if let Some(price) = price {
                            prices.insert(AssetKey::Mint(mint.clone()), price);
                        }
                    }
                }
                Err(err) => warn!(error = %err, mints = batch.len(), "token price lookup failed"),
            }
        }
        prices
    }

    async fn get_usd_table(&self, url: reqwest::Url) -> std::result::Result<String, ValuationError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ValuationError(format!("price request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ValuationError(format!("price endpoint returned {status}")));
        }
        response
            .text()
            .await
            .map_err(|e| ValuationError(format!("failed to read price body: {e}")))
    }

    async fn fetch_prices(&self) -> std::result::Result<HashMap<AssetKey, f64>, ValuationError> {
        let ids: Vec<&str> = TRACKED.iter().map(|asset| asset.price_id).collect();
        let mut url = reqwest::Url::parse(&self.price_url)
            .map_err(|e| ValuationError(format!("invalid price URL: {e}")))?;
        url.query_pairs_mut()
            .append_pair("ids", &ids.join(","))
            .append_pair("vs_currencies", "usd");
        decode_prices(&self.get_usd_table(url).await?)
    }

    async fn fetch_mint_prices(
        &self,
        mints: &[String],
    ) -> std::result::Result<HashMap<String, f64>, ValuationError> {
        let mut url = reqwest::Url::parse(&self.token_price_url)
            .map_err(|e| ValuationError(format!("invalid token price URL: {e}")))?;
        url.query_pairs_mut()
            .append_pair("contract_addresses", &mints.join(","))
            .append_pair("vs_currencies", "usd");
        decode_mint_prices(&self.get_usd_table(url).await?, mints)
    }
}

impl ValuationSource for RpcValuation {
    fn valuate<'a>(
        &'a self,
        address: &'a str,
    ) -> BoxFuture<'a, std::result::Result<Valuation, ValuationError>> {
        Box::pin(async move {
            let balances = self.balances(address).await?;
            if balances.is_empty() {
                return Ok(Valuation::new());
            }
            let prices = self.prices(&balances).await;
            Ok(compute_valuation(&balances, &prices))
        })
    }
}
