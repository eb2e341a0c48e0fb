//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The valuation RPC URL usually embeds an API key, so `VALUATION_RPC_URL`
//! overrides the file value and the result is held as a `Secret`.

use common::Secret;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration. Every section is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub input: InputConfig,
    pub proxies: ProxyPoolConfig,
    pub identities: IdentityPoolConfig,
    pub holders: HoldersConfig,
    pub social: SocialConfig,
    pub valuation: ValuationConfig,
    pub run: RunSection,
    pub output: OutputConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub contracts_file: PathBuf,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            contracts_file: PathBuf::from("config/contractAddresses.txt"),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ProxyPoolConfig {
    pub file: PathBuf,
    pub request_cap: u32,
    pub error_threshold: u32,
    pub probe_url: String,
    pub probe_timeout_secs: u64,
    /// 0 disables periodic re-admission.
    pub recheck_interval_secs: u64,
}

impl Default for ProxyPoolConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::from("config/proxies.txt"),
            request_cap: 100,
            error_threshold: 3,
            probe_url: "https://api.twitter.com".into(),
            probe_timeout_secs: 10,
            recheck_interval_secs: 300,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct IdentityPoolConfig {
    pub file: PathBuf,
    pub request_cap: u32,
    pub error_threshold: u32,
}

impl Default for IdentityPoolConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::from("config/identities.json"),
            request_cap: 50,
            error_threshold: 7,
        }
    }
}

/// Header sent with every holder page request
#[derive(Debug, Clone, Deserialize)]
pub struct HeaderInjection {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct HoldersConfig {
    pub base_url: String,
    pub page_size: u32,
    pub max_page: u32,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub inter_page_delay_ms: u64,
    pub timeout_secs: u64,
    pub headers: Vec<HeaderInjection>,
}

impl Default for HoldersConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api-v2.solscan.io".into(),
            page_size: 100,
            max_page: 100,
            retry_attempts: 3,
            retry_delay_ms: 1000,
            inter_page_delay_ms: 1000,
            timeout_secs: 30,
            headers: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SocialConfig {
    pub base_url: String,
    pub page_size: u32,
    /// Attempts under HTTP 429 before the lookup gives up.
    pub max_attempts: u32,
    pub timeout_secs: u64,
}

impl Default for SocialConfig {
    fn default() -> Self {
        Self {
            base_url: "https://x.com/i/api/graphql/S9Y5e9vylJCliXvZ8MOB3g/SearchTimeline".into(),
            page_size: 20,
            max_attempts: 5,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ValuationConfig {
    pub enabled: bool,
    #[serde(skip)]
    pub rpc_url: Option<Secret<String>>,
    /// File value, superseded by `VALUATION_RPC_URL`.
    #[serde(rename = "rpc_url")]
    rpc_url_file_value: Option<String>,
    pub price_url: String,
    /// Prices for SPL mints outside the tracked table, by contract address.
    pub token_price_url: String,
    pub price_cache_secs: u64,
    pub timeout_secs: u64,
}

impl Default for ValuationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            rpc_url: None,
            rpc_url_file_value: None,
            price_url: "https://api.coingecko.com/api/v3/simple/price".into(),
            token_price_url: "https://api.coingecko.com/api/v3/simple/token_price/solana".into(),
            price_cache_secs: 300,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RunSection {
    pub chunk_size: usize,
    pub max_workers: usize,
    pub drain_timeout_secs: u64,
    /// 0 disables progress snapshots.
    pub progress_interval_secs: u64,
    /// 0 disables checkpoint flushes.
    pub checkpoint_interval_secs: u64,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            chunk_size: 5,
            max_workers: 4,
            drain_timeout_secs: 30,
            progress_interval_secs: 5,
            checkpoint_interval_secs: 0,
        }
    }
}

impl RunSection {
    pub fn progress_interval(&self) -> Option<Duration> {
        non_zero_secs(self.progress_interval_secs)
    }

    pub fn checkpoint_interval(&self) -> Option<Duration> {
        non_zero_secs(self.checkpoint_interval_secs)
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("output"),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Prometheus listener; disabled when unset.
    pub listen_addr: Option<SocketAddr>,
}

pub fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

fn require_http(field: &str, url: &str) -> common::Result<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(common::Error::Config(format!(
            "{field} must start with http:// or https://, got: {url}"
        )))
    }
}

fn require_non_zero(field: &str, value: u64) -> common::Result<()> {
    if value == 0 {
        return Err(common::Error::Config(format!(
            "{field} must be greater than 0"
        )));
    }
    Ok(())
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse, overlay `VALUATION_RPC_URL`, then validate.
    pub fn from_toml(contents: &str) -> common::Result<Self> {
        let mut config: Config = toml::from_str(contents)?;

        let rpc_url = std::env::var("VALUATION_RPC_URL")
            .ok()
            .filter(|url| !url.trim().is_empty())
            .or_else(|| config.valuation.rpc_url_file_value.take());
        config.valuation.rpc_url = rpc_url.map(Secret::new);

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        require_non_zero("run.chunk_size", self.run.chunk_size as u64)?;
        require_non_zero("run.max_workers", self.run.max_workers as u64)?;
        require_non_zero("holders.page_size", self.holders.page_size.into())?;
        require_non_zero("holders.max_page", self.holders.max_page.into())?;
        require_non_zero("holders.timeout_secs", self.holders.timeout_secs)?;
        require_non_zero("social.page_size", self.social.page_size.into())?;
        require_non_zero("social.timeout_secs", self.social.timeout_secs)?;
        require_non_zero("proxies.request_cap", self.proxies.request_cap.into())?;
        require_non_zero("proxies.error_threshold", self.proxies.error_threshold.into())?;
        require_non_zero("proxies.probe_timeout_secs", self.proxies.probe_timeout_secs)?;
        require_non_zero("identities.request_cap", self.identities.request_cap.into())?;
        require_non_zero(
            "identities.error_threshold",
            self.identities.error_threshold.into(),
        )?;

        require_http("holders.base_url", &self.holders.base_url)?;
        require_http("social.base_url", &self.social.base_url)?;
        require_http("proxies.probe_url", &self.proxies.probe_url)?;

        if self.valuation.enabled {
            require_http("valuation.price_url", &self.valuation.price_url)?;
            require_http("valuation.token_price_url", &self.valuation.token_price_url)?;
            require_non_zero("valuation.timeout_secs", self.valuation.timeout_secs)?;
            match &self.valuation.rpc_url {
                Some(url) => require_http("valuation.rpc_url", url.expose())?,
                None => {
                    return Err(common::Error::Config(
                        "valuation is enabled but no RPC URL is set (VALUATION_RPC_URL or valuation.rpc_url)"
                            .into(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("holder-crawler.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Serializes tests that read or mutate environment variables.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// SAFETY: Callers must hold ENV_MUTEX to prevent concurrent env mutation.
    unsafe fn set_env(key: &str, val: &str) {
        unsafe { std::env::set_var(key, val) };
    }

    unsafe fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) };
    }

    fn parse(toml: &str) -> common::Result<Config> {
        Config::from_toml(toml)
    }

    #[test]
    fn empty_file_yields_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("VALUATION_RPC_URL") };

        let config = parse("").unwrap();
        assert_eq!(
            config.input.contracts_file,
            PathBuf::from("config/contractAddresses.txt")
        );
        assert_eq!(config.proxies.request_cap, 100);
        assert_eq!(config.proxies.error_threshold, 3);
        assert_eq!(config.proxies.recheck_interval_secs, 300);
        assert_eq!(config.identities.request_cap, 50);
        assert_eq!(config.identities.error_threshold, 7);
        assert_eq!(config.holders.page_size, 100);
        assert_eq!(config.holders.max_page, 100);
        assert_eq!(config.holders.retry_attempts, 3);
        assert_eq!(config.social.max_attempts, 5);
        assert_eq!(config.run.chunk_size, 5);
        assert_eq!(config.run.max_workers, 4);
        assert_eq!(config.run.progress_interval(), Some(Duration::from_secs(5)));
        assert_eq!(config.run.checkpoint_interval(), None);
        assert_eq!(config.output.dir, PathBuf::from("output"));
        assert!(config.metrics.listen_addr.is_none());
        assert!(!config.valuation.enabled);
        assert!(config.valuation.rpc_url.is_none());
        assert_eq!(
            config.valuation.token_price_url,
            "https://api.coingecko.com/api/v3/simple/token_price/solana"
        );
    }

    #[test]
    fn sections_override_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("VALUATION_RPC_URL") };

        let config = parse(
            r#"
[input]
contracts_file = "/data/contracts.txt"

[proxies]
request_cap = 10
recheck_interval_secs = 0

[holders]
page_size = 50

[[holders.headers]]
name = "origin"
value = "https://solscan.io"

[run]
chunk_size = 2
checkpoint_interval_secs = 60

[metrics]
listen_addr = "127.0.0.1:9100"
"#,
        )
        .unwrap();

        assert_eq!(config.input.contracts_file, PathBuf::from("/data/contracts.txt"));
        assert_eq!(config.proxies.request_cap, 10);
        assert_eq!(config.proxies.error_threshold, 3, "unset keys keep defaults");
        assert_eq!(config.proxies.recheck_interval_secs, 0);
        assert_eq!(config.holders.page_size, 50);
        assert_eq!(config.holders.headers.len(), 1);
        assert_eq!(config.holders.headers[0].name, "origin");
        assert_eq!(config.run.chunk_size, 2);
        assert_eq!(config.run.checkpoint_interval(), Some(Duration::from_secs(60)));
        assert_eq!(
            config.metrics.listen_addr,
            Some("127.0.0.1:9100".parse().unwrap())
        );
    }

    #[test]
    fn zero_limits_are_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        for toml in [
            "[run]\nchunk_size = 0",
            "[run]\nmax_workers = 0",
            "[holders]\npage_size = 0",
            "[holders]\nmax_page = 0",
            "[proxies]\nrequest_cap = 0",
            "[proxies]\nerror_threshold = 0",
            "[identities]\nrequest_cap = 0",
            "[identities]\nerror_threshold = 0",
        ] {
            let err = parse(toml).unwrap_err();
            assert!(
                matches!(err, common::Error::Config(_)),
                "`{toml}` must be a config error, got {err:?}"
            );
        }
    }

    #[test]
    fn non_http_base_url_is_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let err = parse("[holders]\nbase_url = \"ftp://example.com\"").unwrap_err();
        assert!(err.to_string().contains("holders.base_url"), "{err}");
    }

    #[test]
    fn invalid_toml_is_an_error() {
        assert!(matches!(
            parse("not valid {{{{ toml").unwrap_err(),
            common::Error::Toml(_)
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let result = Config::load(Path::new("/nonexistent/path/holder-crawler.toml"));
        assert!(matches!(result.unwrap_err(), common::Error::Io(_)));
    }

    #[test]
    fn load_reads_from_disk() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("holder-crawler.toml");
        std::fs::write(&path, "[output]\ndir = \"/tmp/results\"\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.output.dir, PathBuf::from("/tmp/results"));
    }

    #[test]
    fn enabled_valuation_requires_rpc_url() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("VALUATION_RPC_URL") };

        let err = parse("[valuation]\nenabled = true").unwrap_err();
        assert!(err.to_string().contains("VALUATION_RPC_URL"), "{err}");
    }

    #[test]
    fn rpc_url_env_overrides_file() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("VALUATION_RPC_URL", "https://rpc.example/?api-key=env") };

        let config = parse(
            "[valuation]\nenabled = true\nrpc_url = \"https://rpc.example/?api-key=file\"",
        )
        .unwrap();
        assert_eq!(
            config.valuation.rpc_url.as_ref().unwrap().expose(),
            "https://rpc.example/?api-key=env"
        );
        unsafe { remove_env("VALUATION_RPC_URL") };
    }

    #[test]
    fn enabled_valuation_checks_token_price_url() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("VALUATION_RPC_URL") };

        let err = parse(
            "[valuation]\nenabled = true\nrpc_url = \"https://rpc.example\"\ntoken_price_url = \"coingecko\"",
        )
        .unwrap_err();
        assert!(err.to_string().contains("valuation.token_price_url"), "{err}");
    }

    #[test]
    fn rpc_url_falls_back_to_file_value() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("VALUATION_RPC_URL") };

        let config = parse(
            "[valuation]\nenabled = true\nrpc_url = \"https://rpc.example/?api-key=file\"",
        )
        .unwrap();
        assert_eq!(
            config.valuation.rpc_url.as_ref().unwrap().expose(),
            "https://rpc.example/?api-key=file"
        );
        assert_eq!(
            format!("{:?}", config.valuation.rpc_url),
            "Some([REDACTED])"
        );
    }

    #[test]
    fn test_resolve_path_cli_arg() {
        let path = Config::resolve_path(Some("/custom/path.toml"));
        assert_eq!(path, PathBuf::from("/custom/path.toml"));
    }

    #[test]
    fn test_resolve_path_env_var() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("CONFIG_PATH", "/env/path.toml") };
        let path = Config::resolve_path(None);
        assert_eq!(path, PathBuf::from("/env/path.toml"));
        unsafe { remove_env("CONFIG_PATH") };
    }

    #[test]
    fn test_resolve_path_default() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("CONFIG_PATH") };
        let path = Config::resolve_path(None);
        assert_eq!(path, PathBuf::from("holder-crawler.toml"));
    }

    #[test]
    fn test_resolve_path_cli_overrides_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("CONFIG_PATH", "/env/should-lose.toml") };
        let path = Config::resolve_path(Some("/cli/wins.toml"));
        assert_eq!(
            path,
            PathBuf::from("/cli/wins.toml"),
            "CLI arg must take precedence over CONFIG_PATH env var"
        );
        unsafe { remove_env("CONFIG_PATH") };
    }
}
