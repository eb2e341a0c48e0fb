//! Token holder crawler
//!
//! Single-binary run that:
//! 1. Pages through the holders of every configured token contract
//! 2. Looks each holder address up in social posts
//! 3. Keeps holders who published their own address, optionally valued in USD
//! 4. Writes eligible / not-eligible CSV files, on demand and at the end
//!
//! Requests rotate over a proxy pool and an identity header pool; both are
//! built from input files and stay fixed for the run.

mod config;
mod error;
mod inputs;
mod metrics;
mod reporter;
mod sink;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use harvest::{Collaborators, Orchestrator, RunConfig, ValuationSource};
use pagination::{Backoff, FetchPolicy, PaginatedFetcher, RetryPolicy};
use resource_pool::{AlwaysHealthy, PoolSettings, RotatingPool, spawn_recheck_task};
use sources::{
    AddressMentionClassifier, HolderPageSource, HttpProbe, IdentityHeaders, ProxyEndpoint,
    RpcValuation, SocialLookup, SocialSettings, ValuationSettings, header_map,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, non_zero_secs};
use crate::reporter::TracingReporter;
use crate::sink::CsvSink;

/// Rate-limit backoff starts here and doubles per attempt.
const RATE_LIMIT_INITIAL_DELAY: Duration = Duration::from_secs(1);
const RATE_LIMIT_MAX_DELAY: Duration = Duration::from_secs(16);

fn init_tracing() {
    let filter = EnvFilter::try_from_env("LOG_LEVEL")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing();
    info!("starting holder-crawler");

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());
    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    info!(
        contracts_file = %config.input.contracts_file.display(),
        output_dir = %config.output.dir.display(),
        chunk_size = config.run.chunk_size,
        max_workers = config.run.max_workers,
        valuation = config.valuation.enabled,
        "configuration loaded"
    );

    if let Some(addr) = config.metrics.listen_addr {
        metrics::install_exporter(addr)
            .with_context(|| format!("failed to start metrics listener on {addr}"))?;
        info!(addr = %addr, "metrics exporter listening");
    }
    metrics::describe();

    // Inputs and pools: any failure here aborts before a worker starts
    let contracts = inputs::load_contracts(&config.input.contracts_file)?;
    let proxies = build_proxy_pool(&config)?;
    let identities = build_identity_pool(&config)?;

    let mut recheck_tasks = Vec::new();
    if let Some(interval) = non_zero_secs(config.proxies.recheck_interval_secs) {
        recheck_tasks.push(spawn_recheck_task(Arc::clone(&proxies), interval));
    }

    let collaborators = build_collaborators(&config, &proxies, &identities)?;
    let orchestrator = Orchestrator::new(
        collaborators,
        RunConfig {
            chunk_size: config.run.chunk_size,
            max_workers: config.run.max_workers,
            drain_timeout: Duration::from_secs(config.run.drain_timeout_secs),
            progress_interval: config.run.progress_interval(),
            checkpoint_interval: config.run.checkpoint_interval(),
        },
    )
    .context("invalid run configuration")?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            info!("shutdown signal received, finishing in-flight work");
            cancel.cancel();
        }
    });

    let report = orchestrator
        .run(contracts, cancel)
        .await
        .context("run aborted")?;

    for task in recheck_tasks {
        task.abort();
    }

    let snapshot = report.snapshot;
    info!(
        contracts = snapshot.primary_processed,
        contracts_total = snapshot.primary_total,
        contracts_failed = snapshot.primary_failed,
        holders = snapshot.processed_units,
        holders_total = snapshot.total_units,
        accepted = snapshot.accepted,
        rejected = snapshot.rejected,
        cancelled = report.cancelled,
        drained = report.drained,
        checkpoints = report.checkpoints,
        elapsed_secs = report.elapsed.as_secs(),
        "summary"
    );

    for (name, health) in [
        (proxies.name(), proxies.health().await),
        (identities.name(), identities.health().await),
    ] {
        metrics::record_pool_health(name, &health);
        info!(
            pool = name,
            status = health.status_label(),
            total = health.total,
            active = health.active,
            probing = health.probing,
            unhealthy = health.unhealthy,
            disabled = health.disabled,
            "pool health"
        );
    }

    metrics::record_flush(report.flushed());
    match &report.flush {
        Ok(receipt) => {
            for location in &receipt.locations {
                info!(path = %location, "results written");
            }
            info!("shutdown complete");
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            error!(error = %err, "final flush failed, results are not on disk");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn build_proxy_pool(config: &Config) -> Result<Arc<RotatingPool<ProxyEndpoint>>> {
    let proxies = inputs::load_proxies(&config.proxies.file)?;
    let probe = HttpProbe::new(
        config.proxies.probe_url.clone(),
        Duration::from_secs(config.proxies.probe_timeout_secs),
    );
    let pool = RotatingPool::new(
        "proxies",
        proxies,
        PoolSettings {
            request_cap: config.proxies.request_cap,
            error_threshold: config.proxies.error_threshold,
        },
        Arc::new(probe),
    )
    .context("failed to build proxy pool")?;
    Ok(Arc::new(pool))
}

fn build_identity_pool(config: &Config) -> Result<Arc<RotatingPool<IdentityHeaders>>> {
    let identities = inputs::load_identities(&config.identities.file)?;
    let pool = RotatingPool::new(
        "identities",
        identities,
        PoolSettings {
            request_cap: config.identities.request_cap,
            error_threshold: config.identities.error_threshold,
        },
        Arc::new(AlwaysHealthy),
    )
    .context("failed to build identity pool")?;
    Ok(Arc::new(pool))
}

fn build_collaborators(
    config: &Config,
    proxies: &Arc<RotatingPool<ProxyEndpoint>>,
    identities: &Arc<RotatingPool<IdentityHeaders>>,
) -> Result<Collaborators> {
    let holders = &config.holders;
    let headers = header_map(
        holders
            .headers
            .iter()
            .map(|h| (h.name.as_str(), h.value.as_str())),
    )
    .context("invalid holders.headers")?;
    let source = HolderPageSource::new(
        &holders.base_url,
        headers,
        Duration::from_secs(holders.timeout_secs),
    )
    .context("invalid holders configuration")?;
    let fetcher = PaginatedFetcher::new(
        Arc::clone(proxies),
        source,
        FetchPolicy {
            page_size: holders.page_size,
            max_page: holders.max_page,
            retry: RetryPolicy::fixed(
                holders.retry_attempts,
                Duration::from_millis(holders.retry_delay_ms),
            ),
            inter_page_delay: Duration::from_millis(holders.inter_page_delay_ms),
        },
    );

    let social = &config.social;
    let lookup = SocialLookup::new(
        Arc::clone(proxies),
        Arc::clone(identities),
        SocialSettings {
            base_url: social.base_url.clone(),
            page_size: social.page_size,
            timeout: Duration::from_secs(social.timeout_secs),
            rate_limit: RetryPolicy::new(
                social.max_attempts,
                Backoff::exponential(
                    RATE_LIMIT_INITIAL_DELAY,
                    RATE_LIMIT_MAX_DELAY,
                    social.max_attempts as usize,
                ),
            ),
        },
    )
    .context("invalid social configuration")?;

    let classifier = AddressMentionClassifier::new().context("failed to build classifier")?;

    let valuation: Option<Arc<dyn ValuationSource>> = match &config.valuation.rpc_url {
        Some(rpc_url) if config.valuation.enabled => Some(Arc::new(
            RpcValuation::new(
                rpc_url.clone(),
                ValuationSettings {
                    price_url: config.valuation.price_url.clone(),
                    token_price_url: config.valuation.token_price_url.clone(),
                    price_cache_ttl: Duration::from_secs(config.valuation.price_cache_secs),
                    timeout: Duration::from_secs(config.valuation.timeout_secs),
                },
            )
            .context("failed to build valuation source")?,
        )),
        _ => None,
    };
    if valuation.is_none() {
        info!("valuation disabled");
    }

    let sink = CsvSink::new(config.output.dir.clone());
    info!(run_id = sink.run_id(), dir = %config.output.dir.display(), "result sink ready");

    Ok(Collaborators {
        primary: Arc::new(fetcher),
        lookup: Arc::new(lookup),
        classifier: Arc::new(classifier),
        valuation,
        sink: Arc::new(sink),
        reporter: Arc::new(TracingReporter),
    })
}

/// Wait for SIGTERM or SIGINT. A handler that cannot be installed never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
