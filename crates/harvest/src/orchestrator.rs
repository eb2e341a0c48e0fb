//! Chunked, bounded-parallel harvest over a list of contracts
//!
//! ```text
//! units ──partition──> [chunk 0] [chunk 1] ... [chunk n]   (shared queue)
//!                          │
//!        min(max_workers, n) workers pop chunks in order
//!                          │
//!   per contract: fetch holders ─> per holder: lookup ─> classify ─> valuate
//!                          │
//!                 AggregationState (one lock, per-update)
//!                          │
//!                 ResultSink.flush (checkpoints + final)
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::progress::{HarvestEvent, ProgressReporter};
use crate::records::{
    AcceptedRecord, Classification, Holder, RejectReason, RejectedRecord, Valuation,
};
use crate::state::{AggregationSnapshot, AggregationState};
use crate::traits::{
    EligibilityClassifier, FlushReceipt, LookupError, PrimarySource, ResultSink, SecondaryLookup,
    SinkError, ValuationSource,
};
use pagination::ExhaustedBy;

/// Split `units` into ordered, non-overlapping chunks of at most `chunk_size`.
pub fn partition(units: Vec<String>, chunk_size: usize) -> Vec<Vec<String>> {
    if chunk_size == 0 {
        return Vec::new();
    }
    let mut chunks = Vec::with_capacity(units.len().div_ceil(chunk_size));
    let mut iter = units.into_iter().peekable();
    while iter.peek().is_some() {
        chunks.push(iter.by_ref().take(chunk_size).collect());
    }
    chunks
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub chunk_size: usize,
    pub max_workers: usize,
    /// How long to wait for workers after cancellation before flushing anyway.
    pub drain_timeout: Duration,
    pub progress_interval: Option<Duration>,
    pub checkpoint_interval: Option<Duration>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            chunk_size: 5,
            max_workers: 4,
            drain_timeout: Duration::from_secs(30),
            progress_interval: Some(Duration::from_secs(5)),
            checkpoint_interval: None,
        }
    }
}

/// The run's external dependencies.
#[derive(Clone)]
pub struct Collaborators {
    pub primary: Arc<dyn PrimarySource>,
    pub lookup: Arc<dyn SecondaryLookup>,
    pub classifier: Arc<dyn EligibilityClassifier>,
    pub valuation: Option<Arc<dyn ValuationSource>>,
    pub sink: Arc<dyn ResultSink>,
    pub reporter: Arc<dyn ProgressReporter>,
}

/// What one chunk contributed before its worker moved on or stopped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkStats {
    pub chunk: usize,
    pub contracts: usize,
    pub contracts_processed: usize,
    pub holders: usize,
    pub holders_processed: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub cancelled: bool,
}

#[derive(Debug)]
pub struct RunReport {
    pub snapshot: AggregationSnapshot,
    /// Stats for chunks a worker picked up, sorted by chunk index.
    pub chunks: Vec<ChunkStats>,
    pub workers: usize,
    pub cancelled: bool,
    /// False when the drain timeout elapsed with workers still running.
    pub drained: bool,
    pub checkpoints: usize,
    pub flush: std::result::Result<FlushReceipt, SinkError>,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn flushed(&self) -> bool {
        self.flush.is_ok()
    }
}

pub struct Orchestrator {
    collaborators: Collaborators,
    config: RunConfig,
}

impl Orchestrator {
    pub fn new(collaborators: Collaborators, config: RunConfig) -> Result<Self> {
        if config.chunk_size == 0 {
            return Err(Error::InvalidSetting {
                setting: "chunk_size",
            });
        }
        if config.max_workers == 0 {
            return Err(Error::InvalidSetting {
                setting: "max_workers",
            });
        }
        Ok(Self {
            collaborators,
            config,
        })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Process every contract in `units` until done or `cancel` fires, then
    /// flush whatever was aggregated.
    ///
    /// Only an empty input is an error. Per-contract and per-holder failures
    /// are folded into the counters and reject reasons.
    pub async fn run(&self, units: Vec<String>, cancel: CancellationToken) -> Result<RunReport> {
        if units.is_empty() {
            return Err(Error::EmptyInput);
        }

        let started = Instant::now();
        let total = units.len();
        let chunks = partition(units, self.config.chunk_size);
        let workers = self.config.max_workers.min(chunks.len());
        let state = Arc::new(AggregationState::new(total));
        let reporter = Arc::clone(&self.collaborators.reporter);

        info!(
            contracts = total,
            chunks = chunks.len(),
            workers,
            chunk_size = self.config.chunk_size,
            "harvest started"
        );
        reporter.report(&HarvestEvent::RunStarted {
            units: total,
            chunks: chunks.len(),
            workers,
        });

        let context = Arc::new(WorkerContext {
            collaborators: self.collaborators.clone(),
            state: Arc::clone(&state),
            queue: Mutex::new(chunks.into_iter().enumerate().collect()),
            cancel: cancel.clone(),
        });

        let mut set = JoinSet::new();
        for worker in 0..workers {
            let context = Arc::clone(&context);
            set.spawn(async move { context.run_worker(worker).await });
        }

        let tickers_stop = CancellationToken::new();
        let progress = self.config.progress_interval.map(|interval| {
            spawn_progress_ticker(
                Arc::clone(&state),
                Arc::clone(&reporter),
                interval,
                tickers_stop.clone(),
            )
        });
        let checkpoint = self.config.checkpoint_interval.map(|interval| {
            spawn_checkpoint_ticker(
                Arc::clone(&state),
                Arc::clone(&self.collaborators.sink),
                Arc::clone(&reporter),
                interval,
                tickers_stop.clone(),
            )
        });

        let mut chunk_stats = Vec::new();
        let finished = tokio::select! {
            _ = join_workers(&mut set, &mut chunk_stats) => true,
            _ = cancel.cancelled() => false,
        };

        let drained = if finished {
            true
        } else {
            let snapshot = state.snapshot();
            warn!(
                processed = snapshot.processed_units,
                total = snapshot.total_units,
                drain_timeout_secs = self.config.drain_timeout.as_secs(),
                "cancellation requested, draining workers"
            );
            reporter.report(&HarvestEvent::Cancelled(&snapshot));

            match tokio::time::timeout(
                self.config.drain_timeout,
                join_workers(&mut set, &mut chunk_stats),
            )
            .await
            {
                Ok(()) => true,
                Err(_) => {
                    warn!(
                        still_running = set.len(),
                        "drain timeout elapsed, flushing without waiting for remaining workers"
                    );
                    set.detach_all();
                    false
                }
            }
        };

        tickers_stop.cancel();
        if let Some(handle) = progress {
            let _ = handle.await;
        }
        let checkpoints = match checkpoint {
            Some(handle) => handle.await.unwrap_or(0),
            None => 0,
        };

        // Detached workers may still be appending; the report counts what was flushed.
        let (snapshot, accepted, rejected) = state.checkpoint();
        let flush = self.collaborators.sink.flush(&accepted, &rejected).await;
        match &flush {
            Ok(receipt) => info!(
                accepted = receipt.accepted,
                rejected = receipt.rejected,
                locations = ?receipt.locations,
                "results flushed"
            ),
            Err(err) => error!(error = %err, "final flush failed"),
        }

        chunk_stats.sort_by_key(|stats| stats.chunk);
        let report = RunReport {
            snapshot,
            chunks: chunk_stats,
            workers,
            cancelled: cancel.is_cancelled(),
            drained,
            checkpoints,
            flush,
            elapsed: started.elapsed(),
        };
        reporter.report(&HarvestEvent::Finished(&report));
        Ok(report)
    }
}

async fn join_workers(set: &mut JoinSet<Vec<ChunkStats>>, out: &mut Vec<ChunkStats>) {
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(stats) => out.extend(stats),
            Err(err) => error!(error = %err, "harvest worker terminated abnormally"),
        }
    }
}

fn spawn_progress_ticker(
    state: Arc<AggregationState>,
    reporter: Arc<dyn ProgressReporter>,
    interval: Duration,
    stop: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {
                    reporter.report(&HarvestEvent::Progress(&state.snapshot()));
                }
            }
        }
    })
}

fn spawn_checkpoint_ticker(
    state: Arc<AggregationState>,
    sink: Arc<dyn ResultSink>,
    reporter: Arc<dyn ProgressReporter>,
    interval: Duration,
    stop: CancellationToken,
) -> JoinHandle<usize> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        let mut written = 0;
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {
                    let (snapshot, accepted, rejected) = state.checkpoint();
                    match sink.flush(&accepted, &rejected).await {
                        Ok(receipt) => {
                            written += 1;
                            reporter.report(&HarvestEvent::Checkpoint {
                                receipt: &receipt,
                                snapshot: &snapshot,
                            });
                        }
                        Err(err) => warn!(error = %err, "checkpoint flush failed"),
                    }
                }
            }
        }
        written
    })
}

struct WorkerContext {
    collaborators: Collaborators,
    state: Arc<AggregationState>,
    queue: Mutex<VecDeque<(usize, Vec<String>)>>,
    cancel: CancellationToken,
}

enum HolderOutcome {
    Accepted,
    Rejected,
}

impl WorkerContext {
    async fn run_worker(&self, worker: usize) -> Vec<ChunkStats> {
        let mut done = Vec::new();
        loop {
            if self.cancel.is_cancelled() {
                debug!(worker, "cancelled before taking a chunk");
                break;
            }
            let next = self
                .queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front();
            let Some((chunk, contracts)) = next else {
                break;
            };
            debug!(worker, chunk, contracts = contracts.len(), "chunk taken");
            done.push(self.process_chunk(chunk, contracts).await);
        }
        done
    }

    async fn process_chunk(&self, chunk: usize, contracts: Vec<String>) -> ChunkStats {
        let mut stats = ChunkStats {
            chunk,
            contracts: contracts.len(),
            ..ChunkStats::default()
        };

        for contract in &contracts {
            if self.cancel.is_cancelled() {
                stats.cancelled = true;
                break;
            }
            if !self.process_contract(contract, &mut stats).await {
                stats.cancelled = true;
                break;
            }
        }
        stats
    }

    /// Returns false when cancellation stopped the holder loop.
    async fn process_contract(&self, contract: &str, stats: &mut ChunkStats) -> bool {
        let reporter = &self.collaborators.reporter;
        let outcome = self.collaborators.primary.fetch_holders(contract).await;
        let holders = outcome.items;
        let failed = holders.is_empty() && outcome.exhausted_by.is_degraded();

        self.state.record_primary(holders.len(), failed);
        stats.contracts_processed += 1;
        stats.holders += holders.len();

        if failed {
            metrics::counter!("harvest_units_total", "outcome" => "primary_failed").increment(1);
            warn!(
                contract,
                reason = outcome.exhausted_by.label(),
                "holder fetch yielded nothing, skipping contract"
            );
        }
        if outcome.exhausted_by == ExhaustedBy::ResourcesExhausted {
            reporter.report(&HarvestEvent::ResourcesExhausted {
                contract,
                stage: "primary",
            });
        }
        reporter.report(&HarvestEvent::UnitFetched {
            contract,
            holders: holders.len(),
            exhausted_by: outcome.exhausted_by,
        });

        for holder in holders {
            if self.cancel.is_cancelled() {
                return false;
            }
            match self.process_holder(contract, holder).await {
                HolderOutcome::Accepted => stats.accepted += 1,
                HolderOutcome::Rejected => stats.rejected += 1,
            }
            stats.holders_processed += 1;
        }
        true
    }

    async fn process_holder(&self, contract: &str, holder: Holder) -> HolderOutcome {
        let address = holder.owner;
        let classification = match self.collaborators.lookup.search(&address).await {
            Ok(Some(result)) if !result.posts.is_empty() => {
                self.collaborators.classifier.classify(&result)
            }
            Ok(_) => Classification::Rejected(RejectReason::NoPosts),
            Err(LookupError::ResourcesExhausted) => {
                self.collaborators
                    .reporter
                    .report(&HarvestEvent::ResourcesExhausted {
                        contract,
                        stage: "lookup",
                    });
                Classification::Rejected(RejectReason::ResourcesExhausted)
            }
            Err(LookupError::Failed(detail)) => {
                warn!(contract, address = %address, error = %detail, "holder lookup failed");
                Classification::Rejected(RejectReason::LookupFailed)
            }
        };

        match classification {
            Classification::Accepted(enrichment) => {
                let valuation = self.valuate(&address).await;
                metrics::counter!("harvest_units_total", "outcome" => "accepted").increment(1);
                self.collaborators.reporter.report(&HarvestEvent::Accepted {
                    contract,
                    address: &address,
                    handle: &enrichment.handle,
                });
                self.state.record_accepted(AcceptedRecord {
                    contract: contract.to_string(),
                    address,
                    enrichment,
                    valuation,
                });
                HolderOutcome::Accepted
            }
            Classification::Rejected(reason) => {
                metrics::counter!("harvest_units_total", "outcome" => "rejected").increment(1);
                debug!(contract, address = %address, reason = reason.label(), "holder rejected");
                self.state.record_rejected(RejectedRecord {
                    contract: contract.to_string(),
                    address,
                    reason,
                });
                HolderOutcome::Rejected
            }
        }
    }

    async fn valuate(&self, address: &str) -> Valuation {
        let Some(source) = &self.collaborators.valuation else {
            return Valuation::new();
        };
        match source.valuate(address).await {
            Ok(valuation) => valuation,
            Err(err) => {
                warn!(address, error = %err, "valuation failed, continuing without it");
                Valuation::new()
            }
        }
    }
}
