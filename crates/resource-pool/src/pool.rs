//! Pool state machine and round-robin resource selection
//!
//! The pool owns every `ResourceRecord`; callers only ever see a `Lease`
//! (id + shared payload). All counters and the round-robin index live behind
//! one async mutex, so `acquire` and `report_error` are atomic with respect to
//! each other. A record that reaches its cap is reset and parked in `Probing`
//! under the lock; the probe itself runs unlocked and its verdict is applied
//! after re-locking. No caller can pick a record whose usage count is mid-reset.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::probe::HealthProbe;

/// Stable position of a resource inside its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(usize);

impl ResourceId {
    pub fn from_index(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Runtime status of a pooled resource.
///
/// Transitions:
/// - Active → Probing (cap reached, usage reset, liveness probe in flight)
/// - Probing → Active (probe passed)
/// - Probing → Unhealthy (probe failed)
/// - Active → Disabled (error threshold reached)
/// - Unhealthy → Active (background re-check probe passed)
/// - Probing / Unhealthy → Disabled (error threshold reached)
/// - Disabled → (terminal for the run)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceStatus {
    Active,
    Probing { since: Instant },
    Unhealthy { since: Instant },
    Disabled,
}

impl ResourceStatus {
    /// Status label for health/logging.
    pub fn label(&self) -> &'static str {
        match self {
            ResourceStatus::Active => "active",
            ResourceStatus::Probing { .. } => "probing",
            ResourceStatus::Unhealthy { .. } => "unhealthy",
            ResourceStatus::Disabled => "disabled",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, ResourceStatus::Active)
    }
}

/// Per-pool limits.
#[derive(Debug, Clone, Copy)]
pub struct PoolSettings {
    /// Requests served by one resource before its usage count resets and the
    /// liveness probe re-evaluates it.
    pub request_cap: u32,
    /// Reported errors after which a resource is disabled for the run.
    pub error_threshold: u32,
}

struct ResourceRecord<P> {
    payload: Arc<P>,
    usage_count: u32,
    last_used_at: Option<Instant>,
    status: ResourceStatus,
    error_count: u32,
}

struct PoolState<P> {
    records: Vec<ResourceRecord<P>>,
    next_index: usize,
}

/// A resource handed out by `acquire`.
///
/// Holding a lease does not reserve the resource; it identifies which record
/// to blame in `report_error`.
pub struct Lease<P> {
    id: ResourceId,
    payload: Arc<P>,
}

impl<P> Lease<P> {
    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }
}

impl<P> Clone for Lease<P> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            payload: Arc::clone(&self.payload),
        }
    }
}

impl<P: fmt::Debug> fmt::Debug for Lease<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("id", &self.id)
            .field("payload", &self.payload)
            .finish()
    }
}

/// Point-in-time copy of one record's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceSnapshot {
    pub id: ResourceId,
    pub status: ResourceStatus,
    pub usage_count: u32,
    pub error_count: u32,
    pub last_used_at: Option<Instant>,
}

/// Pool health summary for end-of-run reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolHealth {
    pub total: usize,
    pub active: usize,
    pub probing: usize,
    pub unhealthy: usize,
    pub disabled: usize,
}

impl PoolHealth {
    /// all active → healthy, some active → degraded, none active → unhealthy.
    pub fn status_label(&self) -> &'static str {
        if self.total > 0 && self.active == self.total {
            "healthy"
        } else if self.active > 0 {
            "degraded"
        } else {
            "unhealthy"
        }
    }
}

/// Round-robin pool over a fixed set of resources.
pub struct RotatingPool<P> {
    name: String,
    settings: PoolSettings,
    state: Mutex<PoolState<P>>,
    probe: Arc<dyn HealthProbe<P>>,
}

impl<P: Send + Sync + 'static> RotatingPool<P> {
    /// Build a pool over `payloads`. Every resource starts `Active`.
    ///
    /// An empty payload list is a configuration error: a run cannot make a
    /// single request without at least one resource.
    pub fn new(
        name: impl Into<String>,
        payloads: Vec<P>,
        settings: PoolSettings,
        probe: Arc<dyn HealthProbe<P>>,
    ) -> Result<Self> {
        let name = name.into();
        if payloads.is_empty() {
            return Err(Error::Empty(name));
        }
        if settings.request_cap == 0 {
            return Err(Error::InvalidSetting {
                pool: name,
                setting: "request_cap",
            });
        }
        if settings.error_threshold == 0 {
            return Err(Error::InvalidSetting {
                pool: name,
                setting: "error_threshold",
            });
        }

        let records: Vec<ResourceRecord<P>> = payloads
            .into_iter()
            .map(|payload| ResourceRecord {
                payload: Arc::new(payload),
                usage_count: 0,
                last_used_at: None,
                status: ResourceStatus::Active,
                error_count: 0,
            })
            .collect();
        info!(
            pool = %name,
            resources = records.len(),
            request_cap = settings.request_cap,
            error_threshold = settings.error_threshold,
            "pool initialized"
        );
        Ok(Self {
            name,
            settings,
            state: Mutex::new(PoolState {
                records,
                next_index: 0,
            }),
            probe,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> PoolSettings {
        self.settings
    }

    /// Hand out the next active resource in round-robin order.
    ///
    /// Scans at most once around the full set starting at the shared index.
    /// A candidate whose usage count has reached the cap is reset to zero and
    /// probed before being returned; a failed probe marks it `Unhealthy` and
    /// the scan moves on. Returns `None` when no resource can serve a request
    /// right now.
    ///
    /// The pool lock is released while a probe runs; other callers skip the
    /// `Probing` record meanwhile. If this future is dropped mid-probe the
    /// record stays `Probing` until the background re-check settles it.
    pub async fn acquire(&self) -> Option<Lease<P>> {
        let mut state = self.state.lock().await;
        let n = state.records.len();
        let mut idx = state.next_index % n;

        for _ in 0..n {
            let current = idx;
            idx = (idx + 1) % n;

            if !state.records[current].status.is_active() {
                continue;
            }

            if state.records[current].usage_count >= self.settings.request_cap {
                let record = &mut state.records[current];
                record.usage_count = 0;
                record.status = ResourceStatus::Probing {
                    since: Instant::now(),
                };
                let payload = Arc::clone(&record.payload);
                drop(state);

                let healthy = self.probe.check(&payload).await;

                state = self.state.lock().await;
                if !self.settle_probe(&mut state, ResourceId(current), healthy) {
                    continue;
                }
            }

            let record = &mut state.records[current];
            record.usage_count += 1;
            record.last_used_at = Some(Instant::now());
            let payload = Arc::clone(&record.payload);
            state.next_index = (current + 1) % n;

            metrics::counter!("pool_acquire_total", "pool" => self.name.clone(), "outcome" => "granted")
                .increment(1);
            return Some(Lease {
                id: ResourceId(current),
                payload,
            });
        }

        metrics::counter!("pool_acquire_total", "pool" => self.name.clone(), "outcome" => "none_available")
            .increment(1);
        warn!(pool = %self.name, resources = n, "no active resource available");
        None
    }

    /// Apply a cap-probe verdict. Returns true if the record is back in
    /// rotation and may be handed out.
    ///
    /// A record that left `Probing` while unlocked (disabled by error reports,
    /// or settled by the re-check task) keeps its current status.
    fn settle_probe(&self, state: &mut PoolState<P>, id: ResourceId, healthy: bool) -> bool {
        let record = &mut state.records[id.0];
        if !matches!(record.status, ResourceStatus::Probing { .. }) {
            return record.status.is_active();
        }

        if healthy {
            record.status = ResourceStatus::Active;
            debug!(
                pool = %self.name,
                resource_id = %id,
                "request cap reached, probe passed, usage reset"
            );
            return true;
        }

        record.status = ResourceStatus::Unhealthy {
            since: Instant::now(),
        };
        metrics::counter!(
            "pool_resources_deactivated_total",
            "pool" => self.name.clone(),
            "cause" => "probe"
        )
        .increment(1);
        warn!(
            pool = %self.name,
            resource_id = %id,
            "request cap reached and liveness probe failed, resource unhealthy"
        );
        false
    }

    /// Record a failed request made with the given resource.
    ///
    /// Once the error count reaches the threshold the resource is disabled for
    /// the rest of the run. Neither the cap probe nor the background re-check
    /// ever revives a disabled resource.
    pub async fn report_error(&self, id: ResourceId) {
        let mut state = self.state.lock().await;
        let Some(record) = state.records.get_mut(id.0) else {
            debug!(pool = %self.name, resource_id = %id, "error reported for unknown resource");
            return;
        };

        record.error_count += 1;
        metrics::counter!("pool_resource_errors_total", "pool" => self.name.clone()).increment(1);

        if record.error_count >= self.settings.error_threshold
            && record.status != ResourceStatus::Disabled
        {
            record.status = ResourceStatus::Disabled;
            metrics::counter!(
                "pool_resources_deactivated_total",
                "pool" => self.name.clone(),
                "cause" => "errors"
            )
            .increment(1);
            warn!(
                pool = %self.name,
                resource_id = %id,
                errors = record.error_count,
                "error threshold reached, resource disabled for this run"
            );
        } else {
            debug!(
                pool = %self.name,
                resource_id = %id,
                errors = record.error_count,
                "resource error recorded"
            );
        }
    }

    /// Counts by status.
    pub async fn health(&self) -> PoolHealth {
        let state = self.state.lock().await;
        let mut health = PoolHealth {
            total: state.records.len(),
            ..PoolHealth::default()
        };
        for record in &state.records {
            match record.status {
                ResourceStatus::Active => health.active += 1,
                ResourceStatus::Probing { .. } => health.probing += 1,
                ResourceStatus::Unhealthy { .. } => health.unhealthy += 1,
                ResourceStatus::Disabled => health.disabled += 1,
            }
        }
        health
    }

    /// Copy of one record's counters, or `None` for an unknown id.
    pub async fn snapshot(&self, id: ResourceId) -> Option<ResourceSnapshot> {
        let state = self.state.lock().await;
        state.records.get(id.0).map(|record| ResourceSnapshot {
            id,
            status: record.status,
            usage_count: record.usage_count,
            error_count: record.error_count,
            last_used_at: record.last_used_at,
        })
    }

    pub(crate) fn probe(&self) -> &Arc<dyn HealthProbe<P>> {
        &self.probe
    }

    /// Resources currently awaiting re-admission. A `Probing` record whose
    /// probe has outlived `stale_after` is included: its acquire was dropped.
    pub(crate) async fn unhealthy(&self, stale_after: Duration) -> Vec<(ResourceId, Arc<P>)> {
        let state = self.state.lock().await;
        state
            .records
            .iter()
            .enumerate()
            .filter(|(_, record)| match record.status {
                ResourceStatus::Unhealthy { .. } => true,
                ResourceStatus::Probing { since } => since.elapsed() >= stale_after,
                _ => false,
            })
            .map(|(idx, record)| (ResourceId(idx), Arc::clone(&record.payload)))
            .collect()
    }

    /// Return an `Unhealthy` (or stale `Probing`) resource to rotation with a
    /// fresh usage cycle.
    ///
    /// No-op (returns false) if the record changed status while it was being
    /// probed, e.g. it was disabled by concurrent error reports.
    pub(crate) async fn readmit(&self, id: ResourceId) -> bool {
        let mut state = self.state.lock().await;
        let Some(record) = state.records.get_mut(id.0) else {
            return false;
        };
        if !matches!(
            record.status,
            ResourceStatus::Unhealthy { .. } | ResourceStatus::Probing { .. }
        ) {
            return false;
        }
        record.status = ResourceStatus::Active;
        record.usage_count = 0;
        info!(pool = %self.name, resource_id = %id, "resource healthy again, re-admitted");
        true
    }
}
