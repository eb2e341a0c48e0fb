//! Shared aggregation state for one run
//!
//! A single `std::sync::Mutex` guards counters and both result partitions.
//! Every mutation is one short critical section with no await inside, so a
//! snapshot taken at any moment satisfies
//! `accepted + rejected == processed_units <= total_units`.
//!
//! Poisoning is recovered rather than propagated: aggregated results must
//! still reach the sink if a worker panics.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::records::{AcceptedRecord, RejectedRecord};

/// Counter values at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AggregationSnapshot {
    /// Contracts in the input.
    pub primary_total: usize,
    /// Contracts whose holder fetch returned.
    pub primary_processed: usize,
    /// Contracts whose fetch degraded before yielding any holder.
    pub primary_failed: usize,
    /// Holders discovered so far.
    pub total_units: usize,
    /// Holders classified so far.
    pub processed_units: usize,
    pub accepted: usize,
    pub rejected: usize,
}

impl AggregationSnapshot {
    /// Share of discovered holders already classified, 0..=100.
    pub fn progress_percent(&self) -> f64 {
        percent(self.processed_units, self.total_units)
    }

    /// Share of contracts already fetched, 0..=100.
    pub fn primary_percent(&self) -> f64 {
        percent(self.primary_processed, self.primary_total)
    }
}

fn percent(done: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        done as f64 / total as f64 * 100.0
    }
}

#[derive(Default)]
struct Inner {
    counters: AggregationSnapshot,
    accepted: Vec<AcceptedRecord>,
    rejected: Vec<RejectedRecord>,
}

pub struct AggregationState {
    inner: Mutex<Inner>,
}

impl AggregationState {
    pub fn new(primary_total: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                counters: AggregationSnapshot {
                    primary_total,
                    ..AggregationSnapshot::default()
                },
                ..Inner::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> AggregationSnapshot {
        self.lock().counters
    }

    /// Copies of both partitions, in append order.
    pub fn results(&self) -> (Vec<AcceptedRecord>, Vec<RejectedRecord>) {
        let inner = self.lock();
        (inner.accepted.clone(), inner.rejected.clone())
    }

    /// Counters and both partitions read under one lock, so the counts match
    /// the records exactly.
    pub fn checkpoint(&self) -> (AggregationSnapshot, Vec<AcceptedRecord>, Vec<RejectedRecord>) {
        let inner = self.lock();
        (inner.counters, inner.accepted.clone(), inner.rejected.clone())
    }

    /// A contract's fetch returned `holders` secondary units.
    pub fn record_primary(&self, holders: usize, failed: bool) -> AggregationSnapshot {
        let mut inner = self.lock();
        inner.counters.primary_processed += 1;
        if failed {
            inner.counters.primary_failed += 1;
        }
        inner.counters.total_units += holders;
        inner.counters
    }

    pub fn record_accepted(&self, record: AcceptedRecord) -> AggregationSnapshot {
        let mut inner = self.lock();
        inner.accepted.push(record);
        inner.counters.accepted += 1;
        inner.counters.processed_units += 1;
        inner.counters
    }

    pub fn record_rejected(&self, record: RejectedRecord) -> AggregationSnapshot {
        let mut inner = self.lock();
        inner.rejected.push(record);
        inner.counters.rejected += 1;
        inner.counters.processed_units += 1;
        inner.counters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{Enrichment, RejectReason, Valuation};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn accepted(address: String) -> AcceptedRecord {
        AcceptedRecord {
            contract: "mint".into(),
            address,
            enrichment: Enrichment {
                handle: "h".into(),
                post_text: "t".into(),
                can_dm: true,
                followers: 1,
            },
            valuation: Valuation::new(),
        }
    }

    fn rejected(address: String) -> RejectedRecord {
        RejectedRecord {
            contract: "mint".into(),
            address,
            reason: RejectReason::NoPosts,
        }
    }

    fn assert_consistent(snap: &AggregationSnapshot) {
        assert_eq!(snap.accepted + snap.rejected, snap.processed_units, "{snap:?}");
        assert!(snap.processed_units <= snap.total_units, "{snap:?}");
    }

    #[test]
    fn percentages_handle_empty_totals() {
        let state = AggregationState::new(0);
        let snap = state.snapshot();
        assert_eq!(snap.progress_percent(), 0.0);
        assert_eq!(snap.primary_percent(), 0.0);

        let state = AggregationState::new(4);
        state.record_primary(2, false);
        let snap = state.record_rejected(rejected("a".into()));
        assert_eq!(snap.primary_percent(), 25.0);
        assert_eq!(snap.progress_percent(), 50.0);
    }

    #[test]
    fn failed_primary_counts_separately() {
        let state = AggregationState::new(2);
        state.record_primary(0, true);
        let snap = state.record_primary(3, false);
        assert_eq!(snap.primary_processed, 2);
        assert_eq!(snap.primary_failed, 1);
        assert_eq!(snap.total_units, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_updates_are_never_lost() {
        const WORKERS: usize = 8;
        const CONTRACTS_PER_WORKER: usize = 25;
        const HOLDERS_PER_CONTRACT: usize = 4;

        let state = Arc::new(AggregationState::new(WORKERS * CONTRACTS_PER_WORKER));
        let done = Arc::new(AtomicBool::new(false));

        let observer = {
            let state = Arc::clone(&state);
            let done = Arc::clone(&done);
            tokio::spawn(async move {
                let mut observed = 0usize;
                while !done.load(Ordering::SeqCst) {
                    assert_consistent(&state.snapshot());
                    observed += 1;
                    tokio::task::yield_now().await;
                }
                observed
            })
        };

        let mut workers = Vec::new();
        for worker in 0..WORKERS {
            let state = Arc::clone(&state);
            workers.push(tokio::spawn(async move {
                for contract in 0..CONTRACTS_PER_WORKER {
                    state.record_primary(HOLDERS_PER_CONTRACT, false);
                    for holder in 0..HOLDERS_PER_CONTRACT {
                        let address = format!("{worker}-{contract}-{holder}");
                        let snap = if holder % 2 == 0 {
                            state.record_accepted(accepted(address))
                        } else {
                            state.record_rejected(rejected(address))
                        };
                        assert_consistent(&snap);
                        tokio::task::yield_now().await;
                    }
                }
            }));
        }
        for worker in workers {
            worker.await.unwrap();
        }
        done.store(true, Ordering::SeqCst);
        observer.await.unwrap();

        let expected = WORKERS * CONTRACTS_PER_WORKER * HOLDERS_PER_CONTRACT;
        let snap = state.snapshot();
        assert_eq!(snap.total_units, expected);
        assert_eq!(snap.processed_units, expected);
        assert_eq!(snap.accepted, expected / 2);
        assert_eq!(snap.rejected, expected / 2);
        assert_eq!(snap.primary_processed, WORKERS * CONTRACTS_PER_WORKER);

        let (accepted, rejected) = state.results();
        assert_eq!(accepted.len() + rejected.len(), expected);
    }

    #[test]
    fn poisoned_lock_keeps_results() {
        let state = Arc::new(AggregationState::new(1));
        state.record_primary(1, false);
        state.record_accepted(accepted("kept".into()));

        let poisoner = Arc::clone(&state);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.inner.lock().unwrap();
            panic!("worker panicked while holding the lock");
        })
        .join();

        assert!(state.inner.is_poisoned());
        let (accepted, _) = state.results();
        assert_eq!(accepted[0].address, "kept");

        let (snap, accepted, rejected) = state.checkpoint();
        assert_eq!(snap.accepted, accepted.len());
        assert_eq!(snap.rejected, rejected.len());
    }
}
