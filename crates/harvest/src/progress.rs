//! Progress events emitted during a run

use pagination::ExhaustedBy;

use crate::orchestrator::RunReport;
use crate::state::AggregationSnapshot;
use crate::traits::FlushReceipt;

#[derive(Debug)]
pub enum HarvestEvent<'a> {
    RunStarted {
        units: usize,
        chunks: usize,
        workers: usize,
    },
    UnitFetched {
        contract: &'a str,
        holders: usize,
        exhausted_by: ExhaustedBy,
    },
    Accepted {
        contract: &'a str,
        address: &'a str,
        handle: &'a str,
    },
    Progress(&'a AggregationSnapshot),
    /// A pool had nothing to lend. `stage` is `primary` or `lookup`.
    ResourcesExhausted {
        contract: &'a str,
        stage: &'static str,
    },
    Checkpoint {
        receipt: &'a FlushReceipt,
        snapshot: &'a AggregationSnapshot,
    },
    Cancelled(&'a AggregationSnapshot),
    Finished(&'a RunReport),
}

/// Receives run events. Implementations must not block.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: &HarvestEvent<'_>);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {
    fn report(&self, _event: &HarvestEvent<'_>) {}
}
