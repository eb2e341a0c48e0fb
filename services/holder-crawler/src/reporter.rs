//! Progress events as structured log lines

use harvest::{HarvestEvent, ProgressReporter};
use tracing::{info, warn};

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ProgressReporter for TracingReporter {
    fn report(&self, event: &HarvestEvent<'_>) {
        match event {
            HarvestEvent::RunStarted {
                units,
                chunks,
                workers,
            } => info!(units, chunks, workers, "run started"),
            HarvestEvent::UnitFetched {
                contract,
                holders,
                exhausted_by,
            } => info!(
                unit = %contract,
                holders,
                reason = exhausted_by.label(),
                "holders fetched"
            ),
            HarvestEvent::Accepted {
                contract,
                address,
                handle,
            } => info!(unit = %contract, address = %address, handle = %handle, "eligible holder"),
            HarvestEvent::Progress(snapshot) => info!(
                contracts = format_args!("{}/{}", snapshot.primary_processed, snapshot.primary_total),
                holders = format_args!("{}/{}", snapshot.processed_units, snapshot.total_units),
                percent = format_args!("{:.1}", snapshot.progress_percent()),
                accepted = snapshot.accepted,
                rejected = snapshot.rejected,
                "progress"
            ),
            HarvestEvent::ResourcesExhausted { contract, stage } => {
                warn!(unit = %contract, stage, "no resource available")
            }
            HarvestEvent::Checkpoint { receipt, snapshot } => info!(
                files = ?receipt.locations,
                accepted = snapshot.accepted,
                rejected = snapshot.rejected,
                "checkpoint written"
            ),
            HarvestEvent::Cancelled(snapshot) => warn!(
                processed = snapshot.processed_units,
                total = snapshot.total_units,
                "run cancelled, draining workers"
            ),
            HarvestEvent::Finished(report) => info!(
                contracts = report.snapshot.primary_processed,
                contracts_failed = report.snapshot.primary_failed,
                holders = report.snapshot.processed_units,
                accepted = report.snapshot.accepted,
                rejected = report.snapshot.rejected,
                cancelled = report.cancelled,
                elapsed_secs = report.elapsed.as_secs(),
                "run finished"
            ),
        }
    }
}
