//! CSV result files
//!
//! Each flush writes one `eligible_*` and one `not_eligible_*` file named
//! `<kind>_<started>_<run>_<seq>.csv`. Files are written under a temporary
//! name and renamed into place, so a reader never sees a partial file.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use common::BoxFuture;
use harvest::{AcceptedRecord, FlushReceipt, RejectedRecord, ResultSink, SinkError};
use serde::Serialize;
use tracing::debug;

const ELIGIBLE_HEADER: [&str; 7] = [
    "address",
    "contract",
    "handle",
    "post_text",
    "can_dm",
    "followers",
    "usd_total",
];
const NOT_ELIGIBLE_HEADER: [&str; 3] = ["address", "contract", "reason"];

#[derive(Serialize)]
struct EligibleRow {
    address: String,
    contract: String,
    handle: String,
    post_text: String,
    can_dm: bool,
    followers: u64,
    usd_total: String,
}

impl From<&AcceptedRecord> for EligibleRow {
    fn from(record: &AcceptedRecord) -> Self {
        Self {
            address: record.address.clone(),
            contract: record.contract.clone(),
            handle: record.enrichment.handle.clone(),
            post_text: record.enrichment.post_text.clone(),
            can_dm: record.enrichment.can_dm,
            followers: record.enrichment.followers,
            usd_total: format!("{:.2}", record.usd_total()),
        }
    }
}

#[derive(Serialize)]
struct NotEligibleRow {
    address: String,
    contract: String,
    reason: &'static str,
}

impl From<&RejectedRecord> for NotEligibleRow {
    fn from(record: &RejectedRecord) -> Self {
        Self {
            address: record.address.clone(),
            contract: record.contract.clone(),
            reason: record.reason.label(),
        }
    }
}

pub struct CsvSink {
    dir: PathBuf,
    started: String,
    run_id: String,
    seq: AtomicU64,
}

impl CsvSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let run_id = uuid::Uuid::new_v4().as_simple().to_string();
        Self {
            dir: dir.into(),
            started: chrono::Utc::now().format("%Y%m%dT%H%M%SZ").to_string(),
            run_id: run_id[..8].to_string(),
            seq: AtomicU64::new(0),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    fn file_name(&self, kind: &str, seq: u64) -> String {
        format!("{kind}_{}_{}_{seq:03}.csv", self.started, self.run_id)
    }
}

fn write_csv<R: Serialize>(path: &Path, header: &[&str], rows: &[R]) -> Result<(), SinkError> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));
    let fail = |e: &dyn std::fmt::Display| SinkError(format!("{}: {e}", path.display()));

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(&tmp)
        .map_err(|e| fail(&e))?;
    writer.write_record(header).map_err(|e| fail(&e))?;
    for row in rows {
        writer.serialize(row).map_err(|e| fail(&e))?;
    }
    writer.flush().map_err(|e| fail(&e))?;
    drop(writer);

    std::fs::rename(&tmp, path).map_err(|e| fail(&e))
}

impl ResultSink for CsvSink {
    fn flush<'a>(
        &'a self,
        accepted: &'a [AcceptedRecord],
        rejected: &'a [RejectedRecord],
    ) -> BoxFuture<'a, Result<FlushReceipt, SinkError>> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let eligible_path = self.dir.join(self.file_name("eligible", seq));
        let not_eligible_path = self.dir.join(self.file_name("not_eligible", seq));
        let eligible: Vec<EligibleRow> = accepted.iter().map(EligibleRow::from).collect();
        let not_eligible: Vec<NotEligibleRow> = rejected.iter().map(NotEligibleRow::from).collect();
        let dir = self.dir.clone();

        Box::pin(async move {
            let receipt = FlushReceipt {
                locations: vec![
                    eligible_path.display().to_string(),
                    not_eligible_path.display().to_string(),
                ],
                accepted: eligible.len(),
                rejected: not_eligible.len(),
            };

            tokio::task::spawn_blocking(move || {
                std::fs::create_dir_all(&dir)
                    .map_err(|e| SinkError(format!("{}: {e}", dir.display())))?;
                write_csv(&eligible_path, &ELIGIBLE_HEADER, &eligible)?;
                write_csv(&not_eligible_path, &NOT_ELIGIBLE_HEADER, &not_eligible)
            })
            .await
            .map_err(|e| SinkError(format!("CSV writer task failed: {e}")))??;

            debug!(
                seq,
                accepted = receipt.accepted,
                rejected = receipt.rejected,
                "results flushed"
            );
            Ok(receipt)
        })
    }
}
