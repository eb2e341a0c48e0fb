//! Concurrent holder harvest
//!
//! The `Orchestrator` splits a list of contract identifiers into ordered
//! chunks and lets a bounded set of workers pull chunks from a shared queue.
//! For every contract a worker pages through its holders (`PrimarySource`),
//! then looks each holder up (`SecondaryLookup`), classifies the result
//! (`EligibilityClassifier`) and optionally values accepted wallets
//! (`ValuationSource`). Every completed holder lands in `AggregationState`
//! together with its counter update, under one lock that is never held
//! across an await.
//!
//! Cancellation is cooperative: workers stop between units, the orchestrator
//! waits a bounded time for them, then hands whatever was aggregated to the
//! `ResultSink`.

pub mod error;
pub mod orchestrator;
pub mod progress;
pub mod records;
pub mod state;
pub mod traits;

pub use error::{Error, Result};
pub use orchestrator::{ChunkStats, Collaborators, Orchestrator, RunConfig, RunReport, partition};
pub use progress::{HarvestEvent, ProgressReporter, SilentReporter};
pub use records::{
    AcceptedRecord, Author, Classification, Completeness, Enrichment, Holder, Post, RejectReason,
    RejectedRecord, SearchResult, Valuation,
};
pub use state::{AggregationSnapshot, AggregationState};
pub use traits::{
    EligibilityClassifier, FlushReceipt, LookupError, PrimarySource, ResultSink, SecondaryLookup,
    SinkError, ValuationError, ValuationSource,
};
