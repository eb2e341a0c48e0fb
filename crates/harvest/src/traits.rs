//! Collaborator seams consumed by the orchestrator
//!
//! Boxed-future return types keep every trait dyn-compatible so the binary
//! can wire concrete HTTP implementations and tests can wire stubs.

use common::BoxFuture;
use pagination::{FetchOutcome, PageSource, PaginatedFetcher};

use crate::records::{AcceptedRecord, Classification, Holder, RejectedRecord, SearchResult, Valuation};

/// Pages through the holders of one contract.
pub trait PrimarySource: Send + Sync {
    fn fetch_holders<'a>(&'a self, contract: &'a str) -> BoxFuture<'a, FetchOutcome<Holder>>;
}

impl<R, S> PrimarySource for PaginatedFetcher<R, S>
where
    R: Send + Sync + 'static,
    S: PageSource<R, Query = str, Item = Holder>,
{
    fn fetch_holders<'a>(&'a self, contract: &'a str) -> BoxFuture<'a, FetchOutcome<Holder>> {
        Box::pin(self.fetch(contract))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    #[error("no resource available for lookup")]
    ResourcesExhausted,

    #[error("lookup failed: {0}")]
    Failed(String),
}

/// Searches posts mentioning a holder address. `Ok(None)` means nothing found.
pub trait SecondaryLookup: Send + Sync {
    fn search<'a>(
        &'a self,
        address: &'a str,
    ) -> BoxFuture<'a, Result<Option<SearchResult>, LookupError>>;
}

/// Pure decision over a lookup result.
pub trait EligibilityClassifier: Send + Sync {
    fn classify(&self, result: &SearchResult) -> Classification;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("valuation failed: {0}")]
pub struct ValuationError(pub String);

/// Optional enrichment of accepted holders.
pub trait ValuationSource: Send + Sync {
    fn valuate<'a>(&'a self, address: &'a str) -> BoxFuture<'a, Result<Valuation, ValuationError>>;
}

/// Where a flush landed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FlushReceipt {
    pub locations: Vec<String>,
    pub accepted: usize,
    pub rejected: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("flush failed: {0}")]
pub struct SinkError(pub String);

/// Persists result partitions. Every call must produce new artifacts; earlier
/// flushes are never modified.
pub trait ResultSink: Send + Sync {
    fn flush<'a>(
        &'a self,
        accepted: &'a [AcceptedRecord],
        rejected: &'a [RejectedRecord],
    ) -> BoxFuture<'a, Result<FlushReceipt, SinkError>>;
}
