//! Page-fetch strategy supplied by each upstream integration

use common::BoxFuture;

use crate::cursor::PageCursor;

/// One decoded page.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Total item count advertised by the upstream, if any.
    pub total_hint: Option<u64>,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items,
            total_hint: None,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn with_total_hint(mut self, total: Option<u64>) -> Self {
        self.total_hint = total;
        self
    }
}

/// Why a single page request failed. Both variants are retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PageError {
    /// Network, timeout, or non-2xx status: upstream load.
    #[error("transient upstream error: {0}")]
    Transient(String),

    /// Body did not match the expected schema: upstream contract drift.
    #[error("malformed upstream response: {0}")]
    Malformed(String),
}

impl PageError {
    /// Label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            PageError::Transient(_) => "transient",
            PageError::Malformed(_) => "malformed",
        }
    }
}

/// Fetches one page of an upstream using a pooled resource `R`.
///
/// Implementations own URL construction and response decoding; the fetcher
/// owns cursors, retries, delays and resource bookkeeping.
pub trait PageSource<R>: Send + Sync {
    /// What is being paged through (e.g. a contract identifier).
    type Query: ?Sized + Sync;
    type Item: Send;

    fn fetch_page<'a>(
        &'a self,
        resource: &'a R,
        query: &'a Self::Query,
        cursor: PageCursor,
    ) -> BoxFuture<'a, Result<Page<Self::Item>, PageError>>;
}
