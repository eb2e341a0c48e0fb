//! Paginated fetch state machine
//!
//! Per fetch call:
//!
//! ```text
//! FETCHING --page ok, items--> FETCHING(next page) | DONE(NaturalEnd / MaxPageReached)
//! FETCHING --page ok, empty--> DONE(EmptyPage)
//! FETCHING --no resource-----> DONE(ResourcesExhausted)
//! FETCHING --page error------> RETRY_BACKOFF --> FETCHING(same page) | DONE(RetryExhausted)
//! ```
//!
//! Every exit carries the items accumulated so far.

use std::sync::Arc;
use std::time::Duration;

use resource_pool::RotatingPool;
use tracing::{debug, info, warn};

use crate::cursor::PageCursor;
use crate::retry::RetryPolicy;
use crate::source::{Page, PageError, PageSource};

/// Why a fetch stopped. Never an error: the items gathered are still valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExhaustedBy {
    /// Accumulated count reached the upstream's advertised total.
    NaturalEnd,
    /// Upstream returned a page with zero items (its end-of-data signal).
    EmptyPage,
    /// Hard page ceiling reached.
    MaxPageReached,
    /// The resource pool had nothing active to lend.
    ResourcesExhausted,
    /// One page failed on every attempt of the retry budget.
    RetryExhausted,
}

impl ExhaustedBy {
    pub fn label(&self) -> &'static str {
        match self {
            ExhaustedBy::NaturalEnd => "natural_end",
            ExhaustedBy::EmptyPage => "empty_page",
            ExhaustedBy::MaxPageReached => "max_page_reached",
            ExhaustedBy::ResourcesExhausted => "resources_exhausted",
            ExhaustedBy::RetryExhausted => "retry_exhausted",
        }
    }

    /// True when the fetch stopped before the upstream ran out of data.
    pub fn is_degraded(&self) -> bool {
        matches!(
            self,
            ExhaustedBy::ResourcesExhausted | ExhaustedBy::RetryExhausted
        )
    }
}

/// Items gathered by one fetch call and why it stopped.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome<T> {
    pub items: Vec<T>,
    pub exhausted_by: ExhaustedBy,
    /// First total hint the upstream reported, if any.
    pub total_hint: Option<u64>,
    /// Non-empty pages accumulated.
    pub pages: u32,
    /// Page requests issued, retries included.
    pub requests: u32,
}

/// Limits for one fetch call.
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    pub page_size: u32,
    pub max_page: u32,
    pub retry: RetryPolicy,
    /// Paid once after every accumulated page, outside the retry budget.
    pub inter_page_delay: Duration,
}

enum PageAttempt<T> {
    Page(Page<T>),
    NoResource,
    RetryExhausted,
}

/// Drives a `PageSource` through a `RotatingPool` under a `FetchPolicy`.
pub struct PaginatedFetcher<R, S> {
    pool: Arc<RotatingPool<R>>,
    source: S,
    policy: FetchPolicy,
}

impl<R, S> PaginatedFetcher<R, S>
where
    R: Send + Sync + 'static,
    S: PageSource<R>,
{
    pub fn new(pool: Arc<RotatingPool<R>>, source: S, policy: FetchPolicy) -> Self {
        Self {
            pool,
            source,
            policy,
        }
    }

    pub fn pool(&self) -> &Arc<RotatingPool<R>> {
        &self.pool
    }

    pub fn policy(&self) -> &FetchPolicy {
        &self.policy
    }

    /// Page through `query` until the upstream, the page ceiling, the pool or
    /// the retry budget stops the loop.
    pub async fn fetch(&self, query: &S::Query) -> FetchOutcome<S::Item> {
        let mut cursor = PageCursor::new(self.policy.page_size, self.policy.max_page);
        let mut items: Vec<S::Item> = Vec::new();
        let mut total_hint = None;
        let mut pages = 0u32;
        let mut requests = 0u32;

        let exhausted_by = loop {
            if cursor.is_exhausted() {
                break ExhaustedBy::MaxPageReached;
            }

            match self.fetch_page(query, cursor, &mut requests).await {
                PageAttempt::NoResource => break ExhaustedBy::ResourcesExhausted,
                PageAttempt::RetryExhausted => break ExhaustedBy::RetryExhausted,
                PageAttempt::Page(page) => {
                    if total_hint.is_none() {
                        total_hint = page.total_hint;
                    }
                    if page.items.is_empty() {
                        break ExhaustedBy::EmptyPage;
                    }

                    let received = page.items.len();
                    items.extend(page.items);
                    pages += 1;
                    cursor.advance();
                    debug!(
                        pool = self.pool.name(),
                        page = pages,
                        received,
                        accumulated = items.len(),
                        total_hint,
                        "page accumulated"
                    );

                    tokio::time::sleep(self.policy.inter_page_delay).await;

                    if let Some(total) = total_hint {
                        if items.len() as u64 >= total {
                            break ExhaustedBy::NaturalEnd;
                        }
                    }
                }
            }
        };

        metrics::counter!("fetch_outcomes_total", "reason" => exhausted_by.label()).increment(1);
        if exhausted_by.is_degraded() {
            warn!(
                pool = self.pool.name(),
                reason = exhausted_by.label(),
                items = items.len(),
                pages,
                requests,
                "fetch ended early, returning partial result"
            );
        } else {
            info!(
                pool = self.pool.name(),
                reason = exhausted_by.label(),
                items = items.len(),
                pages,
                requests,
                "fetch complete"
            );
        }

        FetchOutcome {
            items,
            exhausted_by,
            total_hint,
            pages,
            requests,
        }
    }

    /// Request one page, retrying the same page on failure.
    async fn fetch_page(
        &self,
        query: &S::Query,
        cursor: PageCursor,
        requests: &mut u32,
    ) -> PageAttempt<S::Item> {
        let retry = &self.policy.retry;

        for attempt in 1..=retry.max_attempts() {
            let Some(lease) = self.pool.acquire().await else {
                return PageAttempt::NoResource;
            };

            *requests += 1;
            metrics::counter!("fetch_requests_total").increment(1);

            match self.source.fetch_page(lease.payload(), query, cursor).await {
                Ok(page) => return PageAttempt::Page(page),
                Err(err) => {
                    self.pool.report_error(lease.id()).await;
                    metrics::counter!("fetch_page_errors_total", "kind" => err.kind())
                        .increment(1);
                    match &err {
                        PageError::Transient(detail) => warn!(
                            pool = self.pool.name(),
                            resource_id = %lease.id(),
                            page = cursor.page_number(),
                            attempt,
                            error = %detail,
                            "page request failed"
                        ),
                        PageError::Malformed(detail) => warn!(
                            pool = self.pool.name(),
                            resource_id = %lease.id(),
                            page = cursor.page_number(),
                            attempt,
                            error = %detail,
                            "upstream response did not match expected schema"
                        ),
                    }

                    if retry.should_retry(attempt) {
                        tokio::time::sleep(retry.backoff.delay_after(attempt)).await;
                    }
                }
            }
        }

        warn!(
            pool = self.pool.name(),
            page = cursor.page_number(),
            attempts = retry.max_attempts(),
            "retry budget exhausted for page"
        );
        PageAttempt::RetryExhausted
    }
}
