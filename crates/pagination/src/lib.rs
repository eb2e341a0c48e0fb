//! Bounded, retry-aware pagination over pooled resources
//!
//! `PaginatedFetcher` turns an unreliable paged upstream into a finite
//! sequence of items. Every page request borrows a resource from a
//! `RotatingPool`; the caller supplies a `PageSource` that knows the wire
//! format. Partial retrieval is never an error: the returned `FetchOutcome`
//! carries every item gathered so far plus the reason the loop stopped.

pub mod cursor;
pub mod fetcher;
pub mod retry;
pub mod source;

pub use cursor::PageCursor;
pub use fetcher::{ExhaustedBy, FetchOutcome, FetchPolicy, PaginatedFetcher};
pub use retry::{Backoff, RetryPolicy};
pub use source::{Page, PageError, PageSource};
