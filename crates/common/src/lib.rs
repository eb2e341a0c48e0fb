//! Common types shared by the holder crawler crates

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::{Secret, mask_endpoint};

use std::future::Future;
use std::pin::Pin;

/// Boxed, sendable future used at trait seams that must stay dyn-compatible
/// (`Arc<dyn PageSource<..>>`, `Arc<dyn HealthProbe<..>>`).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
