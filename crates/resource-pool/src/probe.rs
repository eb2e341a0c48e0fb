//! Liveness probes run when a resource reaches its request cap

use common::BoxFuture;

/// Decides whether a resource may stay in rotation.
///
/// Uses a boxed future return type so the pool can hold `Arc<dyn HealthProbe<P>>`.
pub trait HealthProbe<P>: Send + Sync {
    fn check<'a>(&'a self, payload: &'a P) -> BoxFuture<'a, bool>;
}

/// Probe that always passes. Reaching the cap simply starts a fresh cycle.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysHealthy;

impl<P: Sync> HealthProbe<P> for AlwaysHealthy {
    fn check<'a>(&'a self, _payload: &'a P) -> BoxFuture<'a, bool> {
        Box::pin(async { true })
    }
}
