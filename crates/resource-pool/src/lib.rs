//! Rotating pool of interchangeable egress resources
//!
//! Holds a fixed set of resources (proxy endpoints, identity header sets) and
//! hands them out one at a time in round-robin order. Each record tracks usage
//! and error counters independently.
//!
//! Resource lifecycle:
//! 1. Pool built from the loaded list → every record `Active`
//! 2. `acquire` returns the next `Active` record and bumps its usage count
//! 3. Usage count reaches the request cap → count reset, liveness probe runs;
//!    failing the probe moves the record to `Unhealthy`
//! 4. `report_error` reaches the error threshold → `Disabled` for the rest of the run
//! 5. Background re-check probes `Unhealthy` records and re-admits healthy ones

pub mod error;
pub mod pool;
pub mod probe;
pub mod recheck;

pub use error::{Error, Result};
pub use pool::{Lease, PoolHealth, PoolSettings, ResourceId, ResourceStatus, RotatingPool};
pub use probe::{AlwaysHealthy, HealthProbe};
pub use recheck::spawn_recheck_task;
