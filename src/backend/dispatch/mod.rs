//! Deferred dispatch of pure function calls
//!
//! - `fingerprint`: structural identity of a call
//! - `pending`: single-assignment computations
//! - `registry`: fingerprint -> computation map, one per program run
//! - `runtime`: submission onto the worker pool and blocking resolution
//! - `deferred`: the handle returned to callers in place of a result

mod deferred;
mod error;
mod fingerprint;
mod pending;
mod registry;
mod runtime;

pub use deferred::{DeferredValue, FromValue, Resolver};
pub use error::{DispatchError, DispatchResult};
pub use fingerprint::{ArgSnapshot, CallFingerprint};
pub use pending::{Job, PendingComputation, PendingState};
pub use registry::{FutureRegistry, RegistryStats};
pub use runtime::{DispatchRuntime, RuntimeConfig};
