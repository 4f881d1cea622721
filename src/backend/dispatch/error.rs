//! Errors raised while dispatching and resolving deferred calls.

use std::time::Duration;

use thiserror::Error;

use crate::backend::bytecode::FunctionId;

pub type DispatchResult<T> = Result<T, DispatchError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    /// Resolve was called for a call that was never submitted
    #[error("no computation submitted for {0}")]
    NotSubmitted(String),

    /// The hidden implementation failed; surfaced to every resolver
    #[error("{call} faulted: {reason}")]
    Faulted { call: String, reason: String },

    #[error("timed out after {after:?} waiting for {call}")]
    Timeout { call: String, after: Duration },

    #[error("{call} was cancelled")]
    Cancelled { call: String },

    #[error("resolved value has type {got}, expected {expected}")]
    TypeMismatch { expected: &'static str, got: &'static str },

    #[error("dispatch target {0} is not part of the program")]
    UnknownTarget(FunctionId),

    #[error("failed to build worker pool: {0}")]
    ThreadPool(String),
}
