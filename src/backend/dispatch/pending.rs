//! Pending computations
//!
//! A single-assignment cell around a job. Whoever claims the job first
//! (a pool worker or a resolving thread) runs it; everyone else waits on the
//! condition variable until the result is published.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::backend::models::Value;

use super::error::{DispatchError, DispatchResult};
use super::fingerprint::CallFingerprint;

/// Work wrapped by a pending computation
pub type Job = Box<dyn FnOnce() -> DispatchResult<Value> + Send + 'static>;

/// Lifecycle of a pending computation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingState {
    Created,
    Running,
    Completed,
    Faulted,
}

impl PendingState {
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, PendingState::Completed | PendingState::Faulted)
    }
}

struct Slot {
    state: PendingState,
    job: Option<Job>,
    result: Option<DispatchResult<Value>>,
}

/// An asynchronous unit of work registered under a fingerprint
pub struct PendingComputation {
    fingerprint: CallFingerprint,
    slot: Mutex<Slot>,
    done: Condvar,
}

impl fmt::Debug for PendingComputation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingComputation")
            .field("fingerprint", &self.fingerprint.to_string())
            .field("state", &self.state())
            .finish()
    }
}

impl PendingComputation {
    pub fn new(fingerprint: CallFingerprint, job: Job) -> Self {
        Self {
            fingerprint,
            slot: Mutex::new(Slot {
                state: PendingState::Created,
                job: Some(job),
                result: None,
            }),
            done: Condvar::new(),
        }
    }

    pub fn fingerprint(&self) -> &CallFingerprint {
        &self.fingerprint
    }

    pub fn state(&self) -> PendingState {
        self.slot.lock().state
    }

    /// Claim and run the job on the current thread
    ///
    /// Returns `None` when the job was already claimed, otherwise whether it
    /// completed successfully. A panic inside the job faults the computation.
    pub fn run(&self) -> Option<bool> {
        let job = {
            let mut slot = self.slot.lock();
            if slot.state != PendingState::Created {
                return None;
            }
            slot.state = PendingState::Running;
            slot.job.take()?
        };

        let result = panic::catch_unwind(AssertUnwindSafe(job)).unwrap_or_else(|payload| {
            Err(DispatchError::Faulted {
                call: self.fingerprint.to_string(),
                reason: panic_message(payload.as_ref()),
            })
        });
        let ok = result.is_ok();
        self.publish(result);
        Some(ok)
    }

    fn publish(&self, result: DispatchResult<Value>) {
        let mut slot = self.slot.lock();
        // Cancelled while running: the cancellation wins
        if slot.state.is_terminal() {
            return;
        }
        slot.state = if result.is_ok() {
            PendingState::Completed
        } else {
            PendingState::Faulted
        };
        slot.result = Some(result);
        self.done.notify_all();
    }

    /// Block until the computation is terminal
    pub fn wait(&self, timeout: Option<Duration>) -> DispatchResult<Value> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut slot = self.slot.lock();
        loop {
            if let Some(result) = &slot.result {
                return result.clone();
            }
            match (deadline, timeout) {
                (Some(deadline), Some(after)) => {
                    if self.done.wait_until(&mut slot, deadline).timed_out() {
                        return match &slot.result {
                            Some(result) => result.clone(),
                            None => Err(DispatchError::Timeout {
                                call: self.fingerprint.to_string(),
                                after,
                            }),
                        };
                    }
                }
                _ => self.done.wait(&mut slot),
            }
        }
    }

    /// Result if terminal, without blocking
    pub fn try_result(&self) -> Option<DispatchResult<Value>> {
        self.slot.lock().result.clone()
    }

    /// Fault a computation that has not completed yet
    ///
    /// Returns false if it was already terminal. A running job keeps running
    /// but its result is discarded.
    pub fn cancel(&self) -> bool {
        let mut slot = self.slot.lock();
        if slot.state.is_terminal() {
            return false;
        }
        slot.state = PendingState::Faulted;
        slot.job = None;
        slot.result = Some(Err(DispatchError::Cancelled {
            call: self.fingerprint.to_string(),
        }));
        self.done.notify_all();
        true
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}
