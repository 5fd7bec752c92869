//! Blocking bridge between caller threads and the accessor's event loop.
//!
//! Each outstanding request owns one [`PendingCall`]. The matching
//! [`Completion`] travels with the request onto the loop and is resolved
//! exactly once there. The caller then blocks on the pending call, with or
//! without a deadline.
//!
//! The completion carries the registry's own outcome (`Result<T>`); waiting
//! wraps it in a second `Result` for what can go wrong on the bridge itself:
//! the loop stopping first, or a bounded wait running out.

use crate::error::{Result, StateError};
use crate::records::WireRecord;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::time::Duration;
use tracing::{debug, error};

/// Loop-side half of a pending call.
#[derive(Debug)]
pub struct Completion<T> {
    operation: &'static str,
    tx: SyncSender<Result<T>>,
}

impl<T> Completion<T> {
    /// Deliver the registry outcome to the waiting caller.
    pub fn resolve(self, outcome: Result<T>) {
        if self.tx.send(outcome).is_err() {
            debug!("{} completed after its caller stopped waiting", self.operation);
        }
    }
}

/// Caller-side half of a pending call.
#[derive(Debug)]
pub struct PendingCall<T> {
    operation: &'static str,
    rx: Receiver<Result<T>>,
}

/// Create a linked completion / pending-call pair for `operation`.
pub fn pending_call<T>(operation: &'static str) -> (Completion<T>, PendingCall<T>) {
    let (tx, rx) = mpsc::sync_channel(1);
    (Completion { operation, tx }, PendingCall { operation, rx })
}

impl<T> PendingCall<T> {
    pub fn operation(&self) -> &'static str {
        self.operation
    }

    /// Block until the completion resolves.
    pub fn wait(self) -> Result<Result<T>> {
        self.rx.recv().map_err(|_| StateError::LoopStopped {
            operation: self.operation.to_string(),
        })
    }

    /// Block until the completion resolves, treating a registry failure as an
    /// invariant violation (see [`assume_available`]).
    pub fn wait_available(self) -> Result<T> {
        let operation = self.operation;
        Ok(assume_available(operation, self.wait()?))
    }

    /// Block for at most `timeout`.
    ///
    /// Running out of time is reported as [`StateError::Unavailable`]. The
    /// late completion, if it ever arrives, is discarded.
    pub fn wait_bounded(self, timeout: Duration) -> Result<Result<T>> {
        match self.rx.recv_timeout(timeout) {
            Ok(outcome) => Ok(outcome),
            Err(RecvTimeoutError::Timeout) => {
                error!(
                    "{} did not complete within {:?}; the registry is unavailable",
                    self.operation, timeout
                );
                Err(StateError::Unavailable {
                    operation: self.operation.to_string(),
                    timeout,
                })
            }
            Err(RecvTimeoutError::Disconnected) => Err(StateError::LoopStopped {
                operation: self.operation.to_string(),
            }),
        }
    }
}

/// Unwrap the outcome of a call that assumes the registry is available.
///
/// A failure here is an invariant violation. It is logged and raised as a
/// panic on the calling thread; the event loop is untouched.
pub fn assume_available<T>(operation: &str, outcome: Result<T>) -> T {
    match outcome {
        Ok(value) => value,
        Err(e) => {
            error!("{} failed against an available registry: {}", operation, e);
            panic!("{} failed against an available registry: {}", operation, e);
        }
    }
}

/// Multi-item shape: every record in delivery order, in wire form.
pub fn wire_items<R: WireRecord>(outcome: Result<Vec<R>>) -> Result<Vec<Vec<u8>>> {
    outcome?.iter().map(WireRecord::to_wire).collect()
}

/// Single-or-absent shape.
pub fn wire_item<R: WireRecord>(outcome: Result<Option<R>>) -> Result<Option<Vec<u8>>> {
    outcome?.as_ref().map(WireRecord::to_wire).transpose()
}

/// Acknowledgment shape.
pub fn acknowledgment(outcome: Result<()>) -> Result<bool> {
    outcome.map(|()| true)
}
