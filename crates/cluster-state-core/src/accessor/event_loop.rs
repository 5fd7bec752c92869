//! Event loop owned by a single accessor.
//!
//! A named OS thread builds a single-threaded tokio runtime, hands its handle
//! back to the constructor, then parks in `block_on` until the stop signal
//! fires. Everything the accessor dispatches runs on that thread, including
//! every completion callback.

use crate::config::AccessorDefaults;
use crate::error::{Result, StateError};
use std::future::Future;
use std::sync::mpsc;
use std::thread::{self, JoinHandle, ThreadId};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// A running event loop and its thread.
#[derive(Debug)]
pub struct EventLoop {
    handle: Handle,
    thread_id: ThreadId,
    stop_tx: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl EventLoop {
    /// Spawn the loop thread and block until its runtime is ready.
    pub fn spawn() -> Result<Self> {
        let (ready_tx, ready_rx) = mpsc::sync_channel::<std::io::Result<Handle>>(1);
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let thread = thread::Builder::new()
            .name(AccessorDefaults::LOOP_THREAD_NAME.to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if ready_tx.send(Ok(runtime.handle().clone())).is_err() {
                    return;
                }
                // Keeps the loop alive until the owner asks it to stop or
                // goes away.
                let _ = runtime.block_on(stop_rx);
                debug!("Accessor event loop stopping");
                // Dropping the runtime cancels whatever is still pending;
                // callers waiting on those calls observe a closed channel.
            })?;
        let thread_id = thread.thread().id();

        let handle = match ready_rx.recv() {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e.into());
            }
            Err(_) => {
                let _ = thread.join();
                return Err(StateError::LoopStopped {
                    operation: "event loop startup".to_string(),
                });
            }
        };

        debug!("Accessor event loop started");
        Ok(Self {
            handle,
            thread_id,
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        })
    }

    /// Run `future` on the loop.
    pub fn spawn_task<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        // The join handle is not needed: results travel back via the
        // completion the future carries.
        drop(self.handle.spawn(future));
    }

    /// Whether the calling thread is this loop's thread.
    pub fn is_loop_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// Stop the loop and join its thread. Idempotent.
    pub fn shutdown(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if self.is_loop_thread() {
                warn!("Event loop shut down from its own thread; not joining");
                return;
            }
            if thread.join().is_err() {
                warn!("Accessor event loop thread panicked");
            }
        }
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}
