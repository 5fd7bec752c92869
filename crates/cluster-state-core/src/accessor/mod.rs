//! Synchronous accessor over the asynchronous registry client.
//!
//! [`StateAccessor`] owns a private event loop thread and a registry client.
//! Every public method is blocking: it issues the request on the loop, waits
//! for the completion on the calling thread, and returns records in their
//! opaque wire form. Any number of threads may share one accessor.
//!
//! # Locking
//!
//! Two independent reader/writer locks:
//! - the connection lock guards the connected flag, the loop and the client.
//!   `connect`/`disconnect` take it exclusively; requests take it shared only
//!   while issuing and release it before blocking.
//! - the debugger lock serializes writers of per-worker debugger state
//!   against each other and against readers (see [`debugger`]).
//!
//! # Example
//!
//! ```rust,ignore
//! use cluster_state::StateAccessor;
//!
//! let accessor = StateAccessor::builder()
//!     .address("10.0.0.1:6379")?
//!     .build()?;
//! accessor.connect()?;
//! for node in accessor.get_all_node_info()? {
//!     // node is a serialized NodeInfo
//! }
//! ```

pub mod bridge;
pub mod builder;
pub mod debugger;
pub mod discovery;
pub mod event_loop;
pub mod queries;

pub use builder::StateAccessorBuilder;
pub use event_loop::EventLoop;

use crate::client::{RegistryClient, RegistryClientOptions, RpcRegistryClient};
use crate::config::AccessorConfig;
use crate::error::{Result, StateError};
use bridge::{pending_call, PendingCall};
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

struct Connection {
    connected: bool,
    event_loop: Option<EventLoop>,
    client: Arc<dyn RegistryClient>,
}

/// Blocking, thread-safe accessor for the cluster registry.
pub struct StateAccessor {
    connection: RwLock<Connection>,
    debug_state: RwLock<()>,
    config: AccessorConfig,
}

impl std::fmt::Debug for StateAccessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateAccessor")
            .field("connected", &self.is_connected())
            .field("config", &self.config)
            .finish()
    }
}

impl StateAccessor {
    /// Accessor for the registry at `options`, using the process-wide
    /// configuration.
    pub fn new(options: RegistryClientOptions) -> Result<Self> {
        Self::with_client(
            Arc::new(RpcRegistryClient::new(options)),
            AccessorConfig::global().clone(),
        )
    }

    /// Accessor over an existing client.
    ///
    /// Spawns the event loop thread and blocks until it is ready.
    pub fn with_client(client: Arc<dyn RegistryClient>, config: AccessorConfig) -> Result<Self> {
        let event_loop = EventLoop::spawn()?;
        Ok(Self {
            connection: RwLock::new(Connection {
                connected: false,
                event_loop: Some(event_loop),
                client,
            }),
            debug_state: RwLock::new(()),
            config,
        })
    }

    pub fn builder() -> StateAccessorBuilder {
        StateAccessorBuilder::new()
    }

    pub fn config(&self) -> &AccessorConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.read_connection().connected
    }

    /// Connect the client to the registry. A no-op when already connected.
    ///
    /// A connect after [`disconnect`](Self::disconnect) starts a fresh event
    /// loop.
    pub fn connect(&self) -> Result<()> {
        let mut connection = self.write_connection();
        if connection.connected {
            debug!("Accessor already connected; ignoring connect");
            return Ok(());
        }

        if connection.event_loop.is_none() {
            connection.event_loop = Some(EventLoop::spawn()?);
        }
        connection.connected = true;

        let (completion, pending) = pending_call::<()>("connect");
        let client = connection.client.clone();
        if let Some(event_loop) = connection.event_loop.as_ref() {
            event_loop.spawn_task(async move { completion.resolve(client.connect().await) });
        }

        match pending.wait().and_then(|outcome| outcome) {
            Ok(()) => {
                let (host, port) = connection.client.server_address();
                info!("Accessor connected to registry at {}:{}", host, port);
                Ok(())
            }
            Err(e) => {
                connection.connected = false;
                Err(e)
            }
        }
    }

    /// Stop the event loop and release the client. A no-op when not
    /// connected.
    pub fn disconnect(&self) {
        let mut connection = self.write_connection();
        if !connection.connected {
            return;
        }
        if let Some(mut event_loop) = connection.event_loop.take() {
            event_loop.shutdown();
        }
        connection.client.disconnect();
        connection.connected = false;
        debug!("Accessor disconnected");
    }

    /// Issue `request` on the event loop and return the pending call.
    ///
    /// `on_complete` runs on the loop thread and shapes the registry outcome.
    /// The connection lock is held only while issuing.
    pub(crate) fn dispatch<R, T, Fut>(
        &self,
        operation: &'static str,
        request: impl FnOnce(Arc<dyn RegistryClient>) -> Fut,
        on_complete: impl FnOnce(Result<R>) -> Result<T> + Send + 'static,
    ) -> Result<PendingCall<T>>
    where
        Fut: Future<Output = Result<R>> + Send + 'static,
        R: Send + 'static,
        T: Send + 'static,
    {
        let connection = self.read_connection();
        let event_loop = match (connection.connected, connection.event_loop.as_ref()) {
            (true, Some(event_loop)) => event_loop,
            _ => return Err(StateError::NotConnected),
        };

        let (completion, pending) = pending_call(operation);
        let future = request(connection.client.clone());
        event_loop.spawn_task(async move {
            let outcome = future.await;
            completion.resolve(on_complete(outcome));
        });
        Ok(pending)
    }

    /// Address of the registry server the client talks to.
    pub(crate) fn server_address(&self) -> (String, u16) {
        self.read_connection().client.server_address()
    }

    /// Whether the calling thread is this accessor's event loop thread.
    pub(crate) fn on_loop_thread(&self) -> bool {
        self.read_connection()
            .event_loop
            .as_ref()
            .is_some_and(EventLoop::is_loop_thread)
    }

    fn read_connection(&self) -> RwLockReadGuard<'_, Connection> {
        self.connection.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_connection(&self) -> RwLockWriteGuard<'_, Connection> {
        self.connection.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn read_debug_state(&self) -> RwLockReadGuard<'_, ()> {
        self.debug_state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write_debug_state(&self) -> RwLockWriteGuard<'_, ()> {
        self.debug_state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for StateAccessor {
    fn drop(&mut self) {
        self.disconnect();
        let connection = self
            .connection
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(mut event_loop) = connection.event_loop.take() {
            event_loop.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MemoryRegistry;

    fn accessor() -> (Arc<MemoryRegistry>, StateAccessor) {
        let registry = Arc::new(MemoryRegistry::new());
        let accessor =
            StateAccessor::with_client(registry.clone(), AccessorConfig::default()).unwrap();
        (registry, accessor)
    }

    #[test]
    fn test_connect_and_disconnect_are_idempotent() {
        let (registry, accessor) = accessor();

        accessor.connect().unwrap();
        accessor.connect().unwrap();
        assert!(accessor.is_connected());
        assert_eq!(registry.connect_count(), 1);

        accessor.disconnect();
        accessor.disconnect();
        assert!(!accessor.is_connected());
        assert_eq!(registry.disconnect_count(), 1);
    }

    #[test]
    fn test_failed_connect_leaves_accessor_disconnected() {
        let (registry, accessor) = accessor();
        registry.fail_method(crate::registry::CONNECT, "refused");

        assert!(accessor.connect().is_err());
        assert!(!accessor.is_connected());

        registry.clear_faults();
        accessor.connect().unwrap();
        assert!(accessor.is_connected());
    }

    #[test]
    fn test_reconnect_after_disconnect_starts_new_loop() {
        let (registry, accessor) = accessor();
        accessor.connect().unwrap();
        accessor.disconnect();
        accessor.connect().unwrap();

        assert_eq!(registry.connect_count(), 2);
        assert!(accessor.get_all_node_info().unwrap().is_empty());
    }

    #[test]
    fn test_dispatch_requires_connection() {
        let (_, accessor) = accessor();
        let err = accessor.get_all_node_info().unwrap_err();
        assert!(matches!(err, StateError::NotConnected));
    }

    #[test]
    fn test_drop_without_connect_stops_loop() {
        let (registry, accessor) = accessor();
        drop(accessor);
        assert_eq!(registry.disconnect_count(), 0);
    }
}
