//! UniFFI bindings for cluster-state.
//!
//! Exposes the blocking [`StateAccessor`] to Python, Kotlin, Swift and the
//! other UniFFI targets. Every method is synchronous on the foreign side;
//! the accessor's own event loop thread does the asynchronous work.
//!
//! Records cross the boundary in their wire form (`bytes` in Python) and
//! entity ids as hex strings.
//!
//! # Usage
//!
//! ```bash
//! # Build the cdylib
//! cargo build -p cluster-state-uniffi --release
//!
//! # Generate Python bindings
//! cluster-state-uniffi-bindgen generate --library --language python \
//!     --out-dir ./bindings/python target/release/libcluster_state_uniffi.so
//! ```

use cluster_state::{
    ActorId, JobId, PlacementGroupId, StateAccessor, StateError, WorkerId,
};
use std::sync::Arc;
use std::time::Duration;

/// FFI-friendly error type.
///
/// A flattened `StateError`: payloads that cannot cross the FFI boundary
/// (durations, io and JSON sources) are rendered into the message.
#[derive(Debug, Clone, uniffi::Error, thiserror::Error)]
pub enum FfiError {
    #[error("Not found: {message}")]
    NotFound { message: String },

    #[error("Timeout: {message}")]
    Timeout { message: String },

    #[error("Registry unavailable: {message}")]
    Unavailable { message: String },

    #[error("Registry error: {message}")]
    Registry { message: String },

    #[error("Accessor is not connected to the registry")]
    NotConnected,

    #[error("Accessor error: {message}")]
    Lifecycle { message: String },

    #[error("IO error: {message}")]
    Io { message: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("{0}")]
    Other(String),
}

impl From<StateError> for FfiError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::NotFound { message } => FfiError::NotFound { message },
            StateError::Timeout(duration) => FfiError::Timeout {
                message: format!("Request timed out after {:?}", duration),
            },
            err @ StateError::Unavailable { .. } => FfiError::Unavailable {
                message: err.to_string(),
            },
            StateError::Registry { message } => FfiError::Registry { message },
            StateError::NotConnected => FfiError::NotConnected,
            err @ (StateError::LoopStopped { .. } | StateError::WouldDeadlock { .. }) => {
                FfiError::Lifecycle {
                    message: err.to_string(),
                }
            }
            StateError::ConnectionLost { address } => FfiError::Io {
                message: format!("Connection to {} lost", address),
            },
            StateError::Io { message, .. } => FfiError::Io { message },
            StateError::Json { message, .. } => FfiError::Validation {
                message: format!("JSON error: {}", message),
            },
            StateError::InvalidId { kind, value } => FfiError::Validation {
                message: format!("Invalid {} id: {}", kind, value),
            },
            StateError::Validation { field, message } => FfiError::Validation {
                message: format!("{}: {}", field, message),
            },
            StateError::Config { message } => FfiError::Config { message },
            StateError::Other(message) => FfiError::Other(message),
        }
    }
}

/// Result type for FFI operations.
pub type FfiResult<T> = Result<T, FfiError>;

// UniFFI scaffolding - this generates the FFI glue code
uniffi::setup_scaffolding!();

/// Get the version of the cluster-state-uniffi bindings.
#[uniffi::export]
pub fn version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

/// Configuration for creating an `FfiStateAccessor`.
///
/// Zero durations fall back to the environment-derived defaults.
#[derive(uniffi::Record)]
pub struct FfiAccessorConfig {
    /// Registry address as `host:port`.
    pub address: String,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub node_registration_wait_ms: u64,
    pub discovery_backoff_ms: u64,
}

/// A node that is draining, with its drain deadline.
///
/// Used instead of `HashMap<NodeId, i64>` which can't cross the FFI boundary.
#[derive(uniffi::Record, Debug, PartialEq, Eq)]
pub struct FfiDrainingNode {
    pub node_id: String,
    pub deadline_ms: i64,
}

/// Blocking handle to a cluster registry.
#[derive(uniffi::Object)]
pub struct FfiStateAccessor {
    inner: StateAccessor,
}

impl FfiStateAccessor {
    /// Wrap an accessor built on the Rust side.
    pub fn from_accessor(inner: StateAccessor) -> Arc<Self> {
        Arc::new(Self { inner })
    }
}

fn millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

#[uniffi::export]
impl FfiStateAccessor {
    /// Create an accessor for the registry at `address` with default timings.
    #[uniffi::constructor]
    pub fn new(address: String) -> FfiResult<Arc<Self>> {
        let inner = StateAccessor::builder().address(&address)?.build()?;
        Ok(Self::from_accessor(inner))
    }

    /// Create an accessor with a configuration record.
    #[uniffi::constructor]
    pub fn with_config(config: FfiAccessorConfig) -> FfiResult<Arc<Self>> {
        let mut builder = StateAccessor::builder().address(&config.address)?;
        if let Some(timeout) = millis(config.connect_timeout_ms) {
            builder = builder.connect_timeout(timeout);
        }
        if let Some(timeout) = millis(config.request_timeout_ms) {
            builder = builder.request_timeout(timeout);
        }
        if let Some(wait) = millis(config.node_registration_wait_ms) {
            builder = builder.node_registration_wait(wait);
        }
        if let Some(backoff) = millis(config.discovery_backoff_ms) {
            builder = builder.discovery_backoff(backoff);
        }
        Ok(Self::from_accessor(builder.build()?))
    }

    pub fn connect(&self) -> FfiResult<()> {
        Ok(self.inner.connect()?)
    }

    pub fn disconnect(&self) {
        self.inner.disconnect()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    // Jobs

    pub fn get_all_job_info(
        &self,
        skip_submission_job_info_field: bool,
        skip_is_running_tasks_field: bool,
    ) -> FfiResult<Vec<Vec<u8>>> {
        Ok(self
            .inner
            .get_all_job_info(skip_submission_job_info_field, skip_is_running_tasks_field)?)
    }

    pub fn get_next_job_id(&self) -> FfiResult<u32> {
        Ok(self.inner.get_next_job_id()?.to_int())
    }

    // Nodes and resources

    pub fn get_all_node_info(&self) -> FfiResult<Vec<Vec<u8>>> {
        Ok(self.inner.get_all_node_info()?)
    }

    pub fn get_node(&self, node_id_hex: String) -> FfiResult<Vec<u8>> {
        Ok(self.inner.get_node(&node_id_hex)?)
    }

    pub fn get_node_to_connect_for_driver(&self, node_ip_address: String) -> FfiResult<Vec<u8>> {
        Ok(self.inner.get_node_to_connect_for_driver(&node_ip_address)?)
    }

    pub fn get_all_available_resources(&self) -> FfiResult<Vec<Vec<u8>>> {
        Ok(self.inner.get_all_available_resources()?)
    }

    pub fn get_all_total_resources(&self) -> FfiResult<Vec<Vec<u8>>> {
        Ok(self.inner.get_all_total_resources()?)
    }

    /// Draining nodes, sorted by node id.
    pub fn get_draining_nodes(&self) -> FfiResult<Vec<FfiDrainingNode>> {
        let mut nodes: Vec<FfiDrainingNode> = self
            .inner
            .get_draining_nodes()?
            .into_iter()
            .map(|(node_id, deadline_ms)| FfiDrainingNode {
                node_id: node_id.hex(),
                deadline_ms,
            })
            .collect();
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        Ok(nodes)
    }

    pub fn get_all_resource_usage(&self) -> FfiResult<Option<Vec<u8>>> {
        Ok(self.inner.get_all_resource_usage()?)
    }

    pub fn get_all_task_events(&self) -> FfiResult<Vec<Vec<u8>>> {
        Ok(self.inner.get_all_task_events()?)
    }

    // Actors

    pub fn get_all_actor_info(
        &self,
        actor_id: Option<String>,
        job_id: Option<u32>,
        actor_state_name: Option<String>,
    ) -> FfiResult<Vec<Vec<u8>>> {
        let actor_id = actor_id.as_deref().map(ActorId::from_hex).transpose()?;
        Ok(self.inner.get_all_actor_info(
            actor_id,
            job_id.map(JobId::from_int),
            actor_state_name,
        )?)
    }

    pub fn get_actor_info(&self, actor_id: String) -> FfiResult<Option<Vec<u8>>> {
        Ok(self.inner.get_actor_info(ActorId::from_hex(&actor_id)?)?)
    }

    // Workers

    pub fn get_worker_info(&self, worker_id: String) -> FfiResult<Option<Vec<u8>>> {
        Ok(self.inner.get_worker_info(WorkerId::from_hex(&worker_id)?)?)
    }

    pub fn get_all_worker_info(&self) -> FfiResult<Vec<Vec<u8>>> {
        Ok(self.inner.get_all_worker_info()?)
    }

    pub fn add_worker_info(&self, serialized_worker: Vec<u8>) -> FfiResult<bool> {
        Ok(self.inner.add_worker_info(&serialized_worker)?)
    }

    pub fn get_worker_debugger_port(&self, worker_id: String) -> FfiResult<u32> {
        Ok(self
            .inner
            .get_worker_debugger_port(WorkerId::from_hex(&worker_id)?)?)
    }

    pub fn update_worker_debugger_port(
        &self,
        worker_id: String,
        debugger_port: u32,
    ) -> FfiResult<bool> {
        Ok(self
            .inner
            .update_worker_debugger_port(WorkerId::from_hex(&worker_id)?, debugger_port)?)
    }

    pub fn update_worker_num_paused_threads(
        &self,
        worker_id: String,
        num_paused_threads_delta: i32,
    ) -> FfiResult<bool> {
        Ok(self.inner.update_worker_num_paused_threads(
            WorkerId::from_hex(&worker_id)?,
            num_paused_threads_delta,
        )?)
    }

    // Placement groups

    pub fn get_all_placement_group_info(&self) -> FfiResult<Vec<Vec<u8>>> {
        Ok(self.inner.get_all_placement_group_info()?)
    }

    pub fn get_placement_group_info(
        &self,
        placement_group_id: String,
    ) -> FfiResult<Option<Vec<u8>>> {
        Ok(self
            .inner
            .get_placement_group_info(PlacementGroupId::from_hex(&placement_group_id)?)?)
    }

    pub fn get_placement_group_by_name(
        &self,
        placement_group_name: String,
        namespace: String,
    ) -> FfiResult<Option<Vec<u8>>> {
        Ok(self
            .inner
            .get_placement_group_by_name(&placement_group_name, &namespace)?)
    }

    // Key/value and configuration

    pub fn get_internal_kv(&self, namespace: String, key: String) -> Option<Vec<u8>> {
        self.inner.get_internal_kv(&namespace, &key)
    }

    pub fn get_system_config(&self) -> FfiResult<String> {
        Ok(self.inner.get_system_config()?)
    }
}
