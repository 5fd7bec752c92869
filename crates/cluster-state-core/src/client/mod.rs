//! Contract of the asynchronous registry client.
//!
//! The accessor only ever talks to the registry through [`RegistryClient`].
//! Every operation is a one-shot future; the accessor drives it on its own
//! event loop and turns the completion into a blocking return value.
//!
//! Listing operations take `Option<Duration>`: `None` waits indefinitely.
//! The filtered node query and the direct key/value read take a hard
//! timeout and report [`StateError::Timeout`](crate::StateError::Timeout)
//! when it elapses.

pub mod rpc;

pub use rpc::RpcRegistryClient;

use crate::config::RegistryConfig;
use crate::error::{Result, StateError};
use crate::ids::{ActorId, JobId, NodeId, PlacementGroupId, WorkerId};
use crate::records::{
    ActorFilter, ActorRecord, AvailableResources, JobQuery, JobRecord, NodeFilters, NodeInfo,
    PlacementGroupRecord, ResourceUsageBatch, TaskEvents, TotalResources, WorkerRecord,
};
use std::collections::HashMap;
use std::time::Duration;

/// Connection options for a registry client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryClientOptions {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
}

impl Default for RegistryClientOptions {
    fn default() -> Self {
        Self {
            host: RegistryConfig::DEFAULT_HOST.to_string(),
            port: RegistryConfig::DEFAULT_PORT,
            connect_timeout: RegistryConfig::IPC_CONNECT_TIMEOUT,
        }
    }
}

impl RegistryClientOptions {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Parse a `host:port` registry address.
    pub fn parse(address: &str) -> Result<Self> {
        let (host, port) = address
            .rsplit_once(':')
            .ok_or_else(|| StateError::Config {
                message: format!("Registry address must be host:port, got {:?}", address),
            })?;
        if host.is_empty() {
            return Err(StateError::Config {
                message: format!("Registry address has an empty host: {:?}", address),
            });
        }
        let port = port.parse::<u16>().map_err(|_| StateError::Config {
            message: format!("Registry address has an invalid port: {:?}", address),
        })?;
        Ok(Self::new(host, port))
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Asynchronous client for the cluster registry.
///
/// Grouped the way the registry exposes its managers: jobs, nodes, node
/// resources, tasks, actors, workers, placement groups and internal KV.
#[async_trait::async_trait]
pub trait RegistryClient: Send + Sync + 'static {
    /// Establish the connection. Called on the accessor's event loop.
    async fn connect(&self) -> Result<()>;

    /// Release the connection. Called after the event loop has stopped.
    fn disconnect(&self);

    /// Host and port of the registry server this client talks to.
    fn server_address(&self) -> (String, u16);

    // Jobs
    async fn get_all_jobs(
        &self,
        query: JobQuery,
        timeout: Option<Duration>,
    ) -> Result<Vec<JobRecord>>;
    async fn get_next_job_id(&self) -> Result<JobId>;

    // Nodes
    async fn get_all_nodes(&self, timeout: Option<Duration>) -> Result<Vec<NodeInfo>>;
    /// Filtered node listing that bypasses any client-side cache.
    async fn get_nodes_no_cache(
        &self,
        filters: NodeFilters,
        timeout: Duration,
    ) -> Result<Vec<NodeInfo>>;

    // Node resources
    async fn get_all_available_resources(&self) -> Result<Vec<AvailableResources>>;
    async fn get_all_total_resources(&self) -> Result<Vec<TotalResources>>;
    /// Draining nodes mapped to their drain deadline (ms since epoch).
    async fn get_draining_nodes(&self) -> Result<HashMap<NodeId, i64>>;
    async fn get_all_resource_usage(&self) -> Result<Option<ResourceUsageBatch>>;

    // Tasks
    async fn get_task_events(&self) -> Result<Vec<TaskEvents>>;

    // Actors
    async fn get_all_actors(&self, filter: ActorFilter) -> Result<Vec<ActorRecord>>;
    async fn get_actor(&self, actor_id: ActorId) -> Result<Option<ActorRecord>>;

    // Workers
    async fn get_worker(&self, worker_id: WorkerId) -> Result<Option<WorkerRecord>>;
    async fn get_all_workers(&self) -> Result<Vec<WorkerRecord>>;
    async fn add_worker(&self, worker: WorkerRecord) -> Result<()>;
    async fn update_debugger_port(&self, worker_id: WorkerId, port: u32) -> Result<()>;
    async fn update_num_paused_threads(&self, worker_id: WorkerId, delta: i32) -> Result<()>;

    // Placement groups
    async fn get_all_placement_groups(&self) -> Result<Vec<PlacementGroupRecord>>;
    async fn get_placement_group(
        &self,
        placement_group_id: PlacementGroupId,
    ) -> Result<Option<PlacementGroupRecord>>;
    async fn get_placement_group_by_name(
        &self,
        name: String,
        namespace: String,
    ) -> Result<Option<PlacementGroupRecord>>;

    // Internal KV
    async fn internal_kv_get(
        &self,
        namespace: String,
        key: String,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>>;
    /// The cluster-wide system configuration stored at bootstrap.
    async fn get_internal_config(&self) -> Result<Option<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address() {
        let opts = RegistryClientOptions::parse("10.1.2.3:6380").unwrap();
        assert_eq!(opts.host, "10.1.2.3");
        assert_eq!(opts.port, 6380);
        assert_eq!(opts.address(), "10.1.2.3:6380");
        assert_eq!(opts.connect_timeout, RegistryConfig::IPC_CONNECT_TIMEOUT);
    }

    #[test]
    fn test_parse_rejects_malformed_addresses() {
        assert!(RegistryClientOptions::parse("no-port").is_err());
        assert!(RegistryClientOptions::parse(":6379").is_err());
        assert!(RegistryClientOptions::parse("host:99999").is_err());
    }
}
