//! Registry client that talks to a [`RegistryServer`](crate::ipc::RegistryServer)
//! over the JSON-RPC transport.

use super::{RegistryClient, RegistryClientOptions};
use crate::error::{Result, StateError};
use crate::ids::{ActorId, JobId, NodeId, PlacementGroupId, WorkerId};
use crate::ipc::protocol::{
    methods, ActorParams, ActorsGetAllParams, AddWorkerParams, DebuggerPortParams,
    JobsGetAllParams, KvGetParams, NodesGetFilteredParams, PausedThreadsParams,
    PlacementGroupByNameParams, PlacementGroupParams, TimeoutParams, WorkerParams,
};
use crate::ipc::RpcConnection;
use crate::records::{
    ActorFilter, ActorRecord, AvailableResources, JobQuery, JobRecord, NodeFilters, NodeInfo,
    PlacementGroupRecord, ResourceUsageBatch, TaskEvents, TotalResources, WorkerRecord,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info};

/// [`RegistryClient`] backed by a framed TCP connection.
#[derive(Debug)]
pub struct RpcRegistryClient {
    options: RegistryClientOptions,
    connection: Mutex<Option<Arc<RpcConnection>>>,
}

impl RpcRegistryClient {
    pub fn new(options: RegistryClientOptions) -> Self {
        Self {
            options,
            connection: Mutex::new(None),
        }
    }

    pub fn options(&self) -> &RegistryClientOptions {
        &self.options
    }

    fn connection(&self) -> Result<Arc<RpcConnection>> {
        self.connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(StateError::NotConnected)
    }

    async fn call<P, T>(&self, method: &str, params: &P, timeout: Option<Duration>) -> Result<T>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let connection = self.connection()?;
        let params = serde_json::to_value(params)?;
        let value = connection.call(method, params, timeout).await?;
        serde_json::from_value(value).map_err(|e| StateError::Json {
            message: format!("Unexpected {} response: {}", method, e),
            source: Some(e),
        })
    }

    async fn call_unbounded<T: DeserializeOwned>(&self, method: &str) -> Result<T> {
        self.call(method, &serde_json::json!({}), None).await
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[async_trait::async_trait]
impl RegistryClient for RpcRegistryClient {
    async fn connect(&self) -> Result<()> {
        let connection = RpcConnection::connect(
            &self.options.host,
            self.options.port,
            self.options.connect_timeout,
        )
        .await?;
        info!("Connected to registry at {}", connection.address());
        *self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(connection));
        Ok(())
    }

    fn disconnect(&self) {
        let previous = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if previous.is_some() {
            debug!("Closed registry connection to {}", self.options.address());
        }
    }

    fn server_address(&self) -> (String, u16) {
        (self.options.host.clone(), self.options.port)
    }

    async fn get_all_jobs(
        &self,
        query: JobQuery,
        timeout: Option<Duration>,
    ) -> Result<Vec<JobRecord>> {
        let params = JobsGetAllParams {
            query,
            timeout_ms: timeout.map(millis),
        };
        self.call(methods::JOBS_GET_ALL, &params, timeout).await
    }

    async fn get_next_job_id(&self) -> Result<JobId> {
        self.call_unbounded(methods::JOBS_NEXT_ID).await
    }

    async fn get_all_nodes(&self, timeout: Option<Duration>) -> Result<Vec<NodeInfo>> {
        let params = TimeoutParams {
            timeout_ms: timeout.map(millis),
        };
        self.call(methods::NODES_GET_ALL, &params, timeout).await
    }

    async fn get_nodes_no_cache(
        &self,
        filters: NodeFilters,
        timeout: Duration,
    ) -> Result<Vec<NodeInfo>> {
        let params = NodesGetFilteredParams {
            filters,
            timeout_ms: millis(timeout),
        };
        self.call(methods::NODES_GET_FILTERED, &params, Some(timeout))
            .await
    }

    async fn get_all_available_resources(&self) -> Result<Vec<AvailableResources>> {
        self.call_unbounded(methods::RESOURCES_AVAILABLE).await
    }

    async fn get_all_total_resources(&self) -> Result<Vec<TotalResources>> {
        self.call_unbounded(methods::RESOURCES_TOTAL).await
    }

    async fn get_draining_nodes(&self) -> Result<HashMap<NodeId, i64>> {
        self.call_unbounded(methods::RESOURCES_DRAINING).await
    }

    async fn get_all_resource_usage(&self) -> Result<Option<ResourceUsageBatch>> {
        self.call_unbounded(methods::RESOURCES_USAGE).await
    }

    async fn get_task_events(&self) -> Result<Vec<TaskEvents>> {
        self.call_unbounded(methods::TASKS_GET_EVENTS).await
    }

    async fn get_all_actors(&self, filter: ActorFilter) -> Result<Vec<ActorRecord>> {
        self.call(methods::ACTORS_GET_ALL, &ActorsGetAllParams { filter }, None)
            .await
    }

    async fn get_actor(&self, actor_id: ActorId) -> Result<Option<ActorRecord>> {
        self.call(methods::ACTORS_GET, &ActorParams { actor_id }, None)
            .await
    }

    async fn get_worker(&self, worker_id: WorkerId) -> Result<Option<WorkerRecord>> {
        self.call(methods::WORKERS_GET, &WorkerParams { worker_id }, None)
            .await
    }

    async fn get_all_workers(&self) -> Result<Vec<WorkerRecord>> {
        self.call_unbounded(methods::WORKERS_GET_ALL).await
    }

    async fn add_worker(&self, worker: WorkerRecord) -> Result<()> {
        self.call(methods::WORKERS_ADD, &AddWorkerParams { worker }, None)
            .await
    }

    async fn update_debugger_port(&self, worker_id: WorkerId, port: u32) -> Result<()> {
        let params = DebuggerPortParams { worker_id, port };
        self.call(methods::WORKERS_UPDATE_DEBUGGER_PORT, &params, None)
            .await
    }

    async fn update_num_paused_threads(&self, worker_id: WorkerId, delta: i32) -> Result<()> {
        let params = PausedThreadsParams { worker_id, delta };
        self.call(methods::WORKERS_UPDATE_PAUSED_THREADS, &params, None)
            .await
    }

    async fn get_all_placement_groups(&self) -> Result<Vec<PlacementGroupRecord>> {
        self.call_unbounded(methods::PLACEMENT_GROUPS_GET_ALL).await
    }

    async fn get_placement_group(
        &self,
        placement_group_id: PlacementGroupId,
    ) -> Result<Option<PlacementGroupRecord>> {
        let params = PlacementGroupParams { placement_group_id };
        self.call(methods::PLACEMENT_GROUPS_GET, &params, None).await
    }

    async fn get_placement_group_by_name(
        &self,
        name: String,
        namespace: String,
    ) -> Result<Option<PlacementGroupRecord>> {
        let params = PlacementGroupByNameParams { name, namespace };
        self.call(methods::PLACEMENT_GROUPS_GET_BY_NAME, &params, None)
            .await
    }

    async fn internal_kv_get(
        &self,
        namespace: String,
        key: String,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>> {
        let params = KvGetParams {
            namespace,
            key,
            timeout_ms: millis(timeout),
        };
        // Values travel hex-encoded so arbitrary bytes survive JSON.
        let value: Option<String> = self.call(methods::KV_GET, &params, Some(timeout)).await?;
        value
            .map(|text| {
                hex::decode(&text).map_err(|e| StateError::Validation {
                    field: "internal_kv.value".to_string(),
                    message: e.to_string(),
                })
            })
            .transpose()
    }

    async fn get_internal_config(&self) -> Result<Option<String>> {
        self.call_unbounded(methods::KV_GET_INTERNAL_CONFIG).await
    }
}
