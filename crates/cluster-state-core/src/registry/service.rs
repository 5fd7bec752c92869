//! JSON-RPC dispatch over any registry client.
//!
//! [`RegistryService`] is what a [`RegistryServer`](crate::ipc::RegistryServer)
//! serves: it decodes a request frame and its parameters, calls the backing
//! client and encodes the result as a response envelope.

use crate::client::RegistryClient;
use crate::error::{Result, StateError};
use crate::ipc::protocol::{
    methods, ActorParams, ActorsGetAllParams, AddWorkerParams, DebuggerPortParams,
    JobsGetAllParams, KvGetParams, NodesGetFilteredParams, PausedThreadsParams,
    PlacementGroupByNameParams, PlacementGroupParams, TimeoutParams, WorkerParams,
};
use crate::ipc::protocol::{RpcRequest, RpcResponse};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

/// Routes registry method calls to a backing [`RegistryClient`].
pub struct RegistryService {
    backend: Arc<dyn RegistryClient>,
}

impl RegistryService {
    pub fn new(backend: Arc<dyn RegistryClient>) -> Self {
        Self { backend }
    }

    /// Answer one request frame. Never fails: malformed requests and
    /// registry errors both become JSON-RPC error responses.
    pub async fn handle_frame(&self, frame: &[u8]) -> RpcResponse {
        let request: RpcRequest = match serde_json::from_slice(frame) {
            Ok(request) => request,
            Err(e) => return RpcResponse::error(None, -32700, format!("Parse error: {}", e)),
        };
        if request.jsonrpc != "2.0" {
            return RpcResponse::error(
                request.id,
                -32600,
                "Invalid Request: expected jsonrpc 2.0".to_string(),
            );
        }

        let params = request.params.unwrap_or_else(|| serde_json::json!({}));
        match self.call(&request.method, params).await {
            Ok(result) => RpcResponse::success(request.id, result),
            Err(e) => RpcResponse::error(request.id, e.to_rpc_error_code(), e.wire_message()),
        }
    }
}

fn parse<P: DeserializeOwned>(method: &str, params: serde_json::Value) -> Result<P> {
    serde_json::from_value(params).map_err(|e| StateError::Validation {
        field: "params".to_string(),
        message: format!("Invalid params for {}: {}", method, e),
    })
}

fn optional_timeout(timeout_ms: Option<u64>) -> Option<Duration> {
    timeout_ms.map(Duration::from_millis)
}

impl RegistryService {
    /// Route `method` to the backing client.
    pub async fn call(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        let backend = &self.backend;
        match method {
            methods::JOBS_GET_ALL => {
                let p: JobsGetAllParams = parse(method, params)?;
                let jobs = backend
                    .get_all_jobs(p.query, optional_timeout(p.timeout_ms))
                    .await?;
                Ok(serde_json::to_value(jobs)?)
            }
            methods::JOBS_NEXT_ID => Ok(serde_json::to_value(backend.get_next_job_id().await?)?),
            methods::NODES_GET_ALL => {
                let p: TimeoutParams = parse(method, params)?;
                let nodes = backend.get_all_nodes(optional_timeout(p.timeout_ms)).await?;
                Ok(serde_json::to_value(nodes)?)
            }
            methods::NODES_GET_FILTERED => {
                let p: NodesGetFilteredParams = parse(method, params)?;
                let nodes = backend
                    .get_nodes_no_cache(p.filters, Duration::from_millis(p.timeout_ms))
                    .await?;
                Ok(serde_json::to_value(nodes)?)
            }
            methods::RESOURCES_AVAILABLE => Ok(serde_json::to_value(
                backend.get_all_available_resources().await?,
            )?),
            methods::RESOURCES_TOTAL => Ok(serde_json::to_value(
                backend.get_all_total_resources().await?,
            )?),
            methods::RESOURCES_DRAINING => {
                Ok(serde_json::to_value(backend.get_draining_nodes().await?)?)
            }
            methods::RESOURCES_USAGE => Ok(serde_json::to_value(
                backend.get_all_resource_usage().await?,
            )?),
            methods::TASKS_GET_EVENTS => Ok(serde_json::to_value(backend.get_task_events().await?)?),
            methods::ACTORS_GET_ALL => {
                let p: ActorsGetAllParams = parse(method, params)?;
                Ok(serde_json::to_value(backend.get_all_actors(p.filter).await?)?)
            }
            methods::ACTORS_GET => {
                let p: ActorParams = parse(method, params)?;
                Ok(serde_json::to_value(backend.get_actor(p.actor_id).await?)?)
            }
            methods::WORKERS_GET => {
                let p: WorkerParams = parse(method, params)?;
                Ok(serde_json::to_value(backend.get_worker(p.worker_id).await?)?)
            }
            methods::WORKERS_GET_ALL => Ok(serde_json::to_value(backend.get_all_workers().await?)?),
            methods::WORKERS_ADD => {
                let p: AddWorkerParams = parse(method, params)?;
                backend.add_worker(p.worker).await?;
                Ok(serde_json::Value::Null)
            }
            methods::WORKERS_UPDATE_DEBUGGER_PORT => {
                let p: DebuggerPortParams = parse(method, params)?;
                backend.update_debugger_port(p.worker_id, p.port).await?;
                Ok(serde_json::Value::Null)
            }
            methods::WORKERS_UPDATE_PAUSED_THREADS => {
                let p: PausedThreadsParams = parse(method, params)?;
                backend
                    .update_num_paused_threads(p.worker_id, p.delta)
                    .await?;
                Ok(serde_json::Value::Null)
            }
            methods::PLACEMENT_GROUPS_GET_ALL => Ok(serde_json::to_value(
                backend.get_all_placement_groups().await?,
            )?),
            methods::PLACEMENT_GROUPS_GET => {
                let p: PlacementGroupParams = parse(method, params)?;
                Ok(serde_json::to_value(
                    backend.get_placement_group(p.placement_group_id).await?,
                )?)
            }
            methods::PLACEMENT_GROUPS_GET_BY_NAME => {
                let p: PlacementGroupByNameParams = parse(method, params)?;
                Ok(serde_json::to_value(
                    backend
                        .get_placement_group_by_name(p.name, p.namespace)
                        .await?,
                )?)
            }
            methods::KV_GET => {
                let p: KvGetParams = parse(method, params)?;
                let value = backend
                    .internal_kv_get(p.namespace, p.key, Duration::from_millis(p.timeout_ms))
                    .await?;
                Ok(serde_json::to_value(value.map(hex::encode))?)
            }
            methods::KV_GET_INTERNAL_CONFIG => Ok(serde_json::to_value(
                backend.get_internal_config().await?,
            )?),
            _ => Err(StateError::Validation {
                field: "method".to_string(),
                message: format!("Unknown method: {}", method),
            }),
        }
    }
}
