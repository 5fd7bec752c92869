//! Registry wire protocol: framing, JSON-RPC envelopes and method parameters.
//!
//! Every message is a 4-byte big-endian length prefix followed by a UTF-8
//! JSON-RPC 2.0 payload.
//!
//! ```text
//! [u32 BE: len][UTF-8 JSON bytes of len]
//! ```

use crate::config::RegistryConfig;
use crate::ids::{ActorId, PlacementGroupId, WorkerId};
use crate::records::{ActorFilter, JobQuery, NodeFilters, WorkerRecord};
use crate::{Result, StateError};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Registry method names.
pub mod methods {
    pub const JOBS_GET_ALL: &str = "jobs.get_all";
    pub const JOBS_NEXT_ID: &str = "jobs.next_id";
    pub const NODES_GET_ALL: &str = "nodes.get_all";
    pub const NODES_GET_FILTERED: &str = "nodes.get_filtered";
    pub const RESOURCES_AVAILABLE: &str = "node_resources.get_all_available";
    pub const RESOURCES_TOTAL: &str = "node_resources.get_all_total";
    pub const RESOURCES_DRAINING: &str = "node_resources.get_draining_nodes";
    pub const RESOURCES_USAGE: &str = "node_resources.get_all_usage";
    pub const TASKS_GET_EVENTS: &str = "tasks.get_events";
    pub const ACTORS_GET_ALL: &str = "actors.get_all";
    pub const ACTORS_GET: &str = "actors.get";
    pub const WORKERS_GET: &str = "workers.get";
    pub const WORKERS_GET_ALL: &str = "workers.get_all";
    pub const WORKERS_ADD: &str = "workers.add";
    pub const WORKERS_UPDATE_DEBUGGER_PORT: &str = "workers.update_debugger_port";
    pub const WORKERS_UPDATE_PAUSED_THREADS: &str = "workers.update_num_paused_threads";
    pub const PLACEMENT_GROUPS_GET_ALL: &str = "placement_groups.get_all";
    pub const PLACEMENT_GROUPS_GET: &str = "placement_groups.get";
    pub const PLACEMENT_GROUPS_GET_BY_NAME: &str = "placement_groups.get_by_name";
    pub const KV_GET: &str = "internal_kv.get";
    pub const KV_GET_INTERNAL_CONFIG: &str = "internal_kv.get_internal_config";
}

/// JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Option<serde_json::Value>,
    pub id: Option<serde_json::Value>,
}

impl RpcRequest {
    /// Create a new JSON-RPC 2.0 request.
    pub fn new(method: impl Into<String>, params: serde_json::Value, id: u64) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params: Some(params),
            id: Some(serde_json::Value::Number(id.into())),
        }
    }
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: Option<serde_json::Value>,
}

impl RpcResponse {
    /// Create a success response.
    pub fn success(id: Option<serde_json::Value>, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    /// Create an error response.
    pub fn error(id: Option<serde_json::Value>, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(RpcError {
                code,
                message,
                data: None,
            }),
            id,
        }
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

// Method parameters. Timeouts travel as milliseconds; `None` means the caller
// waits indefinitely.

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimeoutParams {
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsGetAllParams {
    pub query: JobQuery,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodesGetFilteredParams {
    pub filters: NodeFilters,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorsGetAllParams {
    pub filter: ActorFilter,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorParams {
    pub actor_id: ActorId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerParams {
    pub worker_id: WorkerId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddWorkerParams {
    pub worker: WorkerRecord,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebuggerPortParams {
    pub worker_id: WorkerId,
    pub port: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PausedThreadsParams {
    pub worker_id: WorkerId,
    pub delta: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementGroupParams {
    pub placement_group_id: PlacementGroupId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementGroupByNameParams {
    pub name: String,
    pub namespace: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvGetParams {
    pub namespace: String,
    pub key: String,
    pub timeout_ms: u64,
}

/// Read a length-prefixed frame from an async reader.
///
/// Frame format: `[4-byte BE u32 length][payload bytes]`
///
/// Returns `None` on clean EOF (peer closed connection).
pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;

    if len > RegistryConfig::MAX_IPC_MESSAGE_SIZE {
        return Err(StateError::Validation {
            field: "rpc_frame".to_string(),
            message: format!(
                "RPC message size {} exceeds maximum {}",
                len,
                RegistryConfig::MAX_IPC_MESSAGE_SIZE
            ),
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    Ok(Some(payload))
}

/// Write a length-prefixed frame to an async writer.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    if payload.len() > RegistryConfig::MAX_IPC_MESSAGE_SIZE {
        return Err(StateError::Validation {
            field: "rpc_frame".to_string(),
            message: format!(
                "RPC message size {} exceeds maximum {}",
                payload.len(),
                RegistryConfig::MAX_IPC_MESSAGE_SIZE
            ),
        });
    }
    let len = payload.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}
