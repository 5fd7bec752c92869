//! Registry entity records and query filters.
//!
//! The accessor never hands these structs to its callers. Every record leaves
//! the accessor in its opaque wire form (see [`WireRecord`]) so that callers on
//! the far side of a language boundary do not need to share these types.

use crate::error::Result;
use crate::ids::{ActorId, JobId, NodeId, PlacementGroupId, TaskId, WorkerId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Opaque byte-string form of a registry record.
pub trait WireRecord: Serialize + DeserializeOwned {
    /// Serialize the record to its wire form.
    fn to_wire(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse a record from its wire form.
    fn from_wire(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Liveness state of a registered node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeState {
    Alive,
    Dead,
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeState::Alive => write!(f, "ALIVE"),
            NodeState::Dead => write!(f, "DEAD"),
        }
    }
}

/// A node as registered with the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_id: NodeId,
    pub state: NodeState,
    pub node_manager_address: String,
    #[serde(default)]
    pub node_manager_port: u16,
    #[serde(default)]
    pub node_name: String,
    #[serde(default)]
    pub resources_total: HashMap<String, f64>,
}

impl NodeInfo {
    /// A live node at `address` with default port and no resources.
    pub fn alive(node_id: NodeId, address: impl Into<String>) -> Self {
        Self {
            node_id,
            state: NodeState::Alive,
            node_manager_address: address.into(),
            node_manager_port: 0,
            node_name: String::new(),
            resources_total: HashMap::new(),
        }
    }
}

/// Subset of node fields a filtered query matches on. Unset fields match
/// every node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeFilters {
    pub state: Option<NodeState>,
    pub node_id: Option<NodeId>,
    pub node_ip_address: Option<String>,
}

impl NodeFilters {
    /// Filters matching live nodes only.
    pub fn alive() -> Self {
        Self {
            state: Some(NodeState::Alive),
            ..Default::default()
        }
    }

    pub fn with_node_id(mut self, node_id: NodeId) -> Self {
        self.node_id = Some(node_id);
        self
    }

    pub fn with_node_ip_address(mut self, address: impl Into<String>) -> Self {
        self.node_ip_address = Some(address.into());
        self
    }

    pub fn matches(&self, node: &NodeInfo) -> bool {
        self.state.map_or(true, |s| s == node.state)
            && self.node_id.map_or(true, |id| id == node.node_id)
            && self
                .node_ip_address
                .as_deref()
                .map_or(true, |ip| ip == node.node_manager_address)
    }
}

/// Submission-job details attached to a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSubmissionInfo {
    pub submission_id: String,
    pub status: String,
    #[serde(default)]
    pub entrypoint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub driver_ip_address: String,
    #[serde(default)]
    pub driver_pid: u32,
    #[serde(default)]
    pub is_dead: bool,
    #[serde(default)]
    pub start_time_ms: u64,
    #[serde(default)]
    pub end_time_ms: u64,
    #[serde(default)]
    pub namespace: String,
    /// Omitted when the listing asked to skip submission info.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_info: Option<JobSubmissionInfo>,
    /// Omitted when the listing asked to skip the running-tasks check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_running_tasks: Option<bool>,
}

/// Field-skipping flags for job listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobQuery {
    pub skip_submission_job_info_field: bool,
    pub skip_is_running_tasks_field: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorRecord {
    pub actor_id: ActorId,
    pub job_id: JobId,
    pub state: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    #[serde(default)]
    pub class_name: String,
}

/// Optional filters for actor listings. Unset fields match every actor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActorFilter {
    pub actor_id: Option<ActorId>,
    pub job_id: Option<JobId>,
    pub state: Option<String>,
}

impl ActorFilter {
    pub fn matches(&self, actor: &ActorRecord) -> bool {
        self.actor_id.map_or(true, |id| id == actor.actor_id)
            && self.job_id.map_or(true, |id| id == actor.job_id)
            && self.state.as_deref().map_or(true, |s| s == actor.state)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub worker_id: WorkerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    #[serde(default)]
    pub ip_address: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub pid: u32,
    #[serde(default)]
    pub is_alive: bool,
    #[serde(default)]
    pub worker_type: String,
    #[serde(default)]
    pub debugger_port: u32,
    #[serde(default)]
    pub num_paused_threads: u32,
}

impl WorkerRecord {
    /// A live worker with no debugger attached.
    pub fn alive(worker_id: WorkerId) -> Self {
        Self {
            worker_id,
            node_id: None,
            ip_address: String::new(),
            port: 0,
            pid: 0,
            is_alive: true,
            worker_type: "WORKER".to_string(),
            debugger_port: 0,
            num_paused_threads: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementGroupRecord {
    pub placement_group_id: PlacementGroupId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    pub state: String,
    #[serde(default)]
    pub strategy: String,
    #[serde(default)]
    pub bundles: Vec<HashMap<String, f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator_job_id: Option<JobId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStateUpdate {
    pub state: String,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvents {
    pub task_id: TaskId,
    pub job_id: JobId,
    #[serde(default)]
    pub attempt_number: u32,
    #[serde(default)]
    pub state_updates: Vec<TaskStateUpdate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailableResources {
    pub node_id: NodeId,
    pub resources_available: HashMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TotalResources {
    pub node_id: NodeId,
    pub resources_total: HashMap<String, f64>,
}

/// Resource view of a single node inside a usage batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeResourceUsage {
    pub node_id: NodeId,
    #[serde(default)]
    pub resources_available: HashMap<String, f64>,
    #[serde(default)]
    pub resources_total: HashMap<String, f64>,
    #[serde(default)]
    pub resource_load: HashMap<String, f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsageBatch {
    pub batch: Vec<NodeResourceUsage>,
}

impl WireRecord for NodeInfo {}
impl WireRecord for JobRecord {}
impl WireRecord for ActorRecord {}
impl WireRecord for WorkerRecord {}
impl WireRecord for PlacementGroupRecord {}
impl WireRecord for TaskEvents {}
impl WireRecord for AvailableResources {}
impl WireRecord for TotalResources {}
impl WireRecord for ResourceUsageBatch {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_state_wire_names() {
        assert_eq!(serde_json::to_string(&NodeState::Alive).unwrap(), "\"ALIVE\"");
        assert_eq!(NodeState::Dead.to_string(), "DEAD");
    }

    #[test]
    fn test_filters_match_subset_of_fields() {
        let id = NodeId::from_random();
        let node = NodeInfo::alive(id, "10.0.0.5");

        assert!(NodeFilters::default().matches(&node));
        assert!(NodeFilters::alive().with_node_id(id).matches(&node));
        assert!(NodeFilters::alive()
            .with_node_ip_address("10.0.0.5")
            .matches(&node));
        assert!(!NodeFilters::alive()
            .with_node_ip_address("10.0.0.6")
            .matches(&node));

        let dead = NodeInfo {
            state: NodeState::Dead,
            ..node
        };
        assert!(!NodeFilters::alive().with_node_id(id).matches(&dead));
    }

    #[test]
    fn test_actor_filter() {
        let actor = ActorRecord {
            actor_id: ActorId::from_random(),
            job_id: JobId::from_int(3),
            state: "ALIVE".into(),
            name: String::new(),
            namespace: String::new(),
            node_id: None,
            class_name: "Counter".into(),
        };
        assert!(ActorFilter::default().matches(&actor));
        assert!(ActorFilter {
            job_id: Some(JobId::from_int(3)),
            state: Some("ALIVE".into()),
            ..Default::default()
        }
        .matches(&actor));
        assert!(!ActorFilter {
            state: Some("DEAD".into()),
            ..Default::default()
        }
        .matches(&actor));
    }

    #[test]
    fn test_skipped_job_fields_are_omitted_on_the_wire() {
        let job = JobRecord {
            job_id: JobId::from_int(1),
            driver_ip_address: "10.0.0.1".into(),
            driver_pid: 10,
            is_dead: false,
            start_time_ms: 1,
            end_time_ms: 0,
            namespace: "default".into(),
            job_info: None,
            is_running_tasks: None,
        };
        let wire = String::from_utf8(job.to_wire().unwrap()).unwrap();
        assert!(!wire.contains("job_info"));
        assert!(!wire.contains("is_running_tasks"));
        assert_eq!(JobRecord::from_wire(wire.as_bytes()).unwrap(), job);
    }
}
