//! Bulk listings and point lookups.
//!
//! All of these assume an available registry: they wait without a deadline
//! and a registry failure panics on the calling thread. `Err` is only ever
//! returned for accessor-side conditions (not connected, loop stopped, bad
//! input).

use super::bridge::{self, acknowledgment, wire_item, wire_items};
use super::StateAccessor;
use crate::error::{Result, StateError};
use crate::ids::{ActorId, JobId, NodeId, PlacementGroupId, WorkerId};
use crate::records::{
    ActorFilter, ActorRecord, AvailableResources, JobQuery, JobRecord, NodeInfo,
    PlacementGroupRecord, ResourceUsageBatch, TaskEvents, TotalResources, WireRecord,
    WorkerRecord,
};
use std::collections::HashMap;
use tracing::{debug, warn};

impl StateAccessor {
    // Jobs

    /// Every job, optionally without the submission info or running-tasks
    /// fields (both are expensive for the registry to fill in).
    pub fn get_all_job_info(
        &self,
        skip_submission_job_info_field: bool,
        skip_is_running_tasks_field: bool,
    ) -> Result<Vec<Vec<u8>>> {
        let query = JobQuery {
            skip_submission_job_info_field,
            skip_is_running_tasks_field,
        };
        self.dispatch(
            "get_all_job_info",
            |client| async move { client.get_all_jobs(query, None).await },
            wire_items::<JobRecord>,
        )?
        .wait_available()
    }

    /// Allocate a fresh job id.
    pub fn get_next_job_id(&self) -> Result<JobId> {
        self.dispatch(
            "get_next_job_id",
            |client| async move { client.get_next_job_id().await },
            |outcome| outcome,
        )?
        .wait_available()
    }

    // Nodes

    pub fn get_all_node_info(&self) -> Result<Vec<Vec<u8>>> {
        self.dispatch(
            "get_all_node_info",
            |client| async move { client.get_all_nodes(None).await },
            wire_items::<NodeInfo>,
        )?
        .wait_available()
    }

    // Tasks

    pub fn get_all_task_events(&self) -> Result<Vec<Vec<u8>>> {
        self.dispatch(
            "get_all_task_events",
            |client| async move { client.get_task_events().await },
            wire_items::<TaskEvents>,
        )?
        .wait_available()
    }

    // Node resources

    pub fn get_all_available_resources(&self) -> Result<Vec<Vec<u8>>> {
        self.dispatch(
            "get_all_available_resources",
            |client| async move { client.get_all_available_resources().await },
            wire_items::<AvailableResources>,
        )?
        .wait_available()
    }

    pub fn get_all_total_resources(&self) -> Result<Vec<Vec<u8>>> {
        self.dispatch(
            "get_all_total_resources",
            |client| async move { client.get_all_total_resources().await },
            wire_items::<TotalResources>,
        )?
        .wait_available()
    }

    /// Draining nodes mapped to their drain deadline in ms since the epoch.
    pub fn get_draining_nodes(&self) -> Result<HashMap<NodeId, i64>> {
        self.dispatch(
            "get_draining_nodes",
            |client| async move { client.get_draining_nodes().await },
            |outcome| outcome,
        )?
        .wait_available()
    }

    /// Cluster-wide resource usage batch, if the registry has one.
    pub fn get_all_resource_usage(&self) -> Result<Option<Vec<u8>>> {
        self.dispatch(
            "get_all_resource_usage",
            |client| async move { client.get_all_resource_usage().await },
            wire_item::<ResourceUsageBatch>,
        )?
        .wait_available()
    }

    // Actors

    /// Actors matching every given filter; `None` filters match all.
    pub fn get_all_actor_info(
        &self,
        actor_id: Option<ActorId>,
        job_id: Option<JobId>,
        actor_state_name: Option<String>,
    ) -> Result<Vec<Vec<u8>>> {
        let filter = ActorFilter {
            actor_id,
            job_id,
            state: actor_state_name,
        };
        self.dispatch(
            "get_all_actor_info",
            |client| async move { client.get_all_actors(filter).await },
            wire_items::<ActorRecord>,
        )?
        .wait_available()
    }

    pub fn get_actor_info(&self, actor_id: ActorId) -> Result<Option<Vec<u8>>> {
        self.dispatch(
            "get_actor_info",
            |client| async move { client.get_actor(actor_id).await },
            wire_item::<ActorRecord>,
        )?
        .wait_available()
    }

    // Workers

    pub fn get_worker_info(&self, worker_id: WorkerId) -> Result<Option<Vec<u8>>> {
        self.dispatch(
            "get_worker_info",
            |client| async move { client.get_worker(worker_id).await },
            wire_item::<WorkerRecord>,
        )?
        .wait_available()
    }

    pub fn get_all_worker_info(&self) -> Result<Vec<Vec<u8>>> {
        self.dispatch(
            "get_all_worker_info",
            |client| async move { client.get_all_workers().await },
            wire_items::<WorkerRecord>,
        )?
        .wait_available()
    }

    /// Register a worker from its serialized record.
    ///
    /// An undecodable payload is rejected with `Validation` before anything
    /// is sent.
    pub fn add_worker_info(&self, serialized_worker: &[u8]) -> Result<bool> {
        let worker = WorkerRecord::from_wire(serialized_worker).map_err(|e| {
            StateError::Validation {
                field: "worker_info".to_string(),
                message: e.to_string(),
            }
        })?;
        self.dispatch(
            "add_worker_info",
            |client| async move { client.add_worker(worker).await },
            acknowledgment,
        )?
        .wait_available()
    }

    // Placement groups

    pub fn get_all_placement_group_info(&self) -> Result<Vec<Vec<u8>>> {
        self.dispatch(
            "get_all_placement_group_info",
            |client| async move { client.get_all_placement_groups().await },
            wire_items::<PlacementGroupRecord>,
        )?
        .wait_available()
    }

    pub fn get_placement_group_info(
        &self,
        placement_group_id: PlacementGroupId,
    ) -> Result<Option<Vec<u8>>> {
        self.dispatch(
            "get_placement_group_info",
            |client| async move { client.get_placement_group(placement_group_id).await },
            wire_item::<PlacementGroupRecord>,
        )?
        .wait_available()
    }

    pub fn get_placement_group_by_name(
        &self,
        placement_group_name: &str,
        namespace: &str,
    ) -> Result<Option<Vec<u8>>> {
        let name = placement_group_name.to_string();
        let namespace = namespace.to_string();
        self.dispatch(
            "get_placement_group_by_name",
            |client| async move { client.get_placement_group_by_name(name, namespace).await },
            wire_item::<PlacementGroupRecord>,
        )?
        .wait_available()
    }

    // Internal KV

    /// Raw value stored under `namespace`/`key`.
    ///
    /// Best effort: an absent key, a registry error or a request that
    /// outlives the request timeout all come back as `None`.
    pub fn get_internal_kv(&self, namespace: &str, key: &str) -> Option<Vec<u8>> {
        let namespace = namespace.to_string();
        let key = key.to_string();
        let timeout = self.config().request_timeout;
        let pending = match self.dispatch(
            "get_internal_kv",
            |client| async move { client.internal_kv_get(namespace, key, timeout).await },
            |outcome| outcome,
        ) {
            Ok(pending) => pending,
            Err(e) => {
                warn!("get_internal_kv not issued: {}", e);
                return None;
            }
        };
        match pending.wait() {
            Ok(Ok(value)) => value,
            Ok(Err(e)) | Err(e) => {
                debug!("get_internal_kv failed: {}", e);
                None
            }
        }
    }

    /// The cluster-wide system configuration.
    ///
    /// Bounded by the request timeout; running out of time returns the fatal
    /// [`StateError::Unavailable`].
    pub fn get_system_config(&self) -> Result<String> {
        let timeout = self.config().request_timeout;
        let pending = self.dispatch(
            "get_system_config",
            |client| async move { client.get_internal_config().await },
            |outcome| outcome,
        )?;
        let operation = pending.operation();
        let config = bridge::assume_available(operation, pending.wait_bounded(timeout)?);
        config.ok_or_else(|| StateError::NotFound {
            message: "system config has not been stored in the registry".to_string(),
        })
    }
}
