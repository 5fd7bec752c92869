//! In-memory registry.
//!
//! [`MemoryRegistry`] implements the full [`RegistryClient`] contract against
//! tables held in process. It backs the development server started by the CLI
//! and the accessor test suites, and it can be told to misbehave: per-method
//! latency, per-method failures, and nodes that only appear after a number of
//! filtered polls.
//!
//! Method keys for latency and failure injection are the wire method names in
//! [`crate::ipc::protocol::methods`], plus [`CONNECT`] for the connect routine.

pub mod service;

pub use service::RegistryService;

use crate::client::RegistryClient;
use crate::config::RegistryConfig;
use crate::error::{Result, StateError};
use crate::ids::{ActorId, JobId, NodeId, PlacementGroupId, WorkerId};
use crate::ipc::protocol::methods;
use crate::records::{
    ActorFilter, ActorRecord, AvailableResources, JobQuery, JobRecord, NodeFilters, NodeInfo,
    PlacementGroupRecord, ResourceUsageBatch, TaskEvents, TotalResources, WorkerRecord,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

/// Injection key for [`RegistryClient::connect`].
pub const CONNECT: &str = "connect";

/// Task states after which a task no longer counts as running.
const TERMINAL_TASK_STATES: &[&str] = &["FINISHED", "FAILED"];

/// Serializable contents of a [`MemoryRegistry`].
///
/// Internal KV values are stored as UTF-8 text here; the registry itself
/// holds raw bytes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySnapshot {
    pub nodes: Vec<NodeInfo>,
    pub jobs: Vec<JobRecord>,
    pub actors: Vec<ActorRecord>,
    pub workers: Vec<WorkerRecord>,
    pub placement_groups: Vec<PlacementGroupRecord>,
    pub task_events: Vec<TaskEvents>,
    pub available_resources: Vec<AvailableResources>,
    pub total_resources: Vec<TotalResources>,
    pub draining_nodes: HashMap<NodeId, i64>,
    pub resource_usage: Option<ResourceUsageBatch>,
    /// namespace -> key -> value
    pub internal_kv: HashMap<String, HashMap<String, String>>,
    pub system_config: Option<String>,
}

impl RegistrySnapshot {
    /// Load a snapshot from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| StateError::Json {
            message: format!("Invalid registry snapshot {}: {}", path.display(), e),
            source: Some(e),
        })
    }
}

#[derive(Debug, Default)]
struct Tables {
    nodes: Vec<NodeInfo>,
    /// Nodes that register once the filtered-poll counter reaches the value.
    pending_nodes: Vec<(NodeInfo, usize)>,
    jobs: Vec<JobRecord>,
    next_job: u32,
    actors: Vec<ActorRecord>,
    workers: Vec<WorkerRecord>,
    placement_groups: Vec<PlacementGroupRecord>,
    task_events: Vec<TaskEvents>,
    available_resources: Vec<AvailableResources>,
    total_resources: Vec<TotalResources>,
    draining_nodes: HashMap<NodeId, i64>,
    resource_usage: Option<ResourceUsageBatch>,
    internal_kv: HashMap<(String, String), Vec<u8>>,
    system_config: Option<String>,
}

#[derive(Debug, Default)]
struct Faults {
    latency: HashMap<String, Duration>,
    failures: HashMap<String, String>,
}

/// In-memory [`RegistryClient`].
#[derive(Debug)]
pub struct MemoryRegistry {
    host: String,
    port: u16,
    tables: Mutex<Tables>,
    faults: Mutex<Faults>,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    node_polls: AtomicUsize,
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRegistry {
    /// An empty registry that reports the default registry address.
    pub fn new() -> Self {
        Self {
            host: RegistryConfig::DEFAULT_HOST.to_string(),
            port: RegistryConfig::DEFAULT_PORT,
            tables: Mutex::new(Tables {
                next_job: 1,
                ..Default::default()
            }),
            faults: Mutex::new(Faults::default()),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            node_polls: AtomicUsize::new(0),
        }
    }

    /// A registry pre-populated from a snapshot.
    pub fn from_snapshot(snapshot: RegistrySnapshot) -> Self {
        let registry = Self::new();
        {
            let mut tables = registry.tables();
            tables.next_job = snapshot
                .jobs
                .iter()
                .map(|job| job.job_id.to_int())
                .max()
                .map_or(1, |max| max.saturating_add(1));
            tables.nodes = snapshot.nodes;
            tables.jobs = snapshot.jobs;
            tables.actors = snapshot.actors;
            tables.workers = snapshot.workers;
            tables.placement_groups = snapshot.placement_groups;
            tables.task_events = snapshot.task_events;
            tables.available_resources = snapshot.available_resources;
            tables.total_resources = snapshot.total_resources;
            tables.draining_nodes = snapshot.draining_nodes;
            tables.resource_usage = snapshot.resource_usage;
            tables.system_config = snapshot.system_config;
            for (namespace, entries) in snapshot.internal_kv {
                for (key, value) in entries {
                    tables
                        .internal_kv
                        .insert((namespace.clone(), key), value.into_bytes());
                }
            }
        }
        registry
    }

    /// Address reported by [`RegistryClient::server_address`].
    pub fn with_address(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn faults(&self) -> MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Seeding

    pub fn add_node(&self, node: NodeInfo) {
        self.tables().nodes.push(node);
    }

    /// Register `node` once `polls` filtered node queries have been made.
    pub fn register_node_after_polls(&self, node: NodeInfo, polls: usize) {
        self.tables().pending_nodes.push((node, polls));
    }

    pub fn add_job(&self, job: JobRecord) {
        let mut tables = self.tables();
        tables.next_job = tables.next_job.max(job.job_id.to_int().saturating_add(1));
        tables.jobs.push(job);
    }

    pub fn add_actor(&self, actor: ActorRecord) {
        self.tables().actors.push(actor);
    }

    pub fn add_placement_group(&self, group: PlacementGroupRecord) {
        self.tables().placement_groups.push(group);
    }

    pub fn add_task_events(&self, events: TaskEvents) {
        self.tables().task_events.push(events);
    }

    pub fn set_available_resources(&self, resources: Vec<AvailableResources>) {
        self.tables().available_resources = resources;
    }

    pub fn set_total_resources(&self, resources: Vec<TotalResources>) {
        self.tables().total_resources = resources;
    }

    pub fn set_draining(&self, node_id: NodeId, deadline_ms: i64) {
        self.tables().draining_nodes.insert(node_id, deadline_ms);
    }

    pub fn set_resource_usage(&self, usage: Option<ResourceUsageBatch>) {
        self.tables().resource_usage = usage;
    }

    pub fn put_internal_kv(&self, namespace: &str, key: &str, value: impl Into<Vec<u8>>) {
        self.tables()
            .internal_kv
            .insert((namespace.to_string(), key.to_string()), value.into());
    }

    pub fn set_system_config(&self, config: impl Into<String>) {
        self.tables().system_config = Some(config.into());
    }

    // Fault injection

    /// Delay every call of `method` by `latency`.
    pub fn set_latency(&self, method: &str, latency: Duration) {
        self.faults().latency.insert(method.to_string(), latency);
    }

    /// Make every call of `method` fail with a registry error.
    pub fn fail_method(&self, method: &str, message: impl Into<String>) {
        self.faults()
            .failures
            .insert(method.to_string(), message.into());
    }

    pub fn clear_faults(&self) {
        let mut faults = self.faults();
        faults.latency.clear();
        faults.failures.clear();
    }

    // Observation

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Number of filtered node queries served so far.
    pub fn node_poll_count(&self) -> usize {
        self.node_polls.load(Ordering::SeqCst)
    }

    pub fn worker(&self, worker_id: WorkerId) -> Option<WorkerRecord> {
        self.tables()
            .workers
            .iter()
            .find(|w| w.worker_id == worker_id)
            .cloned()
    }

    /// Apply injected latency and failure for `method`.
    ///
    /// With a `timeout` shorter than the injected latency the call gives up at
    /// the timeout and reports [`StateError::Timeout`].
    async fn simulate(&self, method: &str, timeout: Option<Duration>) -> Result<()> {
        let (latency, failure) = {
            let faults = self.faults();
            (
                faults.latency.get(method).copied(),
                faults.failures.get(method).cloned(),
            )
        };

        if let Some(latency) = latency {
            match timeout {
                Some(limit) if limit < latency => {
                    tokio::time::sleep(limit).await;
                    return Err(StateError::Timeout(limit));
                }
                _ => tokio::time::sleep(latency).await,
            }
        }

        match failure {
            Some(message) => Err(StateError::Registry { message }),
            None => Ok(()),
        }
    }

    fn update_worker(
        &self,
        worker_id: WorkerId,
        update: impl FnOnce(&mut WorkerRecord),
    ) -> Result<()> {
        let mut tables = self.tables();
        let worker = tables
            .workers
            .iter_mut()
            .find(|w| w.worker_id == worker_id)
            .ok_or_else(|| StateError::NotFound {
                message: format!("worker {}", worker_id),
            })?;
        update(worker);
        Ok(())
    }
}

fn is_running(job_id: JobId, task_events: &[TaskEvents]) -> bool {
    task_events
        .iter()
        .filter(|events| events.job_id == job_id)
        .any(|events| {
            events
                .state_updates
                .last()
                .map_or(true, |update| !TERMINAL_TASK_STATES.contains(&update.state.as_str()))
        })
}

/// Apply a signed delta to an unsigned counter, clamping at both ends.
fn apply_delta(current: u32, delta: i32) -> u32 {
    let next = i64::from(current) + i64::from(delta);
    u32::try_from(next.max(0)).unwrap_or(u32::MAX)
}

#[async_trait::async_trait]
impl RegistryClient for MemoryRegistry {
    async fn connect(&self) -> Result<()> {
        self.simulate(CONNECT, None).await?;
        self.connects.fetch_add(1, Ordering::SeqCst);
        debug!("Memory registry connected");
        Ok(())
    }

    fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    fn server_address(&self) -> (String, u16) {
        (self.host.clone(), self.port)
    }

    async fn get_all_jobs(
        &self,
        query: JobQuery,
        timeout: Option<Duration>,
    ) -> Result<Vec<JobRecord>> {
        self.simulate(methods::JOBS_GET_ALL, timeout).await?;
        let tables = self.tables();
        Ok(tables
            .jobs
            .iter()
            .map(|job| {
                let mut job = job.clone();
                if query.skip_submission_job_info_field {
                    job.job_info = None;
                }
                job.is_running_tasks = if query.skip_is_running_tasks_field {
                    None
                } else {
                    Some(!job.is_dead && is_running(job.job_id, &tables.task_events))
                };
                job
            })
            .collect())
    }

    async fn get_next_job_id(&self) -> Result<JobId> {
        self.simulate(methods::JOBS_NEXT_ID, None).await?;
        let mut tables = self.tables();
        let id = JobId::from_int(tables.next_job);
        tables.next_job = tables.next_job.saturating_add(1);
        Ok(id)
    }

    async fn get_all_nodes(&self, timeout: Option<Duration>) -> Result<Vec<NodeInfo>> {
        self.simulate(methods::NODES_GET_ALL, timeout).await?;
        Ok(self.tables().nodes.clone())
    }

    async fn get_nodes_no_cache(
        &self,
        filters: NodeFilters,
        timeout: Duration,
    ) -> Result<Vec<NodeInfo>> {
        let polls = self.node_polls.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut tables = self.tables();
            let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut tables.pending_nodes)
                .into_iter()
                .partition(|(_, after)| *after <= polls);
            tables.pending_nodes = waiting;
            for (node, _) in ready {
                debug!("Node {} registered after {} polls", node.node_id, polls);
                tables.nodes.push(node);
            }
        }

        self.simulate(methods::NODES_GET_FILTERED, Some(timeout))
            .await?;
        Ok(self
            .tables()
            .nodes
            .iter()
            .filter(|node| filters.matches(node))
            .cloned()
            .collect())
    }

    async fn get_all_available_resources(&self) -> Result<Vec<AvailableResources>> {
        self.simulate(methods::RESOURCES_AVAILABLE, None).await?;
        Ok(self.tables().available_resources.clone())
    }

    async fn get_all_total_resources(&self) -> Result<Vec<TotalResources>> {
        self.simulate(methods::RESOURCES_TOTAL, None).await?;
        Ok(self.tables().total_resources.clone())
    }

    async fn get_draining_nodes(&self) -> Result<HashMap<NodeId, i64>> {
        self.simulate(methods::RESOURCES_DRAINING, None).await?;
        Ok(self.tables().draining_nodes.clone())
    }

    async fn get_all_resource_usage(&self) -> Result<Option<ResourceUsageBatch>> {
        self.simulate(methods::RESOURCES_USAGE, None).await?;
        Ok(self.tables().resource_usage.clone())
    }

    async fn get_task_events(&self) -> Result<Vec<TaskEvents>> {
        self.simulate(methods::TASKS_GET_EVENTS, None).await?;
        Ok(self.tables().task_events.clone())
    }

    async fn get_all_actors(&self, filter: ActorFilter) -> Result<Vec<ActorRecord>> {
        self.simulate(methods::ACTORS_GET_ALL, None).await?;
        Ok(self
            .tables()
            .actors
            .iter()
            .filter(|actor| filter.matches(actor))
            .cloned()
            .collect())
    }

    async fn get_actor(&self, actor_id: ActorId) -> Result<Option<ActorRecord>> {
        self.simulate(methods::ACTORS_GET, None).await?;
        Ok(self
            .tables()
            .actors
            .iter()
            .find(|actor| actor.actor_id == actor_id)
            .cloned())
    }

    async fn get_worker(&self, worker_id: WorkerId) -> Result<Option<WorkerRecord>> {
        self.simulate(methods::WORKERS_GET, None).await?;
        Ok(self.worker(worker_id))
    }

    async fn get_all_workers(&self) -> Result<Vec<WorkerRecord>> {
        self.simulate(methods::WORKERS_GET_ALL, None).await?;
        Ok(self.tables().workers.clone())
    }

    async fn add_worker(&self, worker: WorkerRecord) -> Result<()> {
        self.simulate(methods::WORKERS_ADD, None).await?;
        let mut tables = self.tables();
        match tables
            .workers
            .iter_mut()
            .find(|w| w.worker_id == worker.worker_id)
        {
            Some(existing) => *existing = worker,
            None => tables.workers.push(worker),
        }
        Ok(())
    }

    async fn update_debugger_port(&self, worker_id: WorkerId, port: u32) -> Result<()> {
        self.simulate(methods::WORKERS_UPDATE_DEBUGGER_PORT, None)
            .await?;
        self.update_worker(worker_id, |worker| worker.debugger_port = port)
    }

    async fn update_num_paused_threads(&self, worker_id: WorkerId, delta: i32) -> Result<()> {
        self.simulate(methods::WORKERS_UPDATE_PAUSED_THREADS, None)
            .await?;
        self.update_worker(worker_id, |worker| {
            worker.num_paused_threads = apply_delta(worker.num_paused_threads, delta);
        })
    }

    async fn get_all_placement_groups(&self) -> Result<Vec<PlacementGroupRecord>> {
        self.simulate(methods::PLACEMENT_GROUPS_GET_ALL, None)
            .await?;
        Ok(self.tables().placement_groups.clone())
    }

    async fn get_placement_group(
        &self,
        placement_group_id: PlacementGroupId,
    ) -> Result<Option<PlacementGroupRecord>> {
        self.simulate(methods::PLACEMENT_GROUPS_GET, None).await?;
        Ok(self
            .tables()
            .placement_groups
            .iter()
            .find(|group| group.placement_group_id == placement_group_id)
            .cloned())
    }

    async fn get_placement_group_by_name(
        &self,
        name: String,
        namespace: String,
    ) -> Result<Option<PlacementGroupRecord>> {
        self.simulate(methods::PLACEMENT_GROUPS_GET_BY_NAME, None)
            .await?;
        Ok(self
            .tables()
            .placement_groups
            .iter()
            .find(|group| group.name == name && group.namespace == namespace)
            .cloned())
    }

    async fn internal_kv_get(
        &self,
        namespace: String,
        key: String,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>> {
        self.simulate(methods::KV_GET, Some(timeout)).await?;
        Ok(self.tables().internal_kv.get(&(namespace, key)).cloned())
    }

    async fn get_internal_config(&self) -> Result<Option<String>> {
        self.simulate(methods::KV_GET_INTERNAL_CONFIG, None).await?;
        Ok(self.tables().system_config.clone())
    }
}
