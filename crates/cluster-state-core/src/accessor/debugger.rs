//! Per-worker debugger state.
//!
//! Reads take the debugger lock shared and writes take it exclusively, so a
//! read never observes a half-applied sequence of updates made through this
//! accessor. The lock is independent of the connection lock.
//!
//! Every call here waits at most `request_timeout`; missing it yields the
//! fatal [`StateError::Unavailable`].

use super::bridge::{acknowledgment, assume_available};
use super::StateAccessor;
use crate::error::{Result, StateError};
use crate::ids::WorkerId;
use crate::records::WorkerRecord;

impl StateAccessor {
    /// Debugger port of `worker_id`, or 0 when the worker is unknown.
    pub fn get_worker_debugger_port(&self, worker_id: WorkerId) -> Result<u32> {
        let _debug = self.read_debug_state();
        let pending = self.dispatch(
            "get_worker_debugger_port",
            |client| async move { client.get_worker(worker_id).await },
            |outcome: Result<Option<WorkerRecord>>| {
                outcome.map(|worker| worker.map_or(0, |w| w.debugger_port))
            },
        )?;
        let operation = pending.operation();
        Ok(assume_available(
            operation,
            pending.wait_bounded(self.config().request_timeout)?,
        ))
    }

    pub fn update_worker_debugger_port(
        &self,
        worker_id: WorkerId,
        debugger_port: u32,
    ) -> Result<bool> {
        let _debug = self.write_debug_state();
        let pending = self.dispatch(
            "update_worker_debugger_port",
            |client| async move { client.update_debugger_port(worker_id, debugger_port).await },
            acknowledgment,
        )?;
        let operation = pending.operation();
        Ok(assume_available(
            operation,
            pending.wait_bounded(self.config().request_timeout)?,
        ))
    }

    /// Adjust the paused-thread counter of `worker_id` by `delta`.
    ///
    /// Must not be called from the accessor's own event loop thread, which
    /// would then wait on itself.
    pub fn update_worker_num_paused_threads(
        &self,
        worker_id: WorkerId,
        delta: i32,
    ) -> Result<bool> {
        if self.on_loop_thread() {
            return Err(StateError::WouldDeadlock {
                operation: "update_worker_num_paused_threads".to_string(),
            });
        }

        let _debug = self.write_debug_state();
        let pending = self.dispatch(
            "update_worker_num_paused_threads",
            |client| async move { client.update_num_paused_threads(worker_id, delta).await },
            acknowledgment,
        )?;
        let operation = pending.operation();
        Ok(assume_available(
            operation,
            pending.wait_bounded(self.config().request_timeout)?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RegistryClient;
    use crate::config::AccessorConfig;
    use crate::ipc::protocol::methods;
    use crate::registry::MemoryRegistry;
    use std::sync::Arc;
    use std::time::Duration;

    fn connected(request_timeout: Duration) -> (Arc<MemoryRegistry>, StateAccessor) {
        let registry = Arc::new(MemoryRegistry::new());
        let config = AccessorConfig::default().with_request_timeout(request_timeout);
        let accessor = StateAccessor::with_client(registry.clone(), config).unwrap();
        accessor.connect().unwrap();
        (registry, accessor)
    }

    fn add_worker(accessor: &StateAccessor) -> WorkerId {
        use crate::records::WireRecord;
        let worker = WorkerRecord::alive(WorkerId::from_random());
        accessor
            .add_worker_info(&worker.to_wire().unwrap())
            .unwrap();
        worker.worker_id
    }

    #[test]
    fn test_unknown_worker_has_port_zero() {
        let (_, accessor) = connected(Duration::from_secs(5));
        assert_eq!(
            accessor
                .get_worker_debugger_port(WorkerId::from_random())
                .unwrap(),
            0
        );
    }

    #[test]
    fn test_port_update_is_visible_to_next_read() {
        let (_, accessor) = connected(Duration::from_secs(5));
        let worker = add_worker(&accessor);

        assert!(accessor.update_worker_debugger_port(worker, 5678).unwrap());
        assert_eq!(accessor.get_worker_debugger_port(worker).unwrap(), 5678);
    }

    #[test]
    fn test_paused_thread_updates_accumulate() {
        let (registry, accessor) = connected(Duration::from_secs(5));
        let worker = add_worker(&accessor);

        assert!(accessor.update_worker_num_paused_threads(worker, 2).unwrap());
        assert!(accessor.update_worker_num_paused_threads(worker, -1).unwrap());
        assert_eq!(registry.worker(worker).unwrap().num_paused_threads, 1);
    }

    #[test]
    fn test_slow_registry_is_fatal() {
        let (registry, accessor) = connected(Duration::from_millis(50));
        registry.set_latency(methods::WORKERS_GET, Duration::from_millis(500));

        let err = accessor
            .get_worker_debugger_port(WorkerId::from_random())
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_slow_debugger_port_update_is_fatal() {
        let (registry, accessor) = connected(Duration::from_millis(50));
        let worker = add_worker(&accessor);
        registry.set_latency(methods::WORKERS_UPDATE_DEBUGGER_PORT, Duration::from_millis(500));

        let err = accessor
            .update_worker_debugger_port(worker, 5678)
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_slow_paused_thread_update_is_fatal() {
        let (registry, accessor) = connected(Duration::from_millis(50));
        let worker = add_worker(&accessor);
        registry.set_latency(methods::WORKERS_UPDATE_PAUSED_THREADS, Duration::from_millis(500));

        let err = accessor
            .update_worker_num_paused_threads(worker, 1)
            .unwrap_err();
        assert!(matches!(err, StateError::Unavailable { .. }));
        assert!(err.is_fatal());
    }

    /// Client that calls back into the accessor from inside a request,
    /// which runs on the loop thread.
    struct ReentrantClient {
        inner: MemoryRegistry,
        accessor: std::sync::OnceLock<std::sync::Weak<StateAccessor>>,
        observed: std::sync::Mutex<Option<Result<bool>>>,
    }

    #[async_trait::async_trait]
    impl RegistryClient for ReentrantClient {
        async fn connect(&self) -> Result<()> {
            self.inner.connect().await
        }
        fn disconnect(&self) {
            self.inner.disconnect()
        }
        fn server_address(&self) -> (String, u16) {
            self.inner.server_address()
        }
        async fn get_all_jobs(
            &self,
            query: crate::records::JobQuery,
            timeout: Option<Duration>,
        ) -> Result<Vec<crate::records::JobRecord>> {
            self.inner.get_all_jobs(query, timeout).await
        }
        async fn get_next_job_id(&self) -> Result<crate::ids::JobId> {
            self.inner.get_next_job_id().await
        }
        async fn get_all_nodes(
            &self,
            timeout: Option<Duration>,
        ) -> Result<Vec<crate::records::NodeInfo>> {
            // Runs on the loop thread.
            if let Some(accessor) = self.accessor.get().and_then(std::sync::Weak::upgrade) {
                let outcome =
                    accessor.update_worker_num_paused_threads(WorkerId::from_random(), 1);
                *self.observed.lock().unwrap() = Some(outcome);
            }
            self.inner.get_all_nodes(timeout).await
        }
        async fn get_nodes_no_cache(
            &self,
            filters: crate::records::NodeFilters,
            timeout: Duration,
        ) -> Result<Vec<crate::records::NodeInfo>> {
            self.inner.get_nodes_no_cache(filters, timeout).await
        }
        async fn get_all_available_resources(
            &self,
        ) -> Result<Vec<crate::records::AvailableResources>> {
            self.inner.get_all_available_resources().await
        }
        async fn get_all_total_resources(&self) -> Result<Vec<crate::records::TotalResources>> {
            self.inner.get_all_total_resources().await
        }
        async fn get_draining_nodes(
            &self,
        ) -> Result<std::collections::HashMap<crate::ids::NodeId, i64>> {
            self.inner.get_draining_nodes().await
        }
        async fn get_all_resource_usage(
            &self,
        ) -> Result<Option<crate::records::ResourceUsageBatch>> {
            self.inner.get_all_resource_usage().await
        }
        async fn get_task_events(&self) -> Result<Vec<crate::records::TaskEvents>> {
            self.inner.get_task_events().await
        }
        async fn get_all_actors(
            &self,
            filter: crate::records::ActorFilter,
        ) -> Result<Vec<crate::records::ActorRecord>> {
            self.inner.get_all_actors(filter).await
        }
        async fn get_actor(
            &self,
            actor_id: crate::ids::ActorId,
        ) -> Result<Option<crate::records::ActorRecord>> {
            self.inner.get_actor(actor_id).await
        }
        async fn get_worker(&self, worker_id: WorkerId) -> Result<Option<WorkerRecord>> {
            self.inner.get_worker(worker_id).await
        }
        async fn get_all_workers(&self) -> Result<Vec<WorkerRecord>> {
            self.inner.get_all_workers().await
        }
        async fn add_worker(&self, worker: WorkerRecord) -> Result<()> {
            self.inner.add_worker(worker).await
        }
        async fn update_debugger_port(&self, worker_id: WorkerId, port: u32) -> Result<()> {
            self.inner.update_debugger_port(worker_id, port).await
        }
        async fn update_num_paused_threads(&self, worker_id: WorkerId, delta: i32) -> Result<()> {
            self.inner.update_num_paused_threads(worker_id, delta).await
        }
        async fn get_all_placement_groups(
            &self,
        ) -> Result<Vec<crate::records::PlacementGroupRecord>> {
            self.inner.get_all_placement_groups().await
        }
        async fn get_placement_group(
            &self,
            placement_group_id: crate::ids::PlacementGroupId,
        ) -> Result<Option<crate::records::PlacementGroupRecord>> {
            self.inner.get_placement_group(placement_group_id).await
        }
        async fn get_placement_group_by_name(
            &self,
            name: String,
            namespace: String,
        ) -> Result<Option<crate::records::PlacementGroupRecord>> {
            self.inner.get_placement_group_by_name(name, namespace).await
        }
        async fn internal_kv_get(
            &self,
            namespace: String,
            key: String,
            timeout: Duration,
        ) -> Result<Option<Vec<u8>>> {
            self.inner.internal_kv_get(namespace, key, timeout).await
        }
        async fn get_internal_config(&self) -> Result<Option<String>> {
            self.inner.get_internal_config().await
        }
    }

    #[test]
    fn test_paused_thread_update_from_loop_thread_is_refused() {
        let client = Arc::new(ReentrantClient {
            inner: MemoryRegistry::new(),
            accessor: std::sync::OnceLock::new(),
            observed: std::sync::Mutex::new(None),
        });
        let accessor = Arc::new(
            StateAccessor::with_client(client.clone(), AccessorConfig::default()).unwrap(),
        );
        let _ = client.accessor.set(Arc::downgrade(&accessor));
        accessor.connect().unwrap();

        accessor.get_all_node_info().unwrap();

        let observed = client.observed.lock().unwrap().take();
        assert!(matches!(
            observed,
            Some(Err(StateError::WouldDeadlock { .. }))
        ));
    }
}
