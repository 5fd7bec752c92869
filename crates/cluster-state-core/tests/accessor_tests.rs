//! Integration tests for the blocking accessor over the in-memory registry.
//!
//! The accessor is a blocking API, so these are plain `#[test]` functions
//! driving it from ordinary threads.

use cluster_state::ipc::protocol::methods;
use cluster_state::records::{
    ActorRecord, JobRecord, NodeInfo, NodeState, PlacementGroupRecord, ResourceUsageBatch,
    WireRecord, WorkerRecord,
};
use cluster_state::{
    AccessorConfig, ActorId, JobId, MemoryRegistry, NodeId, PlacementGroupId, StateAccessor,
    StateError, WorkerId,
};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_millis(300);
const BACKOFF: Duration = Duration::from_millis(50);

fn test_config() -> AccessorConfig {
    AccessorConfig::default()
        .with_request_timeout(Duration::from_secs(5))
        .with_node_registration_wait(WAIT)
        .with_discovery_backoff(BACKOFF)
}

fn connected(registry: &Arc<MemoryRegistry>, config: AccessorConfig) -> StateAccessor {
    let accessor = StateAccessor::with_client(registry.clone(), config).unwrap();
    accessor.connect().unwrap();
    accessor
}

fn actor(job: u32, state: &str) -> ActorRecord {
    ActorRecord {
        actor_id: ActorId::from_random(),
        job_id: JobId::from_int(job),
        state: state.to_string(),
        name: String::new(),
        namespace: "default".to_string(),
        node_id: None,
        class_name: "Worker".to_string(),
    }
}

fn placement_group(name: &str, namespace: &str) -> PlacementGroupRecord {
    PlacementGroupRecord {
        placement_group_id: PlacementGroupId::from_random(),
        name: name.to_string(),
        namespace: namespace.to_string(),
        state: "CREATED".to_string(),
        strategy: "PACK".to_string(),
        bundles: vec![HashMap::from([("CPU".to_string(), 1.0)])],
        creator_job_id: Some(JobId::from_int(1)),
    }
}

// ========================================
// Lifecycle
// ========================================

#[test]
fn test_connect_is_idempotent() {
    let registry = Arc::new(MemoryRegistry::new());
    let accessor = StateAccessor::with_client(registry.clone(), test_config()).unwrap();

    accessor.connect().unwrap();
    accessor.connect().unwrap();

    assert!(accessor.is_connected());
    assert_eq!(registry.connect_count(), 1);
}

#[test]
fn test_disconnect_is_idempotent() {
    let registry = Arc::new(MemoryRegistry::new());
    let accessor = connected(&registry, test_config());

    accessor.disconnect();
    accessor.disconnect();
    drop(accessor);

    assert_eq!(registry.disconnect_count(), 1);
}

#[test]
fn test_requests_while_disconnected_fail() {
    let registry = Arc::new(MemoryRegistry::new());
    let accessor = connected(&registry, test_config());
    accessor.disconnect();

    assert!(matches!(
        accessor.get_all_job_info(false, false),
        Err(StateError::NotConnected)
    ));
    assert!(matches!(
        accessor.get_node(&NodeId::from_random().hex()),
        Err(StateError::NotConnected)
    ));
    assert_eq!(accessor.get_internal_kv("ns", "key"), None);
}

#[test]
fn test_call_in_flight_when_loop_stops_reports_loop_stopped() {
    let registry = Arc::new(MemoryRegistry::new());
    registry.set_latency(methods::WORKERS_GET_ALL, Duration::from_secs(30));
    let accessor = Arc::new(connected(&registry, test_config()));

    let caller = {
        let accessor = accessor.clone();
        thread::spawn(move || accessor.get_all_worker_info())
    };
    thread::sleep(Duration::from_millis(100));
    accessor.disconnect();

    let outcome = caller.join().unwrap();
    assert!(matches!(outcome, Err(StateError::LoopStopped { .. })));
}

// ========================================
// Round trips
// ========================================

#[test]
fn test_node_round_trip() {
    let registry = Arc::new(MemoryRegistry::new());
    let mut node = NodeInfo::alive(NodeId::from_random(), "10.0.0.2");
    node.node_manager_port = 45000;
    node.node_name = "worker-2".to_string();
    node.resources_total = HashMap::from([("CPU".to_string(), 8.0), ("GPU".to_string(), 1.0)]);
    registry.add_node(node.clone());
    let accessor = connected(&registry, test_config());

    let all = accessor.get_all_node_info().unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(NodeInfo::from_wire(&all[0]).unwrap(), node);
}

#[test]
fn test_listings_preserve_order() {
    let registry = Arc::new(MemoryRegistry::new());
    let actors: Vec<ActorRecord> = (0..5).map(|i| actor(i, "ALIVE")).collect();
    for a in &actors {
        registry.add_actor(a.clone());
    }
    let accessor = connected(&registry, test_config());

    let listed: Vec<ActorRecord> = accessor
        .get_all_actor_info(None, None, None)
        .unwrap()
        .iter()
        .map(|bytes| ActorRecord::from_wire(bytes).unwrap())
        .collect();
    assert_eq!(listed, actors);
}

#[test]
fn test_actor_filters_and_point_lookup() {
    let registry = Arc::new(MemoryRegistry::new());
    let alive = actor(1, "ALIVE");
    let dead = actor(1, "DEAD");
    let other_job = actor(2, "ALIVE");
    for a in [&alive, &dead, &other_job] {
        registry.add_actor(a.clone());
    }
    let accessor = connected(&registry, test_config());

    let job_one_alive = accessor
        .get_all_actor_info(None, Some(JobId::from_int(1)), Some("ALIVE".to_string()))
        .unwrap();
    assert_eq!(job_one_alive.len(), 1);
    assert_eq!(ActorRecord::from_wire(&job_one_alive[0]).unwrap(), alive);

    let by_id = accessor.get_actor_info(dead.actor_id).unwrap().unwrap();
    assert_eq!(ActorRecord::from_wire(&by_id).unwrap(), dead);
    assert!(accessor
        .get_actor_info(ActorId::from_random())
        .unwrap()
        .is_none());
}

#[test]
fn test_placement_group_lookups() {
    let registry = Arc::new(MemoryRegistry::new());
    let group = placement_group("trainers", "ml");
    registry.add_placement_group(group.clone());
    registry.add_placement_group(placement_group("trainers", "other"));
    let accessor = connected(&registry, test_config());

    assert_eq!(accessor.get_all_placement_group_info().unwrap().len(), 2);

    let by_id = accessor
        .get_placement_group_info(group.placement_group_id)
        .unwrap()
        .unwrap();
    assert_eq!(PlacementGroupRecord::from_wire(&by_id).unwrap(), group);

    let by_name = accessor
        .get_placement_group_by_name("trainers", "ml")
        .unwrap()
        .unwrap();
    assert_eq!(PlacementGroupRecord::from_wire(&by_name).unwrap(), group);
    assert!(accessor
        .get_placement_group_by_name("trainers", "missing")
        .unwrap()
        .is_none());
}

#[test]
fn test_job_listing_flags() {
    let registry = Arc::new(MemoryRegistry::new());
    registry.add_job(JobRecord {
        job_id: JobId::from_int(4),
        driver_ip_address: "10.0.0.1".to_string(),
        driver_pid: 4242,
        is_dead: true,
        start_time_ms: 10,
        end_time_ms: 20,
        namespace: "default".to_string(),
        job_info: None,
        is_running_tasks: None,
    });
    let accessor = connected(&registry, test_config());

    let full = JobRecord::from_wire(&accessor.get_all_job_info(false, false).unwrap()[0]).unwrap();
    assert_eq!(full.is_running_tasks, Some(false));

    let lean = JobRecord::from_wire(&accessor.get_all_job_info(true, true).unwrap()[0]).unwrap();
    assert_eq!(lean.is_running_tasks, None);

    assert_eq!(accessor.get_next_job_id().unwrap(), JobId::from_int(5));
}

#[test]
fn test_resource_views() {
    let registry = Arc::new(MemoryRegistry::new());
    let draining = NodeId::from_random();
    registry.set_draining(draining, 1_700_000_000_000);
    let accessor = connected(&registry, test_config());

    assert!(accessor.get_all_resource_usage().unwrap().is_none());
    registry.set_resource_usage(Some(ResourceUsageBatch::default()));
    let usage = accessor.get_all_resource_usage().unwrap().unwrap();
    assert_eq!(
        ResourceUsageBatch::from_wire(&usage).unwrap(),
        ResourceUsageBatch::default()
    );

    assert_eq!(
        accessor.get_draining_nodes().unwrap(),
        HashMap::from([(draining, 1_700_000_000_000)])
    );
    assert!(accessor.get_all_available_resources().unwrap().is_empty());
    assert!(accessor.get_all_total_resources().unwrap().is_empty());
    assert!(accessor.get_all_task_events().unwrap().is_empty());
}

#[test]
fn test_registry_failure_panics_on_caller_and_loop_survives() {
    let registry = Arc::new(MemoryRegistry::new());
    let accessor = connected(&registry, test_config());
    registry.fail_method(methods::NODES_GET_ALL, "node table unavailable");

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| accessor.get_all_node_info()));
    assert!(outcome.is_err());

    registry.clear_faults();
    assert!(accessor.get_all_node_info().unwrap().is_empty());
}

#[test]
fn test_worker_add_rejected_by_registry_panics_on_caller() {
    let registry = Arc::new(MemoryRegistry::new());
    let accessor = connected(&registry, test_config());
    registry.fail_method(methods::WORKERS_ADD, "worker table is read-only");
    let worker = WorkerRecord::alive(WorkerId::from_random());
    let payload = worker.to_wire().unwrap();

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| accessor.add_worker_info(&payload)));
    assert!(outcome.is_err());
    assert!(registry.worker(worker.worker_id).is_none());

    registry.clear_faults();
    assert!(accessor.add_worker_info(&payload).unwrap());
}

// ========================================
// Discovery
// ========================================

#[test]
fn test_get_node_gives_up_after_registration_window() {
    let registry = Arc::new(MemoryRegistry::new());
    let accessor = connected(&registry, test_config());

    let start = Instant::now();
    let err = accessor.get_node(&NodeId::from_random().hex()).unwrap_err();
    let elapsed = start.elapsed();

    match err {
        StateError::NotFound { message } => {
            assert!(message.contains("CLUSTER_STATE_NODE_REGISTRATION_WAIT_SECONDS"))
        }
        other => panic!("expected NotFound, got {:?}", other),
    }
    assert!(elapsed >= WAIT, "gave up early after {:?}", elapsed);
    // One backoff past the window, plus scheduling slack.
    assert!(
        elapsed <= WAIT + BACKOFF + Duration::from_millis(250),
        "gave up late after {:?}",
        elapsed
    );
}

#[test]
fn test_get_node_succeeds_on_the_poll_after_registration() {
    let registry = Arc::new(MemoryRegistry::new());
    let node = NodeInfo::alive(NodeId::from_random(), "10.0.0.3");
    registry.register_node_after_polls(node.clone(), 3);
    let config = test_config()
        .with_node_registration_wait(Duration::from_secs(5))
        .with_discovery_backoff(Duration::from_millis(10));
    let accessor = connected(&registry, config);

    let found = accessor.get_node(&node.node_id.hex()).unwrap();

    assert_eq!(NodeInfo::from_wire(&found).unwrap(), node);
    assert_eq!(registry.node_poll_count(), 3);
}

#[test]
fn test_get_node_ignores_dead_nodes() {
    let registry = Arc::new(MemoryRegistry::new());
    let node = NodeInfo {
        state: NodeState::Dead,
        ..NodeInfo::alive(NodeId::from_random(), "10.0.0.3")
    };
    registry.add_node(node.clone());
    let accessor = connected(&registry, test_config());

    assert!(matches!(
        accessor.get_node(&node.node_id.hex()),
        Err(StateError::NotFound { .. })
    ));
}

#[test]
fn test_driver_lookup_falls_back_to_loopback_on_registry_host() {
    let registry = Arc::new(MemoryRegistry::new().with_address("10.0.0.1", 6379));
    let local = NodeInfo::alive(NodeId::from_random(), "127.0.0.1");
    registry.add_node(local.clone());
    let accessor = connected(&registry, test_config());

    let found = accessor.get_node_to_connect_for_driver("10.0.0.1").unwrap();
    assert_eq!(NodeInfo::from_wire(&found).unwrap(), local);
}

#[test]
fn test_driver_lookup_not_found_recommends_node_ip_flag() {
    let registry = Arc::new(MemoryRegistry::new().with_address("10.0.0.1", 6379));
    let accessor = connected(&registry, test_config());

    let start = Instant::now();
    let err = accessor
        .get_node_to_connect_for_driver("192.168.1.20")
        .unwrap_err();
    assert!(start.elapsed() >= WAIT);
    match err {
        StateError::NotFound { message } => {
            assert!(message.contains("192.168.1.20"));
            assert!(message.contains("--node-ip-address"));
        }
        other => panic!("expected NotFound, got {:?}", other),
    }
}

// ========================================
// Debugger state
// ========================================

#[test]
fn test_debugger_reads_after_writes_see_the_write() {
    let registry = Arc::new(MemoryRegistry::new());
    let accessor = Arc::new(connected(&registry, test_config()));
    let worker = WorkerRecord::alive(WorkerId::from_random());
    accessor
        .add_worker_info(&worker.to_wire().unwrap())
        .unwrap();
    let worker_id = worker.worker_id;

    // Highest port whose update has fully completed.
    let published = Arc::new(AtomicU32::new(0));

    let writer = {
        let accessor = accessor.clone();
        let published = published.clone();
        thread::spawn(move || {
            for port in 1..=40u32 {
                assert!(accessor.update_worker_debugger_port(worker_id, port).unwrap());
                published.store(port, Ordering::SeqCst);
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let accessor = accessor.clone();
            let published = published.clone();
            thread::spawn(move || {
                while published.load(Ordering::SeqCst) < 40 {
                    let floor = published.load(Ordering::SeqCst);
                    let seen = accessor.get_worker_debugger_port(worker_id).unwrap();
                    assert!(seen >= floor, "read {} after {} was written", seen, floor);
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(accessor.get_worker_debugger_port(worker_id).unwrap(), 40);
}

#[test]
fn test_system_config_timeout_is_fatal() {
    let registry = Arc::new(MemoryRegistry::new());
    registry.set_system_config("{}");
    registry.set_latency(methods::KV_GET_INTERNAL_CONFIG, Duration::from_millis(500));
    let config = test_config().with_request_timeout(Duration::from_millis(50));
    let accessor = connected(&registry, config);

    let err = accessor.get_system_config().unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(err, StateError::Unavailable { .. }));
}

#[test]
fn test_concurrent_callers_share_one_accessor() {
    let registry = Arc::new(MemoryRegistry::new());
    for i in 0..10 {
        registry.add_node(NodeInfo::alive(NodeId::from_random(), format!("10.0.1.{}", i)));
    }
    let accessor = Arc::new(connected(&registry, test_config()));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let accessor = accessor.clone();
            thread::spawn(move || {
                for _ in 0..20 {
                    assert_eq!(accessor.get_all_node_info().unwrap().len(), 10);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}
