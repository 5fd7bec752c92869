//! cluster-state - query a cluster registry from the command line.
//!
//! Every query subcommand builds a blocking accessor, connects, runs one call
//! and prints the decoded records as JSON. `serve` hosts an in-memory
//! registry over the JSON-RPC transport for local development.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use cluster_state::{
    ActorId, JobId, MemoryRegistry, PlacementGroupId, RegistryServer, RegistryService,
    RegistrySnapshot, StateAccessor, WorkerId,
};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "cluster-state")]
#[command(about = "Blocking access to a cluster registry")]
struct Args {
    /// Registry address as host:port
    #[arg(
        short,
        long,
        global = true,
        env = "CLUSTER_STATE_ADDRESS",
        default_value = "127.0.0.1:6379"
    )]
    address: String,

    /// Override the node registration wait, in seconds
    #[arg(long, global = true)]
    registration_wait: Option<u64>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve an in-memory registry for local development
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to listen on (0 = auto-assign)
        #[arg(short, long, default_value = "6379")]
        port: u16,

        /// JSON snapshot to seed the registry with
        #[arg(long)]
        seed: Option<PathBuf>,
    },
    /// List all nodes
    Nodes,
    /// Wait for a live node by id
    Node {
        #[arg(long)]
        id: String,
    },
    /// Find the node a driver on this IP should attach to
    DriverNode {
        #[arg(long)]
        ip: String,
    },
    /// List all jobs
    Jobs {
        #[arg(long)]
        skip_job_info: bool,
        #[arg(long)]
        skip_running_tasks: bool,
    },
    /// Allocate a new job id
    NextJobId,
    /// List actors, optionally filtered
    Actors {
        #[arg(long)]
        id: Option<ActorId>,
        /// Numeric job id
        #[arg(long)]
        job: Option<u32>,
        #[arg(long)]
        state: Option<String>,
    },
    /// Look up one actor
    Actor {
        #[arg(long)]
        id: ActorId,
    },
    /// List all workers
    Workers,
    /// Look up one worker
    Worker {
        #[arg(long)]
        id: WorkerId,
    },
    /// List placement groups
    PlacementGroups,
    /// Look up one placement group by id, or by name and namespace
    PlacementGroup {
        #[arg(long, conflicts_with = "name")]
        id: Option<PlacementGroupId>,
        #[arg(long, requires = "namespace")]
        name: Option<String>,
        #[arg(long)]
        namespace: Option<String>,
    },
    /// Show resource views
    Resources {
        #[arg(value_enum, default_value = "available")]
        view: ResourceView,
    },
    /// List task events
    Tasks,
    /// Read an internal key/value entry
    KvGet {
        #[arg(long)]
        namespace: String,
        #[arg(long)]
        key: String,
    },
    /// Print the cluster system configuration
    SystemConfig,
    /// Show a worker's debugger port
    DebuggerPort {
        #[arg(long)]
        worker: WorkerId,
    },
    /// Set a worker's debugger port
    SetDebuggerPort {
        #[arg(long)]
        worker: WorkerId,
        #[arg(long)]
        port: u32,
    },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum ResourceView {
    Available,
    Total,
    Draining,
    Usage,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    match args.command {
        Command::Serve { host, port, seed } => serve(&host, port, seed.as_deref()),
        command => {
            let accessor = connect(&args.address, args.registration_wait)?;
            let output = query(&accessor, command)?;
            println!("{}", serde_json::to_string_pretty(&output)?);
            accessor.disconnect();
            Ok(())
        }
    }
}

fn connect(address: &str, registration_wait: Option<u64>) -> Result<StateAccessor> {
    let mut builder = StateAccessor::builder().address(address)?;
    if let Some(seconds) = registration_wait {
        builder = builder.node_registration_wait(Duration::from_secs(seconds));
    }
    let accessor = builder.build()?;
    accessor
        .connect()
        .with_context(|| format!("Failed to connect to registry at {}", address))?;
    Ok(accessor)
}

fn query(accessor: &StateAccessor, command: Command) -> Result<serde_json::Value> {
    let value = match command {
        Command::Serve { .. } => bail!("serve is not a query"),
        Command::Nodes => records(accessor.get_all_node_info()?)?,
        Command::Node { id } => record(accessor.get_node(&id)?)?,
        Command::DriverNode { ip } => record(accessor.get_node_to_connect_for_driver(&ip)?)?,
        Command::Jobs {
            skip_job_info,
            skip_running_tasks,
        } => records(accessor.get_all_job_info(skip_job_info, skip_running_tasks)?)?,
        Command::NextJobId => serde_json::json!(accessor.get_next_job_id()?.to_int()),
        Command::Actors { id, job, state } => records(accessor.get_all_actor_info(
            id,
            job.map(JobId::from_int),
            state,
        )?)?,
        Command::Actor { id } => optional_record(accessor.get_actor_info(id)?)?,
        Command::Workers => records(accessor.get_all_worker_info()?)?,
        Command::Worker { id } => optional_record(accessor.get_worker_info(id)?)?,
        Command::PlacementGroups => records(accessor.get_all_placement_group_info()?)?,
        Command::PlacementGroup {
            id,
            name,
            namespace,
        } => match (id, name) {
            (Some(id), _) => optional_record(accessor.get_placement_group_info(id)?)?,
            (None, Some(name)) => optional_record(
                accessor.get_placement_group_by_name(&name, namespace.as_deref().unwrap_or(""))?,
            )?,
            (None, None) => bail!("placement-group needs --id or --name"),
        },
        Command::Resources { view } => match view {
            ResourceView::Available => records(accessor.get_all_available_resources()?)?,
            ResourceView::Total => records(accessor.get_all_total_resources()?)?,
            ResourceView::Draining => serde_json::to_value(accessor.get_draining_nodes()?)?,
            ResourceView::Usage => optional_record(accessor.get_all_resource_usage()?)?,
        },
        Command::Tasks => records(accessor.get_all_task_events()?)?,
        Command::KvGet { namespace, key } => match accessor.get_internal_kv(&namespace, &key) {
            Some(bytes) => match String::from_utf8(bytes) {
                Ok(text) => serde_json::Value::String(text),
                Err(e) => serde_json::json!({ "hex": hex::encode(e.as_bytes()) }),
            },
            None => serde_json::Value::Null,
        },
        Command::SystemConfig => {
            let config = accessor.get_system_config()?;
            serde_json::from_str(&config).unwrap_or(serde_json::Value::String(config))
        }
        Command::DebuggerPort { worker } => {
            serde_json::json!(accessor.get_worker_debugger_port(worker)?)
        }
        Command::SetDebuggerPort { worker, port } => {
            serde_json::json!({ "updated": accessor.update_worker_debugger_port(worker, port)? })
        }
    };
    Ok(value)
}

/// Decode one wire record into JSON for display.
fn record(bytes: Vec<u8>) -> Result<serde_json::Value> {
    serde_json::from_slice(&bytes).context("Registry returned an undecodable record")
}

fn optional_record(bytes: Option<Vec<u8>>) -> Result<serde_json::Value> {
    bytes.map_or(Ok(serde_json::Value::Null), record)
}

fn records(items: Vec<Vec<u8>>) -> Result<serde_json::Value> {
    Ok(serde_json::Value::Array(
        items.into_iter().map(record).collect::<Result<_>>()?,
    ))
}

fn serve(host: &str, port: u16, seed: Option<&Path>) -> Result<()> {
    let registry = match seed {
        Some(path) => {
            info!("Seeding registry from {}", path.display());
            MemoryRegistry::from_snapshot(RegistrySnapshot::load(path)?)
        }
        None => MemoryRegistry::new(),
    };
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", host, port))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async move {
        let service = Arc::new(RegistryService::new(Arc::new(registry)));
        let mut handle = RegistryServer::start(addr, service).await?;

        // Machine-readable for wrappers that start the server on port 0
        println!("REGISTRY_PORT={}", handle.port);
        info!("Development registry running on {}", handle.addr());

        tokio::signal::ctrl_c().await?;
        info!("Shutdown signal received, exiting");
        handle.shutdown();
        Ok(())
    })
}
