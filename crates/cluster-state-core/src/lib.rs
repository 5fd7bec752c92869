//! Cluster State - blocking, thread-safe access to a cluster registry.
//!
//! The registry is reached through an asynchronous client. This crate wraps
//! that client in [`StateAccessor`], a synchronous facade that owns its own
//! event loop thread, so callers that cannot run async code (scripts,
//! foreign-language bindings, plain threads) can list and look up cluster
//! entities with ordinary blocking calls.
//!
//! Records come back in an opaque wire form; decode them with
//! [`records::WireRecord::from_wire`] if you need the typed view.
//!
//! # Example
//!
//! ```rust,ignore
//! use cluster_state::{records::{NodeInfo, WireRecord}, StateAccessor};
//!
//! fn main() -> cluster_state::Result<()> {
//!     let accessor = StateAccessor::builder().address("10.0.0.1:6379")?.build()?;
//!     accessor.connect()?;
//!
//!     for bytes in accessor.get_all_node_info()? {
//!         let node = NodeInfo::from_wire(&bytes)?;
//!         println!("{} {}", node.node_id, node.state);
//!     }
//!
//!     let driver_node = accessor.get_node_to_connect_for_driver("10.0.0.5")?;
//!     println!("driver attaches to {} bytes of node info", driver_node.len());
//!     Ok(())
//! }
//! ```

pub mod accessor;
pub mod client;
pub mod config;
pub mod error;
pub mod ids;
pub mod ipc;
pub mod records;
pub mod registry;

// Re-export commonly used types
pub use accessor::{StateAccessor, StateAccessorBuilder};
pub use client::{RegistryClient, RegistryClientOptions, RpcRegistryClient};
pub use config::{AccessorConfig, AccessorDefaults, RegistryConfig};
pub use error::{Result, StateError};
pub use ids::{ActorId, JobId, NodeId, PlacementGroupId, TaskId, WorkerId};
pub use ipc::{RegistryServer, RegistryServerHandle};
pub use records::WireRecord;
pub use registry::{MemoryRegistry, RegistryService, RegistrySnapshot};
