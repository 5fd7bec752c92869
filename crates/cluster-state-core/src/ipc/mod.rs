//! Registry transport.
//!
//! Length-prefixed JSON-RPC 2.0 over TCP.
//!
//! # Architecture
//!
//! - **Connection**: client side, one framed TCP stream per registry client,
//!   responses matched to callers by request id
//! - **Server**: accepts connections and answers each request through a
//!   [`RegistryService`](crate::registry::RegistryService)
//! - **Protocol**: framing, envelopes and method parameters shared by both

pub mod connection;
pub mod protocol;
pub mod server;

pub use connection::RpcConnection;
pub use protocol::{RpcRequest, RpcResponse};
pub use server::{RegistryServer, RegistryServerHandle};
