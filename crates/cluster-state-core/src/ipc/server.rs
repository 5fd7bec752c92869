//! TCP server that exposes a [`RegistryService`] over the JSON-RPC transport.
//!
//! Requests on one connection are answered as they complete, not in arrival
//! order: a slow node poll does not hold up a debugger update queued behind
//! it. Clients match responses to requests by id.

use super::protocol::{read_frame, write_frame, RpcResponse};
use crate::config::RegistryConfig;
use crate::registry::RegistryService;
use crate::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Handle to a running registry server. Dropping shuts down the server.
pub struct RegistryServerHandle {
    pub addr: SocketAddr,
    pub port: u16,
    shutdown_tx: watch::Sender<bool>,
    accept_task: Option<JoinHandle<()>>,
}

impl RegistryServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting connections and close the open ones. Idempotent.
    pub fn shutdown(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for RegistryServerHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(task) = self.accept_task.take() {
            task.abort();
        }
    }
}

/// Registry server bound to a TCP listener.
pub struct RegistryServer;

impl RegistryServer {
    /// Start serving `service` on `bind_addr` (port 0 picks a free port).
    ///
    /// The accept loop runs in a background task on the current runtime.
    pub async fn start(
        bind_addr: SocketAddr,
        service: Arc<RegistryService>,
    ) -> Result<RegistryServerHandle> {
        let listener = TcpListener::bind(bind_addr).await?;
        let addr = listener.local_addr()?;
        info!("Registry server listening on {}", addr);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let accept_task = tokio::spawn(accept_connections(listener, service, shutdown_rx));

        Ok(RegistryServerHandle {
            addr,
            port: addr.port(),
            shutdown_tx,
            accept_task: Some(accept_task),
        })
    }

    /// Start serving on a random loopback port.
    pub async fn start_local(service: Arc<RegistryService>) -> Result<RegistryServerHandle> {
        Self::start(SocketAddr::from(([127, 0, 0, 1], 0)), service).await
    }
}

async fn accept_connections(
    listener: TcpListener,
    service: Arc<RegistryService>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let slots = Arc::new(Semaphore::new(RegistryConfig::MAX_IPC_CONNECTIONS));

    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown_rx.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("Registry accept error: {}", e);
                    continue;
                }
            },
        };

        // Over the cap the stream is dropped, which closes it.
        let Ok(slot) = slots.clone().try_acquire_owned() else {
            warn!(
                "Rejecting registry connection from {}: {} already open",
                peer,
                RegistryConfig::MAX_IPC_CONNECTIONS
            );
            continue;
        };

        let service = service.clone();
        let shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            debug!("Registry connection from {}", peer);
            if let Err(e) = serve_connection(stream, service, shutdown_rx).await {
                debug!("Registry connection {} ended: {}", peer, e);
            }
            drop(slot);
        });
    }

    info!("Registry server shutting down");
}

/// Read request frames until the peer hangs up or the server shuts down.
/// Each request is answered from its own task; a single writer task owns the
/// write half so response frames never interleave.
async fn serve_connection(
    stream: TcpStream,
    service: Arc<RegistryService>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    let (mut reader, writer) = stream.into_split();
    let (responses_tx, responses_rx) = mpsc::unbounded_channel::<RpcResponse>();
    let writer_task = tokio::spawn(write_responses(writer, responses_rx));

    let outcome = loop {
        let frame = tokio::select! {
            _ = shutdown_rx.changed() => break Ok(()),
            frame = read_frame(&mut reader) => match frame {
                Ok(Some(frame)) => frame,
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            },
        };

        let service = service.clone();
        let responses_tx = responses_tx.clone();
        tokio::spawn(async move {
            let _ = responses_tx.send(service.handle_frame(&frame).await);
        });
    };

    if *shutdown_rx.borrow() {
        writer_task.abort();
    } else {
        // Requests still in flight hold senders; the writer drains them.
        drop(responses_tx);
        let _ = writer_task.await;
    }
    outcome
}

async fn write_responses(
    mut writer: OwnedWriteHalf,
    mut responses: mpsc::UnboundedReceiver<RpcResponse>,
) {
    while let Some(response) = responses.recv().await {
        let frame = match serde_json::to_vec(&response) {
            Ok(frame) => frame,
            Err(e) => {
                error!("Failed to encode registry response: {}", e);
                continue;
            }
        };
        if let Err(e) = write_frame(&mut writer, &frame).await {
            debug!("Registry response write failed: {}", e);
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RegistryClient;
    use crate::ids::{NodeId, WorkerId};
    use crate::ipc::protocol::{methods, RpcRequest};
    use crate::records::{NodeInfo, WorkerRecord};
    use crate::registry::MemoryRegistry;
    use std::time::Duration;

    async fn serve(registry: Arc<MemoryRegistry>) -> RegistryServerHandle {
        RegistryServer::start_local(Arc::new(RegistryService::new(registry)))
            .await
            .unwrap()
    }

    async fn send(stream: &mut TcpStream, method: &str, params: serde_json::Value, id: u64) {
        let request = RpcRequest::new(method, params, id);
        write_frame(stream, &serde_json::to_vec(&request).unwrap())
            .await
            .unwrap();
    }

    async fn receive(stream: &mut TcpStream) -> RpcResponse {
        let frame = read_frame(stream).await.unwrap().unwrap();
        serde_json::from_slice(&frame).unwrap()
    }

    #[tokio::test]
    async fn test_server_binds_loopback() {
        let mut handle = serve(Arc::new(MemoryRegistry::new())).await;

        assert!(handle.port > 0);
        assert_eq!(handle.addr().ip(), std::net::Ipv4Addr::LOCALHOST);

        handle.shutdown();
        handle.shutdown();
    }

    #[tokio::test]
    async fn test_fast_request_overtakes_slow_one() {
        let registry = Arc::new(MemoryRegistry::new());
        registry.add_node(NodeInfo::alive(NodeId::from_random(), "10.0.0.1"));
        registry.set_latency(methods::NODES_GET_ALL, Duration::from_millis(300));
        let mut handle = serve(registry).await;

        let mut stream = TcpStream::connect(handle.addr()).await.unwrap();
        send(&mut stream, methods::NODES_GET_ALL, serde_json::json!({}), 1).await;
        send(&mut stream, methods::JOBS_NEXT_ID, serde_json::json!({}), 2).await;

        let first = receive(&mut stream).await;
        let second = receive(&mut stream).await;
        assert_eq!(first.id, Some(serde_json::json!(2)));
        assert_eq!(second.id, Some(serde_json::json!(1)));
        assert_eq!(second.result.unwrap().as_array().unwrap().len(), 1);

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_errors_travel_as_rpc_errors() {
        let mut handle = serve(Arc::new(MemoryRegistry::new())).await;
        let mut stream = TcpStream::connect(handle.addr()).await.unwrap();

        send(
            &mut stream,
            methods::WORKERS_UPDATE_PAUSED_THREADS,
            serde_json::json!({"worker_id": WorkerId::from_random().hex(), "delta": 1}),
            7,
        )
        .await;
        let response = receive(&mut stream).await;
        assert_eq!(response.error.unwrap().code, -32002);

        write_frame(&mut stream, b"{").await.unwrap();
        assert_eq!(receive(&mut stream).await.error.unwrap().code, -32700);

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_closes_open_connections() {
        let registry = Arc::new(MemoryRegistry::new());
        registry
            .add_worker(WorkerRecord::alive(WorkerId::from_random()))
            .await
            .unwrap();
        let mut handle = serve(registry).await;
        let mut stream = TcpStream::connect(handle.addr()).await.unwrap();
        send(&mut stream, methods::WORKERS_GET_ALL, serde_json::json!({}), 1).await;
        assert!(receive(&mut stream).await.error.is_none());

        handle.shutdown();

        let closed = tokio::time::timeout(Duration::from_secs(2), read_frame(&mut stream))
            .await
            .unwrap();
        assert!(matches!(closed, Ok(None) | Err(_)));
    }
}
