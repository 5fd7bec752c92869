//! TCP connection to a registry server.
//!
//! Provides a `call()` method for JSON-RPC method invocation.
//!
//! # Framing and timeouts
//!
//! A frame is never abandoned halfway. Each connection runs one reader task
//! that reads whole response frames and routes them by request id to the
//! waiting caller; each request frame is written by its own spawned task.
//! A per-call timeout only stops the caller waiting, so a late response is
//! read in full and dropped, and the stream stays aligned.

use super::protocol::{read_frame, write_frame, RpcRequest, RpcResponse};
use crate::{Result, StateError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

/// Callers waiting for a response, by request id. `None` once the reader has
/// stopped; nothing can be answered after that.
type Waiters = Arc<StdMutex<Option<HashMap<u64, oneshot::Sender<RpcResponse>>>>>;

/// Framed JSON-RPC connection to a registry server.
#[derive(Debug)]
pub struct RpcConnection {
    writer: Arc<Mutex<OwnedWriteHalf>>,
    waiters: Waiters,
    reader: JoinHandle<()>,
    address: String,
    next_id: AtomicU64,
}

impl RpcConnection {
    /// Connect to a registry server, giving up after `connect_timeout`.
    ///
    /// Must be called from within a tokio runtime; the response reader is
    /// spawned on it.
    pub async fn connect(host: &str, port: u16, connect_timeout: Duration) -> Result<Self> {
        let address = format!("{}:{}", host, port);
        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| StateError::Timeout(connect_timeout))?
            .map_err(|_| StateError::ConnectionLost {
                address: address.clone(),
            })?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();

        let waiters: Waiters = Arc::new(StdMutex::new(Some(HashMap::new())));
        let reader = tokio::spawn(read_responses(read_half, waiters.clone(), address.clone()));

        debug!("Registry connection established to {}", address);

        Ok(Self {
            writer: Arc::new(Mutex::new(write_half)),
            waiters,
            reader,
            address,
            next_id: AtomicU64::new(1),
        })
    }

    /// Call a JSON-RPC method on the registry server.
    ///
    /// With a `timeout`, the caller stops waiting after `timeout` and gets
    /// [`StateError::Timeout`]; the request itself is not withdrawn.
    pub async fn call(
        &self,
        method: &str,
        params: serde_json::Value,
        timeout: Option<Duration>,
    ) -> Result<serde_json::Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request_bytes = serde_json::to_vec(&RpcRequest::new(method, params, id))?;

        let (tx, rx) = oneshot::channel();
        self.register(id, tx)?;

        let writer = self.writer.clone();
        let write = tokio::spawn(async move {
            let mut writer = writer.lock().await;
            write_frame(&mut *writer, &request_bytes).await
        });

        let exchange = async {
            match write.await {
                Ok(Ok(())) => {}
                _ => return Err(self.lost()),
            }
            rx.await.map_err(|_| self.lost())
        };

        let response = match timeout {
            Some(limit) => match tokio::time::timeout(limit, exchange).await {
                Ok(response) => response,
                Err(_) => {
                    self.forget(id);
                    return Err(StateError::Timeout(limit));
                }
            },
            None => exchange.await,
        };
        let response = match response {
            Ok(response) => response,
            Err(e) => {
                self.forget(id);
                return Err(e);
            }
        };

        if let Some(err) = response.error {
            return Err(StateError::from_rpc_error(err.code, err.message, timeout));
        }

        // `"result": null` deserializes as `None`; unit and absent-item
        // replies both look like that.
        Ok(response.result.unwrap_or(serde_json::Value::Null))
    }

    /// Address of the connected registry server.
    pub fn address(&self) -> &str {
        &self.address
    }

    fn register(&self, id: u64, tx: oneshot::Sender<RpcResponse>) -> Result<()> {
        let mut waiters = self.waiters.lock().unwrap_or_else(PoisonError::into_inner);
        match waiters.as_mut() {
            Some(waiters) => {
                waiters.insert(id, tx);
                Ok(())
            }
            None => Err(self.lost()),
        }
    }

    fn forget(&self, id: u64) {
        if let Some(waiters) = self
            .waiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
        {
            waiters.remove(&id);
        }
    }

    fn lost(&self) -> StateError {
        StateError::ConnectionLost {
            address: self.address.clone(),
        }
    }
}

impl Drop for RpcConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Read whole response frames until the stream ends, handing each to the
/// caller waiting on its id. On exit every remaining waiter is dropped, which
/// its caller observes as a lost connection.
async fn read_responses(mut reader: OwnedReadHalf, waiters: Waiters, address: String) {
    loop {
        let frame = match read_frame(&mut reader).await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!("Registry at {} closed the connection", address);
                break;
            }
            Err(e) => {
                debug!("Registry connection to {} failed: {}", address, e);
                break;
            }
        };

        // Without an id there is no telling whose answer this was.
        let response: RpcResponse = match serde_json::from_slice(&frame) {
            Ok(response) => response,
            Err(e) => {
                debug!("Unparseable registry response from {}: {}", address, e);
                break;
            }
        };

        let waiter = response
            .id
            .as_ref()
            .and_then(serde_json::Value::as_u64)
            .and_then(|id| {
                waiters
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .as_mut()
                    .and_then(|waiters| waiters.remove(&id))
            });
        match waiter {
            Some(tx) => {
                let _ = tx.send(response);
            }
            None => debug!("Discarding unclaimed registry response {:?}", response.id),
        }
    }

    waiters.lock().unwrap_or_else(PoisonError::into_inner).take();
}
