//! Builder for configuring a [`StateAccessor`].

use super::StateAccessor;
use crate::client::{RegistryClient, RegistryClientOptions, RpcRegistryClient};
use crate::config::AccessorConfig;
use crate::error::Result;
use std::sync::Arc;
use std::time::Duration;

/// Builder for configuring a [`StateAccessor`].
///
/// # Example
///
/// ```rust,ignore
/// use cluster_state::StateAccessor;
/// use std::time::Duration;
///
/// let accessor = StateAccessor::builder()
///     .address("10.0.0.1:6379")?
///     .node_registration_wait(Duration::from_secs(30))
///     .build()?;
/// ```
pub struct StateAccessorBuilder {
    options: RegistryClientOptions,
    config: AccessorConfig,
    client: Option<Arc<dyn RegistryClient>>,
}

impl Default for StateAccessorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl StateAccessorBuilder {
    /// Start from the default registry address and the process-wide
    /// configuration.
    pub fn new() -> Self {
        Self {
            options: RegistryClientOptions::default(),
            config: AccessorConfig::global().clone(),
            client: None,
        }
    }

    /// Registry address as `host:port`.
    pub fn address(mut self, address: &str) -> Result<Self> {
        let connect_timeout = self.options.connect_timeout;
        self.options = RegistryClientOptions::parse(address)?.with_connect_timeout(connect_timeout);
        Ok(self)
    }

    pub fn options(mut self, options: RegistryClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Use `client` instead of connecting over RPC. Overrides the address.
    pub fn client(mut self, client: Arc<dyn RegistryClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn config(mut self, config: AccessorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.options.connect_timeout = timeout;
        self
    }

    /// Deadline for bounded control calls.
    ///
    /// Default: `CLUSTER_STATE_REQUEST_TIMEOUT_SECONDS`, or 60 seconds.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.with_request_timeout(timeout);
        self
    }

    /// How long node discovery waits for a node to register.
    ///
    /// Default: `CLUSTER_STATE_NODE_REGISTRATION_WAIT_SECONDS`, or 10 seconds.
    pub fn node_registration_wait(mut self, wait: Duration) -> Self {
        self.config = self.config.with_node_registration_wait(wait);
        self
    }

    pub fn discovery_backoff(mut self, backoff: Duration) -> Self {
        self.config = self.config.with_discovery_backoff(backoff);
        self
    }

    /// Build the accessor. Spawns its event loop; does not connect.
    pub fn build(self) -> Result<StateAccessor> {
        let client: Arc<dyn RegistryClient> = match self.client {
            Some(client) => client,
            None => Arc::new(RpcRegistryClient::new(self.options)),
        };
        StateAccessor::with_client(client, self.config)
    }
}
