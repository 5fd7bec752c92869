//! Node discovery with a bounded wait for registration.
//!
//! Nodes register with the registry asynchronously, so a caller that learned
//! about a node from elsewhere may ask before the registry knows it. Both
//! lookups poll filtered node listings until a match appears or the
//! registration window (`node_registration_wait`) closes.

use super::StateAccessor;
use crate::config::{AccessorDefaults, RegistryConfig};
use crate::error::{Result, StateError};
use crate::ids::NodeId;
use crate::records::{NodeFilters, NodeInfo, WireRecord};
use std::time::Instant;
use tracing::{info, warn};

impl StateAccessor {
    /// The live node with id `node_id_hex`, serialized.
    ///
    /// Fails with `NotFound` once the registration window has passed without
    /// a match.
    pub fn get_node(&self, node_id_hex: &str) -> Result<Vec<u8>> {
        let node_id = NodeId::from_hex(node_id_hex)?;
        let deadline = Instant::now() + self.config().node_registration_wait;

        loop {
            let filters = NodeFilters::alive().with_node_id(node_id);
            if let Some(node) = self.poll_nodes("get_node", filters, deadline)? {
                return Ok(node);
            }

            if Instant::now() >= deadline {
                return Err(StateError::NotFound {
                    message: format!(
                        "The registry has no live node with node ID {}. The node may not \
                         have finished registering within {:?}; try increasing {}.",
                        node_id_hex,
                        self.config().node_registration_wait,
                        AccessorDefaults::NODE_REGISTRATION_WAIT_ENV
                    ),
                });
            }
            warn!("Retrying to get node with node ID {}", node_id_hex);
            self.back_off(deadline);
        }
    }

    /// The node a driver on `node_ip_address` should attach to, serialized.
    ///
    /// Prefers a live node at the driver's own address. Otherwise falls back
    /// to a node at the registry server's host, and, when the driver runs on
    /// that host, to a node registered on the loopback address.
    pub fn get_node_to_connect_for_driver(&self, node_ip_address: &str) -> Result<Vec<u8>> {
        let deadline = Instant::now() + self.config().node_registration_wait;

        loop {
            let own = NodeFilters::alive().with_node_ip_address(node_ip_address);
            if let Some(node) = self.poll_nodes("get_node_to_connect_for_driver", own, deadline)? {
                return Ok(node);
            }

            let (registry_host, _) = self.server_address();
            let at_registry = NodeFilters::alive().with_node_ip_address(registry_host.as_str());
            let mut found =
                self.poll_nodes("get_node_to_connect_for_driver", at_registry, deadline)?;
            if found.is_none() && node_ip_address == registry_host {
                let loopback =
                    NodeFilters::alive().with_node_ip_address(RegistryConfig::LOOPBACK_ADDRESS);
                found = self.poll_nodes("get_node_to_connect_for_driver", loopback, deadline)?;
            }
            if let Some(node) = found {
                info!(
                    "This node has an IP address of {}, but no local node with the same \
                     address is registered. This can happen when connecting to the cluster \
                     with a different IP address or from inside a container.",
                    node_ip_address
                );
                return Ok(node);
            }

            if Instant::now() >= deadline {
                return Err(StateError::NotFound {
                    message: format!(
                        "This node has an IP address of {}, which is expected to be either \
                         the registry address or one of the node addresses. Connected to \
                         the registry at {}, and found no node with this IP address. You \
                         might need to provide --node-ip-address to specify the IP address \
                         that the head should use when sending to this node.",
                        node_ip_address, registry_host
                    ),
                });
            }
            warn!(
                "Nodes the driver needs to connect to have not registered with the \
                 registry yet; retrying"
            );
            self.back_off(deadline);
        }
    }

    /// One filtered listing bounded by what is left of the window.
    ///
    /// A per-call timeout counts as an empty poll; the caller decides whether
    /// the window is over.
    fn poll_nodes(
        &self,
        operation: &'static str,
        filters: NodeFilters,
        deadline: Instant,
    ) -> Result<Option<Vec<u8>>> {
        let timeout = deadline.saturating_duration_since(Instant::now());
        let pending = self.dispatch(
            operation,
            |client| async move { client.get_nodes_no_cache(filters, timeout).await },
            |outcome: Result<Vec<NodeInfo>>| {
                outcome.and_then(|nodes| nodes.first().map(WireRecord::to_wire).transpose())
            },
        )?;
        match pending.wait()? {
            Ok(found) => Ok(found),
            Err(StateError::Timeout(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn back_off(&self, deadline: Instant) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        std::thread::sleep(self.config().discovery_backoff.min(remaining));
    }
}
