//! Centralized configuration for the cluster-state accessor.
//!
//! Fixed protocol limits are associated constants. The tunable timeouts live
//! in [`AccessorConfig`], which is read once per process from the environment
//! and can be overridden per accessor instance.

use std::sync::OnceLock;
use std::time::Duration;
use tracing::warn;

/// Wire-protocol and server limits.
pub struct RegistryConfig;

impl RegistryConfig {
    pub const DEFAULT_HOST: &'static str = "127.0.0.1";
    pub const DEFAULT_PORT: u16 = 6379;
    pub const LOOPBACK_ADDRESS: &'static str = "127.0.0.1";
    pub const MAX_IPC_MESSAGE_SIZE: usize = 16 * 1024 * 1024; // 16MB
    pub const MAX_IPC_CONNECTIONS: usize = 256;
    pub const IPC_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
}

/// Defaults and environment knob names for [`AccessorConfig`].
pub struct AccessorDefaults;

impl AccessorDefaults {
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
    pub const NODE_REGISTRATION_WAIT: Duration = Duration::from_secs(10);
    pub const DISCOVERY_BACKOFF: Duration = Duration::from_secs(1);

    pub const REQUEST_TIMEOUT_ENV: &'static str = "CLUSTER_STATE_REQUEST_TIMEOUT_SECONDS";
    pub const NODE_REGISTRATION_WAIT_ENV: &'static str =
        "CLUSTER_STATE_NODE_REGISTRATION_WAIT_SECONDS";
    pub const DISCOVERY_BACKOFF_ENV: &'static str = "CLUSTER_STATE_DISCOVERY_BACKOFF_MS";

    pub const LOOP_THREAD_NAME: &'static str = "cluster-state-loop";
}

/// Timeouts consumed by the accessor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessorConfig {
    /// Deadline for bounded control calls (debugger state, system config)
    /// and the client-side timeout of direct key/value reads.
    pub request_timeout: Duration,
    /// How long discovery waits for a node to register before giving up.
    pub node_registration_wait: Duration,
    /// Pause between discovery polls.
    pub discovery_backoff: Duration,
}

impl Default for AccessorConfig {
    fn default() -> Self {
        Self {
            request_timeout: AccessorDefaults::REQUEST_TIMEOUT,
            node_registration_wait: AccessorDefaults::NODE_REGISTRATION_WAIT,
            discovery_backoff: AccessorDefaults::DISCOVERY_BACKOFF,
        }
    }
}

static GLOBAL_CONFIG: OnceLock<AccessorConfig> = OnceLock::new();

impl AccessorConfig {
    /// Process-wide configuration, read from the environment on first use.
    pub fn global() -> &'static AccessorConfig {
        GLOBAL_CONFIG.get_or_init(Self::from_env)
    }

    /// Build a configuration from the `CLUSTER_STATE_*` environment variables,
    /// falling back to defaults for unset or malformed values.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            request_timeout: parse_knob(
                &lookup,
                AccessorDefaults::REQUEST_TIMEOUT_ENV,
                Duration::from_secs,
            )
            .unwrap_or(defaults.request_timeout),
            node_registration_wait: parse_knob(
                &lookup,
                AccessorDefaults::NODE_REGISTRATION_WAIT_ENV,
                Duration::from_secs,
            )
            .unwrap_or(defaults.node_registration_wait),
            discovery_backoff: parse_knob(
                &lookup,
                AccessorDefaults::DISCOVERY_BACKOFF_ENV,
                Duration::from_millis,
            )
            .unwrap_or(defaults.discovery_backoff),
        }
    }

    /// Set the bounded-call deadline.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the node registration wait window.
    pub fn with_node_registration_wait(mut self, wait: Duration) -> Self {
        self.node_registration_wait = wait;
        self
    }

    /// Set the discovery poll interval.
    pub fn with_discovery_backoff(mut self, backoff: Duration) -> Self {
        self.discovery_backoff = backoff;
        self
    }
}

fn parse_knob(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    unit: fn(u64) -> Duration,
) -> Option<Duration> {
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(value) => Some(unit(value)),
        Err(_) => {
            warn!("Ignoring {}={:?}: expected a non-negative integer", key, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = AccessorConfig::default();
        assert_eq!(config.request_timeout, Duration::from_secs(60));
        assert_eq!(config.node_registration_wait, Duration::from_secs(10));
        assert_eq!(config.discovery_backoff, Duration::from_secs(1));
    }

    #[test]
    fn test_from_lookup_reads_knobs() {
        let vars: HashMap<&str, &str> = [
            (AccessorDefaults::REQUEST_TIMEOUT_ENV, "5"),
            (AccessorDefaults::NODE_REGISTRATION_WAIT_ENV, "30"),
            (AccessorDefaults::DISCOVERY_BACKOFF_ENV, "250"),
        ]
        .into_iter()
        .collect();

        let config = AccessorConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.node_registration_wait, Duration::from_secs(30));
        assert_eq!(config.discovery_backoff, Duration::from_millis(250));
    }

    #[test]
    fn test_malformed_knob_falls_back_to_default() {
        let config = AccessorConfig::from_lookup(|k| {
            (k == AccessorDefaults::REQUEST_TIMEOUT_ENV).then(|| "-3".to_string())
        });
        assert_eq!(config.request_timeout, AccessorDefaults::REQUEST_TIMEOUT);
    }

    #[test]
    fn test_builder_overrides() {
        let config = AccessorConfig::default()
            .with_request_timeout(Duration::from_millis(100))
            .with_node_registration_wait(Duration::from_millis(200))
            .with_discovery_backoff(Duration::from_millis(10));
        assert_eq!(config.request_timeout, Duration::from_millis(100));
        assert_eq!(config.node_registration_wait, Duration::from_millis(200));
        assert_eq!(config.discovery_backoff, Duration::from_millis(10));
    }
}
