//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, connection limits).
    pub listener: ListenerConfig,

    /// Self-registration in the coordination store.
    pub registration: RegistrationConfig,

    /// Coordination store connection.
    pub store: StoreConfig,

    /// Downstream services this gateway calls.
    pub dependencies: Vec<DependencyConfig>,

    /// Circuit breaker thresholds (shared by all dependencies).
    pub breaker: BreakerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Outbound transport tuning.
    pub transport: TransportConfig,

    /// Watch subscription settings.
    pub watch: WatchConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum accepted request body in bytes.
    pub max_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_body_bytes: 4 * 1024 * 1024,
        }
    }
}

/// How this process announces itself.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistrationConfig {
    /// Register on startup and deregister on shutdown.
    pub enabled: bool,

    /// Service name used as the key prefix (`/services/{service_name}/`).
    pub service_name: String,

    /// Address peers should use to reach this process.
    pub advertise_address: String,

    /// Lease TTL in seconds.
    pub ttl_secs: i64,

    /// Base delay for re-registration backoff after lease loss.
    pub retry_base_delay_ms: u64,

    /// Cap for re-registration backoff.
    pub retry_max_delay_ms: u64,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            service_name: "gateway".to_string(),
            advertise_address: "127.0.0.1:8080".to_string(),
            ttl_secs: 10,
            retry_base_delay_ms: 200,
            retry_max_delay_ms: 5_000,
        }
    }
}

/// Which coordination store implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// etcd v3 cluster (requires the `etcd` feature).
    Etcd,
    /// In-process store; single-node development only.
    Memory,
}

/// Coordination store connection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,

    /// Cluster endpoints (e.g., "http://127.0.0.1:2379").
    pub endpoints: Vec<String>,

    /// Connection attempts before startup gives up.
    pub connect_attempts: u32,

    /// Base delay for connect backoff in milliseconds.
    pub connect_base_delay_ms: u64,

    /// Maximum delay for connect backoff in milliseconds.
    pub connect_max_delay_ms: u64,
}

impl Default for StoreBackend {
    /// etcd when it is compiled in, otherwise the in-process store.
    fn default() -> Self {
        if cfg!(feature = "etcd") {
            StoreBackend::Etcd
        } else {
            StoreBackend::Memory
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            endpoints: vec!["http://127.0.0.1:2379".to_string()],
            connect_attempts: 5,
            connect_base_delay_ms: 100,
            connect_max_delay_ms: 2_000,
        }
    }
}

/// A downstream service resolved through the coordination store.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DependencyConfig {
    /// Service name as registered by its instances.
    pub name: String,

    /// Open a watch on the service prefix to invalidate stale connections.
    #[serde(default = "default_watch")]
    pub watch: bool,
}

fn default_watch() -> bool {
    true
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,

    /// Seconds the circuit stays open before a trial call is admitted.
    pub cooldown_secs: u64,

    /// Admit a single Half-Open trial after the cooldown instead of closing.
    pub half_open_single_trial: bool,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown_secs: 30,
            half_open_single_trial: false,
        }
    }
}

impl BreakerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Dial deadline for a new downstream connection in seconds.
    pub connect_secs: u64,

    /// Deadline for a single downstream call in seconds.
    pub call_secs: u64,

    /// Whole inbound request deadline in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            call_secs: 10,
            request_secs: 30,
        }
    }
}

/// Outbound HTTP/2 transport settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Keepalive ping interval in seconds.
    pub keepalive_interval_secs: u64,

    /// Keepalive ping acknowledgement timeout in seconds.
    pub keepalive_timeout_secs: u64,

    /// Send pings even when no call is in flight.
    pub keepalive_while_idle: bool,

    /// Maximum encoded request or response size.
    pub max_message_bytes: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            keepalive_interval_secs: 10,
            keepalive_timeout_secs: 1,
            keepalive_while_idle: true,
            max_message_bytes: 4 * 1024 * 1024,
        }
    }
}

/// Watch subscription settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Delay before re-opening a broken subscription in milliseconds.
    pub reconnect_delay_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: 1_000,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins if set.
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
