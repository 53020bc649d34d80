//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, TTL > 0, thresholds > 0)
//! - Check addresses parse and dependency names are unique
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use crate::config::schema::{GatewayConfig, StoreBackend};

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }

    let registration = &config.registration;
    if registration.enabled {
        if registration.service_name.is_empty() || registration.service_name.contains('/') {
            errors.push(ValidationError::new(
                "registration.service_name",
                "must be non-empty and must not contain '/'",
            ));
        }
        if registration.advertise_address.is_empty() || registration.advertise_address.contains('/') {
            errors.push(ValidationError::new(
                "registration.advertise_address",
                "must be non-empty and must not contain '/'",
            ));
        }
        if registration.ttl_secs <= 0 {
            errors.push(ValidationError::new("registration.ttl_secs", "must be > 0"));
        }
    }

    if config.store.backend == StoreBackend::Etcd {
        if config.store.endpoints.is_empty() {
            errors.push(ValidationError::new("store.endpoints", "at least one endpoint required"));
        }
        if !cfg!(feature = "etcd") {
            errors.push(ValidationError::new(
                "store.backend",
                "etcd backend requires building with the `etcd` feature",
            ));
        }
    }
    if config.store.connect_attempts == 0 {
        errors.push(ValidationError::new("store.connect_attempts", "must be > 0"));
    }

    let mut seen = HashSet::new();
    for dep in &config.dependencies {
        if dep.name.is_empty() || dep.name.contains('/') {
            errors.push(ValidationError::new(
                "dependencies.name",
                format!("invalid dependency name '{}'", dep.name),
            ));
        }
        if !seen.insert(dep.name.as_str()) {
            errors.push(ValidationError::new(
                "dependencies.name",
                format!("duplicate dependency '{}'", dep.name),
            ));
        }
    }

    if config.breaker.failure_threshold == 0 {
        errors.push(ValidationError::new("breaker.failure_threshold", "must be > 0"));
    }
    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::new("timeouts.connect_secs", "must be > 0"));
    }
    if config.timeouts.call_secs == 0 {
        errors.push(ValidationError::new("timeouts.call_secs", "must be > 0"));
    }
    if config.timeouts.request_secs < config.timeouts.call_secs {
        errors.push(ValidationError::new(
            "timeouts.request_secs",
            "must be >= timeouts.call_secs",
        ));
    }
    if config.transport.max_message_bytes == 0 {
        errors.push(ValidationError::new("transport.max_message_bytes", "must be > 0"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
