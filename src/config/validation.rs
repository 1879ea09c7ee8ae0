//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate addresses and value ranges
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: MuxConfig → Result<(), Vec<ValidationError>>
//! - Zero values are legal here; normalisation turns them into defaults

use std::net::SocketAddr;

use crate::config::schema::MuxConfig;

/// Upload ceiling above which the configuration is rejected.
pub const MAX_MEMORY_LIMIT_MB: u64 = 4096;

/// Longest accepted request deadline (one day).
pub const MAX_TIMEOUT_SECS: u64 = 24 * 60 * 60;

/// Longest accepted referer sweep interval (one week).
pub const MAX_REFERER_LATENCY_SECS: u64 = 7 * 24 * 60 * 60;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub fn validate_config(config: &MuxConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError {
            field: "server.bind_address",
            message: format!("'{}' is not a socket address", config.server.bind_address),
        });
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError {
            field: "observability.metrics_address",
            message: format!(
                "'{}' is not a socket address",
                config.observability.metrics_address
            ),
        });
    }

    if config.forms.max_memory_mb > MAX_MEMORY_LIMIT_MB {
        errors.push(ValidationError {
            field: "forms.max_memory_mb",
            message: format!(
                "{} exceeds the limit of {} MB",
                config.forms.max_memory_mb, MAX_MEMORY_LIMIT_MB
            ),
        });
    }

    if config.admission.timeout_secs > MAX_TIMEOUT_SECS {
        errors.push(ValidationError {
            field: "admission.timeout_secs",
            message: format!(
                "{} exceeds the limit of {} seconds",
                config.admission.timeout_secs, MAX_TIMEOUT_SECS
            ),
        });
    }

    if config.referer.latency_secs > MAX_REFERER_LATENCY_SECS {
        errors.push(ValidationError {
            field: "referer.latency_secs",
            message: format!(
                "{} exceeds the limit of {} seconds",
                config.referer.latency_secs, MAX_REFERER_LATENCY_SECS
            ),
        });
    }

    let field = config.forms.method_field.trim();
    if field.contains(['=', '&']) {
        errors.push(ValidationError {
            field: "forms.method_field",
            message: format!("'{}' cannot be used as a form field name", field),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
