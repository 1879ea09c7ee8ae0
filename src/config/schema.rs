//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_MAX_CLIENTS: usize = 100;
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_MAX_MEMORY_MB: u64 = 32;
pub const DEFAULT_METHOD_FIELD: &str = "_method";
pub const DEFAULT_REFERER_LATENCY_SECS: u64 = 60;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct MuxConfig {
    /// Listener settings.
    pub server: ServerConfig,

    /// Concurrency bound and request deadline.
    pub admission: AdmissionConfig,

    /// Body parsing for non-read-only requests.
    pub forms: FormConfig,

    /// Session referer store.
    pub referer: RefererConfig,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,
}

impl MuxConfig {
    /// Replace unset (zero or empty) values with their defaults.
    pub fn normalized(mut self) -> Self {
        if self.admission.max_clients == 0 {
            self.admission.max_clients = DEFAULT_MAX_CLIENTS;
        }
        if self.admission.timeout_secs == 0 {
            self.admission.timeout_secs = DEFAULT_TIMEOUT_SECS;
        }
        if self.forms.max_memory_mb == 0 {
            self.forms.max_memory_mb = DEFAULT_MAX_MEMORY_MB;
        }
        if self.forms.method_field.trim().is_empty() {
            self.forms.method_field = DEFAULT_METHOD_FIELD.to_string();
        }
        if self.referer.latency_secs == 0 {
            self.referer.latency_secs = DEFAULT_REFERER_LATENCY_SECS;
        }
        self
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Admission and deadline configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Maximum requests executing the handler at once.
    pub max_clients: usize,

    /// Per-request deadline in seconds.
    pub timeout_secs: u64,
}

impl AdmissionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_clients: DEFAULT_MAX_CLIENTS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// Form and upload parsing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FormConfig {
    /// Upload memory ceiling in megabytes.
    pub max_memory_mb: u64,

    /// Form field whose value replaces the request method.
    pub method_field: String,
}

impl FormConfig {
    pub fn max_memory_bytes(&self) -> usize {
        usize::try_from(self.max_memory_mb << 20).unwrap_or(usize::MAX)
    }
}

impl Default for FormConfig {
    fn default() -> Self {
        Self {
            max_memory_mb: DEFAULT_MAX_MEMORY_MB,
            method_field: DEFAULT_METHOD_FIELD.to_string(),
        }
    }
}

/// Referer store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RefererConfig {
    /// Sweep interval in seconds; records unread for twice this long expire.
    pub latency_secs: u64,
}

impl RefererConfig {
    pub fn latency(&self) -> Duration {
        Duration::from_secs(self.latency_secs)
    }
}

impl Default for RefererConfig {
    fn default() -> Self {
        Self {
            latency_secs: DEFAULT_REFERER_LATENCY_SECS,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Serve Prometheus metrics.
    pub metrics_enabled: bool,

    /// Metrics listener address.
    pub metrics_address: String,

    /// `tracing` filter used when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
            log_filter: "request_mux=debug,tower_http=debug".to_string(),
        }
    }
}
