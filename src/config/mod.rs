//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → MuxConfig::normalized (unset or zero values replaced by defaults)
//!     → shared by the server, the supervisor and the referer store
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Zero means "unset" for counts, sizes and durations
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AdmissionConfig, FormConfig, MuxConfig, ObservabilityConfig, RefererConfig, ServerConfig,
};
pub use validation::{validate_config, ValidationError};
