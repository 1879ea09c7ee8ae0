//! Request supervision subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound request (axum)
//!     → supervisor.rs Mux::serve (outer panic boundary)
//!     → admission: try_acquire, or queue in the dispatch task
//!     → dispatch.rs (body parsing, method override, Handler::main, inner panic boundary)
//!     → deadline race: result vs. timeout
//!     → Render::render or Handler::error
//!     → token released
//! ```

pub mod dispatch;
pub mod error;
pub mod handler;
pub mod supervisor;

pub use error::{DispatchError, MuxError};
pub use handler::{BoxError, Handler};
pub use supervisor::{Mux, MuxBuilder};
