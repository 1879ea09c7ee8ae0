//! Fault reporting subsystem.
//!
//! # Data Flow
//! ```text
//! panic in domain code
//!     → hook.rs records the panicking thread's backtrace (inside record_panics)
//!     → catch_unwind at the dispatch or supervisor boundary
//!     → report.rs capture_fault() builds a FaultError (trace + message, 500)
//! ```

pub mod hook;
pub mod report;

pub use hook::{install_panic_hook, record_panics};
pub use report::{capture_fault, panic_message, FaultError};
