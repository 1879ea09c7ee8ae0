//! Admission control subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound request
//!     → pool.rs try_acquire (immediate admission)
//!     → or pool.rs acquire (queued until a token frees up)
//!     → Token held by the dispatch task
//!     → Token dropped after the outcome is delivered
//! ```
//!
//! # Design Decisions
//! - Tokens are RAII guards; release cannot be forgotten or repeated
//! - Only handler execution is bounded; waiting requests are not
//! - Queue order is FIFO (tokio's semaphore is fair)

pub mod pool;

pub use pool::{PoolClosed, Token, TokenPool};
