//! Session referer subsystem.
//!
//! # Data Flow
//! ```text
//! Request arrives
//!     → store.rs create() (new record at the tail, fresh id from id.rs)
//!     → session.rs Session handle passed to the domain handler
//!     → Session::old(id) resolves an earlier request's record
//!
//! Background:
//!     sweeper tick every `latency`
//!     → evict head records unread for 2 × latency
//! ```

pub mod id;
pub mod session;
pub mod store;

pub use session::{Session, SessionRecord};
pub use store::{Referer, RefererHandle, RefererStore};
