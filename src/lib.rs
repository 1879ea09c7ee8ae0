//! Request admission and session referer library.
//!
//! Fronts a domain [`Handler`] with a bounded token pool, a per-request
//! deadline, panic recovery and a time-indexed session store.

// Core subsystems
pub mod admission;
pub mod http;
pub mod mux;
pub mod referer;

// Cross-cutting concerns
pub mod config;
pub mod fault;
pub mod lifecycle;
pub mod observability;

pub use config::schema::MuxConfig;
pub use http::{HttpServer, Render, Request, RequestHead, View};
pub use lifecycle::Shutdown;
pub use mux::{BoxError, DispatchError, Handler, Mux, MuxError};
pub use referer::{Referer, RefererHandle, Session};
