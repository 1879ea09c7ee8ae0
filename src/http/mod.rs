//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request id, tracing, body limit)
//!     → request.rs (head/body split, path normalisation)
//!     → form.rs (urlencoded and multipart bodies)
//!     → [mux supervises the handler]
//!     → response.rs (Render / View)
//!     → Send to client
//! ```

pub mod form;
pub mod request;
pub mod response;
pub mod server;

pub use request::{Form, Request, RequestHead, Upload, X_REQUEST_ID};
pub use response::{Render, View};
pub use server::HttpServer;
