//! The capability domain code plugs into the supervisor.

use axum::response::Response;
use std::future::Future;

use crate::http::request::{Request, RequestHead};
use crate::http::response::Render;
use crate::mux::error::DispatchError;
use crate::referer::{RefererHandle, Session};

/// Error type returned by domain handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Domain entry point and error page.
///
/// `main` runs at most `max_clients` times concurrently. `error` is invoked for
/// every synthetic error (time-out, overload, fault) and for domain errors
/// returned by `main`.
pub trait Handler: Send + Sync + 'static {
    fn main(
        &self,
        request: &mut Request,
        referer: RefererHandle,
        session: Session,
    ) -> impl Future<Output = Result<Box<dyn Render>, BoxError>> + Send;

    fn error(&self, error: DispatchError, request: &RequestHead) -> Response;
}
