//! Supervisor error types.

use axum::http::StatusCode;

use crate::fault::FaultError;
use crate::mux::handler::BoxError;

/// Error handed to [`Handler::error`](crate::mux::Handler::error).
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The request was admitted but did not finish before the deadline.
    #[error("request time-out")]
    Timeout,

    /// The request was still waiting for admission at the deadline.
    #[error("max clients number of limit exceeded")]
    Overloaded,

    #[error(transparent)]
    Fault(#[from] FaultError),

    /// Returned by the domain handler; passed through unmodified.
    #[error("{0}")]
    Domain(BoxError),
}

impl DispatchError {
    pub fn status(&self) -> StatusCode {
        match self {
            DispatchError::Timeout => StatusCode::REQUEST_TIMEOUT,
            DispatchError::Overloaded => StatusCode::SERVICE_UNAVAILABLE,
            DispatchError::Fault(fault) => fault.status_code(),
            DispatchError::Domain(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            DispatchError::Timeout => "408 Request Time-out",
            DispatchError::Overloaded => "503 Service Temporarily Unavailable",
            DispatchError::Fault(fault) => &fault.title,
            DispatchError::Domain(_) => "500 Internal Server Error",
        }
    }

    /// Metric label.
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            DispatchError::Timeout => "timeout",
            DispatchError::Overloaded => "overloaded",
            DispatchError::Fault(_) => "fault",
            DispatchError::Domain(_) => "domain",
        }
    }
}

/// Errors building a [`Mux`](crate::mux::Mux).
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    #[error("handler is not set")]
    MissingHandler,

    #[error("mux must be built inside a tokio runtime")]
    NoRuntime,
}
