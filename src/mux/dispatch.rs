//! The dispatch task: admission wait, body parsing and the domain call.
//!
//! # Responsibilities
//! - Wait for a token when the request was not admitted immediately
//! - Parse form bodies and apply the method override
//! - Run `Handler::main` and turn a panic into a fault
//! - Hand the outcome and the token back to the supervisor
//!
//! # Design Decisions
//! - The token travels with the outcome, so it is released only after the
//!   supervisor has delivered the response; if the supervisor already gave
//!   up, the failed send drops it here instead
//! - A queued task keeps waiting and runs the handler even after its
//!   supervisor has answered; only a closed pool ends the wait

use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::oneshot;

use crate::admission::{Token, TokenPool};
use crate::fault::{capture_fault, record_panics};
use crate::http::form::{is_read_only, parse_body};
use crate::http::request::Request;
use crate::http::response::Render;
use crate::mux::error::DispatchError;
use crate::mux::handler::Handler;
use crate::observability::metrics;
use crate::referer::{RefererHandle, Session};

/// Exactly one of these reaches the supervisor per dispatched request.
pub enum Outcome {
    Render(Box<dyn Render>),
    Error(DispatchError),
}

impl std::fmt::Debug for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Render(_) => f.write_str("Outcome::Render"),
            Outcome::Error(e) => f.debug_tuple("Outcome::Error").field(e).finish(),
        }
    }
}

/// Result slot filled by the dispatch task.
pub type Delivery = (Outcome, Token);

/// Everything a dispatch task needs, detached from the supervisor.
pub struct DispatchTask<H> {
    pub handler: Arc<H>,
    pub pool: TokenPool,
    pub referer: RefererHandle,
    pub session: Session,
    pub max_memory: usize,
    pub method_field: Arc<str>,
}

impl<H: Handler> DispatchTask<H> {
    /// Run to completion. `token` is `Some` when admission already succeeded.
    pub async fn run(
        self,
        request: Request,
        token: Option<Token>,
        admitted: oneshot::Sender<()>,
        result: oneshot::Sender<Delivery>,
    ) {
        let request_id = request.head().request_id().to_string();

        let token = match token {
            Some(token) => token,
            None => match self.pool.acquire().await {
                Ok(token) => {
                    metrics::record_admission("queued");
                    if admitted.send(()).is_err() {
                        tracing::debug!(request_id = %request_id, "Admitted after the deadline, result will be discarded");
                    }
                    token
                }
                Err(e) => {
                    tracing::warn!(request_id = %request_id, error = %e, "Queued request dropped");
                    return;
                }
            },
        };

        let outcome = self.dispatch(request).await;

        if let Err((outcome, token)) = result.send((outcome, token)) {
            tracing::debug!(request_id = %request_id, ?outcome, "Late result discarded");
            token.release();
        }
    }

    async fn dispatch(self, mut request: Request) -> Outcome {
        let DispatchTask {
            handler,
            referer,
            session,
            max_memory,
            method_field,
            ..
        } = self;

        let call = async move {
            if !is_read_only(request.method()) {
                parse_body(&mut request, max_memory).await;
                request.apply_method_override(&method_field);
            }
            handler.main(&mut request, referer, session).await
        };

        match AssertUnwindSafe(record_panics(call)).catch_unwind().await {
            Ok(Ok(render)) => Outcome::Render(render),
            Ok(Err(e)) => Outcome::Error(DispatchError::Domain(e)),
            Err(payload) => {
                metrics::record_fault("dispatch");
                Outcome::Error(DispatchError::Fault(capture_fault(0, payload.as_ref())))
            }
        }
    }
}
