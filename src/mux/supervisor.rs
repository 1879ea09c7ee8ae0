//! Request supervisor.
//!
//! # Responsibilities
//! - Admit requests through the token pool
//! - Race each dispatch against the request deadline
//! - Deliver exactly one response per request
//! - Recover panics that escape the supervisor itself
//!
//! # Design Decisions
//! - Immediate admission makes a missed deadline a time-out (408); a request
//!   still queued at the deadline is reported as overloaded (503). A queued
//!   request admitted before the deadline counts as a time-out
//! - The deadline does not cancel the handler or a queued admission; the late
//!   result is discarded and the token returns when the handler finishes

use axum::response::{IntoResponse, Response};
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time;

use crate::admission::TokenPool;
use crate::config::MuxConfig;
use crate::config::schema::{DEFAULT_MAX_MEMORY_MB, DEFAULT_METHOD_FIELD, DEFAULT_TIMEOUT_SECS};
use crate::fault::{capture_fault, install_panic_hook, record_panics};
use crate::http::request::{Request, RequestHead};
use crate::mux::dispatch::{DispatchTask, Outcome};
use crate::mux::error::{DispatchError, MuxError};
use crate::mux::handler::Handler;
use crate::observability::metrics;
use crate::referer::RefererStore;
use crate::referer::store::DEFAULT_LATENCY;

/// Admission-controlled, deadline-bounded front of a [`Handler`].
pub struct Mux<H> {
    handler: Arc<H>,
    pool: TokenPool,
    referer: RefererStore,
    timeout: Duration,
    max_memory: usize,
    method_field: Arc<str>,
}

impl<H: Handler> Mux<H> {
    pub fn builder() -> MuxBuilder<H> {
        MuxBuilder::default()
    }

    /// Handle one request end to end.
    pub async fn serve(&self, request: axum::extract::Request) -> Response {
        let start = std::time::Instant::now();
        let request = Request::from_http(request);
        let head = request.head().clone();

        match AssertUnwindSafe(record_panics(self.supervise(request, &head, start)))
            .catch_unwind()
            .await
        {
            Ok(response) => response,
            Err(payload) => {
                metrics::record_fault("supervisor");
                let fault = capture_fault(0, payload.as_ref());
                tracing::error!(request_id = %head.request_id(), path = %head.path, "Supervisor panicked");
                fault.log("supervisor");
                metrics::record_request("fault", fault.status.as_u16(), start);
                (fault.status, fault.title).into_response()
            }
        }
    }

    async fn supervise(
        &self,
        request: Request,
        head: &RequestHead,
        start: std::time::Instant,
    ) -> Response {
        let token = self.pool.try_acquire();
        let speculative = if token.is_some() {
            metrics::record_admission("immediate");
            DispatchError::Timeout
        } else {
            tracing::debug!(
                request_id = %head.request_id(),
                in_use = self.pool.in_use(),
                "All tokens in use, queueing request"
            );
            DispatchError::Overloaded
        };

        let (admitted_tx, mut admitted_rx) = oneshot::channel();
        let (result_tx, result_rx) = oneshot::channel();
        let task = DispatchTask {
            handler: Arc::clone(&self.handler),
            pool: self.pool.clone(),
            referer: self.referer.handle(),
            session: self.referer.create(),
            max_memory: self.max_memory,
            method_field: Arc::clone(&self.method_field),
        };
        tokio::spawn(task.run(request, token, admitted_tx, result_tx));

        tokio::select! {
            biased;

            delivery = result_rx => match delivery {
                Ok((outcome, token)) => {
                    let response = self.deliver(outcome, head, start);
                    token.release();
                    response
                }
                Err(_) => {
                    tracing::warn!(request_id = %head.request_id(), "Dispatch ended without a result");
                    self.fail(DispatchError::Overloaded, head, start)
                }
            },
            _ = time::sleep(self.timeout) => {
                let error = match speculative {
                    DispatchError::Overloaded if admitted_rx.try_recv().is_err() => DispatchError::Overloaded,
                    _ => DispatchError::Timeout,
                };
                tracing::warn!(
                    request_id = %head.request_id(),
                    path = %head.path,
                    timeout_secs = self.timeout.as_secs_f64(),
                    error = %error,
                    "Request deadline exceeded"
                );
                self.fail(error, head, start)
            }
        }
    }

    fn deliver(&self, outcome: Outcome, head: &RequestHead, start: std::time::Instant) -> Response {
        match outcome {
            Outcome::Render(view) => {
                let response = view.render(head);
                metrics::record_request("ok", response.status().as_u16(), start);
                response
            }
            Outcome::Error(error) => self.fail(error, head, start),
        }
    }

    fn fail(&self, error: DispatchError, head: &RequestHead, start: std::time::Instant) -> Response {
        match &error {
            DispatchError::Fault(fault) => {
                tracing::error!(request_id = %head.request_id(), path = %head.path, "Handler panicked");
                fault.log("dispatch");
            }
            DispatchError::Domain(e) => {
                tracing::debug!(request_id = %head.request_id(), error = %e, "Handler returned an error");
            }
            DispatchError::Timeout | DispatchError::Overloaded => {}
        }

        let kind = error.kind();
        let response = self.handler.error(error, head);
        metrics::record_request(kind, response.status().as_u16(), start);
        response
    }

    /// Tokens currently at rest.
    pub fn tokens_available(&self) -> usize {
        self.pool.available()
    }

    pub fn pool(&self) -> &TokenPool {
        &self.pool
    }

    pub fn referer(&self) -> &RefererStore {
        &self.referer
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Stop admitting and stop the referer sweeper.
    pub fn close(&self) {
        self.pool.close();
        self.referer.close();
        tracing::info!("Mux closed");
    }
}

/// Builder for [`Mux`]. Unset or zero values take their defaults.
pub struct MuxBuilder<H> {
    handler: Option<H>,
    max_clients: usize,
    timeout: Duration,
    max_memory: usize,
    method_field: String,
    referer_latency: Duration,
    seed: Option<u64>,
}

impl<H> Default for MuxBuilder<H> {
    fn default() -> Self {
        Self {
            handler: None,
            max_clients: 0,
            timeout: Duration::ZERO,
            max_memory: 0,
            method_field: String::new(),
            referer_latency: Duration::ZERO,
            seed: None,
        }
    }
}

impl<H: Handler> MuxBuilder<H> {
    pub fn handler(mut self, handler: H) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn max_clients(mut self, max_clients: usize) -> Self {
        self.max_clients = max_clients;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Upload memory ceiling in bytes.
    pub fn max_memory(mut self, bytes: usize) -> Self {
        self.max_memory = bytes;
        self
    }

    pub fn method_field(mut self, field: impl Into<String>) -> Self {
        self.method_field = field.into();
        self
    }

    pub fn referer_latency(mut self, latency: Duration) -> Self {
        self.referer_latency = latency;
        self
    }

    /// Fixed seed for session ids.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn from_config(self, config: &MuxConfig) -> Self {
        self.max_clients(config.admission.max_clients)
            .timeout(config.admission.timeout())
            .max_memory(config.forms.max_memory_bytes())
            .method_field(config.forms.method_field.clone())
            .referer_latency(config.referer.latency())
    }

    /// Must be called inside a tokio runtime.
    pub fn build(self) -> Result<Mux<H>, MuxError> {
        let handler = self.handler.ok_or(MuxError::MissingHandler)?;
        tokio::runtime::Handle::try_current().map_err(|_| MuxError::NoRuntime)?;
        install_panic_hook();

        let timeout = if self.timeout.is_zero() {
            Duration::from_secs(DEFAULT_TIMEOUT_SECS)
        } else {
            self.timeout
        };
        let max_memory = if self.max_memory == 0 {
            (DEFAULT_MAX_MEMORY_MB as usize) << 20
        } else {
            self.max_memory
        };
        let method_field = if self.method_field.is_empty() {
            DEFAULT_METHOD_FIELD
        } else {
            self.method_field.as_str()
        };
        let latency = if self.referer_latency.is_zero() {
            DEFAULT_LATENCY
        } else {
            self.referer_latency
        };
        let referer = match self.seed {
            Some(seed) => RefererStore::with_seed(latency, seed),
            None => RefererStore::new(latency),
        };
        let pool = TokenPool::new(self.max_clients);

        tracing::info!(
            max_clients = pool.capacity(),
            timeout_secs = timeout.as_secs_f64(),
            max_memory,
            method_field,
            "Mux ready"
        );

        Ok(Mux {
            handler: Arc::new(handler),
            pool,
            referer,
            timeout,
            max_memory,
            method_field: Arc::from(method_field),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::FaultError;
    use crate::http::response::{Render, View};
    use crate::mux::handler::BoxError;
    use crate::referer::{Referer, RefererHandle, Session};
    use axum::body::Body;
    use axum::http::{header, StatusCode};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::time::Instant;

    #[derive(Default)]
    struct TestHandler {
        calls: AtomicUsize,
        active: AtomicUsize,
        peak: AtomicUsize,
        faults: Mutex<Vec<FaultError>>,
    }

    impl Handler for TestHandler {
        async fn main(
            &self,
            request: &mut Request,
            referer: RefererHandle,
            session: Session,
        ) -> Result<Box<dyn Render>, BoxError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            let result = match request.path() {
                "/sleep" => {
                    let ms = request.query("ms").and_then(|v| v.parse().ok()).unwrap_or(0);
                    time::sleep(Duration::from_millis(ms)).await;
                    Ok(View::text("slept").boxed())
                }
                "/panic" => panic!("boom"),
                "/error" | "/broken" => Err("not found".into()),
                "/redirect" => Ok(View::temporary_redirect("/").boxed()),
                "/method" => Ok(View::text(request.method().as_str().to_string()).boxed()),
                "/session" => {
                    session.set("origin", request.query("tag").unwrap_or_default());
                    Ok(View::text(session.id().to_string()).boxed())
                }
                "/old" => {
                    let id = request.query("id").unwrap_or_default();
                    let origin = referer.get(&id).map(|s| s.get("origin")).unwrap_or_default();
                    Ok(View::text(origin).boxed())
                }
                _ => Ok(View::text("ok").boxed()),
            };

            self.active.fetch_sub(1, Ordering::SeqCst);
            result
        }

        fn error(&self, error: DispatchError, request: &RequestHead) -> Response {
            if request.path == "/broken" {
                panic!("error page failed");
            }
            let status = match &error {
                DispatchError::Domain(_) => StatusCode::NOT_FOUND,
                DispatchError::Fault(fault) => {
                    self.faults.lock().unwrap().push(fault.clone());
                    error.status()
                }
                _ => error.status(),
            };
            (status, error.to_string()).into_response()
        }
    }

    fn mux(max_clients: usize, timeout: Duration) -> Arc<Mux<TestHandler>> {
        Arc::new(
            Mux::builder()
                .handler(TestHandler::default())
                .max_clients(max_clients)
                .timeout(timeout)
                .seed(7)
                .build()
                .unwrap(),
        )
    }

    fn get(uri: &str) -> axum::extract::Request {
        axum::http::Request::builder()
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn spawn_request(
        mux: &Arc<Mux<TestHandler>>,
        uri: &str,
    ) -> tokio::task::JoinHandle<Response> {
        let mux = Arc::clone(mux);
        let request = get(uri);
        tokio::spawn(async move { mux.serve(request).await })
    }

    #[test]
    fn test_build_outside_runtime_fails() {
        let result = Mux::builder().handler(TestHandler::default()).build();
        assert!(matches!(result, Err(MuxError::NoRuntime)));
    }

    #[tokio::test]
    async fn test_build_without_handler_fails() {
        let result = MuxBuilder::<TestHandler>::default().build();
        assert!(matches!(result, Err(MuxError::MissingHandler)));
    }

    #[tokio::test]
    async fn test_zero_values_take_defaults() {
        let mux = mux(0, Duration::ZERO);
        assert_eq!(mux.pool().capacity(), 100);
        assert_eq!(mux.timeout(), Duration::from_secs(60));
        assert_eq!(mux.referer().latency(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_never_exceeds_max_clients() {
        let mux = mux(2, Duration::from_secs(60));
        let requests: Vec<_> = (0..5)
            .map(|_| spawn_request(&mux, "/sleep?ms=1000"))
            .collect();

        for request in requests {
            let response = request.await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        assert_eq!(mux.handler().peak.load(Ordering::SeqCst), 2);
        assert_eq!(mux.tokens_available(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_request_is_rendered() {
        let mux = mux(1, Duration::from_secs(2));
        let response = mux.serve(get("/sleep?ms=500")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "slept");
    }

    #[tokio::test(start_paused = true)]
    async fn test_admitted_request_times_out_at_deadline() {
        let mux = mux(2, Duration::from_secs(2));
        let start = Instant::now();

        let response = mux.serve(get("/sleep?ms=5000")).await;
        let elapsed = start.elapsed();

        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(body_text(response).await, "request time-out");
        assert!(elapsed >= Duration::from_secs(2));
        assert!(elapsed < Duration::from_millis(2100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_token_returns_when_handler_finishes() {
        let mux = mux(1, Duration::from_secs(2));
        let response = mux.serve(get("/sleep?ms=5000")).await;
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(mux.tokens_available(), 0, "handler still running");

        time::sleep(Duration::from_secs(4)).await;
        assert_eq!(mux.tokens_available(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_queued_past_deadline_is_overloaded() {
        let mux = mux(1, Duration::from_secs(2));
        let busy = spawn_request(&mux, "/sleep?ms=5000");
        time::sleep(Duration::from_millis(10)).await;

        let response = mux.serve(get("/")).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            body_text(response).await,
            "max clients number of limit exceeded"
        );

        assert_eq!(busy.await.unwrap().status(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(mux.handler().calls.load(Ordering::SeqCst), 1);

        // The overloaded request is still admitted once the slow handler ends,
        // runs for nobody, and gives its token back.
        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(mux.handler().calls.load(Ordering::SeqCst), 2);
        assert_eq!(mux.handler().peak.load(Ordering::SeqCst), 1);
        assert_eq!(mux.tokens_available(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_then_admitted_request_times_out() {
        let mux = mux(1, Duration::from_secs(2));
        let first = spawn_request(&mux, "/sleep?ms=1000");
        time::sleep(Duration::from_millis(10)).await;

        let response = mux.serve(get("/sleep?ms=5000")).await;
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(first.await.unwrap().status(), StatusCode::OK);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_requests_leave_pool_at_rest() {
        let mux = mux(1, Duration::from_secs(2));
        for _ in 0..10 {
            let response = mux.serve(get("/")).await;
            assert_eq!(response.status(), StatusCode::OK);
        }
        assert_eq!(mux.tokens_available(), 1);
    }

    #[tokio::test]
    async fn test_handler_panic_becomes_fault() {
        let mux = mux(1, Duration::from_secs(2));
        let response = mux.serve(get("/panic")).await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_text(response).await, "runtime error. boom");

        let faults = mux.handler().faults.lock().unwrap();
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].title, "500 Internal Server Error");
        assert!(!faults[0].stack_trace.is_empty());
        drop(faults);

        assert_eq!(mux.tokens_available(), 1);
    }

    #[tokio::test]
    async fn test_panic_in_error_page_is_recovered() {
        let mux = mux(1, Duration::from_secs(2));
        let response = mux.serve(get("/broken")).await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(mux.tokens_available(), 1);

        let response = mux.serve(get("/")).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_domain_error_passes_through() {
        let mux = mux(1, Duration::from_secs(2));
        let response = mux.serve(get("/error")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_text(response).await, "not found");
    }

    #[tokio::test]
    async fn test_redirect_with_trailing_slash() {
        let mux = mux(1, Duration::from_secs(2));
        let response = mux.serve(get("/redirect/")).await;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()[header::LOCATION], "/");
    }

    #[tokio::test]
    async fn test_method_override_from_urlencoded_body() {
        let mux = mux(1, Duration::from_secs(2));
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/method")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("_method=delete&name=x"))
            .unwrap();

        let response = mux.serve(request).await;
        assert_eq!(body_text(response).await, "DELETE");

        let response = mux.serve(get("/method?_method=delete")).await;
        assert_eq!(body_text(response).await, "GET", "GET bodies are never parsed");
    }

    #[tokio::test]
    async fn test_later_request_reads_earlier_session() {
        let mux = mux(2, Duration::from_secs(2));
        let id = body_text(mux.serve(get("/session?tag=landing")).await).await;
        assert_eq!(id.len(), 64);

        let origin = body_text(mux.serve(get(&format!("/old?id={id}"))).await).await;
        assert_eq!(origin, "landing");

        let missing = body_text(mux.serve(get("/old?id=undefined")).await).await;
        assert_eq!(missing, "");
    }

    #[tokio::test]
    async fn test_closed_mux_reports_overloaded() {
        let mux = mux(1, Duration::from_secs(60));
        mux.close();

        let response = mux.serve(get("/")).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
