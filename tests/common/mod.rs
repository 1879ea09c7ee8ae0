//! Shared utilities for integration and load testing.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use request_mux::config::MuxConfig;
use request_mux::lifecycle::Shutdown;
use request_mux::referer::Referer;
use request_mux::{
    BoxError, DispatchError, Handler, HttpServer, RefererHandle, Render, Request, RequestHead,
    Session, View,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Concurrency observed by [`TestHandler`].
#[derive(Debug, Default)]
pub struct Gauge {
    active: AtomicUsize,
    peak: AtomicUsize,
}

#[allow(dead_code)]
impl Gauge {
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

/// Routes by path:
/// - `/` and `/hello`: plain text
/// - `/sleep?ms=N`: sleeps, then renders
/// - `/panic`: panics with "panic"
/// - `/missing`: domain error
/// - `/redirect`: 302 to `/hello`
/// - `/method`: echoes the effective method
/// - `/session?tag=T`: stores T and returns the session id
/// - `/old?id=ID`: returns the tag stored by session ID
/// - `/upload`: lists form fields and uploads
/// - `/broken`: domain error whose error page panics
pub struct TestHandler {
    pub gauge: Arc<Gauge>,
}

impl Handler for TestHandler {
    async fn main(
        &self,
        request: &mut Request,
        referer: RefererHandle,
        session: Session,
    ) -> Result<Box<dyn Render>, BoxError> {
        let now = self.gauge.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.gauge.peak.fetch_max(now, Ordering::SeqCst);

        let result = route(request, referer, session).await;

        self.gauge.active.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn error(&self, error: DispatchError, request: &RequestHead) -> Response {
        if request.path == "/broken" {
            panic!("error page failed");
        }
        let status = match &error {
            DispatchError::Domain(_) => StatusCode::NOT_FOUND,
            other => other.status(),
        };
        (status, error.to_string()).into_response()
    }
}

async fn route(
    request: &mut Request,
    referer: RefererHandle,
    session: Session,
) -> Result<Box<dyn Render>, BoxError> {
    match request.path() {
        "/" | "/hello" => Ok(View::text("HELLO WORLD").boxed()),
        "/sleep" => {
            let ms = request.query("ms").and_then(|v| v.parse().ok()).unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(View::text("slept").boxed())
        }
        "/panic" => panic!("panic"),
        "/missing" | "/broken" => Err("not found".into()),
        "/redirect" => Ok(View::temporary_redirect("/hello").boxed()),
        "/method" => Ok(View::text(request.method().as_str().to_string()).boxed()),
        "/session" => {
            session.set("tag", request.query("tag").unwrap_or_default());
            Ok(View::text(session.id().to_string()).boxed())
        }
        "/old" => {
            let tag = request
                .query("id")
                .and_then(|id| referer.get(&id))
                .map(|old| old.get("tag"))
                .unwrap_or_default();
            Ok(View::text(tag).boxed())
        }
        "/upload" => {
            let mut lines: Vec<String> = request
                .form()
                .iter()
                .map(|(k, v)| format!("field {k}={v}"))
                .collect();
            lines.extend(request.uploads().iter().map(|u| {
                format!("file {}:{}:{}", u.field, u.file_name, String::from_utf8_lossy(&u.data))
            }));
            Ok(View::text(lines.join("\n")).boxed())
        }
        _ => Ok(View::text("ok").boxed()),
    }
}

/// A running server bound to an ephemeral local port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub gauge: Arc<Gauge>,
    pub shutdown: Shutdown,
}

#[allow(dead_code)]
impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Config with the given concurrency bound and deadline, everything else default.
pub fn config(max_clients: usize, timeout_secs: u64) -> MuxConfig {
    let mut config = MuxConfig::default();
    config.admission.max_clients = max_clients;
    config.admission.timeout_secs = timeout_secs;
    config
}

/// Start a server running [`TestHandler`].
pub async fn start_server(config: MuxConfig) -> TestServer {
    let gauge = Arc::new(Gauge::default());
    let handler = TestHandler {
        gauge: Arc::clone(&gauge),
    };
    let server = HttpServer::new(config, handler).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let signal = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, signal).await;
    });

    TestServer {
        addr,
        gauge,
        shutdown,
    }
}

/// Client that never reuses connections between tests.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}
