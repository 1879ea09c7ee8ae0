//! request-mux demo server.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──▶ axum (request id, trace, body limit)
//!                  │
//!                  ▼
//!               Mux::serve ──▶ token pool ──▶ dispatch task ──▶ Handler::main
//!                  │                                               │
//!                  │◀──────────── outcome + token ◀────────────────┘
//!                  ▼
//!               Render::render / Handler::error ──▶ Client
//!
//!     RefererStore (sessions, background sweeper) shared by all requests
//! ```

use axum::http::StatusCode;
use axum::response::Response;
use clap::Parser;
use std::path::PathBuf;
use tokio::net::TcpListener;

use request_mux::config::load_config;
use request_mux::lifecycle::{wait_for_signal, Shutdown};
use request_mux::observability::{logging, metrics};
use request_mux::referer::Referer;
use request_mux::{
    BoxError, DispatchError, Handler, HttpServer, MuxConfig, RefererHandle, Render, Request,
    RequestHead, Session, View,
};

#[derive(Parser)]
#[command(name = "request-mux")]
#[command(about = "Admission-controlled HTTP front end with session referer", long_about = None)]
struct Cli {
    /// TOML configuration file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `server.bind_address`.
    #[arg(short, long)]
    bind: Option<String>,
}

/// Small site exercising sessions, redirects and error pages.
struct DemoHandler;

impl Handler for DemoHandler {
    async fn main(
        &self,
        request: &mut Request,
        referer: RefererHandle,
        session: Session,
    ) -> Result<Box<dyn Render>, BoxError> {
        session.set("path", request.path());

        match request.path() {
            "/" => {
                let body = format!(
                    "<html><body><h1>request-mux</h1>\
                     <p>session {id}</p>\
                     <p><a href=\"/from?id={id}\">follow</a></p></body></html>",
                    id = session.id()
                );
                Ok(View::html(body).boxed())
            }
            "/from" => {
                let origin = request
                    .query("id")
                    .and_then(|id| referer.get(&id))
                    .map(|old| old.get("path"))
                    .unwrap_or_default();
                Ok(View::text(format!("came from: {origin}")).boxed())
            }
            "/greet" => {
                let name = request.form_value("name").unwrap_or("stranger");
                Ok(View::text(format!("hello, {name}")).boxed())
            }
            "/robots.txt" => Ok(View::file("robots.txt", "User-agent: *\nDisallow:\n").boxed()),
            "/home" => Ok(View::permanent_redirect("/").boxed()),
            path => Err(format!("no page at {path}").into()),
        }
    }

    fn error(&self, error: DispatchError, request: &RequestHead) -> Response {
        let (status, title) = match &error {
            DispatchError::Domain(_) => (StatusCode::NOT_FOUND, "404 Not Found"),
            other => (other.status(), other.title()),
        };
        tracing::debug!(request_id = %request.request_id(), status = status.as_u16(), "Rendering error page");
        let body = format!("<html><body><h1>{title}</h1><p>{error}</p></body></html>");
        let mut view = View::html(body);
        view.status = status;
        view.render(request)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => MuxConfig::default().normalized(),
    };
    if let Some(bind) = cli.bind {
        config.server.bind_address = bind;
    }

    logging::init_logging(&config.observability);
    tracing::info!("request-mux v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.server.bind_address,
        max_clients = config.admission.max_clients,
        timeout_secs = config.admission.timeout_secs,
        max_memory_mb = config.forms.max_memory_mb,
        referer_latency_secs = config.referer.latency_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let listener = TcpListener::bind(&config.server.bind_address).await?;
    let server = HttpServer::new(config, DemoHandler)?;

    let shutdown = Shutdown::new();
    let signal = shutdown.subscribe();
    tokio::spawn(async move {
        wait_for_signal().await;
        shutdown.trigger();
    });

    server.run(listener, signal).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
