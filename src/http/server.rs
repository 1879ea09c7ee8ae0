//! HTTP server setup.
//!
//! # Responsibilities
//! - Build the Axum router that hands every request to the mux
//! - Wire up middleware (request id, tracing, body limit)
//! - Serve on a listener until shutdown, then close the mux

use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::HeaderValue;
use axum::response::Response;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::config::MuxConfig;
use crate::http::request::X_REQUEST_ID;
use crate::mux::{Handler, Mux, MuxError};

/// UUID v4 request ids for requests that arrive without one.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidRequestId;

impl MakeRequestId for UuidRequestId {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

/// HTTP front end for a [`Mux`].
pub struct HttpServer<H: Handler> {
    router: Router,
    mux: Arc<Mux<H>>,
    config: MuxConfig,
}

impl<H: Handler> HttpServer<H> {
    /// Create a server for `handler`. Must be called inside a tokio runtime.
    pub fn new(config: MuxConfig, handler: H) -> Result<Self, MuxError> {
        let config = config.normalized();
        let mux = Arc::new(Mux::builder().from_config(&config).handler(handler).build()?);
        let router = Self::build_router(&config, Arc::clone(&mux));
        Ok(Self { router, mux, config })
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(config: &MuxConfig, mux: Arc<Mux<H>>) -> Router {
        Router::new()
            .fallback(entry::<H>)
            .with_state(mux)
            .layer(DefaultBodyLimit::max(config.forms.max_memory_bytes()))
            .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::new(X_REQUEST_ID, UuidRequestId))
    }

    /// Run the server until `shutdown` fires, then stop admitting and drain.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            max_clients = self.config.admission.max_clients,
            timeout_secs = self.config.admission.timeout_secs,
            "HTTP server starting"
        );

        let mux = Arc::clone(&self.mux);
        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown requested, closing mux");
                mux.close();
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    pub fn mux(&self) -> &Arc<Mux<H>> {
        &self.mux
    }

    /// The router, for serving in-process without a listener.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &MuxConfig {
        &self.config
    }
}

async fn entry<H: Handler>(State(mux): State<Arc<Mux<H>>>, request: Request) -> Response {
    mux.serve(request).await
}
