use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    response::{IntoResponse, Json, Response},
    routing::{any, get, post},
    Router,
};
use tokio::sync::oneshot;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

use crate::proxy::handlers;
use crate::proxy::upstream::client::UpstreamClient;
use crate::proxy::{SourceStore, TokenManager};

/// Axum application state
#[derive(Clone)]
pub struct AppState {
    pub sources: Arc<SourceStore>,
    pub token_manager: Arc<TokenManager>,
    pub upstream: Arc<UpstreamClient>,
}

/// Axum server instance
pub struct AxumServer {
    shutdown_tx: Option<oneshot::Sender<()>>,
    local_addr: SocketAddr,
}

impl AxumServer {
    /// Start the proxy server
    pub async fn start(
        host: String,
        port: u16,
        sources: Arc<SourceStore>,
        token_manager: Arc<TokenManager>,
        upstream: Arc<UpstreamClient>,
    ) -> Result<(Self, tokio::task::JoinHandle<()>), String> {
        let state = AppState {
            sources,
            token_manager,
            upstream,
        };

        let app = Router::new()
            // Data source management
            .route(
                "/api/sources",
                get(handlers::manage::list_sources).post(handlers::manage::create_source),
            )
            .route(
                "/api/sources/:id",
                get(handlers::manage::get_source).delete(handlers::manage::delete_source),
            )
            .route("/api/sources/:id/login", post(handlers::manage::login_source))
            .route(
                "/api/sources/:id/refresh",
                post(handlers::manage::refresh_source),
            )
            // Persisted credential blob (chunked cookie transport)
            .route(
                "/api/session/:platform",
                get(handlers::manage::get_session)
                    .put(handlers::manage::put_session)
                    .delete(handlers::manage::delete_session),
            )
            // Per-platform proxy surface, all funneled through one handler
            .route("/api/vbr/*path", any(handlers::forward::vbr))
            .route("/api/vb365/*path", any(handlers::forward::vb365))
            .route("/api/vro/*path", any(handlers::forward::vro))
            .route("/api/one/*path", any(handlers::forward::one))
            .route("/api/kasten/*path", any(handlers::forward::kasten))
            .route("/healthz", get(health_check_handler))
            .layer(DefaultBodyLimit::max(100 * 1024 * 1024))
            .layer(crate::proxy::middleware::cors_layer())
            .layer(TraceLayer::new_for_http())
            .with_state(state);

        // Bind address
        let addr = format!("{}:{}", host, port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| format!("Failed to bind address {}: {}", addr, e))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| format!("Failed to read bound address: {}", e))?;

        tracing::info!("proxy server started at http://{}", local_addr);

        // Create shutdown channel
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let server_instance = Self {
            shutdown_tx: Some(shutdown_tx),
            local_addr,
        };

        // Serve connections in a dedicated task
        let handle = tokio::spawn(async move {
            use hyper::server::conn::http1;
            use hyper_util::rt::TokioIo;
            use hyper_util::service::TowerToHyperService;

            loop {
                tokio::select! {
                    res = listener.accept() => {
                        match res {
                            Ok((stream, _)) => {
                                let io = TokioIo::new(stream);
                                let service = TowerToHyperService::new(app.clone());

                                tokio::task::spawn(async move {
                                    if let Err(err) = http1::Builder::new()
                                        .serve_connection(io, service)
                                        .await
                                    {
                                        debug!("connection closed: {:?}", err);
                                    }
                                });
                            }
                            Err(e) => {
                                error!("failed to accept connection: {:?}", e);
                            }
                        }
                    }
                    _ = &mut shutdown_rx => {
                        tracing::info!("proxy server stopped listening");
                        break;
                    }
                }
            }
        });

        Ok((server_instance, handle))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop the server
    pub fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Health check handler
async fn health_check_handler() -> Response {
    Json(serde_json::json!({
        "status": "ok"
    }))
    .into_response()
}
