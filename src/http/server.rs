//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the tunnel and health handlers
//! - Wire up middleware (request ID, tracing, body limit, access control)
//! - Buffer tunnel request bodies and dispatch them to the [`TunnelServer`]
//! - Serve until the shutdown signal fires

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::TunnelConfig;
use crate::observability::metrics;
use crate::security::{access_middleware, AccessError, AccessManager};
use crate::tunnel::{TargetConnection, TunnelServer};

pub const X_REQUEST_ID: &str = "x-request-id";

/// Application state injected into handlers.
struct AppState<C> {
    tunnel: Arc<TunnelServer<C>>,
    max_body_size: usize,
}

impl<C> Clone for AppState<C> {
    fn clone(&self) -> Self {
        Self {
            tunnel: Arc::clone(&self.tunnel),
            max_body_size: self.max_body_size,
        }
    }
}

/// HTTP server exposing the tunnel endpoint.
pub struct TunnelHttpServer {
    router: Router,
    path: String,
    access: &'static str,
}

impl TunnelHttpServer {
    /// Build the server. Fails when the security settings cannot be applied.
    pub fn new<C: TargetConnection>(
        config: &TunnelConfig,
        tunnel: TunnelServer<C>,
    ) -> Result<Self, AccessError> {
        let access = Arc::new(AccessManager::from_config(&config.security)?);
        let access_name = access.name();
        let state = AppState {
            tunnel: Arc::new(tunnel),
            max_body_size: config.server.max_body_size,
        };
        let router = Self::build_router(config, state, access);
        Ok(Self {
            router,
            path: config.server.path.clone(),
            access: access_name,
        })
    }

    /// Build the Axum router with all middleware layers.
    fn build_router<C: TargetConnection>(
        config: &TunnelConfig,
        state: AppState<C>,
        access: Arc<AccessManager>,
    ) -> Router {
        Router::new()
            .route(&config.server.path, any(tunnel_handler::<C>))
            .route_layer(middleware::from_fn_with_state(access, access_middleware))
            .route("/health", get(health_handler::<C>))
            .with_state(state)
            .layer(RequestBodyLimitLayer::new(config.server.max_body_size))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(
                TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                    let request_id = request
                        .headers()
                        .get(X_REQUEST_ID)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("unknown");
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        path = %request.uri().path(),
                        request_id = %request_id,
                    )
                }),
            )
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// The router, for embedding in a larger application.
    pub fn into_router(self) -> Router {
        self.router
    }

    /// Run the server until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            path = %self.path,
            access = self.access,
            "Tunnel endpoint listening"
        );

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn tunnel_handler<C: TargetConnection>(
    State(state): State<AppState<C>>,
    request: Request<Body>,
) -> Response {
    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, state.max_body_size).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(error = %e, "Unable to read tunnel request body");
            metrics::record_response(StatusCode::PAYLOAD_TOO_LARGE.as_u16());
            return StatusCode::PAYLOAD_TOO_LARGE.into_response();
        }
    };

    let response = state.tunnel.handle(Request::from_parts(parts, body)).await;
    metrics::record_response(response.status().as_u16());
    response.into_response()
}

async fn health_handler<C: TargetConnection>(State(state): State<AppState<C>>) -> impl IntoResponse {
    Json(json!({
        "status": "UP",
        "session_active": state.tunnel.has_session().await,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::DEFAULT_TUNNEL_PATH;
    use crate::tunnel::{SocketTargetConnection, StaticPortProvider};
    use tower::ServiceExt;

    fn server(config: &TunnelConfig) -> Router {
        let target = SocketTargetConnection::new("127.0.0.1", StaticPortProvider::new(1).unwrap());
        TunnelHttpServer::new(config, TunnelServer::new(target))
            .unwrap()
            .into_router()
    }

    #[tokio::test]
    async fn health_is_open_and_tagged_with_request_id() {
        let mut config = TunnelConfig::default();
        config.security.secret = Some("s3cr3t".to_string());

        let response = server(&config)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(X_REQUEST_ID));
    }

    #[tokio::test]
    async fn tunnel_path_requires_secret() {
        let mut config = TunnelConfig::default();
        config.security.secret = Some("s3cr3t".to_string());

        let response = server(&config)
            .oneshot(Request::post(DEFAULT_TUNNEL_PATH).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn unreachable_target_is_gone() {
        let response = server(&TunnelConfig::default())
            .oneshot(Request::get(DEFAULT_TUNNEL_PATH).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::GONE);
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let mut config = TunnelConfig::default();
        config.server.max_body_size = 4;

        let response = server(&config)
            .oneshot(
                Request::post(DEFAULT_TUNNEL_PATH)
                    .header("x-seq", "1")
                    .body(Body::from("too large"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn invalid_jwt_setup_fails_fast() {
        let mut config = TunnelConfig::default();
        config.security.jwt = Some(Default::default());
        let target = SocketTargetConnection::new("127.0.0.1", StaticPortProvider::new(1).unwrap());
        assert!(TunnelHttpServer::new(&config, TunnelServer::new(target)).is_err());
    }
}
