//! Axum middleware applying the configured [`AccessManager`].

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::security::AccessManager;

pub async fn access_middleware(
    State(manager): State<Arc<AccessManager>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    match manager.check(request.headers()) {
        Ok(()) => next.run(request).await,
        Err(e) => {
            tracing::debug!(
                policy = manager.name(),
                path = %request.uri().path(),
                error = %e,
                "Tunnel request rejected"
            );
            e.into_response()
        }
    }
}
