//! Access control for the tunnel endpoint.
//!
//! # Data Flow
//! ```text
//! SecurityConfig
//!     → AccessManager::from_config
//!         jwt configured     → JwtAccessManager (bearer token)
//!         secret configured  → SecretHeaderAccessManager (shared header)
//!         otherwise          → PermitAll
//!     → access.rs middleware checks every request
//! ```
//!
//! # Design Decisions
//! - Fail closed: any check failure rejects the request
//! - Key material is loaded once at startup

pub mod access;
pub mod jwt;
pub mod secret;

use axum::http::header::WWW_AUTHENTICATE;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::config::schema::SecurityConfig;

pub use access::access_middleware;
pub use jwt::{Claims, JwtAccessManager};
pub use secret::SecretHeaderAccessManager;

/// Why a request (or the security setup) was rejected.
#[derive(Debug, Error)]
pub enum AccessError {
    #[error("Missing bearer token")]
    MissingToken,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Access denied")]
    Denied,

    #[error("Security configuration error: {0}")]
    Configuration(String),
}

impl AccessError {
    pub fn status(&self) -> StatusCode {
        match self {
            AccessError::MissingToken | AccessError::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            AccessError::Denied => StatusCode::FORBIDDEN,
            AccessError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AccessError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut response = (status, self.to_string()).into_response();
        if status == StatusCode::UNAUTHORIZED {
            let challenge = match self {
                AccessError::InvalidToken(_) => "Bearer error=\"invalid_token\"",
                _ => "Bearer",
            };
            response
                .headers_mut()
                .insert(WWW_AUTHENTICATE, HeaderValue::from_static(challenge));
        }
        response
    }
}

/// The access policy guarding the tunnel endpoint.
pub enum AccessManager {
    PermitAll,
    SecretHeader(SecretHeaderAccessManager),
    Jwt(JwtAccessManager),
}

impl AccessManager {
    pub fn from_config(config: &SecurityConfig) -> Result<Self, AccessError> {
        if let Some(jwt) = &config.jwt {
            return Ok(AccessManager::Jwt(JwtAccessManager::from_config(jwt)?));
        }
        if let Some(secret) = &config.secret {
            return Ok(AccessManager::SecretHeader(SecretHeaderAccessManager::new(
                &config.secret_header_name,
                secret,
            )?));
        }
        Ok(AccessManager::PermitAll)
    }

    pub fn check(&self, headers: &HeaderMap) -> Result<(), AccessError> {
        match self {
            AccessManager::PermitAll => Ok(()),
            AccessManager::SecretHeader(manager) => manager.check(headers),
            AccessManager::Jwt(manager) => manager.check(headers).map(|_| ()),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AccessManager::PermitAll => "permit-all",
            AccessManager::SecretHeader(_) => "secret-header",
            AccessManager::Jwt(_) => "jwt",
        }
    }
}
