//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, ports valid)
//! - Check that JWT settings describe exactly one usable key
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: TunnelConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use jsonwebtoken::Algorithm;
use thiserror::Error;
use url::Url;

use crate::config::schema::{
    ClientConfig, JwtConfig, ObservabilityConfig, SecurityConfig, ServerConfig, TunnelConfig,
};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("server.bind_address '{0}' is not a socket address")]
    InvalidBindAddress(String),

    #[error("server.path '{0}' must start with '/'")]
    InvalidPath(String),

    #[error("server.target_port must be positive")]
    InvalidTargetPort,

    #[error("{0} must be a positive value")]
    NonPositiveTimeout(&'static str),

    #[error("server.max_body_size must be positive")]
    InvalidMaxBodySize,

    #[error("client.remote_url '{0}' is not an http URL")]
    InvalidRemoteUrl(String),

    #[error("observability.log_level '{0}' is not a log level")]
    InvalidLogLevel(String),

    #[error("observability.metrics_address '{0}' is not a socket address")]
    InvalidMetricsAddress(String),

    #[error("security.secret must not be empty")]
    EmptySecret,

    #[error("Creating a JWT decoder with a single key requires exactly one JWS algorithm")]
    JwsAlgorithmCount,

    #[error("Unknown JWS algorithm '{0}'")]
    UnknownJwsAlgorithm(String),

    #[error("security.jwt needs either a secret or a public_key_location")]
    MissingJwtKey,

    #[error("security.jwt.secret and security.jwt.public_key_location are mutually exclusive")]
    ConflictingJwtKeys,

    #[error("JWS algorithm '{0}' does not match the configured key")]
    AlgorithmKeyMismatch(String),

    #[error("JWT public key location '{}' does not exist", .0.display())]
    PublicKeyNotFound(PathBuf),
}

/// Validate a loaded configuration.
pub fn validate_config(config: &TunnelConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    validate_server(&config.server, &mut errors);
    validate_client(&config.client, &mut errors);
    validate_security(&config.security, &mut errors);
    validate_observability(&config.observability, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_server(server: &ServerConfig, errors: &mut Vec<ValidationError>) {
    if server.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidBindAddress(server.bind_address.clone()));
    }
    if !server.path.starts_with('/') {
        errors.push(ValidationError::InvalidPath(server.path.clone()));
    }
    if server.target_port == 0 {
        errors.push(ValidationError::InvalidTargetPort);
    }
    if server.long_poll_timeout_ms == 0 {
        errors.push(ValidationError::NonPositiveTimeout("server.long_poll_timeout_ms"));
    }
    if server.disconnect_timeout_ms == 0 {
        errors.push(ValidationError::NonPositiveTimeout("server.disconnect_timeout_ms"));
    }
    if server.max_body_size == 0 {
        errors.push(ValidationError::InvalidMaxBodySize);
    }
}

fn validate_client(client: &ClientConfig, errors: &mut Vec<ValidationError>) {
    match Url::parse(&client.remote_url) {
        Ok(url) if url.scheme() == "http" => {}
        _ => errors.push(ValidationError::InvalidRemoteUrl(client.remote_url.clone())),
    }
}

fn validate_security(security: &SecurityConfig, errors: &mut Vec<ValidationError>) {
    if matches!(&security.secret, Some(secret) if secret.is_empty()) {
        errors.push(ValidationError::EmptySecret);
    }
    if let Some(jwt) = &security.jwt {
        validate_jwt(jwt, errors);
    }
}

fn validate_jwt(jwt: &JwtConfig, errors: &mut Vec<ValidationError>) {
    let algorithm = match jwt.jws_algorithms.as_slice() {
        [name] => match Algorithm::from_str(name) {
            Ok(algorithm) => Some(algorithm),
            Err(_) => {
                errors.push(ValidationError::UnknownJwsAlgorithm(name.clone()));
                None
            }
        },
        _ => {
            errors.push(ValidationError::JwsAlgorithmCount);
            None
        }
    };

    match (&jwt.secret, &jwt.public_key_location) {
        (None, None) => errors.push(ValidationError::MissingJwtKey),
        (Some(_), Some(_)) => errors.push(ValidationError::ConflictingJwtKeys),
        (Some(_), None) => {
            if let Some(algorithm) = algorithm.filter(|a| !is_hmac(*a)) {
                errors.push(ValidationError::AlgorithmKeyMismatch(format!("{algorithm:?}")));
            }
        }
        (None, Some(location)) => {
            if !location.exists() {
                errors.push(ValidationError::PublicKeyNotFound(location.clone()));
            }
            if let Some(algorithm) = algorithm.filter(|a| is_hmac(*a)) {
                errors.push(ValidationError::AlgorithmKeyMismatch(format!("{algorithm:?}")));
            }
        }
    }
}

pub(crate) fn is_hmac(algorithm: Algorithm) -> bool {
    matches!(algorithm, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512)
}

fn validate_observability(observability: &ObservabilityConfig, errors: &mut Vec<ValidationError>) {
    if tracing::Level::from_str(&observability.log_level).is_err() {
        errors.push(ValidationError::InvalidLogLevel(observability.log_level.clone()));
    }
    if observability.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidMetricsAddress(
            observability.metrics_address.clone(),
        ));
    }
}
