//! Configuration schema definitions.
//!
//! All types derive Serde traits and default every field so a config file
//! only has to name what it changes.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default tunnel endpoint path.
pub const DEFAULT_TUNNEL_PATH: &str = "/.~~devtunnel~/debug";

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct TunnelConfig {
    /// Remote side: HTTP endpoint and target socket.
    pub server: ServerConfig,

    /// Local side: listening port and remote URL.
    pub client: ClientConfig,

    /// Endpoint access control.
    pub security: SecurityConfig,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,

    /// Profile activation.
    pub profiles: ProfilesConfig,
}

/// Tunnel server configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// HTTP path of the tunnel endpoint.
    pub path: String,

    /// Host of the target socket.
    pub target_host: String,

    /// Port of the target socket (e.g., a debugger port).
    pub target_port: u16,

    /// How long a request waits for target data before `204`.
    pub long_poll_timeout_ms: u64,

    /// Session ends when no request arrives for this long.
    pub disconnect_timeout_ms: u64,

    /// Maximum request body size in bytes.
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            path: DEFAULT_TUNNEL_PATH.to_string(),
            target_host: "127.0.0.1".to_string(),
            target_port: 5005,
            long_poll_timeout_ms: 10_000,
            disconnect_timeout_ms: 30_000,
            max_body_size: 1024 * 1024,
        }
    }
}

/// Tunnel client configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Full URL of the remote tunnel endpoint.
    pub remote_url: String,

    /// Local port to listen on (0 = ephemeral).
    pub local_port: u16,

    /// Bearer token sent when the server validates JWTs.
    pub bearer_token: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            remote_url: format!("http://localhost:8080{DEFAULT_TUNNEL_PATH}"),
            local_port: 8000,
            bearer_token: None,
        }
    }
}

/// Access control configuration.
///
/// `jwt` wins over `secret`; with neither, the endpoint is open.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SecurityConfig {
    /// Shared secret expected in `secret_header_name`.
    pub secret: Option<String>,

    /// Header carrying the shared secret.
    pub secret_header_name: String,

    /// Bearer JWT validation.
    pub jwt: Option<JwtConfig>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            secret: None,
            secret_header_name: "X-AUTH-TOKEN".to_string(),
            jwt: None,
        }
    }
}

/// JWT validation configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct JwtConfig {
    /// HMAC secret for HS* algorithms.
    pub secret: Option<String>,

    /// PEM public key file for RS*/ES* algorithms.
    pub public_key_location: Option<PathBuf>,

    /// Accepted JWS algorithm. Exactly one is allowed with a single key.
    pub jws_algorithms: Vec<String>,

    /// Required `iss` claim.
    pub issuer: Option<String>,

    /// Accepted `aud` values; empty disables the audience check.
    pub audiences: Vec<String>,

    /// Clock skew allowed for `exp`/`nbf`, in seconds.
    pub leeway_secs: u64,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: None,
            public_key_location: None,
            jws_algorithms: vec!["HS256".to_string()],
            issuer: None,
            audiences: Vec::new(),
            leeway_secs: 60,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines.
    pub json_logs: bool,

    /// Enable the Prometheus endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Profile configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ProfilesConfig {
    /// Profiles whose overlay documents are applied after the base file.
    pub active: Vec<String>,
}
