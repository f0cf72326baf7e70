//! Shared-secret header check.

use axum::http::{HeaderMap, HeaderName};
use subtle::ConstantTimeEq;

use crate::security::AccessError;

/// Admits requests whose secret header equals the configured secret.
pub struct SecretHeaderAccessManager {
    header: HeaderName,
    secret: String,
}

impl SecretHeaderAccessManager {
    pub fn new(header_name: &str, secret: &str) -> Result<Self, AccessError> {
        if secret.is_empty() {
            return Err(AccessError::Configuration("secret must not be empty".to_string()));
        }
        let header = HeaderName::from_bytes(header_name.as_bytes()).map_err(|_| {
            AccessError::Configuration(format!("invalid secret header name '{header_name}'"))
        })?;
        Ok(Self {
            header,
            secret: secret.to_string(),
        })
    }

    pub fn header(&self) -> &HeaderName {
        &self.header
    }

    pub fn check(&self, headers: &HeaderMap) -> Result<(), AccessError> {
        let provided = headers
            .get(&self.header)
            .map(|v| v.as_bytes())
            .unwrap_or_default();
        if bool::from(provided.ct_eq(self.secret.as_bytes())) {
            Ok(())
        } else {
            Err(AccessError::Denied)
        }
    }
}
