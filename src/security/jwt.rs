//! Bearer JWT validation.

use std::collections::HashMap;
use std::str::FromStr;

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

use crate::config::schema::JwtConfig;
use crate::security::AccessError;

/// Decoded token claims.
pub type Claims = HashMap<String, serde_json::Value>;

/// Validates `Authorization: Bearer` tokens against one key.
///
/// Signature, issuer, audience and `exp`/`nbf` (with leeway) are all checked
/// by a single [`Validation`].
pub struct JwtAccessManager {
    key: DecodingKey,
    validation: Validation,
}

impl JwtAccessManager {
    pub fn from_config(config: &JwtConfig) -> Result<Self, AccessError> {
        let algorithm = single_algorithm(&config.jws_algorithms)?;
        let key = decoding_key(config, algorithm)?;

        let mut validation = Validation::new(algorithm);
        validation.leeway = config.leeway_secs;
        validation.validate_nbf = true;
        if let Some(issuer) = &config.issuer {
            validation.set_issuer(&[issuer]);
        }
        if config.audiences.is_empty() {
            validation.validate_aud = false;
        } else {
            validation.set_audience(&config.audiences);
        }

        Ok(Self { key, validation })
    }

    /// Verify `token` and return its claims.
    pub fn verify(&self, token: &str) -> Result<Claims, AccessError> {
        decode::<Claims>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                let reason = match e.kind() {
                    ErrorKind::ExpiredSignature => "token expired".to_string(),
                    ErrorKind::ImmatureSignature => "token not yet valid".to_string(),
                    ErrorKind::InvalidIssuer => "issuer rejected".to_string(),
                    ErrorKind::InvalidAudience => "audience rejected".to_string(),
                    ErrorKind::InvalidSignature => "signature rejected".to_string(),
                    _ => e.to_string(),
                };
                AccessError::InvalidToken(reason)
            })
    }

    pub fn check(&self, headers: &HeaderMap) -> Result<Claims, AccessError> {
        let token = bearer_token(headers).ok_or(AccessError::MissingToken)?;
        self.verify(token)
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

fn single_algorithm(names: &[String]) -> Result<Algorithm, AccessError> {
    match names {
        [name] => Algorithm::from_str(name)
            .map_err(|_| AccessError::Configuration(format!("unknown JWS algorithm '{name}'"))),
        _ => Err(AccessError::Configuration(
            "Creating a JWT decoder with a single key requires exactly one JWS algorithm".to_string(),
        )),
    }
}

fn decoding_key(config: &JwtConfig, algorithm: Algorithm) -> Result<DecodingKey, AccessError> {
    if let Some(location) = &config.public_key_location {
        let pem = std::fs::read(location).map_err(|e| {
            AccessError::Configuration(format!(
                "unable to read public key '{}': {e}",
                location.display()
            ))
        })?;
        let key = match algorithm {
            Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512 => DecodingKey::from_rsa_pem(&pem),
            Algorithm::ES256 | Algorithm::ES384 => DecodingKey::from_ec_pem(&pem),
            Algorithm::EdDSA => DecodingKey::from_ed_pem(&pem),
            other => {
                return Err(AccessError::Configuration(format!(
                    "{other:?} cannot be used with a public key"
                )))
            }
        };
        return key.map_err(|e| {
            AccessError::Configuration(format!("invalid public key '{}': {e}", location.display()))
        });
    }

    match (&config.secret, algorithm) {
        (Some(secret), Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) => {
            Ok(DecodingKey::from_secret(secret.as_bytes()))
        }
        (Some(_), other) => Err(AccessError::Configuration(format!(
            "{other:?} cannot be used with a shared secret"
        ))),
        (None, _) => Err(AccessError::Configuration(
            "either a secret or a public key location is required".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use jsonwebtoken::{encode, get_current_timestamp, EncodingKey, Header};
    use serde_json::json;

    const SECRET: &str = "tunnel-test-secret";

    fn config() -> JwtConfig {
        JwtConfig {
            secret: Some(SECRET.to_string()),
            issuer: Some("https://issuer.example.com".to_string()),
            audiences: vec!["devtunnel".to_string()],
            leeway_secs: 0,
            ..JwtConfig::default()
        }
    }

    fn token(claims: serde_json::Value) -> String {
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    fn valid_claims() -> serde_json::Value {
        json!({
            "sub": "alice",
            "iss": "https://issuer.example.com",
            "aud": "devtunnel",
            "exp": get_current_timestamp() + 3600,
        })
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        headers
    }

    #[test]
    fn accepts_valid_token() {
        let manager = JwtAccessManager::from_config(&config()).unwrap();
        let claims = manager.check(&bearer(&token(valid_claims()))).unwrap();
        assert_eq!(claims["sub"], "alice");
    }

    #[test]
    fn missing_header_is_missing_token() {
        let manager = JwtAccessManager::from_config(&config()).unwrap();
        assert!(matches!(manager.check(&HeaderMap::new()), Err(AccessError::MissingToken)));

        let mut basic = HeaderMap::new();
        basic.insert(AUTHORIZATION, HeaderValue::from_static("Basic dXNlcjpwYXNz"));
        assert!(matches!(manager.check(&basic), Err(AccessError::MissingToken)));
    }

    #[test]
    fn rejects_wrong_issuer() {
        let manager = JwtAccessManager::from_config(&config()).unwrap();
        let mut claims = valid_claims();
        claims["iss"] = json!("https://other.example.com");
        let err = manager.check(&bearer(&token(claims))).unwrap_err();
        assert!(matches!(err, AccessError::InvalidToken(ref r) if r == "issuer rejected"));
    }

    #[test]
    fn rejects_wrong_audience() {
        let manager = JwtAccessManager::from_config(&config()).unwrap();
        let mut claims = valid_claims();
        claims["aud"] = json!("someone-else");
        let err = manager.check(&bearer(&token(claims))).unwrap_err();
        assert!(matches!(err, AccessError::InvalidToken(ref r) if r == "audience rejected"));
    }

    #[test]
    fn rejects_expired_token() {
        let manager = JwtAccessManager::from_config(&config()).unwrap();
        let mut claims = valid_claims();
        claims["exp"] = json!(get_current_timestamp() - 600);
        let err = manager.check(&bearer(&token(claims))).unwrap_err();
        assert!(matches!(err, AccessError::InvalidToken(ref r) if r == "token expired"));
    }

    #[test]
    fn rejects_token_not_yet_valid() {
        let manager = JwtAccessManager::from_config(&config()).unwrap();
        let mut claims = valid_claims();
        claims["nbf"] = json!(get_current_timestamp() + 600);
        let err = manager.check(&bearer(&token(claims))).unwrap_err();
        assert!(matches!(err, AccessError::InvalidToken(ref r) if r == "token not yet valid"));
    }

    #[test]
    fn leeway_tolerates_clock_skew() {
        let manager = JwtAccessManager::from_config(&JwtConfig {
            leeway_secs: 120,
            ..config()
        })
        .unwrap();
        let mut claims = valid_claims();
        claims["exp"] = json!(get_current_timestamp() - 30);
        assert!(manager.check(&bearer(&token(claims))).is_ok());
    }

    #[test]
    fn audience_is_optional() {
        let manager = JwtAccessManager::from_config(&JwtConfig {
            audiences: Vec::new(),
            ..config()
        })
        .unwrap();
        let mut claims = valid_claims();
        claims["aud"] = json!("anything");
        assert!(manager.check(&bearer(&token(claims))).is_ok());
    }

    #[test]
    fn rejects_foreign_signature() {
        let manager = JwtAccessManager::from_config(&config()).unwrap();
        let forged = encode(
            &Header::default(),
            &valid_claims(),
            &EncodingKey::from_secret(b"another-secret"),
        )
        .unwrap();
        let err = manager.check(&bearer(&forged)).unwrap_err();
        assert!(matches!(err, AccessError::InvalidToken(ref r) if r == "signature rejected"));
    }

    #[test]
    fn multiple_algorithms_are_rejected() {
        let result = JwtAccessManager::from_config(&JwtConfig {
            jws_algorithms: vec!["HS256".to_string(), "HS384".to_string()],
            ..config()
        });
        let err = result.err().unwrap();
        assert!(err
            .to_string()
            .contains("Creating a JWT decoder with a single key requires exactly one JWS algorithm"));
    }

    #[test]
    fn missing_public_key_names_location() {
        let result = JwtAccessManager::from_config(&JwtConfig {
            secret: None,
            public_key_location: Some("/does/not/exist.pem".into()),
            jws_algorithms: vec!["RS256".to_string()],
            ..JwtConfig::default()
        });
        let err = result.err().unwrap();
        assert!(err.to_string().contains("/does/not/exist.pem"), "{err}");
    }

    #[test]
    fn requires_some_key() {
        let result = JwtAccessManager::from_config(&JwtConfig::default());
        assert!(matches!(result, Err(AccessError::Configuration(_))));
    }
}
