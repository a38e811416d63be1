// IdP JWKS Cache (§4.B): fetches and periodically refreshes the upstream
// IdP's signing keys, validates upstream ID tokens. The key map is an
// Arc<RwLock<HashMap>>, written only by the background refresher — the
// concurrency shape §5 requires, read-mostly the rest of the time.

use std::collections::HashMap;
use std::sync::Arc;

use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Error, Debug)]
pub enum JwksError {
    #[error("unparsable token: {0}")]
    Unparsable(String),
    #[error("unknown signing key: {0}")]
    UnknownKey(String),
    #[error("token expired")]
    Expired,
    #[error("audience mismatch")]
    AudienceMismatch,
    #[error("invalid token: {0}")]
    Invalid(String),
    #[error("jwks fetch failed: {0}")]
    Fetch(String),
}

#[derive(Debug, Deserialize)]
struct RemoteJwksResponse {
    keys: Vec<RemoteJwk>,
}

#[derive(Debug, Deserialize)]
struct RemoteJwk {
    kid: String,
    n: String,
    e: String,
}

/// Claims lifted out of a validated upstream ID token. Field names mirror
/// the OIDC claims the original reads off the decoded token (`sub`, `email`,
/// `eppn`, etc.) via `fss_utils`'s JWT manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamClaims {
    pub sub: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    pub iss: Option<String>,
    pub email: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

pub struct IdpJwksCache {
    jwks_url: String,
    audience: String,
    http: reqwest::Client,
    keys: Arc<RwLock<HashMap<String, DecodingKey>>>,
}

impl IdpJwksCache {
    pub fn new(jwks_url: String, audience: String) -> Self {
        Self {
            jwks_url,
            audience,
            http: reqwest::Client::new(),
            keys: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Fetches the JWKS document and replaces the in-memory map wholesale.
    /// Called once at startup and by the periodic background refresher.
    pub async fn refresh(&self) -> Result<(), JwksError> {
        let response = self
            .http
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| JwksError::Fetch(e.to_string()))?;

        if !response.status().is_success() {
            return Err(JwksError::Fetch(format!(
                "jwks endpoint returned {}",
                response.status()
            )));
        }

        let body: RemoteJwksResponse = response
            .json()
            .await
            .map_err(|e| JwksError::Fetch(e.to_string()))?;

        let mut map = HashMap::with_capacity(body.keys.len());
        for key in body.keys {
            let decoding_key = DecodingKey::from_rsa_components(&key.n, &key.e)
                .map_err(|e| JwksError::Fetch(e.to_string()))?;
            map.insert(key.kid, decoding_key);
        }

        let mut guard = self.keys.write().await;
        *guard = map;
        Ok(())
    }

    /// `Validate(upstream_jwt) -> claims | error` of §4.B.
    pub async fn validate(&self, upstream_jwt: &str) -> Result<UpstreamClaims, JwksError> {
        let header =
            decode_header(upstream_jwt).map_err(|e| JwksError::Unparsable(e.to_string()))?;
        let kid = header
            .kid
            .ok_or_else(|| JwksError::Unparsable("missing kid in header".to_string()))?;

        let guard = self.keys.read().await;
        let decoding_key = guard
            .get(&kid)
            .ok_or_else(|| JwksError::UnknownKey(kid.clone()))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[&self.audience]);

        let data = decode::<UpstreamClaims>(upstream_jwt, decoding_key, &validation).map_err(
            |e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => JwksError::Expired,
                jsonwebtoken::errors::ErrorKind::InvalidAudience => JwksError::AudienceMismatch,
                _ => JwksError::Invalid(e.to_string()),
            },
        )?;

        Ok(data.claims)
    }
}
