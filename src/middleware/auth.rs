// Token Lifecycle API authenticators (§4.G): two extractors in the style of
// the teacher's `AuthenticatedUser` FromRequestParts impl.
//
// - CookieIdentity: the proxy cookie must decode cleanly and carry a
//   non-expired upstream ID token.
// - BearerIdentity: an `Authorization: Bearer <token>` header whose
//   signature verifies under this service's own public key and whose
//   token_hash is present in the Token Store and not Revoked.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::extract::cookie::CookieJar;
use jsonwebtoken::{Algorithm, Validation};
use serde::{Deserialize, Serialize};

use crate::app::AppState;
use crate::models::TokenState;
use crate::utils::CredMgrError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CookieIdentity {
    pub username: String,
    pub upstream_id_token: String,
    pub upstream_refresh_token: Option<String>,
}

impl FromRequestParts<AppState> for CookieIdentity {
    type Rejection = CredMgrError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let cookie = jar
            .get(&state.config.vouch_cookie_name)
            .ok_or_else(|| CredMgrError::Unauthorized("missing proxy cookie".to_string()))?;

        let payload = state
            .vouch_codec
            .decode(cookie.value(), true)
            .map_err(|e| CredMgrError::Unauthorized(format!("invalid proxy cookie: {e}")))?;

        if payload.exp < chrono::Utc::now().timestamp() {
            return Err(CredMgrError::Unauthorized("proxy cookie expired".to_string()));
        }

        Ok(CookieIdentity {
            username: payload.username,
            upstream_id_token: payload.tokens.id_token,
            upstream_refresh_token: payload.tokens.refresh_token,
        })
    }
}

/// Result of verifying a self-issued testbed token (bearer auth).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BearerIdentity {
    pub user_email: String,
    pub user_id: String,
    pub project_id: String,
    pub token_hash: String,
}

impl FromRequestParts<AppState> for BearerIdentity {
    type Rejection = CredMgrError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| CredMgrError::Unauthorized("missing bearer token".to_string()))?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| CredMgrError::Unauthorized("malformed authorization header".to_string()))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[&state.config.oauth_client_id]);

        let decoded = jsonwebtoken::decode::<crate::services::mint::MintedClaims>(
            token,
            state.key_material.decoding_key(),
            &validation,
        )
        .map_err(|e| CredMgrError::Unauthorized(format!("invalid bearer token: {e}")))?;

        let token_hash = crate::services::hash_token(&state.config.server_secret(), token.as_bytes());

        let record = state
            .token_store
            .find_by_hash(&token_hash)
            .await
            .map_err(|e| CredMgrError::Internal(e.to_string()))?
            .ok_or_else(|| CredMgrError::Unauthorized("token not present in store".to_string()))?;

        if record.effective_state() == TokenState::Revoked {
            return Err(CredMgrError::Unauthorized("token has been revoked".to_string()));
        }

        Ok(BearerIdentity {
            user_email: decoded.claims.email,
            user_id: decoded.claims.uuid,
            project_id: record.project_id,
            token_hash,
        })
    }
}
