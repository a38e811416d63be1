// Mint Pipeline (§4.F): single internal function shared by the create and
// refresh handlers, grounded in `oauth_credmgr.py`'s `create_token` /
// `refresh_token` common body.

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

use crate::models::{NewTokenRecord, TokenState};
use crate::services::directory::{looks_like_uuid, DirectoryAdapter, ProjectSelector};
use crate::services::idp_jwks::{IdpJwksCache, JwksError};
use crate::services::key_material::{KeyMaterial, KeyMaterialError};
use crate::services::token_store::TokenStore;

type HmacSha256 = Hmac<Sha256>;

#[derive(Error, Debug)]
pub enum MintError {
    #[error("scope '{0}' is not in the allowed-scopes list")]
    ScopeNotAllowed(String),
    #[error("exactly one of project_id or project_name must be provided")]
    ProjectSelectorAmbiguous,
    #[error("lifetime_hours must be between 1 and {0}")]
    LifetimeOutOfRange(u32),
    #[error("long-lived token policy violation: {0}")]
    LongLivedPolicy(String),
    #[error(transparent)]
    Upstream(#[from] JwksError),
    #[error(transparent)]
    Directory(#[from] crate::services::directory::DirectoryError),
    #[error(transparent)]
    Signing(#[from] KeyMaterialError),
    #[error(transparent)]
    Store(#[from] crate::models::TokenStoreError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MintedClaims {
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub aud: String,
    pub sub: String,
    pub email: String,
    pub uuid: String,
    pub scope: String,
    pub projects: Vec<crate::services::directory::ProjectInfo>,
    pub roles: Vec<serde_json::Value>,
}

pub struct MintRequest<'a> {
    pub upstream_id_token: &'a str,
    pub scope: &'a str,
    pub project_id: Option<&'a str>,
    pub project_name: Option<&'a str>,
    pub lifetime_hours: u32,
    pub created_from: &'a str,
    pub comment: Option<&'a str>,
    pub is_refresh: bool,
}

pub struct MintOutcome {
    pub token_hash: String,
    pub signed_jwt: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub state: TokenState,
    pub comment: String,
    pub created_from: String,
    /// Only present for short-lived tokens (§4.F.11).
    pub include_refresh_token: bool,
}

pub struct MintPipelineConfig {
    pub allowed_scopes: Vec<String>,
    pub short_threshold_seconds: i64,
    pub max_llt_per_project: i64,
    pub max_lifetime_hours: u32,
    pub issuer: String,
    pub audience: String,
    pub server_secret: Vec<u8>,
}

pub struct MintPipeline<'a> {
    pub config: &'a MintPipelineConfig,
    pub idp_jwks: &'a IdpJwksCache,
    pub directory: &'a dyn DirectoryAdapter,
    pub key_material: &'a KeyMaterial,
    pub token_store: &'a TokenStore,
}

impl<'a> MintPipeline<'a> {
    pub async fn mint(&self, request: MintRequest<'_>) -> Result<MintOutcome, MintError> {
        // 1. Scope allow-list.
        if !self.config.allowed_scopes.iter().any(|s| s == request.scope) {
            return Err(MintError::ScopeNotAllowed(request.scope.to_string()));
        }

        // 2. Project resolution — project_id takes precedence over name.
        let selector = match (request.project_id, request.project_name) {
            (Some(id), _) => ProjectSelector::Id(id),
            (None, Some(name)) => ProjectSelector::Name(name),
            (None, None) => return Err(MintError::ProjectSelectorAmbiguous),
        };

        // 3. Lifetime policy bounds.
        if request.lifetime_hours < 1 || request.lifetime_hours > self.config.max_lifetime_hours {
            return Err(MintError::LifetimeOutOfRange(self.config.max_lifetime_hours));
        }
        let requested_lifetime_seconds = i64::from(request.lifetime_hours) * 3600;
        let is_short_lived = requested_lifetime_seconds <= self.config.short_threshold_seconds;

        // 4. Validate upstream token.
        let upstream_claims = self.idp_jwks.validate(request.upstream_id_token).await?;

        // 5. Enrich claims via Directory Adapter.
        let enrichment = self
            .directory
            .enrich_for_project(selector, request.upstream_id_token)
            .await?;

        let project = enrichment
            .active_projects
            .first()
            .ok_or(MintError::ProjectSelectorAmbiguous)?;

        // 3b. Long-lived policy: token-holder flag + per-project cap.
        if !is_short_lived {
            let is_token_holder = project
                .memberships
                .as_ref()
                .map(|m| m.is_token_holder)
                .unwrap_or(false);
            if !is_token_holder {
                return Err(MintError::LongLivedPolicy(
                    "caller is not a token holder for this project".to_string(),
                ));
            }

            let existing = self
                .token_store
                .count_long_lived(
                    &enrichment.uuid.clone().unwrap_or_default(),
                    &project.uuid,
                    self.config.short_threshold_seconds,
                )
                .await?;
            if existing >= self.config.max_llt_per_project {
                return Err(MintError::LongLivedPolicy(format!(
                    "user already has {existing} long-lived tokens for project {}",
                    project.uuid
                )));
            }
        }

        let roles: Vec<serde_json::Value> = enrichment
            .roles
            .iter()
            .filter(|role| !looks_like_uuid(&role.name))
            .map(|role| serde_json::json!({"name": role.name}))
            .collect();

        let user_id = enrichment.uuid.clone().unwrap_or_else(|| upstream_claims.sub.clone());

        // 6. Standard claims.
        let now = Utc::now();
        let expires_at = now + Duration::seconds(requested_lifetime_seconds);
        let claims = MintedClaims {
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            iss: self.config.issuer.clone(),
            aud: self.config.audience.clone(),
            sub: upstream_claims.sub.clone(),
            email: enrichment.email.clone(),
            uuid: user_id.clone(),
            scope: request.scope.to_string(),
            projects: enrichment.active_projects.clone(),
            roles,
        };

        // 7. Best-effort expired-row cleanup.
        let _ = self.token_store.delete_expired_for_user(&user_id).await;

        // 8. Sign.
        let signed_jwt = self.key_material.sign(&claims)?;

        // 9. Hash under the server secret.
        let token_hash = hash_token(&self.config.server_secret, signed_jwt.as_bytes());

        // 10. Persist.
        let state = if request.is_refresh {
            TokenState::Refreshed
        } else {
            TokenState::Valid
        };
        let comment = request
            .comment
            .map(str::to_string)
            .unwrap_or_else(|| {
                if request.is_refresh {
                    "Refreshed via API".to_string()
                } else {
                    "Created via GUI".to_string()
                }
            });

        self.token_store
            .add(NewTokenRecord {
                user_id,
                user_email: enrichment.email,
                project_id: project.uuid.clone(),
                token_hash: token_hash.clone(),
                state,
                created_at: now,
                expires_at,
                created_from: request.created_from.to_string(),
                comment: Some(comment.clone()),
            })
            .await?;

        // 11. Return.
        Ok(MintOutcome {
            token_hash,
            signed_jwt,
            created_at: now,
            expires_at,
            state,
            comment,
            created_from: request.created_from.to_string(),
            include_refresh_token: is_short_lived,
        })
    }

}

/// HMAC-SHA256 of the signed JWT under the server secret (§4.F.9). Shared
/// between the mint pipeline (signing a new token) and bearer auth
/// (looking up an already-issued one), so the two never drift.
pub fn hash_token(secret: &[u8], data: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("hmac accepts any key length");
    mac.update(data);
    let bytes = mac.finalize().into_bytes();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
