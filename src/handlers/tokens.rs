// Token Lifecycle API (§4.G, §6): create, refresh, revoke, delete, list,
// revocation-list, validate, and /certs. Response envelope per §6:
// `{ data, size, status, type }` success, `{ status, message, details }`
// error (the latter via CredMgrError's IntoResponse).

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::app::AppState;
use crate::middleware::auth::{BearerIdentity, CookieIdentity};
use crate::models::{TokenQuery, TokenState};
use crate::services::directory::ProjectSelector;
use crate::services::mint::{MintPipeline, MintPipelineConfig, MintRequest};
use crate::utils::CredMgrError;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub data: T,
    pub size: usize,
    pub status: u16,
    #[serde(rename = "type")]
    pub kind: &'static str,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T, size: usize) -> Self {
        Self {
            data,
            size,
            status: 200,
            kind: "success",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token_hash: String,
    pub created_at: String,
    pub expires_at: String,
    pub state: &'static str,
    pub comment: String,
    pub created_from: String,
    pub id_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

fn state_label(state: TokenState) -> &'static str {
    match state {
        TokenState::Nascent => "Nascent",
        TokenState::Valid => "Valid",
        TokenState::Refreshed => "Refreshed",
        TokenState::Revoked => "Revoked",
        TokenState::Expired => "Expired",
    }
}

const WIRE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S %z";

fn format_time(ts: chrono::DateTime<chrono::Utc>) -> String {
    ts.format(WIRE_TIME_FORMAT).to_string()
}

fn mint_config(state: &AppState) -> MintPipelineConfig {
    MintPipelineConfig {
        allowed_scopes: state.config.allowed_scopes.clone(),
        short_threshold_seconds: state.config.token_lifetime_seconds,
        max_llt_per_project: state.config.max_llt_per_project,
        max_lifetime_hours: 1512,
        issuer: state.config.oauth_provider.clone(),
        audience: state.config.oauth_client_id.clone(),
        server_secret: state.config.server_secret(),
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateTokenRequest {
    pub project_id: Option<String>,
    pub project_name: Option<String>,
    pub scope: String,
    pub lifetime_hours: u32,
    pub comment: Option<String>,
}

/// Best-effort caller IP for `created_from`, taken from the first hop of
/// `X-Forwarded-For` (the original runs behind a reverse proxy that sets
/// this header; there is no direct socket address to fall back to at the
/// handler layer).
fn client_ip_from_headers(headers: &axum::http::HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

pub async fn create(
    State(state): State<AppState>,
    identity: CookieIdentity,
    headers: axum::http::HeaderMap,
    Json(request): Json<CreateTokenRequest>,
) -> Result<Json<ApiResponse<TokenResponse>>, CredMgrError> {
    let config = mint_config(&state);
    let pipeline = MintPipeline {
        config: &config,
        idp_jwks: &state.idp_jwks_cache,
        directory: state.directory.as_ref(),
        key_material: &state.key_material,
        token_store: &state.token_store,
    };

    let outcome = pipeline
        .mint(MintRequest {
            upstream_id_token: &identity.upstream_id_token,
            scope: &request.scope,
            project_id: request.project_id.as_deref(),
            project_name: request.project_name.as_deref(),
            lifetime_hours: request.lifetime_hours,
            created_from: &client_ip_from_headers(&headers),
            comment: request.comment.as_deref(),
            is_refresh: false,
        })
        .await?;

    Ok(Json(ApiResponse::ok(to_token_response(outcome), 1)))
}

#[derive(Debug, Deserialize)]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
    pub project_id: Option<String>,
    pub project_name: Option<String>,
    pub scope: String,
}

pub async fn refresh(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Json(request): Json<RefreshTokenRequest>,
) -> Result<Json<ApiResponse<TokenResponse>>, CredMgrError> {
    // Exchange the upstream refresh token before running the mint pipeline;
    // a mint failure after this point must still surface the new refresh
    // token to the client (§7's "stranded refresh token" quirk).
    let exchange = exchange_upstream_refresh_token(&state, &request.refresh_token).await?;

    let config = mint_config(&state);
    let pipeline = MintPipeline {
        config: &config,
        idp_jwks: &state.idp_jwks_cache,
        directory: state.directory.as_ref(),
        key_material: &state.key_material,
        token_store: &state.token_store,
    };

    let mint_result = pipeline
        .mint(MintRequest {
            upstream_id_token: &exchange.id_token,
            scope: &request.scope,
            project_id: request.project_id.as_deref(),
            project_name: request.project_name.as_deref(),
            lifetime_hours: 1,
            created_from: &client_ip_from_headers(&headers),
            comment: None,
            is_refresh: true,
        })
        .await;

    match mint_result {
        Ok(outcome) => {
            let mut response = to_token_response(outcome);
            response.refresh_token = Some(exchange.refresh_token);
            Ok(Json(ApiResponse::ok(response, 1)))
        }
        Err(e) => Err(CredMgrError::InternalWithDetails {
            message: format!("mint failed after upstream refresh token exchange: {e}"),
            details: serde_json::json!({ "refresh_token": exchange.refresh_token }),
        }),
    }
}

struct UpstreamExchange {
    id_token: String,
    refresh_token: String,
}

async fn exchange_upstream_refresh_token(
    state: &AppState,
    refresh_token: &str,
) -> Result<UpstreamExchange, CredMgrError> {
    let client = reqwest::Client::new();
    let response = client
        .post(&state.config.oauth_token_url)
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", &state.config.oauth_client_id),
            ("client_secret", &state.config.oauth_client_secret),
        ])
        .send()
        .await
        .map_err(|e| CredMgrError::Upstream(format!("idp token exchange failed: {e}")))?;

    if !response.status().is_success() {
        return Err(CredMgrError::Upstream(format!(
            "idp token exchange returned {}",
            response.status()
        )));
    }

    #[derive(Deserialize)]
    struct TokenExchangeResponse {
        id_token: String,
        refresh_token: String,
    }

    let body: TokenExchangeResponse = response
        .json()
        .await
        .map_err(|e| CredMgrError::Upstream(format!("malformed idp token response: {e}")))?;

    Ok(UpstreamExchange {
        id_token: body.id_token,
        refresh_token: body.refresh_token,
    })
}

fn to_token_response(outcome: crate::services::mint::MintOutcome) -> TokenResponse {
    TokenResponse {
        token_hash: outcome.token_hash,
        created_at: format_time(outcome.created_at),
        expires_at: format_time(outcome.expires_at),
        state: state_label(outcome.state),
        comment: outcome.comment,
        created_from: outcome.created_from,
        id_token: outcome.signed_jwt,
        refresh_token: None, // only set by refresh(), which carries the new upstream refresh_token
    }
}

#[derive(Debug, Deserialize)]
pub struct RevokeUpstreamRequest {
    pub refresh_token: String,
}

/// Revokes the upstream refresh token at the IdP's `/revoke` endpoint.
/// Shared by the cookie- and bearer-authenticated routes (§4.G requires
/// `cookie-or-token` auth here, same as `revoke-by-hash`).
async fn revoke_upstream_impl(
    state: &AppState,
    refresh_token: &str,
) -> Result<Json<ApiResponse<&'static str>>, CredMgrError> {
    let client = reqwest::Client::new();
    let response = client
        .post(&state.config.oauth_revoke_url)
        .form(&[
            ("token", refresh_token),
            ("client_id", state.config.oauth_client_id.as_str()),
            ("client_secret", state.config.oauth_client_secret.as_str()),
        ])
        .send()
        .await
        .map_err(|e| CredMgrError::Upstream(format!("idp revoke failed: {e}")))?;

    if !response.status().is_success() {
        return Err(CredMgrError::Upstream(format!(
            "idp revoke returned {}",
            response.status()
        )));
    }

    Ok(Json(ApiResponse::ok("ok", 1)))
}

pub async fn revoke_upstream_cookie(
    State(state): State<AppState>,
    _identity: CookieIdentity,
    Json(request): Json<RevokeUpstreamRequest>,
) -> Result<Json<ApiResponse<&'static str>>, CredMgrError> {
    revoke_upstream_impl(&state, &request.refresh_token).await
}

pub async fn revoke_upstream_bearer(
    State(state): State<AppState>,
    _identity: BearerIdentity,
    Json(request): Json<RevokeUpstreamRequest>,
) -> Result<Json<ApiResponse<&'static str>>, CredMgrError> {
    revoke_upstream_impl(&state, &request.refresh_token).await
}

/// `token` is a `token_hash` when `type == "identity"`, or an upstream
/// refresh_token when `type == "refresh"` (§6 line 206).
#[derive(Debug, Deserialize)]
pub struct RevokeRequest {
    pub token: String,
    #[serde(rename = "type")]
    pub kind: String,
}

async fn authorize_by_hash(
    state: &AppState,
    token_hash: &str,
    caller_email: &str,
    is_fleet_operator: bool,
) -> Result<crate::models::TokenRecord, CredMgrError> {
    let record = state
        .token_store
        .find_by_hash(token_hash)
        .await
        .map_err(|e| CredMgrError::Internal(e.to_string()))?
        .ok_or_else(|| CredMgrError::NotFound(format!("token {token_hash} not found")))?;

    if !is_fleet_operator && record.user_email != caller_email {
        return Err(CredMgrError::Forbidden(
            "caller is neither the owner nor a fleet operator".to_string(),
        ));
    }

    Ok(record)
}

pub async fn revoke_by_hash_cookie(
    State(state): State<AppState>,
    identity: CookieIdentity,
    Json(request): Json<RevokeRequest>,
) -> Result<Json<ApiResponse<&'static str>>, CredMgrError> {
    if request.kind == "refresh" {
        return revoke_upstream_impl(&state, &request.token).await;
    }

    let enrichment = state
        .directory
        .enrich_for_project(ProjectSelector::All, &identity.upstream_id_token)
        .await?;

    authorize_by_hash(&state, &request.token, &enrichment.email, enrichment.is_fleet_operator).await?;

    state
        .token_store
        .update_state(&request.token, TokenState::Revoked)
        .await
        .map_err(|e| CredMgrError::Internal(e.to_string()))?;

    Ok(Json(ApiResponse::ok("ok", 1)))
}

pub async fn revoke_by_hash_bearer(
    State(state): State<AppState>,
    identity: BearerIdentity,
    Json(request): Json<RevokeRequest>,
) -> Result<Json<ApiResponse<&'static str>>, CredMgrError> {
    if request.kind == "refresh" {
        return revoke_upstream_impl(&state, &request.token).await;
    }

    authorize_by_hash(&state, &request.token, &identity.user_email, false).await?;

    state
        .token_store
        .update_state(&request.token, TokenState::Revoked)
        .await
        .map_err(|e| CredMgrError::Internal(e.to_string()))?;

    Ok(Json(ApiResponse::ok("ok", 1)))
}

pub async fn delete_all_mine(
    State(state): State<AppState>,
    identity: CookieIdentity,
) -> Result<Json<ApiResponse<&'static str>>, CredMgrError> {
    let enrichment = state
        .directory
        .enrich_for_project(ProjectSelector::All, &identity.upstream_id_token)
        .await?;

    let rows = state
        .token_store
        .query(TokenQuery {
            user_email: Some(enrichment.email),
            offset: 0,
            limit: i64::MAX,
            ..Default::default()
        })
        .await
        .map_err(|e| CredMgrError::Internal(e.to_string()))?;

    for row in rows {
        let _ = state.token_store.remove(&row.token_hash).await;
    }

    Ok(Json(ApiResponse::ok("ok", 1)))
}

pub async fn delete_by_hash(
    State(state): State<AppState>,
    identity: CookieIdentity,
    Path(token_hash): Path<String>,
) -> Result<Json<ApiResponse<&'static str>>, CredMgrError> {
    let enrichment = state
        .directory
        .enrich_for_project(ProjectSelector::All, &identity.upstream_id_token)
        .await?;

    authorize_by_hash(&state, &token_hash, &enrichment.email, enrichment.is_fleet_operator).await?;

    state
        .token_store
        .remove(&token_hash)
        .await
        .map_err(|e| CredMgrError::Internal(e.to_string()))?;

    Ok(Json(ApiResponse::ok("ok", 1)))
}

#[derive(Debug, Deserialize, Default)]
pub struct ListTokensParams {
    pub token_hash: Option<String>,
    pub project_id: Option<String>,
    pub expires_before: Option<String>,
    #[serde(default)]
    pub states: Vec<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    100
}

#[derive(Debug, Serialize)]
pub struct ListedToken {
    pub token_hash: String,
    pub user_email: String,
    pub project_id: String,
    pub state: &'static str,
    pub created_at: String,
    pub expires_at: String,
}

pub async fn list_cookie(
    State(state): State<AppState>,
    identity: CookieIdentity,
    Query(params): Query<ListTokensParams>,
) -> Result<Json<ApiResponse<Vec<ListedToken>>>, CredMgrError> {
    let enrichment = state
        .directory
        .enrich_for_project(ProjectSelector::All, &identity.upstream_id_token)
        .await?;
    list_tokens(&state, params, &enrichment.email, enrichment.is_fleet_operator).await
}

pub async fn list_bearer(
    State(state): State<AppState>,
    identity: BearerIdentity,
    Query(params): Query<ListTokensParams>,
) -> Result<Json<ApiResponse<Vec<ListedToken>>>, CredMgrError> {
    list_tokens(&state, params, &identity.user_email, false).await
}

async fn list_tokens(
    state: &AppState,
    params: ListTokensParams,
    caller_email: &str,
    is_fleet_operator: bool,
) -> Result<Json<ApiResponse<Vec<ListedToken>>>, CredMgrError> {
    let user_email = if is_fleet_operator {
        None
    } else {
        Some(caller_email.to_string())
    };

    let rows = state
        .token_store
        .query(TokenQuery {
            user_email,
            project_id: params.project_id,
            token_hash: params.token_hash,
            offset: params.offset,
            limit: params.limit,
            ..Default::default()
        })
        .await
        .map_err(|e| CredMgrError::Internal(e.to_string()))?;

    let listed: Vec<ListedToken> = rows
        .into_iter()
        .map(|row| ListedToken {
            token_hash: row.token_hash.clone(),
            user_email: row.user_email.clone(),
            project_id: row.project_id.clone(),
            state: state_label(row.effective_state()),
            created_at: format_time(row.created_at),
            expires_at: format_time(row.expires_at),
        })
        .collect();

    let size = listed.len();
    Ok(Json(ApiResponse::ok(listed, size)))
}

#[derive(Debug, Deserialize)]
pub struct RevokeListParams {
    pub project_id: String,
}

pub async fn revoke_list(
    State(state): State<AppState>,
    Query(params): Query<RevokeListParams>,
) -> Result<Json<ApiResponse<Vec<String>>>, CredMgrError> {
    let hashes = state
        .token_store
        .revoked_hashes_for_project(&params.project_id)
        .await
        .map_err(|e| CredMgrError::Internal(e.to_string()))?;

    let size = hashes.len();
    Ok(Json(ApiResponse::ok(hashes, size)))
}

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    pub token: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Serialize)]
pub struct ValidateResponse {
    pub state: &'static str,
    pub claims: crate::services::mint::MintedClaims,
}

pub async fn validate(
    State(state): State<AppState>,
    Json(request): Json<ValidateRequest>,
) -> Result<Json<ApiResponse<ValidateResponse>>, CredMgrError> {
    let mut validation = jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::RS256);
    validation.set_audience(&[&state.config.oauth_client_id]);

    let decoded = jsonwebtoken::decode::<crate::services::mint::MintedClaims>(
        &request.token,
        state.key_material.decoding_key(),
        &validation,
    )
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
            CredMgrError::Unauthorized("token expired".to_string())
        }
        _ => CredMgrError::BadRequest(format!("unparsable token: {e}")),
    })?;

    let token_hash = crate::services::hash_token(&state.config.server_secret(), request.token.as_bytes());
    let record = state
        .token_store
        .find_by_hash(&token_hash)
        .await
        .map_err(|e| CredMgrError::Internal(e.to_string()))?
        .ok_or_else(|| CredMgrError::NotFound("token not found in store".to_string()))?;

    Ok(Json(ApiResponse::ok(
        ValidateResponse {
            state: state_label(record.effective_state()),
            claims: decoded.claims,
        },
        1,
    )))
}

pub async fn certs(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.key_material.public_jwks().clone())
}
