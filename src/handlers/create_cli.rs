// `create_cli`'s two-phase redirect (§4.G, §6's out-of-scope note on
// "command-line assistance flows"): only the stash-cookie/restart wire
// contract is implemented here, not a CLI client.
//
// First pass (no proxy cookie yet): stash the original query string in a
// short-lived cookie and redirect to the login URL. Second pass (cookie
// now present after login): pop the stash cookie and run the normal
// `create` mint pipeline against the restored parameters.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use serde::{Deserialize, Serialize};

use crate::app::AppState;
use crate::handlers::tokens::{create, CreateTokenRequest};
use crate::middleware::auth::CookieIdentity;
use crate::utils::CredMgrError;

const STASH_COOKIE_NAME: &str = "credmgr-cli-stash";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct CreateCliParams {
    pub project_id: Option<String>,
    pub project_name: Option<String>,
    pub scope: Option<String>,
    pub lifetime_hours: Option<u32>,
    pub comment: Option<String>,
}

pub async fn create_cli(
    State(state): State<AppState>,
    jar: CookieJar,
    identity: Option<CookieIdentity>,
    headers: axum::http::HeaderMap,
    Query(params): Query<CreateCliParams>,
) -> Result<Response, CredMgrError> {
    let Some(identity) = identity else {
        // First pass: no proxy cookie yet. Stash the query string and send
        // the caller through login; they land back on this same URL.
        let query_string = serde_json::to_string(&params)
            .map_err(|e| CredMgrError::Internal(format!("failed to stash cli params: {e}")))?;

        let stash = Cookie::build((STASH_COOKIE_NAME, query_string))
            .path("/")
            .http_only(true)
            .secure(state.config.is_production())
            .build();

        let jar = jar.add(stash);
        return Ok((
            jar,
            Redirect::temporary(&format!("/login?return_to={}", state.config.oauth_client_id)),
        )
            .into_response());
    };

    // Second pass: the upstream login redirect doesn't carry the original
    // query string back, so restore it from the stash cookie whenever this
    // request's own query string is empty.
    let restored = if params.scope.is_none() {
        jar.get(STASH_COOKIE_NAME)
            .and_then(|c| serde_json::from_str::<CreateCliParams>(c.value()).ok())
            .unwrap_or(params)
    } else {
        params
    };

    let jar = jar.remove(Cookie::from(STASH_COOKIE_NAME));

    let scope = restored
        .scope
        .ok_or_else(|| CredMgrError::BadRequest("scope is required".to_string()))?;
    let lifetime_hours = restored
        .lifetime_hours
        .ok_or_else(|| CredMgrError::BadRequest("lifetime_hours is required".to_string()))?;

    let response = create(
        State(state),
        identity,
        headers,
        axum::Json(CreateTokenRequest {
            project_id: restored.project_id,
            project_name: restored.project_name,
            scope,
            lifetime_hours,
            comment: restored.comment,
        }),
    )
    .await?;

    Ok((StatusCode::OK, jar, response).into_response())
}
