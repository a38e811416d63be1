// Top-level error type for the credential broker.
// Mirrors the teacher's ServiceError/AuthError split, collapsed into one
// enum since every HTTP-facing error in this service maps to exactly one
// of the kinds below (see the error table in the design doc).

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CredMgrError {
    #[error("{0}")]
    BadRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("internal error: {0}")]
    Internal(String),

    /// Like `Internal`, but carrying a structured `details` payload in the
    /// error body rather than wedging data into the message string — used
    /// by `refresh` to surface the new upstream refresh_token on a
    /// post-exchange mint failure (§7/§8.6).
    #[error("{message}")]
    InternalWithDetails {
        message: String,
        details: serde_json::Value,
    },
}

impl CredMgrError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            CredMgrError::BadRequest(_) => StatusCode::BAD_REQUEST,
            CredMgrError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            CredMgrError::Forbidden(_) => StatusCode::FORBIDDEN,
            CredMgrError::NotFound(_) => StatusCode::NOT_FOUND,
            CredMgrError::Conflict(_) => StatusCode::CONFLICT,
            CredMgrError::Upstream(_) => StatusCode::BAD_GATEWAY,
            CredMgrError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CredMgrError::InternalWithDetails { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    status: u16,
    message: String,
    details: Option<serde_json::Value>,
}

impl IntoResponse for CredMgrError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        tracing::error!(status = status.as_u16(), "{}", self);
        let details = match &self {
            CredMgrError::InternalWithDetails { details, .. } => Some(details.clone()),
            _ => None,
        };
        let body = ErrorBody {
            status: status.as_u16(),
            message: self.to_string(),
            details,
        };
        (status, Json(json!(body))).into_response()
    }
}

impl From<diesel::result::Error> for CredMgrError {
    fn from(error: diesel::result::Error) -> Self {
        match error {
            diesel::result::Error::NotFound => {
                CredMgrError::NotFound("token not found".to_string())
            }
            other => CredMgrError::Internal(format!("database error: {other}")),
        }
    }
}

impl From<crate::services::idp_jwks::JwksError> for CredMgrError {
    fn from(error: crate::services::idp_jwks::JwksError) -> Self {
        use crate::services::idp_jwks::JwksError::*;
        match error {
            Unparsable(msg) => CredMgrError::BadRequest(format!("unparsable upstream token: {msg}")),
            UnknownKey(kid) => CredMgrError::Unauthorized(format!("unknown signing key: {kid}")),
            Expired => CredMgrError::Unauthorized("upstream token expired".to_string()),
            AudienceMismatch => CredMgrError::Unauthorized("audience mismatch".to_string()),
            Invalid(msg) => CredMgrError::Unauthorized(format!("invalid upstream token: {msg}")),
            Fetch(msg) => CredMgrError::Upstream(format!("jwks fetch failed: {msg}")),
        }
    }
}

impl From<crate::services::directory::DirectoryError> for CredMgrError {
    fn from(error: crate::services::directory::DirectoryError) -> Self {
        use crate::services::directory::DirectoryError::*;
        match error {
            MissingCredential => {
                CredMgrError::Unauthorized("no cookie or token supplied".to_string())
            }
            NotMember(project) => {
                CredMgrError::Forbidden(format!("user is not a member of project: {project}"))
            }
            ProjectNotActive(project) => {
                CredMgrError::BadRequest(format!("project {project} is not active"))
            }
            ProjectNotFound(name) => {
                CredMgrError::NotFound(format!("project '{name}' not found"))
            }
            AmbiguousProjectName(name) => {
                CredMgrError::Conflict(format!("more than one project named '{name}'"))
            }
            Http(msg) => CredMgrError::Upstream(format!("directory error: {msg}")),
        }
    }
}

impl From<crate::services::key_material::KeyMaterialError> for CredMgrError {
    fn from(error: crate::services::key_material::KeyMaterialError) -> Self {
        CredMgrError::Internal(format!("signing failure: {error}"))
    }
}

impl From<crate::services::mint::MintError> for CredMgrError {
    fn from(error: crate::services::mint::MintError) -> Self {
        use crate::services::mint::MintError::*;
        match error {
            ScopeNotAllowed(scope) => {
                CredMgrError::BadRequest(format!("scope '{scope}' is not allowed"))
            }
            ProjectSelectorAmbiguous => {
                CredMgrError::BadRequest("exactly one of project_id or project_name is required".to_string())
            }
            LifetimeOutOfRange(max) => {
                CredMgrError::BadRequest(format!("lifetime_hours must be between 1 and {max}"))
            }
            LongLivedPolicy(msg) => CredMgrError::Forbidden(msg),
            Upstream(e) => e.into(),
            Directory(e) => e.into(),
            Signing(e) => e.into(),
            Store(e) => CredMgrError::Internal(format!("token store error: {e}")),
        }
    }
}
