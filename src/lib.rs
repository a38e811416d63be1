// Library exports for the credential broker.

pub mod app;
pub mod app_config;
pub mod db;
pub mod handlers;
pub mod middleware;
pub mod migrations;
pub mod models;
pub mod schema;
pub mod services;
pub mod utils;

pub use app::AppState;
pub use app_config::{AppConfig, CONFIG};
pub use db::{DieselDatabaseConfig, DieselPool};
pub use middleware::{BearerIdentity, CookieIdentity};
pub use models::{NewTokenRecord, TokenQuery, TokenRecord, TokenState, TokenStoreError};
pub use services::{
    DirectoryAdapter, IdpJwksCache, KeyMaterial, MintError, MintOutcome, MintPipeline,
    MintPipelineConfig, TokenStore, VouchCodec,
};
pub use utils::CredMgrError;

pub use handlers::{cert_routes, token_routes};

/// Health check handler: connectivity to PostgreSQL only — the ambient
/// operational surface carried over from the teacher, with the Redis leg
/// dropped since this service has no Redis dependency.
pub async fn health_check(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> impl axum::response::IntoResponse {
    use axum::http::StatusCode;
    use axum::Json;

    let timestamp = chrono::Utc::now().to_rfc3339();

    let postgres_health = match db::check_diesel_health(&state.diesel_pool).await {
        Ok(_) => serde_json::json!({
            "status": "healthy",
            "max_connections": state.max_connections,
            "error": null
        }),
        Err(e) => serde_json::json!({
            "status": "unhealthy",
            "error": format!("database connection failed: {e}")
        }),
    };

    let overall_healthy = postgres_health["status"] == "healthy";
    let response = serde_json::json!({
        "status": if overall_healthy { "healthy" } else { "degraded" },
        "service": "credmgr-core",
        "timestamp": timestamp,
        "components": {
            "postgresql": postgres_health,
        }
    });

    if overall_healthy {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}
