pub mod create_cli;
pub mod tokens;

use crate::app::AppState;
use axum::{
    routing::{delete, get, post},
    Router,
};

/// Token Lifecycle API surface (§4.G, §6), nested under `/v1` the way the
/// teacher nests `/v1/auth`.
pub fn token_routes() -> Router<AppState> {
    Router::new()
        .route("/create", post(tokens::create))
        .route("/create_cli", get(create_cli::create_cli))
        .route("/refresh", post(tokens::refresh))
        .route("/revoke", post(tokens::revoke_upstream_cookie))
        .route("/revoke/bearer", post(tokens::revoke_upstream_bearer))
        .route("/revokes", post(tokens::revoke_by_hash_cookie))
        .route("/revokes/bearer", post(tokens::revoke_by_hash_bearer))
        .route(
            "/",
            get(tokens::list_cookie).delete(tokens::delete_all_mine),
        )
        .route("/{token_hash}", delete(tokens::delete_by_hash))
        .route("/bearer", get(tokens::list_bearer))
        .route("/revoke_list", get(tokens::revoke_list))
        .route("/validate", post(tokens::validate))
}

pub fn cert_routes() -> Router<AppState> {
    Router::new().route("/certs", get(tokens::certs))
}
