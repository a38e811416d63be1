// Application state shared across handlers.
use std::sync::Arc;

use crate::{
    app_config::AppConfig,
    db::DieselPool,
    services::{DirectoryAdapter, IdpJwksCache, KeyMaterial, TokenStore, VouchCodec},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub diesel_pool: DieselPool,
    pub key_material: KeyMaterial,
    pub idp_jwks_cache: Arc<IdpJwksCache>,
    pub directory: Arc<dyn DirectoryAdapter>,
    pub vouch_codec: Arc<VouchCodec>,
    pub token_store: TokenStore,
    pub max_connections: u32,
}
