use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use credmgr_core::{
    app::AppState,
    app_config,
    db::{check_diesel_health, create_diesel_pool, mask_connection_string, DieselDatabaseConfig},
    migrations,
    services::{
        directory::{ldap::LdapDirectoryClient, rest::CoreApiClient, DirectoryAdapter},
        idp_jwks::IdpJwksCache,
        key_material::KeyMaterial,
        token_store::TokenStore,
        vouch_cookie::VouchCodec,
    },
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() > 1 && args[1] == "--version" {
        println!("credmgr-core v{}", env!("CARGO_PKG_VERSION"));
        std::process::exit(0);
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "credmgr_core=debug,axum=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenv::dotenv().ok();

    let config = app_config::config();
    info!("=== STARTING CREDENTIAL MANAGER ===");
    info!("binding on 0.0.0.0:{}", config.rest_port);

    info!("Initializing database pool...");
    let db_config = DieselDatabaseConfig::default();
    info!("Database URL: {}", mask_connection_string(&db_config.url));

    let max_connections = db_config.max_connections;
    let diesel_pool = match create_diesel_pool(db_config).await {
        Ok(pool) => {
            info!("✓ Database connection pool initialized successfully");
            pool
        }
        Err(e) => {
            error!("✗ Failed to initialize database pool: {}", e);
            return Err(format!("Database initialization failed: {}", e).into());
        }
    };

    if migrations::should_run_migrations() {
        info!("Running embedded migrations...");
        let migration_config = migrations::MigrationConfig::default();
        match migrations::run_all_migrations(&diesel_pool, migration_config).await {
            Ok(()) => info!("✓ All migrations completed successfully"),
            Err(e) => {
                error!("✗ Migration failed: {}", e);
                return Err(format!("Migration failed: {}", e).into());
            }
        }
    } else {
        info!("Embedded migrations disabled - using external migration scripts");
    }

    info!("Loading key material...");
    let private_key_pem = std::fs::read_to_string(&config.jwt_private_key_path)
        .map_err(|e| format!("failed to read JWT_PRIVATE_KEY: {e}"))?;
    let public_key_pem = std::fs::read_to_string(&config.jwt_public_key_path)
        .map_err(|e| format!("failed to read JWT_PUBLIC_KEY: {e}"))?;
    let key_material = KeyMaterial::load(
        &private_key_pem,
        &public_key_pem,
        &config.jwt_public_key_kid,
        config.jwt_pass_phrase.as_deref(),
    )
    .map_err(|e| format!("failed to load key material: {e}"))?;
    info!("✓ Key material loaded (kid={})", key_material.kid());

    info!("Initializing IdP JWKS cache...");
    let idp_jwks_cache = Arc::new(IdpJwksCache::new(
        config.oauth_jwks_url.clone(),
        config.oauth_client_id.clone(),
    ));
    idp_jwks_cache
        .refresh()
        .await
        .map_err(|e| format!("initial idp jwks fetch failed: {e}"))?;
    info!("✓ IdP JWKS cache populated");

    let directory: Arc<dyn DirectoryAdapter> = if config.enable_core_api {
        info!("Directory Adapter: REST (core-api) path");
        Arc::new(CoreApiClient::new(
            config.directory_url.clone(),
            config.fleet_operator_role.clone(),
        ))
    } else if config.enable_project_registry {
        info!("Directory Adapter: REST (project-registry) path");
        Arc::new(CoreApiClient::new(
            config.project_registry_url.clone(),
            config.fleet_operator_role.clone(),
        ))
    } else {
        info!("Directory Adapter: LDAP fallback path");
        Arc::new(LdapDirectoryClient::new(
            config.ldap_host.clone(),
            config.ldap_user.clone(),
            config.ldap_password.clone(),
            config.ldap_search_base.clone(),
            config.project_names_ignore_list.clone(),
            config.roles_list.clone(),
        ))
    };

    let vouch_codec = Arc::new(VouchCodec::new(config.server_secret()));
    let token_store = TokenStore::new(diesel_pool.clone());

    let app_state = AppState {
        config: Arc::new(config.clone()),
        diesel_pool: diesel_pool.clone(),
        key_material,
        idp_jwks_cache,
        directory,
        vouch_codec,
        token_store,
        max_connections,
    };

    let app = Router::new()
        .route("/v1/health", get(credmgr_core::health_check))
        .nest("/v1/tokens", credmgr_core::token_routes())
        .nest("/v1", credmgr_core::cert_routes())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(tower_http::cors::CorsLayer::permissive()),
        )
        .with_state(app_state.clone());

    info!("Starting background tasks...");
    credmgr_core::services::background_tasks::initialize_background_tasks(app_state).await;
    info!("✓ Background task manager started - IdP JWKS cache refreshes on a timer");

    let addr: SocketAddr = format!("0.0.0.0:{}", config.rest_port).parse()?;
    info!("Starting HTTP server on {}...", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
