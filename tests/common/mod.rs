// Shared harness for HTTP-level integration tests against the token
// lifecycle API. Requires a reachable Postgres at DATABASE_URL (loaded from
// `.env.test` if present) — tests using this harness skip themselves when
// it isn't set, the same accommodation the teacher's own postgres_test.rs
// makes for environments without a database.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{Duration, Utc};
use diesel::Connection;
use diesel_migrations::MigrationHarness;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;

use credmgr_core::app_config::{AppConfig, Environment};
use credmgr_core::db::diesel_pool::MIGRATIONS;
use credmgr_core::db::{create_diesel_pool, DieselDatabaseConfig};
use credmgr_core::services::directory::{
    DirectoryAdapter, Enrichment, ProjectInfo, ProjectMembership, ProjectSelector, Role,
};
use credmgr_core::services::DirectoryError;
use credmgr_core::{AppState, IdpJwksCache, KeyMaterial, TokenStore, VouchCodec};

/// Upstream IdP stand-in: its own RSA keypair plus a tiny JWKS HTTP server
/// so `IdpJwksCache::refresh()` has something real to fetch from.
pub struct FakeIdp {
    addr: SocketAddr,
    pub audience: String,
    kid: String,
    encoding_key: EncodingKey,
}

#[derive(Clone)]
struct JwksState {
    kid: String,
    n: String,
    e: String,
}

async fn jwks_handler(State(state): State<JwksState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "keys": [{
            "kid": state.kid,
            "n": state.n,
            "e": state.e,
            "kty": "RSA",
            "alg": "RS256",
            "use": "sig",
        }]
    }))
}

fn generate_rsa_pem_pair() -> (String, String, rsa::RsaPublicKey) {
    let mut rng = rand::rngs::OsRng;
    let private_key = RsaPrivateKey::new(&mut rng, 2048).expect("keygen");
    let public_key = rsa::RsaPublicKey::from(&private_key);
    let private_pem = private_key
        .to_pkcs8_pem(LineEnding::LF)
        .expect("encode private")
        .to_string();
    let public_pem = public_key
        .to_public_key_pem(LineEnding::LF)
        .expect("encode public");
    (private_pem, public_pem, public_key)
}

impl FakeIdp {
    pub async fn start(audience: &str) -> Self {
        let (private_pem, _public_pem, public_key) = generate_rsa_pem_pair();
        let encoding_key =
            EncodingKey::from_rsa_pem(private_pem.as_bytes()).expect("jsonwebtoken accepts pkcs8 rsa pem");

        let n = URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be());
        let e = URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be());
        let kid = "idp-test-key-1".to_string();

        let state = JwksState {
            kid: kid.clone(),
            n,
            e,
        };
        let router = Router::new()
            .route("/jwks", get(jwks_handler))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake idp listener");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        Self {
            addr,
            audience: audience.to_string(),
            kid,
            encoding_key,
        }
    }

    pub fn jwks_url(&self) -> String {
        format!("http://{}/jwks", self.addr)
    }

    /// Signs an upstream ID token the way the real IdP would, with a
    /// controllable `sub`/`email` and lifetime.
    pub fn sign_id_token(&self, sub: &str, email: &str, lifetime: Duration) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.kid.clone());
        let now = Utc::now();
        let claims = serde_json::json!({
            "sub": sub,
            "aud": self.audience,
            "iat": now.timestamp(),
            "exp": (now + lifetime).timestamp(),
            "email": email,
        });
        jsonwebtoken::encode(&header, &claims, &self.encoding_key).expect("sign upstream id token")
    }
}

/// Stands in for both the REST and LDAP directory paths in tests: every
/// field is fixed at construction time rather than backed by a live
/// directory service.
pub struct FakeDirectoryAdapter {
    pub uuid: String,
    pub email: String,
    pub is_fleet_operator: bool,
    pub project_uuid: String,
    pub project_name: String,
    pub is_token_holder: bool,
    pub deny_membership: bool,
}

#[async_trait::async_trait]
impl DirectoryAdapter for FakeDirectoryAdapter {
    async fn who_am_i(&self, _cookie_or_token: &str) -> Result<(String, String), DirectoryError> {
        Ok((self.uuid.clone(), self.email.clone()))
    }

    async fn enrich_for_project(
        &self,
        _selector: ProjectSelector<'_>,
        _cookie_or_token: &str,
    ) -> Result<Enrichment, DirectoryError> {
        if self.deny_membership {
            return Err(DirectoryError::NotMember(self.project_name.clone()));
        }
        Ok(Enrichment {
            uuid: Some(self.uuid.clone()),
            email: self.email.clone(),
            roles: vec![Role {
                name: "project-lead".to_string(),
            }],
            active_projects: vec![ProjectInfo {
                uuid: self.project_uuid.clone(),
                name: self.project_name.clone(),
                active: true,
                tags: Some(Vec::new()),
                memberships: Some(ProjectMembership {
                    is_member: true,
                    is_creator: false,
                    is_owner: false,
                    is_token_holder: self.is_token_holder,
                }),
            }],
            is_fleet_operator: self.is_fleet_operator,
        })
    }
}

pub struct TestApp {
    pub app: Router,
    pub vouch_codec: Arc<VouchCodec>,
    pub vouch_cookie_name: String,
    pub token_store: TokenStore,
    pub idp: FakeIdp,
}

impl TestApp {
    /// Builds the `Cookie` header value carrying a freshly-encoded proxy
    /// cookie for the given upstream tokens.
    pub fn vouch_cookie_header(&self, username: &str, upstream_id_token: &str) -> String {
        use credmgr_core::services::vouch_cookie::{PTokens, VouchCookiePayload};
        use serde_json::Map;

        let payload = VouchCookiePayload {
            username: username.to_string(),
            sites: vec![],
            custom_claims: Map::new(),
            tokens: PTokens {
                id_token: upstream_id_token.to_string(),
                refresh_token: None,
                access_token: None,
            },
            exp: (Utc::now() + Duration::hours(1)).timestamp(),
        };
        let cookie = self.vouch_codec.encode(&payload).expect("encode vouch cookie");
        format!("{}={}", self.vouch_cookie_name, cookie)
    }
}

async fn run_migrations(database_url: &str) {
    let database_url = database_url.to_string();
    tokio::task::spawn_blocking(move || {
        let mut conn = diesel::PgConnection::establish(&database_url)
            .expect("sync connection for migrations");
        conn.run_pending_migrations(MIGRATIONS)
            .expect("run pending migrations");
    })
    .await
    .expect("migration task panicked");
}

/// Builds a fully-wired `TestApp` backed by a real Postgres connection and
/// a fake upstream IdP, or `None` if no `DATABASE_URL` is configured.
pub async fn try_setup_test_app(directory: Arc<dyn DirectoryAdapter>) -> Option<TestApp> {
    dotenv::from_filename(".env.test").ok();
    let database_url = std::env::var("DATABASE_URL").ok()?;

    let idp = FakeIdp::start("credmgr-test-client").await;

    let db_config = DieselDatabaseConfig {
        url: database_url.clone(),
        max_connections: 5,
        min_connections: 1,
        connection_timeout: StdDuration::from_secs(5),
        idle_timeout: StdDuration::from_secs(60),
        max_lifetime: StdDuration::from_secs(300),
        test_on_checkout: true,
    };
    let diesel_pool = create_diesel_pool(db_config).await.ok()?;
    run_migrations(&database_url).await;

    let (service_private_pem, service_public_pem, _) = generate_rsa_pem_pair();
    let key_material = KeyMaterial::load(&service_private_pem, &service_public_pem, "cm-test-key", None)
        .expect("load service key material");

    let idp_jwks_cache = Arc::new(IdpJwksCache::new(idp.jwks_url(), idp.audience.clone()));
    idp_jwks_cache
        .refresh()
        .await
        .expect("fetch fake idp jwks");

    let vouch_cookie_name = "fabric-vouch-test".to_string();
    let vouch_codec = Arc::new(VouchCodec::new(b"test-vouch-secret-at-least-32-characters".to_vec()));
    let token_store = TokenStore::new(diesel_pool.clone());

    let config = AppConfig {
        environment: Environment::Test,
        rust_log: "info".to_string(),
        rest_port: 0,
        prometheus_port: 0,
        token_lifetime_seconds: 4 * 3600,
        max_llt_per_project: 2,
        allowed_scopes: vec!["all".to_string(), "cf".to_string()],
        roles_list: vec![],
        project_names_ignore_list: vec![],
        enable_core_api: true,
        enable_project_registry: false,
        disable_embedded_migrations: true,
        oauth_provider: "test-idp".to_string(),
        oauth_client_id: idp.audience.clone(),
        oauth_client_secret: "unused-in-tests".to_string(),
        oauth_token_url: "http://127.0.0.1:1/token".to_string(),
        oauth_revoke_url: "http://127.0.0.1:1/revoke".to_string(),
        oauth_jwks_url: idp.jwks_url(),
        oauth_key_refresh_seconds: 3600,
        jwt_private_key_path: String::new(),
        jwt_public_key_path: String::new(),
        jwt_public_key_kid: "cm-test-key".to_string(),
        jwt_pass_phrase: None,
        database_url: database_url.clone(),
        database_max_connections: 5,
        database_min_connections: 1,
        database_connect_timeout: 5,
        database_idle_timeout: 60,
        database_max_lifetime: 300,
        vouch_secret: "test-vouch-secret-at-least-32-characters".to_string(),
        vouch_compression: true,
        vouch_custom_claims: vec!["openid".to_string(), "email".to_string()],
        vouch_lifetime_seconds: 43200,
        vouch_cookie_name: vouch_cookie_name.clone(),
        vouch_cookie_domain: String::new(),
        directory_url: "http://127.0.0.1:1".to_string(),
        directory_ssl_verify: false,
        fleet_operator_role: "facility-operators".to_string(),
        project_registry_url: String::new(),
        project_registry_ssl_verify: true,
        ldap_host: String::new(),
        ldap_user: String::new(),
        ldap_password: String::new(),
        ldap_search_base: String::new(),
        log_directory: "/tmp".to_string(),
        log_file: "credmgr-test.log".to_string(),
        log_level: "info".to_string(),
        log_retain: 1,
        log_size: "1MB".to_string(),
    };

    let app_state = AppState {
        config: Arc::new(config),
        diesel_pool,
        key_material,
        idp_jwks_cache,
        directory,
        vouch_codec: vouch_codec.clone(),
        token_store: token_store.clone(),
        max_connections: 5,
    };

    let app = Router::new()
        .nest("/v1/tokens", credmgr_core::token_routes())
        .nest("/v1", credmgr_core::cert_routes())
        .with_state(app_state);

    Some(TestApp {
        app,
        vouch_codec,
        vouch_cookie_name,
        token_store,
        idp,
    })
}
