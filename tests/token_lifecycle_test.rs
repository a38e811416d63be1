// End-to-end HTTP tests for the token lifecycle API, covering the six
// scenarios the mint pipeline and revocation flow are designed around:
// a happy create, the long-lived-token cap, a disallowed scope, a
// revoke-then-list round trip, validating an already-revoked token, and a
// refresh that fails at the upstream IdP. Each test skips itself if
// DATABASE_URL isn't configured.

mod common;

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use chrono::Duration;
use tower::util::ServiceExt;
use uuid::Uuid;

use common::{try_setup_test_app, FakeDirectoryAdapter};

fn unique(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4())
}

fn default_directory(email: &str, is_token_holder: bool) -> Arc<FakeDirectoryAdapter> {
    Arc::new(FakeDirectoryAdapter {
        uuid: unique("user"),
        email: email.to_string(),
        is_fleet_operator: false,
        project_uuid: unique("project"),
        project_name: "testbed-project".to_string(),
        is_token_holder,
        deny_membership: false,
    })
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("read body");
    serde_json::from_slice(&bytes).expect("parse json body")
}

#[tokio::test]
async fn create_mints_a_token_for_an_allowed_scope() {
    let email = unique("alice") + "@example.org";
    let directory = default_directory(&email, true);
    let Some(test_app) = try_setup_test_app(directory).await else {
        eprintln!("skipping: DATABASE_URL not configured");
        return;
    };

    let upstream_token = test_app.idp.sign_id_token("upstream-sub-1", &email, Duration::hours(1));
    let cookie = test_app.vouch_cookie_header("alice", &upstream_token);

    let body = serde_json::json!({
        "project_id": "any-project",
        "scope": "all",
        "lifetime_hours": 1,
    });

    let response = test_app
        .app
        .clone()
        .oneshot(
            Request::post("/v1/tokens/create")
                .header("cookie", cookie)
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let parsed = json_body(response).await;
    assert_eq!(parsed["status"], 200);
    assert!(parsed["data"]["token_hash"].as_str().unwrap().len() == 64);
    assert_eq!(parsed["data"]["state"], "Valid");
    assert!(!parsed["data"]["id_token"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn long_lived_tokens_are_capped_per_project() {
    let email = unique("bob") + "@example.org";
    let directory = default_directory(&email, true);
    let Some(test_app) = try_setup_test_app(directory).await else {
        eprintln!("skipping: DATABASE_URL not configured");
        return;
    };

    let upstream_token = test_app.idp.sign_id_token("upstream-sub-2", &email, Duration::hours(1));
    let cookie = test_app.vouch_cookie_header("bob", &upstream_token);

    // short_threshold_seconds is configured to 4 hours; 5-hour requests are
    // long-lived. max_llt_per_project is configured to 2.
    let long_lived_body = serde_json::json!({
        "project_id": "any-project",
        "scope": "all",
        "lifetime_hours": 5,
    });

    for _ in 0..2 {
        let response = test_app
            .app
            .clone()
            .oneshot(
                Request::post("/v1/tokens/create")
                    .header("cookie", cookie.clone())
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_vec(&long_lived_body).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let third = test_app
        .app
        .clone()
        .oneshot(
            Request::post("/v1/tokens/create")
                .header("cookie", cookie)
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&long_lived_body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(third.status(), StatusCode::FORBIDDEN);
    let parsed = json_body(third).await;
    assert!(parsed["message"]
        .as_str()
        .unwrap()
        .contains("long-lived"));
}

#[tokio::test]
async fn create_rejects_a_scope_outside_the_allow_list() {
    let email = unique("carol") + "@example.org";
    let directory = default_directory(&email, true);
    let Some(test_app) = try_setup_test_app(directory).await else {
        eprintln!("skipping: DATABASE_URL not configured");
        return;
    };

    let upstream_token = test_app.idp.sign_id_token("upstream-sub-3", &email, Duration::hours(1));
    let cookie = test_app.vouch_cookie_header("carol", &upstream_token);

    let body = serde_json::json!({
        "project_id": "any-project",
        "scope": "not-an-allowed-scope",
        "lifetime_hours": 1,
    });

    let response = test_app
        .app
        .clone()
        .oneshot(
            Request::post("/v1/tokens/create")
                .header("cookie", cookie)
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let parsed = json_body(response).await;
    assert!(parsed["message"].as_str().unwrap().contains("not allowed"));
}

#[tokio::test]
async fn revoking_a_token_is_reflected_in_the_owners_listing() {
    let email = unique("dave") + "@example.org";
    let directory = default_directory(&email, true);
    let Some(test_app) = try_setup_test_app(directory).await else {
        eprintln!("skipping: DATABASE_URL not configured");
        return;
    };

    let upstream_token = test_app.idp.sign_id_token("upstream-sub-4", &email, Duration::hours(1));
    let cookie = test_app.vouch_cookie_header("dave", &upstream_token);

    let create_body = serde_json::json!({
        "project_id": "any-project",
        "scope": "all",
        "lifetime_hours": 1,
    });
    let created = test_app
        .app
        .clone()
        .oneshot(
            Request::post("/v1/tokens/create")
                .header("cookie", cookie.clone())
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&create_body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(created.status(), StatusCode::OK);
    let created = json_body(created).await;
    let token_hash = created["data"]["token_hash"].as_str().unwrap().to_string();

    let revoke_body = serde_json::json!({"token": token_hash, "type": "identity"});
    let revoked = test_app
        .app
        .clone()
        .oneshot(
            Request::post("/v1/tokens/revokes")
                .header("cookie", cookie.clone())
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&revoke_body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(revoked.status(), StatusCode::OK);

    let listed = test_app
        .app
        .clone()
        .oneshot(
            Request::get("/v1/tokens/")
                .header("cookie", cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(listed.status(), StatusCode::OK);
    let listed = json_body(listed).await;
    let rows = listed["data"].as_array().unwrap();
    let row = rows
        .iter()
        .find(|r| r["token_hash"] == token_hash)
        .expect("revoked token present in listing");
    assert_eq!(row["state"], "Revoked");
}

#[tokio::test]
async fn validate_reports_revoked_state_for_a_revoked_token() {
    let email = unique("erin") + "@example.org";
    let directory = default_directory(&email, true);
    let Some(test_app) = try_setup_test_app(directory).await else {
        eprintln!("skipping: DATABASE_URL not configured");
        return;
    };

    let upstream_token = test_app.idp.sign_id_token("upstream-sub-5", &email, Duration::hours(1));
    let cookie = test_app.vouch_cookie_header("erin", &upstream_token);

    let create_body = serde_json::json!({
        "project_id": "any-project",
        "scope": "all",
        "lifetime_hours": 1,
    });
    let created = test_app
        .app
        .clone()
        .oneshot(
            Request::post("/v1/tokens/create")
                .header("cookie", cookie.clone())
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&create_body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    let created = json_body(created).await;
    let token_hash = created["data"]["token_hash"].as_str().unwrap().to_string();
    let signed_jwt = created["data"]["id_token"].as_str().unwrap().to_string();

    let revoke_body = serde_json::json!({"token": token_hash, "type": "identity"});
    let revoked = test_app
        .app
        .clone()
        .oneshot(
            Request::post("/v1/tokens/revokes")
                .header("cookie", cookie)
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&revoke_body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(revoked.status(), StatusCode::OK);

    let validate_body = serde_json::json!({"token": signed_jwt, "type": "access"});
    let validated = test_app
        .app
        .clone()
        .oneshot(
            Request::post("/v1/tokens/validate")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&validate_body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(validated.status(), StatusCode::OK);
    let validated = json_body(validated).await;
    assert_eq!(validated["data"]["state"], "Revoked");
}

#[tokio::test]
async fn refresh_surfaces_an_upstream_failure_as_a_bad_gateway() {
    // oauth_token_url in the test harness points at an address nothing is
    // listening on, so the upstream exchange fails before the mint pipeline
    // ever runs.
    let email = unique("frank") + "@example.org";
    let directory = default_directory(&email, true);
    let Some(test_app) = try_setup_test_app(directory).await else {
        eprintln!("skipping: DATABASE_URL not configured");
        return;
    };

    let body = serde_json::json!({
        "refresh_token": "some-upstream-refresh-token",
        "project_id": "any-project",
        "scope": "all",
    });

    let response = test_app
        .app
        .clone()
        .oneshot(
            Request::post("/v1/tokens/refresh")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn revoke_upstream_rejects_an_unauthenticated_caller() {
    let email = unique("gina") + "@example.org";
    let directory = default_directory(&email, true);
    let Some(test_app) = try_setup_test_app(directory).await else {
        eprintln!("skipping: DATABASE_URL not configured");
        return;
    };

    let body = serde_json::json!({"refresh_token": "some-upstream-refresh-token"});

    let response = test_app
        .app
        .clone()
        .oneshot(
            Request::post("/v1/tokens/revoke")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn revokes_with_type_refresh_hits_the_upstream_revoke_path_not_the_hash_store() {
    // oauth_revoke_url in the test harness points at an address nothing is
    // listening on, so a `type: refresh` request must fail as an upstream
    // error, not as "token not found" (which is what a hash lookup on a
    // non-hash string would otherwise produce).
    let email = unique("henry") + "@example.org";
    let directory = default_directory(&email, true);
    let Some(test_app) = try_setup_test_app(directory).await else {
        eprintln!("skipping: DATABASE_URL not configured");
        return;
    };

    let upstream_token = test_app.idp.sign_id_token("upstream-sub-6", &email, Duration::hours(1));
    let cookie = test_app.vouch_cookie_header("henry", &upstream_token);

    let revoke_body = serde_json::json!({"token": "some-upstream-refresh-token", "type": "refresh"});
    let response = test_app
        .app
        .clone()
        .oneshot(
            Request::post("/v1/tokens/revokes")
                .header("cookie", cookie)
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&revoke_body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}
