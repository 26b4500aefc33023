//! OAuth2 endpoint tests.
//!
//! Drive the authorize, token and userinfo endpoints through the full router
//! against an in-memory database.

mod common;

use axum::http::{HeaderName, HeaderValue, header};
use common::*;
use federated_frontdoor::entity::oauth2_authorization;
use federated_frontdoor::storage::{AuthorizeGrant, ClientStore};
use sea_orm::{EntityTrait, PaginatorTrait};
use time::{Duration, OffsetDateTime};

fn bearer(token: &str) -> (HeaderName, HeaderValue) {
    (
        header::AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {token}")).expect("header value"),
    )
}

/// Logs in through the authorize form and returns the issued code.
async fn login_for_code(server: &axum_test::TestServer, handle: &str, password: &str) -> String {
    let response = server
        .post("/oauth/authorize")
        .form(&[
            ("response_type", "code"),
            ("client_id", PUBLIC_CLIENT),
            ("redirect_uri", REDIRECT_URI),
            ("scope", "read"),
            ("state", "af0ifjsldkj"),
            ("handle", handle),
            ("pw", password),
        ])
        .await;
    response.assert_status_see_other();
    let params = location_params(&response);
    assert_eq!(param(&params, "state"), Some("af0ifjsldkj"));
    param(&params, "code").expect("code in redirect").to_string()
}

#[tokio::test]
async fn test_discovery_document() {
    let app = TestApp::new().await;
    let response = app
        .server()
        .get("/.well-known/oauth-authorization-server")
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["issuer"], "https://fed.example");
    assert_eq!(body["token_endpoint"], "https://fed.example/oauth/token");
    assert_eq!(
        body["grant_types_supported"],
        serde_json::json!(["authorization_code", "password"])
    );
}

#[tokio::test]
async fn test_health_and_api_docs() {
    let app = TestApp::new().await;
    let server = app.server();

    let response = server.get("/healthz").await;
    response.assert_status_ok();
    assert_eq!(response.text(), "ok");

    server.get("/api-docs").await.assert_status_ok();
}

#[tokio::test]
async fn test_authorize_renders_login_form() {
    let app = TestApp::new().await;
    let response = app
        .server()
        .get("/oauth/authorize")
        .add_query_param("response_type", "code")
        .add_query_param("client_id", PUBLIC_CLIENT)
        .add_query_param("redirect_uri", REDIRECT_URI)
        .add_query_param("state", "xyz")
        .await;

    response.assert_status_ok();
    let html = response.text();
    assert!(html.contains(r#"name="pw""#));
    assert!(html.contains(r#"name="client_id" value="test-client""#));
    assert!(html.contains(r#"name="state" value="xyz""#));
}

#[tokio::test]
async fn test_authorize_id_response_type_is_code() {
    let app = TestApp::new().await;
    let response = app
        .server()
        .get("/oauth/authorize")
        .add_query_param("response_type", "id")
        .add_query_param("client_id", PUBLIC_CLIENT)
        .await;

    response.assert_status_ok();
    assert!(response.text().contains(r#"name="response_type" value="code""#));
}

#[tokio::test]
async fn test_authorize_invalid_response_type() {
    let app = TestApp::new().await;
    let response = app
        .server()
        .get("/oauth/authorize")
        .add_query_param("response_type", "token")
        .add_query_param("client_id", PUBLIC_CLIENT)
        .add_query_param("redirect_uri", REDIRECT_URI)
        .add_query_param("state", "s1")
        .await;

    response.assert_status_see_other();
    let params = location_params(&response);
    assert_eq!(param(&params, "error"), Some("unsupported_response_type"));
    assert_eq!(param(&params, "state"), Some("s1"));
}

#[tokio::test]
async fn test_authorize_unknown_client_renders_error_page() {
    let app = TestApp::new().await;
    let response = app
        .server()
        .get("/oauth/authorize")
        .add_query_param("response_type", "code")
        .add_query_param("client_id", "nonexistent-client")
        .add_query_param("redirect_uri", REDIRECT_URI)
        .await;

    response.assert_status_bad_request();
    assert!(response.headers().get("location").is_none());
    assert!(response.text().contains("invalid_request"));
}

#[tokio::test]
async fn test_authorize_unregistered_redirect_uri() {
    let app = TestApp::new().await;
    let response = app
        .server()
        .get("/oauth/authorize")
        .add_query_param("response_type", "code")
        .add_query_param("client_id", PUBLIC_CLIENT)
        .add_query_param("redirect_uri", "http://evil.example/callback")
        .await;

    response.assert_status_bad_request();
    assert!(response.headers().get("location").is_none());
}

#[tokio::test]
async fn test_login_then_code_exchange() {
    let app = TestApp::new().await;
    let server = app.server();
    let code = login_for_code(&server, "admin", PRINCIPAL_PASSWORD).await;

    let response = server
        .post("/oauth/token")
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", REDIRECT_URI),
            ("client_id", PUBLIC_CLIENT),
        ])
        .await;
    response.assert_status_ok();
    assert_eq!(
        response
            .headers()
            .get(header::CACHE_CONTROL)
            .and_then(|v| v.to_str().ok()),
        Some("no-store")
    );
    let body: serde_json::Value = response.json();
    assert_eq!(body["token_type"], "Bearer");
    assert_eq!(body["scope"], "read");
    assert!(body["expires_in"].as_i64().unwrap() > 3500);
    assert!(body["refresh_token"].is_string());

    let (name, value) = bearer(body["access_token"].as_str().unwrap());
    let response = server.get("/oauth/userinfo").add_header(name, value).await;
    response.assert_status_ok();
    let identity: serde_json::Value = response.json();
    assert_eq!(identity["id"], PRINCIPAL_IRI);
    assert_eq!(identity["type"], "Person");
}

#[tokio::test]
async fn test_code_cannot_be_exchanged_twice() {
    let app = TestApp::new().await;
    let server = app.server();
    let code = login_for_code(&server, PRINCIPAL_IRI, PRINCIPAL_PASSWORD).await;
    let form = [
        ("grant_type", "authorization_code"),
        ("code", code.as_str()),
        ("client_id", PUBLIC_CLIENT),
    ];

    server.post("/oauth/token").form(&form).await.assert_status_ok();

    let response = server.post("/oauth/token").form(&form).await;
    response.assert_status_unauthorized();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "access_denied");
}

#[tokio::test]
async fn test_code_bound_to_client_and_redirect() {
    let app = TestApp::new().await;
    let server = app.server();

    let code = login_for_code(&server, "admin", PRINCIPAL_PASSWORD).await;
    server
        .post("/oauth/token")
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", "http://localhost:3000/other"),
            ("client_id", PUBLIC_CLIENT),
        ])
        .await
        .assert_status_unauthorized();

    let code = login_for_code(&server, "admin", PRINCIPAL_PASSWORD).await;
    server
        .post("/oauth/token")
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("client_id", CONFIDENTIAL_CLIENT),
            ("client_secret", CLIENT_SECRET),
        ])
        .await
        .assert_status_unauthorized();
}

#[tokio::test]
async fn test_expired_code_is_rejected() {
    let app = TestApp::new().await;
    let now = OffsetDateTime::now_utc();
    app.store
        .save_authorize(&AuthorizeGrant {
            code: "stale-code".into(),
            client_id: PUBLIC_CLIENT.into(),
            user_data: PRINCIPAL_IRI.into(),
            redirect_uri: REDIRECT_URI.into(),
            scope: String::new(),
            state: None,
            expires_at: now - Duration::minutes(1),
            created_at: now - Duration::minutes(11),
        })
        .await
        .unwrap();

    app.server()
        .post("/oauth/token")
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", "stale-code"),
            ("client_id", PUBLIC_CLIENT),
        ])
        .await
        .assert_status_unauthorized();
}

#[tokio::test]
async fn test_failed_login_redirects_without_grant() {
    let app = TestApp::new().await;
    let response = app
        .server()
        .post("/oauth/authorize")
        .form(&[
            ("response_type", "code"),
            ("client_id", PUBLIC_CLIENT),
            ("redirect_uri", REDIRECT_URI),
            ("state", "st"),
            ("handle", "admin"),
            ("pw", "wrong password"),
        ])
        .await;

    response.assert_status_see_other();
    let params = location_params(&response);
    assert_eq!(param(&params, "error"), Some("access_denied"));
    assert_eq!(param(&params, "state"), Some("st"));
    assert_eq!(param(&params, "code"), None);

    let grants = oauth2_authorization::Entity::find()
        .count(app.store.connection())
        .await
        .unwrap();
    assert_eq!(grants, 0);
}

#[tokio::test]
async fn test_login_with_unknown_handle_is_denied() {
    let app = TestApp::new().await;
    let response = app
        .server()
        .post("/oauth/authorize")
        .form(&[
            ("response_type", "code"),
            ("client_id", PUBLIC_CLIENT),
            ("handle", "nobody"),
            ("pw", PRINCIPAL_PASSWORD),
        ])
        .await;

    response.assert_status_see_other();
    assert_eq!(
        param(&location_params(&response), "error"),
        Some("access_denied")
    );
}

/// Security-sensitive: the bootstrap scope authorizes whatever identity the
/// request names, without a login step.
#[tokio::test]
async fn test_anonymous_create_bootstrap_skips_login() {
    let app = TestApp::new().await;
    let server = app.server();
    let response = server
        .get("/oauth/authorize")
        .add_query_param("response_type", "code")
        .add_query_param("client_id", PUBLIC_CLIENT)
        .add_query_param("scope", "anonUserCreate")
        .add_query_param("state", "boot")
        .add_query_param("actor", PRINCIPAL_IRI)
        .await;

    response.assert_status_ok();
    let text = response.text();
    assert!(!text.contains("<form"));
    let body: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(body["state"], "boot");
    assert_eq!(body["redirect_uri"], REDIRECT_URI);

    let response = server
        .post("/oauth/token")
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", body["code"].as_str().unwrap()),
            ("client_id", PUBLIC_CLIENT),
        ])
        .await;
    response.assert_status_ok();
    let token: serde_json::Value = response.json();
    assert_eq!(token["scope"], "anonUserCreate");
}

#[tokio::test]
async fn test_anonymous_create_requires_actor() {
    let app = TestApp::new().await;
    let response = app
        .server()
        .get("/oauth/authorize")
        .add_query_param("response_type", "code")
        .add_query_param("client_id", PUBLIC_CLIENT)
        .add_query_param("scope", "anonUserCreate")
        .add_query_param("actor", "not a url")
        .await;

    response.assert_status_see_other();
    assert_eq!(
        param(&location_params(&response), "error"),
        Some("invalid_request")
    );
}

#[tokio::test]
async fn test_password_grant_resolves_to_identity() {
    let app = TestApp::new().await;
    let server = app.server();
    let response = server
        .post("/oauth/token")
        .form(&[
            ("grant_type", "password"),
            ("username", "admin"),
            ("password", PRINCIPAL_PASSWORD),
            ("client_id", PUBLIC_CLIENT),
            ("scope", "read write"),
        ])
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["scope"], "read write");

    let (name, value) = bearer(body["access_token"].as_str().unwrap());
    let identity: serde_json::Value = server
        .get("/oauth/userinfo")
        .add_header(name, value)
        .await
        .json();
    assert_eq!(identity["id"], PRINCIPAL_IRI);
}

#[tokio::test]
async fn test_password_grant_wrong_password() {
    let app = TestApp::new().await;
    let response = app
        .server()
        .post("/oauth/token")
        .form(&[
            ("grant_type", "password"),
            ("username", PRINCIPAL_IRI),
            ("password", "nope"),
            ("client_id", PUBLIC_CLIENT),
        ])
        .await;
    response.assert_status_unauthorized();
}

/// Duplicate display names are not disambiguated: the oldest identity whose
/// credential matches wins.
#[tokio::test]
async fn test_password_grant_duplicate_handle_first_match_wins() {
    let app = TestApp::new().await;
    app.add_person("https://fed.example/actors/dup-a", "dup", "shared")
        .await;
    app.add_person("https://fed.example/actors/dup-b", "dup", "shared")
        .await;
    app.add_person("https://fed.example/actors/dup-c", "dup", "only-c")
        .await;
    let server = app.server();

    let userinfo_for = |password: &'static str| {
        let server = &server;
        async move {
            let token: serde_json::Value = server
                .post("/oauth/token")
                .form(&[
                    ("grant_type", "password"),
                    ("username", "dup"),
                    ("password", password),
                    ("client_id", PUBLIC_CLIENT),
                ])
                .await
                .json();
            let (name, value) = bearer(token["access_token"].as_str().unwrap());
            let identity: serde_json::Value = server
                .get("/oauth/userinfo")
                .add_header(name, value)
                .await
                .json();
            identity["id"].as_str().unwrap().to_string()
        }
    };

    assert_eq!(userinfo_for("shared").await, "https://fed.example/actors/dup-a");
    assert_eq!(userinfo_for("only-c").await, "https://fed.example/actors/dup-c");
}

#[tokio::test]
async fn test_token_missing_grant_type() {
    let app = TestApp::new().await;
    let response = app
        .server()
        .post("/oauth/token")
        .form(&[("client_id", PUBLIC_CLIENT), ("code", "x")])
        .await;

    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "invalid_request");
}

#[tokio::test]
async fn test_token_unsupported_grant_type() {
    let app = TestApp::new().await;
    let response = app
        .server()
        .post("/oauth/token")
        .form(&[
            ("grant_type", "client_credentials"),
            ("client_id", PUBLIC_CLIENT),
        ])
        .await;

    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "unsupported_grant_type");
}

#[tokio::test]
async fn test_token_unknown_client() {
    let app = TestApp::new().await;
    let response = app
        .server()
        .post("/oauth/token")
        .form(&[
            ("grant_type", "password"),
            ("username", "admin"),
            ("password", PRINCIPAL_PASSWORD),
            ("client_id", "nonexistent-client"),
        ])
        .await;

    response.assert_status_unauthorized();
}

#[tokio::test]
async fn test_confidential_client_authentication() {
    let app = TestApp::new().await;
    let server = app.server();
    let password_grant = [
        ("grant_type", "password"),
        ("username", "admin"),
        ("password", PRINCIPAL_PASSWORD),
    ];

    // "confidential-client:secret123"
    let basic = HeaderValue::from_static("Basic Y29uZmlkZW50aWFsLWNsaWVudDpzZWNyZXQxMjM=");
    server
        .post("/oauth/token")
        .add_header(header::AUTHORIZATION, basic)
        .form(&password_grant)
        .await
        .assert_status_ok();

    let mut with_wrong_secret = password_grant.to_vec();
    with_wrong_secret.push(("client_id", CONFIDENTIAL_CLIENT));
    with_wrong_secret.push(("client_secret", "wrong"));
    server
        .post("/oauth/token")
        .form(&with_wrong_secret)
        .await
        .assert_status_unauthorized();

    let mut without_secret = password_grant.to_vec();
    without_secret.push(("client_id", CONFIDENTIAL_CLIENT));
    server
        .post("/oauth/token")
        .form(&without_secret)
        .await
        .assert_status_unauthorized();
}

#[tokio::test]
async fn test_userinfo_requires_valid_token() {
    let app = TestApp::new().await;
    let server = app.server();

    let response = server.get("/oauth/userinfo").await;
    response.assert_status_unauthorized();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "invalid_token");

    let (name, value) = bearer("not-a-token");
    server
        .get("/oauth/userinfo")
        .add_header(name, value)
        .await
        .assert_status_unauthorized();
}

#[tokio::test]
async fn test_refresh_tokens_follow_config() {
    let mut config = create_test_config(5);
    config.oauth2.issue_refresh_tokens = false;
    let app = TestApp::with_config(config).await;

    let body: serde_json::Value = app
        .server()
        .post("/oauth/token")
        .form(&[
            ("grant_type", "password"),
            ("username", "admin"),
            ("password", PRINCIPAL_PASSWORD),
            ("client_id", PUBLIC_CLIENT),
        ])
        .await
        .json();
    assert!(body["access_token"].is_string());
    assert!(body.get("refresh_token").is_none());

    let grant = app
        .store
        .load_access(body["access_token"].as_str().unwrap())
        .await
        .unwrap();
    assert!(grant.refresh_expires_at.is_none());
}

#[tokio::test]
async fn test_refresh_token_expiry_follows_config() {
    let mut config = create_test_config(5);
    config.oauth2.access_token_lifetime = 60;
    config.oauth2.refresh_token_lifetime = 7200;
    let app = TestApp::with_config(config).await;

    let body: serde_json::Value = app
        .server()
        .post("/oauth/token")
        .form(&[
            ("grant_type", "password"),
            ("username", "admin"),
            ("password", PRINCIPAL_PASSWORD),
            ("client_id", PUBLIC_CLIENT),
        ])
        .await
        .json();
    assert!(body["refresh_token"].is_string());

    let grant = app
        .store
        .load_access(body["access_token"].as_str().unwrap())
        .await
        .unwrap();
    let refresh_expires_at = grant.refresh_expires_at.expect("refresh expiry");
    assert_eq!(refresh_expires_at - grant.created_at, Duration::seconds(7200));
    assert_eq!(grant.expires_at - grant.created_at, Duration::seconds(60));
}

#[tokio::test]
async fn test_registered_clients_are_listed() {
    let app = TestApp::new().await;
    let ids: Vec<String> = app
        .store
        .list_clients()
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.id)
        .collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&PUBLIC_CLIENT.to_string()));
}
