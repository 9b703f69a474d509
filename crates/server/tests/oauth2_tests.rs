//! OAuth2 endpoint tests.
//!
//! Drive the authorization, token, revocation and userinfo endpoints through
//! the full application router backed by an in-memory SQLite database.

mod common;

use axum::http::{StatusCode, header};
use axum_test::{TestResponse, TestServer};
use common::*;
use prescription_auth::{
    entity::oauth2_authorization,
    entity::oauth2_token,
    oauth2::{OAuth2State, seed::seed_to_model},
};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, sea_query::Expr};
use serde_json::Value;
use time::{Duration, OffsetDateTime};

fn location(response: &TestResponse) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .expect("location header")
        .to_string()
}

/// Approve consent for `c1` and return the redirect location.
async fn approve(server: &TestServer, state: &OAuth2State, user_id: &str, redirect_uri: &str, scope: &str) -> String {
    let (name, value) = session_header(state, user_id);
    let response = server
        .post("/oauth/authorise")
        .add_header(name, value)
        .form(&[
            ("client_id", C1),
            ("redirect_uri", redirect_uri),
            ("response_type", "code"),
            ("scope", scope),
            ("state", "xyz"),
            ("allow", "yes"),
        ])
        .await;
    response.assert_status(StatusCode::FOUND);
    location(&response)
}

async fn exchange_code(server: &TestServer, code: &str, redirect_uri: &str) -> TestResponse {
    server
        .post("/oauth/token")
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", C1),
            ("client_secret", C1_SECRET),
        ])
        .await
}

async fn password_grant(server: &TestServer, email: &str, password: &str) -> TestResponse {
    let (name, value) = basic_auth(PW_CLIENT, PW_SECRET);
    server
        .post("/oauth/token")
        .add_header(name, value)
        .form(&[
            ("grant_type", "password"),
            ("email", email),
            ("password", password),
        ])
        .await
}

async fn refresh(server: &TestServer, refresh_token: &str) -> TestResponse {
    let (name, value) = basic_auth(PW_CLIENT, PW_SECRET);
    server
        .post("/oauth/token")
        .add_header(name, value)
        .form(&[("grant_type", "refresh_token"), ("refresh_token", refresh_token)])
        .await
}

async fn userinfo(server: &TestServer, access_token: &str) -> TestResponse {
    let (name, value) = bearer(access_token);
    server.get("/oauth/userinfo").add_header(name, value).await
}

// =============================================================================
// Authorization Endpoint Tests
// =============================================================================

#[tokio::test]
async fn test_authorization_code_flow() {
    let state = create_test_state().await;
    let user = create_user(&state, USER_EMAIL, USER_PASSWORD).await;
    let server = test_server(state.clone());

    let (name, value) = session_header(&state, &user.id);
    let page = server
        .get("/oauth/authorise")
        .add_header(name, value)
        .add_query_param("client_id", C1)
        .add_query_param("redirect_uri", C1_REDIRECT)
        .add_query_param("scope", "read")
        .add_query_param("state", "xyz")
        .await;
    page.assert_status_ok();
    let html = page.text();
    assert!(html.contains("Pharmacy App"));
    assert!(html.contains(r#"name="state" value="xyz""#));

    let redirect = approve(&server, &state, &user.id, C1_REDIRECT, "read").await;
    assert!(redirect.starts_with("https://app/cb?code="), "{redirect}");
    assert_eq!(query_param(&redirect, "state").as_deref(), Some("xyz"));
    let code = query_param(&redirect, "code").expect("code");

    let response = exchange_code(&server, &code, C1_REDIRECT).await;
    response.assert_status_ok();
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
    let body: Value = response.json();
    assert_eq!(body["token_type"], "Bearer");
    assert_eq!(body["expires_in"], 3600);
    assert_eq!(body["scope"], "read");
    assert!(body["access_token"].as_str().is_some_and(|t| t.len() >= 43));
    assert!(body["refresh_token"].as_str().is_some_and(|t| t.len() >= 43));
    assert_ne!(body["access_token"], body["refresh_token"]);

    // The minted token resolves to the consenting user and granted scope.
    let info = userinfo(&server, body["access_token"].as_str().unwrap()).await;
    info.assert_status_ok();
    let info: Value = info.json();
    assert_eq!(info["user_id"], user.id.as_str());
    assert_eq!(info["scope"], serde_json::json!(["read"]));
}

#[tokio::test]
async fn test_authorize_without_session_redirects_to_login() {
    let state = create_test_state().await;
    let server = test_server(state);

    let response = server
        .get("/oauth/authorise")
        .add_query_param("client_id", C1)
        .add_query_param("redirect_uri", C1_REDIRECT)
        .await;

    response.assert_status(StatusCode::FOUND);
    let location = location(&response);
    assert!(location.starts_with("/oauth/login?next="), "{location}");
    assert!(location.contains("%2Foauth%2Fauthorise%3Fclient_id%3Dc1"), "{location}");
}

#[tokio::test]
async fn test_authorize_redirect_uri_must_match_exactly() {
    let state = create_test_state().await;
    let user = create_user(&state, USER_EMAIL, USER_PASSWORD).await;
    let server = test_server(state.clone());

    for candidate in [
        "https://app/cb/",
        "https://app/c",
        "https://app/cbx",
        "https://app/cb?x=1",
        "https://app/cb#frag",
        "http://app/cb",
        "https://APP/cb",
        "https://app/cb?tenant=7&x=1",
    ] {
        let (name, value) = session_header(&state, &user.id);
        let response = server
            .get("/oauth/authorise")
            .add_header(name, value)
            .add_query_param("client_id", C1)
            .add_query_param("redirect_uri", candidate)
            .await;
        response.assert_status_bad_request();
        let body: Value = response.json();
        assert_eq!(body["error"], "invalid_redirect_uri", "{candidate}");
    }

    for registered in [C1_REDIRECT, "https://app/cb?tenant=7"] {
        let (name, value) = session_header(&state, &user.id);
        server
            .get("/oauth/authorise")
            .add_header(name, value)
            .add_query_param("client_id", C1)
            .add_query_param("redirect_uri", registered)
            .await
            .assert_status_ok();
    }
}

#[tokio::test]
async fn test_authorize_rejections_are_bad_requests() {
    let state = create_test_state().await;
    let user = create_user(&state, USER_EMAIL, USER_PASSWORD).await;
    let server = test_server(state.clone());

    let cases: [(&[(&str, &str)], &str); 5] = [
        (&[("client_id", "nonexistent"), ("redirect_uri", C1_REDIRECT)], "invalid_client"),
        (
            &[("client_id", C1), ("redirect_uri", C1_REDIRECT), ("response_type", "token")],
            "unsupported_response_type",
        ),
        (
            &[("client_id", C1), ("redirect_uri", C1_REDIRECT), ("scope", "read admin")],
            "invalid_scope",
        ),
        (&[("redirect_uri", C1_REDIRECT)], "invalid_request"),
        (&[("client_id", C1)], "invalid_request"),
    ];

    for (params, expected) in cases {
        let (name, value) = session_header(&state, &user.id);
        let mut request = server.get("/oauth/authorise").add_header(name, value);
        for (k, v) in params {
            request = request.add_query_param(k, v);
        }
        let response = request.await;
        response.assert_status_bad_request();
        let body: Value = response.json();
        assert_eq!(body["error"], expected);
    }
}

#[tokio::test]
async fn test_only_code_response_type_is_issued() {
    let state = create_test_state().await;
    let user = create_user(&state, USER_EMAIL, USER_PASSWORD).await;

    // A client whose stored registration lists the implicit flow too.
    let mut seed = create_test_config().oauth2.clients[0].clone();
    seed.response_types = vec!["code".into(), "token".into()];
    state
        .store
        .upsert_client(seed_to_model(&seed, OffsetDateTime::now_utc()).expect("model"))
        .await
        .expect("upsert");
    let server = test_server(state.clone());

    let (name, value) = session_header(&state, &user.id);
    let response = server
        .get("/oauth/authorise")
        .add_header(name, value)
        .add_query_param("client_id", C1)
        .add_query_param("redirect_uri", C1_REDIRECT)
        .add_query_param("response_type", "token")
        .await;
    response.assert_status_bad_request();
    let body: Value = response.json();
    assert_eq!(body["error"], "unsupported_response_type");

    let (name, value) = session_header(&state, &user.id);
    let response = server
        .post("/oauth/authorise")
        .add_header(name, value)
        .form(&[
            ("client_id", C1),
            ("redirect_uri", C1_REDIRECT),
            ("response_type", "token"),
            ("allow", "yes"),
        ])
        .await;
    response.assert_status_bad_request();
    let body: Value = response.json();
    assert_eq!(body["error"], "unsupported_response_type");

    let codes = oauth2_authorization::Entity::find()
        .all(state.store.connection())
        .await
        .expect("query");
    assert!(codes.is_empty());

    // The code flow still works for the same client.
    let location = approve(&server, &state, &user.id, C1_REDIRECT, "read").await;
    assert!(query_param(&location, "code").is_some());
}

#[tokio::test]
async fn test_consent_denied_redirects_with_access_denied() {
    let state = create_test_state().await;
    let user = create_user(&state, USER_EMAIL, USER_PASSWORD).await;
    let server = test_server(state.clone());

    let (name, value) = session_header(&state, &user.id);
    let response = server
        .post("/oauth/authorise")
        .add_header(name, value)
        .form(&[
            ("client_id", C1),
            ("redirect_uri", C1_REDIRECT),
            ("scope", "read"),
            ("state", "xyz"),
            ("deny", "yes"),
        ])
        .await;

    response.assert_status(StatusCode::FOUND);
    let location = location(&response);
    assert_eq!(location, "https://app/cb?error=access_denied&state=xyz");

    let codes = oauth2_authorization::Entity::find()
        .all(state.store.connection())
        .await
        .expect("query");
    assert!(codes.is_empty());
}

#[tokio::test]
async fn test_consent_post_revalidates_parameters() {
    let state = create_test_state().await;
    let user = create_user(&state, USER_EMAIL, USER_PASSWORD).await;
    let server = test_server(state.clone());

    let (name, value) = session_header(&state, &user.id);
    let response = server
        .post("/oauth/authorise")
        .add_header(name, value)
        .form(&[
            ("client_id", C1),
            ("redirect_uri", "https://evil.example/cb"),
            ("scope", "read"),
            ("allow", "yes"),
        ])
        .await;

    response.assert_status_bad_request();
    let body: Value = response.json();
    assert_eq!(body["error"], "invalid_redirect_uri");
}

#[tokio::test]
async fn test_consent_redirect_appends_to_existing_query() {
    let state = create_test_state().await;
    let user = create_user(&state, USER_EMAIL, USER_PASSWORD).await;
    let server = test_server(state.clone());

    let redirect = approve(&server, &state, &user.id, "https://app/cb?tenant=7", "").await;
    assert!(redirect.starts_with("https://app/cb?tenant=7&code="), "{redirect}");
    assert!(redirect.ends_with("&state=xyz"));
}

// =============================================================================
// Token Endpoint Tests
// =============================================================================

#[tokio::test]
async fn test_authorization_code_cannot_be_replayed() {
    let state = create_test_state().await;
    let user = create_user(&state, USER_EMAIL, USER_PASSWORD).await;
    let server = test_server(state.clone());

    let redirect = approve(&server, &state, &user.id, C1_REDIRECT, "read").await;
    let code = query_param(&redirect, "code").expect("code");

    exchange_code(&server, &code, C1_REDIRECT).await.assert_status_ok();

    let replay = exchange_code(&server, &code, C1_REDIRECT).await;
    replay.assert_status_bad_request();
    let body: Value = replay.json();
    assert_eq!(body["error"], "invalid_grant");
}

#[tokio::test]
async fn test_expired_code_is_rejected_and_removed() {
    let state = create_test_state().await;
    let user = create_user(&state, USER_EMAIL, USER_PASSWORD).await;
    let server = test_server(state.clone());

    let now = OffsetDateTime::now_utc();
    state
        .store
        .insert_authorization_code(oauth2_authorization::Model {
            code: "stale-code".into(),
            client_id: C1.into(),
            user_id: user.id.clone(),
            redirect_uri: C1_REDIRECT.into(),
            scope: "read".into(),
            created_at: now - Duration::minutes(20),
            expires_at: now - Duration::minutes(10),
        })
        .await
        .expect("insert code");

    let response = exchange_code(&server, "stale-code", C1_REDIRECT).await;
    response.assert_status_bad_request();
    let body: Value = response.json();
    assert_eq!(body["error"], "invalid_grant");

    let remaining = oauth2_authorization::Entity::find_by_id("stale-code".to_string())
        .one(state.store.connection())
        .await
        .expect("query");
    assert!(remaining.is_none());

    exchange_code(&server, "stale-code", C1_REDIRECT)
        .await
        .assert_status_bad_request();
}

#[tokio::test]
async fn test_redirect_uri_mismatch_consumes_code() {
    let state = create_test_state().await;
    let user = create_user(&state, USER_EMAIL, USER_PASSWORD).await;
    let server = test_server(state.clone());

    let redirect = approve(&server, &state, &user.id, C1_REDIRECT, "read").await;
    let code = query_param(&redirect, "code").expect("code");

    let response = exchange_code(&server, &code, "https://app/cb?tenant=7").await;
    response.assert_status_bad_request();
    let body: Value = response.json();
    assert_eq!(body["error"], "invalid_grant");

    exchange_code(&server, &code, C1_REDIRECT)
        .await
        .assert_status_bad_request();
}

#[tokio::test]
async fn test_token_client_authentication() {
    let state = create_test_state().await;
    let server = test_server(state);

    // Unknown client
    let response = server
        .post("/oauth/token")
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", "x"),
            ("client_id", "nonexistent"),
            ("client_secret", "x"),
        ])
        .await;
    response.assert_status_unauthorized();
    let body: Value = response.json();
    assert_eq!(body["error"], "invalid_client");

    // Wrong secret over Basic
    let (name, value) = basic_auth(C1, "wrong");
    let response = server
        .post("/oauth/token")
        .add_header(name, value)
        .form(&[("grant_type", "authorization_code"), ("code", "x")])
        .await;
    response.assert_status_unauthorized();
    assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));

    // No credentials at all
    let response = server
        .post("/oauth/token")
        .form(&[("grant_type", "authorization_code"), ("code", "x")])
        .await;
    response.assert_status_unauthorized();

    // Both Basic and form secret
    let (name, value) = basic_auth(C1, C1_SECRET);
    let response = server
        .post("/oauth/token")
        .add_header(name, value)
        .form(&[
            ("grant_type", "authorization_code"),
            ("client_id", C1),
            ("client_secret", C1_SECRET),
        ])
        .await;
    response.assert_status_bad_request();
    let body: Value = response.json();
    assert_eq!(body["error"], "invalid_request");

    // pw-client only accepts client_secret_basic
    let response = server
        .post("/oauth/token")
        .form(&[
            ("grant_type", "password"),
            ("client_id", PW_CLIENT),
            ("client_secret", PW_SECRET),
        ])
        .await;
    response.assert_status_unauthorized();
}

#[tokio::test]
async fn test_grant_type_allow_list() {
    let state = create_test_state().await;
    let server = test_server(state);

    // c1 is not allowed the password grant
    let response = server
        .post("/oauth/token")
        .form(&[
            ("grant_type", "password"),
            ("email", USER_EMAIL),
            ("password", USER_PASSWORD),
            ("client_id", C1),
            ("client_secret", C1_SECRET),
        ])
        .await;
    response.assert_status_bad_request();
    let body: Value = response.json();
    assert_eq!(body["error"], "unsupported_grant_type");

    // Unknown grant type
    let response = server
        .post("/oauth/token")
        .form(&[
            ("grant_type", "client_credentials"),
            ("client_id", C1),
            ("client_secret", C1_SECRET),
        ])
        .await;
    response.assert_status_bad_request();
    let body: Value = response.json();
    assert_eq!(body["error"], "unsupported_grant_type");

    // Missing grant type
    let response = server
        .post("/oauth/token")
        .form(&[("client_id", C1), ("client_secret", C1_SECRET)])
        .await;
    response.assert_status_bad_request();
    let body: Value = response.json();
    assert_eq!(body["error"], "invalid_request");
}

#[tokio::test]
async fn test_password_grant() {
    let state = create_test_state().await;
    let user = create_user(&state, USER_EMAIL, USER_PASSWORD).await;
    let server = test_server(state.clone());

    let response = password_grant(&server, "Alice@Example.com", USER_PASSWORD).await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["scope"], "facility medication");
    assert_eq!(body["expires_in"], 3600);

    let info: Value = userinfo(&server, body["access_token"].as_str().unwrap())
        .await
        .json();
    assert_eq!(info["user_id"], user.id.as_str());

    let user = state
        .store
        .find_user(&user.id)
        .await
        .expect("query")
        .expect("user");
    assert!(user.last_login_at.is_some());
}

#[tokio::test]
async fn test_password_grant_failures() {
    let state = create_test_state().await;
    create_user(&state, USER_EMAIL, USER_PASSWORD).await;
    let server = test_server(state);

    for (email, password) in [
        (USER_EMAIL, "wrong password"),
        ("nobody@example.com", USER_PASSWORD),
    ] {
        let response = password_grant(&server, email, password).await;
        response.assert_status_bad_request();
        let body: Value = response.json();
        assert_eq!(body["error"], "invalid_grant");
    }

    let (name, value) = basic_auth(PW_CLIENT, PW_SECRET);
    let response = server
        .post("/oauth/token")
        .add_header(name, value)
        .form(&[("grant_type", "password"), ("email", USER_EMAIL)])
        .await;
    response.assert_status_bad_request();
    let body: Value = response.json();
    assert_eq!(body["error"], "invalid_request");
}

#[tokio::test]
async fn test_password_grant_requested_scope() {
    let state = create_test_state().await;
    create_user(&state, USER_EMAIL, USER_PASSWORD).await;
    let server = test_server(state);

    let (name, value) = basic_auth(PW_CLIENT, PW_SECRET);
    let response = server
        .post("/oauth/token")
        .add_header(name, value)
        .form(&[
            ("grant_type", "password"),
            ("username", USER_EMAIL),
            ("password", USER_PASSWORD),
            ("scope", "medication"),
        ])
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["scope"], "medication");

    let (name, value) = basic_auth(PW_CLIENT, PW_SECRET);
    let response = server
        .post("/oauth/token")
        .add_header(name, value)
        .form(&[
            ("grant_type", "password"),
            ("email", USER_EMAIL),
            ("password", USER_PASSWORD),
            ("scope", "medication admin"),
        ])
        .await;
    response.assert_status_bad_request();
    let body: Value = response.json();
    assert_eq!(body["error"], "invalid_scope");

    // A blank scope is the same as asking for nothing in particular.
    let (name, value) = basic_auth(PW_CLIENT, PW_SECRET);
    let response = server
        .post("/oauth/token")
        .add_header(name, value)
        .form(&[
            ("grant_type", "password"),
            ("email", USER_EMAIL),
            ("password", USER_PASSWORD),
            ("scope", "  "),
        ])
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["scope"], "facility medication");
}

#[tokio::test]
async fn test_token_rejects_non_form_body() {
    let state = create_test_state().await;
    create_user(&state, USER_EMAIL, USER_PASSWORD).await;
    let server = test_server(state);

    let (name, value) = basic_auth(PW_CLIENT, PW_SECRET);
    let response = server
        .post("/oauth/token")
        .add_header(name, value)
        .json(&serde_json::json!({
            "grant_type": "password",
            "email": USER_EMAIL,
            "password": USER_PASSWORD,
        }))
        .await;
    response.assert_status_bad_request();
    assert_eq!(
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok()),
        Some("application/json")
    );
    let body: Value = response.json();
    assert_eq!(body["error"], "invalid_request");
    assert!(body["error_description"].is_string());
}

#[tokio::test]
async fn test_refresh_token_rotation() {
    let state = create_test_state().await;
    let user = create_user(&state, USER_EMAIL, USER_PASSWORD).await;
    let server = test_server(state);

    let first: Value = password_grant(&server, USER_EMAIL, USER_PASSWORD).await.json();
    let old_access = first["access_token"].as_str().unwrap();
    let old_refresh = first["refresh_token"].as_str().unwrap();

    let response = refresh(&server, old_refresh).await;
    response.assert_status_ok();
    let second: Value = response.json();
    assert_ne!(second["access_token"], first["access_token"]);
    assert_ne!(second["refresh_token"], first["refresh_token"]);
    assert_eq!(second["scope"], first["scope"]);

    // The rotated record is gone: old refresh and old access no longer work.
    let replay = refresh(&server, old_refresh).await;
    replay.assert_status_bad_request();
    let body: Value = replay.json();
    assert_eq!(body["error"], "invalid_grant");
    userinfo(&server, old_access).await.assert_status_unauthorized();

    let info: Value = userinfo(&server, second["access_token"].as_str().unwrap())
        .await
        .json();
    assert_eq!(info["user_id"], user.id.as_str());
}

#[tokio::test]
async fn test_concurrent_refresh_has_one_winner() {
    let state = create_test_state().await;
    create_user(&state, USER_EMAIL, USER_PASSWORD).await;
    let server = test_server(state);

    let tokens: Value = password_grant(&server, USER_EMAIL, USER_PASSWORD).await.json();
    let refresh_token = tokens["refresh_token"].as_str().unwrap();

    let (a, b) = tokio::join!(
        async { refresh(&server, refresh_token).await },
        async { refresh(&server, refresh_token).await },
    );

    let statuses = [a.status_code(), b.status_code()];
    assert_eq!(
        statuses.iter().filter(|s| **s == StatusCode::OK).count(),
        1,
        "{statuses:?}"
    );
    let loser = if a.status_code() == StatusCode::OK { b } else { a };
    loser.assert_status_bad_request();
    let body: Value = loser.json();
    assert_eq!(body["error"], "invalid_grant");
}

#[tokio::test]
async fn test_refresh_token_is_bound_to_client() {
    let state = create_test_state().await;
    let user = create_user(&state, USER_EMAIL, USER_PASSWORD).await;
    let server = test_server(state.clone());

    let token = insert_token(&state, &user.id, PW_CLIENT, "facility", Duration::hours(1)).await;
    let response = server
        .post("/oauth/token")
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", token.refresh_token.as_deref().unwrap()),
            ("client_id", C1),
            ("client_secret", C1_SECRET),
        ])
        .await;
    response.assert_status_bad_request();
    let body: Value = response.json();
    assert_eq!(body["error"], "invalid_grant");

    // Still usable by its owner
    refresh(&server, token.refresh_token.as_deref().unwrap())
        .await
        .assert_status_ok();
}

// =============================================================================
// Resource-Protection Guard Tests
// =============================================================================

#[tokio::test]
async fn test_guard_rejects_missing_or_malformed_credentials() {
    let state = create_test_state().await;
    let server = test_server(state);

    let response = server.get("/oauth/userinfo").await;
    response.assert_status_unauthorized();
    assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));
    let body: Value = response.json();
    assert_eq!(body["error"], "invalid_token");

    let (name, value) = basic_auth(C1, C1_SECRET);
    server
        .get("/oauth/userinfo")
        .add_header(name, value)
        .await
        .assert_status_unauthorized();

    userinfo(&server, "not-a-real-token")
        .await
        .assert_status_unauthorized();
}

#[tokio::test]
async fn test_guard_rejects_expired_token() {
    let state = create_test_state().await;
    let user = create_user(&state, USER_EMAIL, USER_PASSWORD).await;
    let server = test_server(state.clone());

    let token = insert_token(&state, &user.id, C1, "read", -Duration::seconds(1)).await;
    userinfo(&server, &token.access_token)
        .await
        .assert_status_unauthorized();
}

#[tokio::test]
async fn test_guard_rejects_administratively_revoked_token() {
    let state = create_test_state().await;
    let user = create_user(&state, USER_EMAIL, USER_PASSWORD).await;
    let server = test_server(state.clone());

    let token = insert_token(&state, &user.id, C1, "read write", Duration::hours(1)).await;
    userinfo(&server, &token.access_token).await.assert_status_ok();

    oauth2_token::Entity::update_many()
        .col_expr(oauth2_token::Column::Revoked, Expr::value(true))
        .filter(oauth2_token::Column::Id.eq(token.id.clone()))
        .exec(state.store.connection())
        .await
        .expect("update");

    userinfo(&server, &token.access_token)
        .await
        .assert_status_unauthorized();
}

// =============================================================================
// Revocation Endpoint Tests
// =============================================================================

#[tokio::test]
async fn test_revoke_is_idempotent() {
    let state = create_test_state().await;
    let user = create_user(&state, USER_EMAIL, USER_PASSWORD).await;
    let server = test_server(state.clone());

    let token = insert_token(&state, &user.id, C1, "read", Duration::hours(1)).await;
    userinfo(&server, &token.access_token).await.assert_status_ok();

    for _ in 0..2 {
        let response = server
            .post("/oauth/revoke")
            .form(&[
                ("token", token.access_token.as_str()),
                ("client_id", C1),
                ("client_secret", C1_SECRET),
            ])
            .await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body, serde_json::json!({}));
    }

    userinfo(&server, &token.access_token)
        .await
        .assert_status_unauthorized();
}

#[tokio::test]
async fn test_revoke_by_refresh_token_removes_pair() {
    let state = create_test_state().await;
    let user = create_user(&state, USER_EMAIL, USER_PASSWORD).await;
    let server = test_server(state.clone());

    let token = insert_token(&state, &user.id, C1, "read", Duration::hours(1)).await;
    let (name, value) = basic_auth(C1, C1_SECRET);
    server
        .post("/oauth/revoke")
        .add_header(name, value)
        .form(&[
            ("token", token.refresh_token.as_deref().unwrap()),
            ("token_type_hint", "refresh_token"),
        ])
        .await
        .assert_status_ok();

    userinfo(&server, &token.access_token)
        .await
        .assert_status_unauthorized();
}

#[tokio::test]
async fn test_revoke_only_affects_own_tokens() {
    let state = create_test_state().await;
    let user = create_user(&state, USER_EMAIL, USER_PASSWORD).await;
    let server = test_server(state.clone());

    let token = insert_token(&state, &user.id, PW_CLIENT, "facility", Duration::hours(1)).await;
    server
        .post("/oauth/revoke")
        .form(&[
            ("token", token.access_token.as_str()),
            ("client_id", C1),
            ("client_secret", C1_SECRET),
        ])
        .await
        .assert_status_ok();

    userinfo(&server, &token.access_token).await.assert_status_ok();
}

#[tokio::test]
async fn test_revoke_requires_client_authentication() {
    let state = create_test_state().await;
    let server = test_server(state);

    let response = server
        .post("/oauth/revoke")
        .form(&[("token", "anything")])
        .await;
    response.assert_status_unauthorized();
    let body: Value = response.json();
    assert_eq!(body["error"], "invalid_client");

    let response = server
        .post("/oauth/revoke")
        .form(&[("client_id", C1), ("client_secret", C1_SECRET)])
        .await;
    response.assert_status_bad_request();
    let body: Value = response.json();
    assert_eq!(body["error"], "invalid_request");

    let (name, value) = basic_auth(C1, C1_SECRET);
    let response = server
        .post("/oauth/revoke")
        .add_header(name, value)
        .json(&serde_json::json!({ "token": "anything" }))
        .await;
    response.assert_status_bad_request();
    let body: Value = response.json();
    assert_eq!(body["error"], "invalid_request");
}

// =============================================================================
// Metadata / Health
// =============================================================================

#[tokio::test]
async fn test_server_metadata() {
    let state = create_test_state().await;
    let server = test_server(state);

    let response = server.get("/.well-known/oauth-authorization-server").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["issuer"], "http://localhost:8080");
    assert_eq!(body["token_endpoint"], "http://localhost:8080/oauth/token");
    assert_eq!(
        body["authorization_endpoint"],
        "http://localhost:8080/oauth/authorise"
    );
    assert_eq!(
        body["grant_types_supported"],
        serde_json::json!(["authorization_code", "refresh_token", "password"])
    );
}

#[tokio::test]
async fn test_health_and_api_docs() {
    let state = create_test_state().await;
    let server = test_server(state);

    let response = server.get("/healthz").await;
    response.assert_status_ok();
    assert_eq!(response.text(), "ok");

    server.get("/api-docs").await.assert_status_ok();
}
