//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use axum::http::{HeaderName, HeaderValue, header};
use axum_test::TestServer;
use base64::Engine;
use migration::{Migrator, MigratorTrait};
use prescription_auth::{
    api,
    config::{AppConfig, ClientSeed, OAuth2Config, PasswordHashConfig},
    entity::{app_user, oauth2_token},
    oauth2::{OAuth2State, seed::seed_clients},
};
use sea_orm::Database;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};

pub const C1: &str = "c1";
pub const C1_SECRET: &str = "c1-secret";
pub const C1_REDIRECT: &str = "https://app/cb";
pub const PW_CLIENT: &str = "pw-client";
pub const PW_SECRET: &str = "pw-secret";
pub const USER_EMAIL: &str = "alice@example.com";
pub const USER_PASSWORD: &str = "correct horse battery";

pub fn create_test_config() -> AppConfig {
    AppConfig {
        database_url: "sqlite::memory:".into(),
        bind_address: "127.0.0.1:0".into(),
        session_secret: "0123456789abcdef0123456789abcdef".into(),
        oauth2: OAuth2Config {
            issuer_url: "http://localhost:8080/".into(),
            password_hash: PasswordHashConfig {
                memory_kib: 1024,
                iterations: 1,
                parallelism: 1,
            },
            clients: vec![
                ClientSeed {
                    client_id: C1.into(),
                    client_secret: C1_SECRET.into(),
                    name: "Pharmacy App".into(),
                    redirect_uris: vec![C1_REDIRECT.into(), "https://app/cb?tenant=7".into()],
                    grant_types: vec!["authorization_code".into(), "refresh_token".into()],
                    response_types: vec!["code".into()],
                    scopes: vec!["read".into(), "write".into()],
                    token_endpoint_auth_methods: vec![
                        "client_secret_basic".into(),
                        "client_secret_post".into(),
                    ],
                },
                ClientSeed {
                    client_id: PW_CLIENT.into(),
                    client_secret: PW_SECRET.into(),
                    name: "Internal App".into(),
                    redirect_uris: vec!["https://internal/cb".into()],
                    grant_types: vec!["password".into(), "refresh_token".into()],
                    response_types: vec!["code".into()],
                    scopes: vec!["facility".into(), "medication".into()],
                    token_endpoint_auth_methods: vec!["client_secret_basic".into()],
                },
            ],
            ..OAuth2Config::default()
        },
    }
}

/// Migrated in-memory database with the test clients registered.
pub async fn create_test_state() -> OAuth2State {
    let db = Database::connect("sqlite::memory:").await.expect("connect");
    Migrator::up(&db, None).await.expect("migrate");
    let config = create_test_config();
    let state = OAuth2State::new(Arc::new(db), &config).expect("state");
    seed_clients(&state.store, &config.oauth2.clients)
        .await
        .expect("seed clients");
    state
}

pub fn test_server(state: OAuth2State) -> TestServer {
    TestServer::new(api::app(state)).expect("create test server")
}

pub async fn create_user(state: &OAuth2State, email: &str, password: &str) -> app_user::Model {
    state
        .store
        .insert_user(app_user::Model {
            id: uuid::Uuid::new_v4().to_string(),
            email: email.to_string(),
            password_hash: state.passwords.hash(password).expect("hash"),
            name: None,
            created_at: OffsetDateTime::now_utc(),
            last_login_at: None,
        })
        .await
        .expect("insert user")
}

/// `Cookie` header carrying a valid session for `user_id`.
pub fn session_header(state: &OAuth2State, user_id: &str) -> (HeaderName, HeaderValue) {
    let token = state
        .sessions
        .issue(user_id, OffsetDateTime::now_utc(), Duration::hours(1))
        .expect("issue session");
    (
        header::COOKIE,
        HeaderValue::from_str(&format!("rx_session={token}")).expect("cookie header"),
    )
}

pub fn basic_auth(client_id: &str, secret: &str) -> (HeaderName, HeaderValue) {
    let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{client_id}:{secret}"));
    (
        header::AUTHORIZATION,
        HeaderValue::from_str(&format!("Basic {encoded}")).expect("basic header"),
    )
}

pub fn bearer(token: &str) -> (HeaderName, HeaderValue) {
    (
        header::AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {token}")).expect("bearer header"),
    )
}

/// Store a token record directly, bypassing the token endpoint.
pub async fn insert_token(
    state: &OAuth2State,
    user_id: &str,
    client_id: &str,
    scope: &str,
    expires_in: Duration,
) -> oauth2_token::Model {
    let now = OffsetDateTime::now_utc();
    state
        .store
        .insert_token(oauth2_token::Model {
            id: uuid::Uuid::new_v4().to_string(),
            access_token: OAuth2State::generate_token().expect("token"),
            refresh_token: Some(OAuth2State::generate_token().expect("token")),
            client_id: client_id.to_string(),
            user_id: user_id.to_string(),
            scope: scope.to_string(),
            created_at: now,
            expires_at: now + expires_in,
            revoked: false,
        })
        .await
        .expect("insert token")
}

/// Pull a query parameter out of a redirect `Location`.
pub fn query_param(location: &str, name: &str) -> Option<String> {
    let url = url::Url::parse(location).expect("absolute location");
    url.query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}
