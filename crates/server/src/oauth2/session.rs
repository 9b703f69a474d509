//! Login session.
//!
//! The session is a signed HS256 JWT stored in the `rx_session` cookie. It
//! carries only the user id and expiry; the user row is re-read on every
//! request so deleted users lose access immediately.

use axum::{
    extract::{FromRequestParts, OriginalUri},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::entity::app_user;
use crate::error::OAuthError;
use crate::oauth2::state::OAuth2State;

pub const SESSION_COOKIE: &str = "rx_session";
pub const LOGIN_PATH: &str = "/oauth/login";
pub const DEFAULT_LANDING: &str = "/oauth/manage-apps";

#[derive(Debug, Serialize, Deserialize)]
struct SessionClaims {
    sub: String,
    iat: i64,
    exp: i64,
}

/// HMAC keys for signing and checking session cookies.
#[derive(Clone)]
pub struct SessionKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl SessionKeys {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        }
    }

    pub fn issue(
        &self,
        user_id: &str,
        now: OffsetDateTime,
        lifetime: Duration,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let claims = SessionClaims {
            sub: user_id.to_string(),
            iat: now.unix_timestamp(),
            exp: (now + lifetime).unix_timestamp(),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
    }

    /// The user id of a valid, unexpired session token.
    pub fn verify(&self, token: &str) -> Option<String> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        jsonwebtoken::decode::<SessionClaims>(token, &self.decoding, &validation)
            .ok()
            .map(|data| data.claims.sub)
    }
}

/// `Set-Cookie` value establishing a session.
pub fn session_cookie(token: &str, lifetime: Duration) -> String {
    format!(
        "{SESSION_COOKIE}={token}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}",
        lifetime.whole_seconds()
    )
}

/// `Set-Cookie` value removing the session.
pub fn clear_session_cookie() -> String {
    format!("{SESSION_COOKIE}=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0")
}

fn read_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v)
}

/// Only same-origin absolute paths are accepted as post-login targets.
pub fn is_local_path(target: &str) -> bool {
    target.starts_with('/') && !target.starts_with("//") && !target.starts_with("/\\")
}

/// 302 to the login page, remembering where to return.
pub fn redirect_to_login(next: &str) -> Response {
    let location = format!("{LOGIN_PATH}?next={}", urlencoding::encode(next));
    found(&location)
}

/// Plain 302 with a `Location` header.
pub fn found(location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => (StatusCode::FOUND, [(header::LOCATION, value)]).into_response(),
        Err(_) => OAuthError::Server(format!("unencodable redirect target {location:?}"))
            .into_response(),
    }
}

/// Where to send the browser after login. A form submission cannot be
/// replayed by a redirect, so only GET/HEAD requests return to themselves.
fn return_target(parts: &Parts) -> String {
    if parts.method != Method::GET && parts.method != Method::HEAD {
        return DEFAULT_LANDING.to_string();
    }
    // Nested routers see a stripped path; OriginalUri keeps the full one.
    let uri = parts
        .extensions
        .get::<OriginalUri>()
        .map(|uri| &uri.0)
        .unwrap_or(&parts.uri);
    uri.path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| DEFAULT_LANDING.to_string())
}

/// The logged-in end user. Handlers taking this argument only run with a
/// valid session; otherwise the browser is sent to the login page.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub app_user::Model);

impl FromRequestParts<OAuth2State> for CurrentUser {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &OAuth2State,
    ) -> Result<Self, Self::Rejection> {
        let next = return_target(parts);

        let Some(user_id) = read_cookie(&parts.headers, SESSION_COOKIE)
            .and_then(|token| state.sessions.verify(token))
        else {
            return Err(redirect_to_login(&next));
        };

        match state.store.find_user(&user_id).await {
            Ok(Some(user)) => Ok(CurrentUser(user)),
            Ok(None) => {
                tracing::info!(%user_id, "session refers to a deleted user");
                Err(redirect_to_login(&next))
            }
            Err(e) => Err(OAuthError::from(e).into_response()),
        }
    }
}
