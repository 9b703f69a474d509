//! Bearer-token guard for protected resources.
//!
//! [`require_bearer`] is a middleware that authenticates the
//! `Authorization: Bearer` header and stores the resolved [`Principal`] in
//! the request extensions. Handlers take `Principal` as an argument; the
//! extractor reuses the middleware's result or authenticates on its own when
//! the route is not wrapped.

use std::collections::BTreeSet;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, header, request::Parts},
    middleware::Next,
    response::Response,
};

use crate::error::OAuthError;
use crate::oauth2::scope::Scope;
use crate::oauth2::state::OAuth2State;
use crate::store::CredentialStore;

/// The user and scope behind a valid access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: String,
    pub client_id: String,
    pub scope: BTreeSet<String>,
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, OAuthError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or(OAuthError::InvalidToken("missing bearer token"))?
        .to_str()
        .map_err(|_| OAuthError::InvalidToken("malformed authorization header"))?;
    match value.split_once(' ') {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() => {
            Ok(token.trim())
        }
        _ => Err(OAuthError::InvalidToken(
            "authorization header must use the Bearer scheme",
        )),
    }
}

/// Resolve the principal for the bearer token in `headers`.
pub async fn authenticate(store: &CredentialStore, headers: &HeaderMap) -> Result<Principal, OAuthError> {
    let access_token = bearer_token(headers)?;
    let Some(token) = store.find_token_by_access(access_token).await? else {
        return Err(OAuthError::InvalidToken("unknown access token"));
    };
    if !token.is_active_at(OAuth2State::now()) {
        return Err(OAuthError::InvalidToken("access token expired or revoked"));
    }
    Ok(Principal {
        scope: Scope::parse(&token.scope).to_set(),
        user_id: token.user_id,
        client_id: token.client_id,
    })
}

/// Middleware rejecting requests without a valid bearer token.
pub async fn require_bearer(
    State(state): State<OAuth2State>,
    mut req: Request,
    next: Next,
) -> Result<Response, OAuthError> {
    let principal = authenticate(&state.store, req.headers()).await?;
    tracing::debug!(user_id = %principal.user_id, client_id = %principal.client_id, "bearer token accepted");
    req.extensions_mut().insert(principal);
    Ok(next.run(req).await)
}

impl FromRequestParts<OAuth2State> for Principal {
    type Rejection = OAuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &OAuth2State,
    ) -> Result<Self, Self::Rejection> {
        if let Some(principal) = parts.extensions.get::<Principal>() {
            return Ok(principal.clone());
        }
        authenticate(&state.store, &parts.headers).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &'static str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(header::AUTHORIZATION, HeaderValue::from_static(value));
        h
    }

    #[test]
    fn bearer_scheme_is_case_insensitive() {
        assert_eq!(bearer_token(&headers("Bearer abc")).unwrap(), "abc");
        assert_eq!(bearer_token(&headers("bearer abc")).unwrap(), "abc");
    }

    #[test]
    fn other_schemes_are_rejected() {
        assert!(bearer_token(&headers("Basic YzE6cw==")).is_err());
        assert!(bearer_token(&headers("Bearer ")).is_err());
        assert!(bearer_token(&headers("abc")).is_err());
        assert!(bearer_token(&HeaderMap::new()).is_err());
    }
}
