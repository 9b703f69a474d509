//! OAuth2 HTTP endpoints.
//!
//! Implements the machine-facing endpoints of the authorization server:
//! - Token endpoint (authorization_code, refresh_token, password grants)
//! - Token revocation
//! - UserInfo, the example bearer-protected resource
//! - Authorization server metadata (RFC 8414)

use std::collections::BTreeSet;

use axum::{
    Json,
    extract::State,
    http::{HeaderMap, HeaderValue, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::entity::oauth2_token;
use crate::error::{ErrorResponse, OAuthError, OAuthForm};
use crate::oauth2::OAUTH2_TAG;
use crate::oauth2::guard::Principal;
use crate::oauth2::registrar::{
    AuthMethod, CODE_RESPONSE_TYPE, Client, GrantType, extract_client_credentials,
};
use crate::oauth2::scope::Scope;
use crate::oauth2::state::OAuth2State;

/// Routes authenticated by client credentials.
pub fn router() -> OpenApiRouter<OAuth2State> {
    OpenApiRouter::new()
        .routes(routes!(token))
        .routes(routes!(revoke))
}

/// Routes authenticated by a bearer token. The caller wraps them in
/// [`crate::oauth2::guard::require_bearer`].
pub fn protected_router() -> OpenApiRouter<OAuth2State> {
    OpenApiRouter::new().routes(routes!(userinfo))
}

/// Routes served from the site root.
pub fn well_known_router() -> OpenApiRouter<OAuth2State> {
    OpenApiRouter::new().routes(routes!(server_metadata))
}

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize, ToSchema)]
pub struct TokenRequest {
    pub grant_type: Option<String>,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub refresh_token: Option<String>,
    /// Resource owner email for the password grant
    pub email: Option<String>,
    /// Alias of `email` as named by RFC 6749
    pub username: Option<String>,
    pub password: Option<String>,
    /// Password grant only; defaults to the client's full scope set
    pub scope: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub refresh_token: String,
    pub scope: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RevokeRequest {
    pub token: Option<String>,
    /// Accepted and ignored; both token kinds are always searched
    pub token_type_hint: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UserInfoResponse {
    pub user_id: String,
    pub scope: BTreeSet<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ServerMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub revocation_endpoint: String,
    pub userinfo_endpoint: String,
    pub response_types_supported: Vec<String>,
    pub grant_types_supported: Vec<String>,
    pub token_endpoint_auth_methods_supported: Vec<String>,
    pub revocation_endpoint_auth_methods_supported: Vec<String>,
}

// =============================================================================
// Endpoints
// =============================================================================

/// OAuth2 Token endpoint.
#[tracing::instrument(skip(state, headers, params), fields(grant_type = ?params.grant_type))]
#[utoipa::path(
    post,
    path = "/token",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Token",
    summary = "Exchange a grant for tokens",
    description = "Exchanges an authorization code, a refresh token or resource owner credentials for a \
                   new access/refresh token pair. The client authenticates with HTTP Basic or with \
                   `client_id`/`client_secret` form fields, and the grant type must be on its allow-list.\n\n\
                   Authorization codes and refresh tokens are single-use: a refresh always returns a new \
                   refresh token and invalidates the old one.",
    request_body(
        content = TokenRequest,
        content_type = "application/x-www-form-urlencoded",
        description = "Token request"
    ),
    responses(
        (status = 200, description = "Tokens issued", body = TokenResponse),
        (status = 400, description = "invalid_request, invalid_grant, invalid_scope or unsupported_grant_type", body = ErrorResponse),
        (status = 401, description = "Client authentication failed", body = ErrorResponse),
    )
)]
pub async fn token(
    State(state): State<OAuth2State>,
    headers: HeaderMap,
    OAuthForm(params): OAuthForm<TokenRequest>,
) -> Result<Response, OAuthError> {
    let credentials = extract_client_credentials(
        &headers,
        params.client_id.as_deref(),
        params.client_secret.as_deref(),
    )?;
    let client = state.registry.authenticate(&credentials).await?;

    let grant_type: GrantType = params
        .grant_type
        .as_deref()
        .ok_or_else(|| OAuthError::InvalidRequest("grant_type is required".into()))?
        .parse()
        .map_err(|_| OAuthError::UnsupportedGrantType)?;
    if !client.allows_grant(grant_type) {
        tracing::warn!(client_id = %client.client_id, %grant_type, "grant type not allowed for client");
        return Err(OAuthError::UnsupportedGrantType);
    }

    let (user_id, scope) = match grant_type {
        GrantType::AuthorizationCode => handle_authorization_code_grant(&state, &client, &params).await?,
        GrantType::RefreshToken => handle_refresh_token_grant(&state, &client, &params).await?,
        GrantType::Password => handle_password_grant(&state, &client, &params).await?,
    };

    let issued = mint_tokens(&state, &client, user_id, scope).await?;
    tracing::info!(
        client_id = %client.client_id,
        user_id = %issued.user_id,
        %grant_type,
        "issued access token"
    );

    let expires_in = issued.expires_in_at(issued.created_at);
    let mut response = Json(TokenResponse {
        access_token: issued.access_token,
        token_type: "Bearer".to_string(),
        expires_in,
        refresh_token: issued.refresh_token.unwrap_or_default(),
        scope: issued.scope,
    })
    .into_response();
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    Ok(response)
}

/// Token revocation endpoint (RFC 7009).
#[tracing::instrument(skip(state, headers, params))]
#[utoipa::path(
    post,
    path = "/revoke",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Revoke Token",
    summary = "Revoke an access or refresh token",
    description = "Deletes the token record whose access or refresh token equals `token`, provided it was \
                   issued to the authenticated client. Implements RFC 7009: the response is 200 whether \
                   or not a matching token existed.",
    request_body(
        content = RevokeRequest,
        content_type = "application/x-www-form-urlencoded",
        description = "Token revocation request"
    ),
    responses(
        (status = 200, description = "Token revoked (or was already invalid)"),
        (status = 400, description = "Missing token parameter", body = ErrorResponse),
        (status = 401, description = "Client authentication failed", body = ErrorResponse),
    )
)]
pub async fn revoke(
    State(state): State<OAuth2State>,
    headers: HeaderMap,
    OAuthForm(params): OAuthForm<RevokeRequest>,
) -> Result<Json<serde_json::Value>, OAuthError> {
    let credentials = extract_client_credentials(
        &headers,
        params.client_id.as_deref(),
        params.client_secret.as_deref(),
    )?;
    let client = state.registry.authenticate(&credentials).await?;

    let token = params
        .token
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| OAuthError::InvalidRequest("token is required".into()))?;

    let deleted = state
        .store
        .delete_tokens_matching(token, &client.client_id)
        .await?;
    tracing::info!(client_id = %client.client_id, deleted, "token revocation");

    Ok(Json(serde_json::json!({})))
}

/// Example protected resource.
#[tracing::instrument(skip(principal), fields(user_id = %principal.user_id))]
#[utoipa::path(
    get,
    path = "/userinfo",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 UserInfo",
    summary = "Describe the token's owner",
    description = "Returns the user id and granted scope of the bearer token.",
    responses(
        (status = 200, description = "Principal of the access token", body = UserInfoResponse),
        (status = 401, description = "Missing, unknown, expired or revoked token", body = ErrorResponse),
    ),
    security(("Authorization" = []))
)]
pub async fn userinfo(principal: Principal) -> Json<UserInfoResponse> {
    Json(UserInfoResponse {
        user_id: principal.user_id,
        scope: principal.scope,
    })
}

/// Authorization server metadata (RFC 8414).
#[utoipa::path(
    get,
    path = "/.well-known/oauth-authorization-server",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Server Metadata",
    summary = "Authorization server metadata",
    responses(
        (status = 200, description = "Metadata document", body = ServerMetadata),
    )
)]
pub async fn server_metadata(State(state): State<OAuth2State>) -> Json<ServerMetadata> {
    let issuer = &state.issuer_url;
    let auth_methods: Vec<String> = [AuthMethod::ClientSecretBasic, AuthMethod::ClientSecretPost]
        .iter()
        .map(|m| m.as_str().to_string())
        .collect();
    Json(ServerMetadata {
        issuer: issuer.clone(),
        authorization_endpoint: format!("{issuer}/oauth/authorise"),
        token_endpoint: format!("{issuer}/oauth/token"),
        revocation_endpoint: format!("{issuer}/oauth/revoke"),
        userinfo_endpoint: format!("{issuer}/oauth/userinfo"),
        response_types_supported: vec![CODE_RESPONSE_TYPE.to_string()],
        grant_types_supported: GrantType::ALL.iter().map(|g| g.as_str().to_string()).collect(),
        token_endpoint_auth_methods_supported: auth_methods.clone(),
        revocation_endpoint_auth_methods_supported: auth_methods,
    })
}

// =============================================================================
// Grant handlers
// =============================================================================

fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str, OAuthError> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| OAuthError::InvalidRequest(format!("{name} is required")))
}

async fn handle_authorization_code_grant(
    state: &OAuth2State,
    client: &Client,
    params: &TokenRequest,
) -> Result<(String, String), OAuthError> {
    let code = required(&params.code, "code")?;
    let redirect_uri = required(&params.redirect_uri, "redirect_uri")?;

    let Some(grant) = state
        .store
        .take_authorization_code(code, &client.client_id)
        .await?
    else {
        tracing::warn!(client_id = %client.client_id, "unknown or already redeemed authorization code");
        return Err(OAuthError::InvalidGrant("authorization code is invalid"));
    };

    // The code is gone at this point whatever the outcome below.
    if grant.redirect_uri != redirect_uri {
        return Err(OAuthError::InvalidGrant("redirect_uri does not match"));
    }
    if grant.is_expired_at(OAuth2State::now()) {
        return Err(OAuthError::InvalidGrant("authorization code has expired"));
    }

    Ok((grant.user_id, grant.scope))
}

async fn handle_refresh_token_grant(
    state: &OAuth2State,
    client: &Client,
    params: &TokenRequest,
) -> Result<(String, String), OAuthError> {
    let refresh_token = required(&params.refresh_token, "refresh_token")?;

    let Some(previous) = state
        .store
        .take_refresh_token(refresh_token, &client.client_id)
        .await?
    else {
        tracing::warn!(client_id = %client.client_id, "unknown or already used refresh token");
        return Err(OAuthError::InvalidGrant("refresh token is invalid"));
    };
    if previous.revoked {
        return Err(OAuthError::InvalidGrant("refresh token is invalid"));
    }

    Ok((previous.user_id, previous.scope))
}

async fn handle_password_grant(
    state: &OAuth2State,
    client: &Client,
    params: &TokenRequest,
) -> Result<(String, String), OAuthError> {
    let email = params
        .email
        .as_ref()
        .or(params.username.as_ref())
        .map(|e| normalize_email(e))
        .filter(|e| !e.is_empty())
        .ok_or_else(|| OAuthError::InvalidRequest("email is required".into()))?;
    let password = required(&params.password, "password")?;

    let requested = Scope::parse(params.scope.as_deref().unwrap_or_default());
    let scope = if requested.is_empty() {
        client.full_scope()
    } else if requested.is_subset_of(&client.scopes) {
        requested
    } else {
        return Err(OAuthError::InvalidScope);
    };

    let Some(user) = state.store.find_user_by_email(&email).await? else {
        tracing::warn!(client_id = %client.client_id, "password grant for unknown user");
        return Err(OAuthError::InvalidGrant("invalid resource owner credentials"));
    };
    if !state
        .passwords
        .verify_blocking(password.to_string(), user.password_hash.clone())
        .await
    {
        tracing::warn!(client_id = %client.client_id, user_id = %user.id, "password grant with wrong password");
        return Err(OAuthError::InvalidGrant("invalid resource owner credentials"));
    }

    if let Err(e) = state.store.touch_last_login(&user.id, OAuth2State::now()).await {
        tracing::warn!("Failed to update last_login_at: {}", e);
    }
    Ok((user.id, scope.to_string()))
}

/// Emails are matched case-insensitively.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Create and persist a fresh access/refresh token pair.
async fn mint_tokens(
    state: &OAuth2State,
    client: &Client,
    user_id: String,
    scope: String,
) -> Result<oauth2_token::Model, OAuthError> {
    let now = OAuth2State::now();
    let record = oauth2_token::Model {
        id: uuid::Uuid::new_v4().to_string(),
        access_token: OAuth2State::generate_token()?,
        refresh_token: Some(OAuth2State::generate_token()?),
        client_id: client.client_id.clone(),
        user_id,
        scope,
        created_at: now,
        expires_at: now + state.access_token_lifetime,
        revoked: false,
    };
    Ok(state.store.insert_token(record).await?)
}
