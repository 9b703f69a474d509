//! Authorization endpoint.
//!
//! `GET /authorise` validates the request and renders the consent page.
//! `POST /authorise` re-validates the round-tripped parameters the same way
//! and either issues a one-time authorization code or reports the denial
//! back to the client's redirect URI.

use askama::Template;
use axum::{
    Form,
    extract::{Query, State},
    response::{Html, IntoResponse, Response},
};
use serde::Deserialize;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::entity::oauth2_authorization;
use crate::error::OAuthError;
use crate::oauth2::registrar::{CODE_RESPONSE_TYPE, Client, ClientCheck};
use crate::oauth2::scope::Scope;
use crate::oauth2::session::{CurrentUser, found};
use crate::oauth2::state::OAuth2State;

/// Scope information for display.
#[derive(Debug, Clone)]
pub struct ScopeInfo {
    pub name: String,
    pub description: String,
}

/// Human-readable scope information.
fn get_scope_info(scope: &str) -> ScopeInfo {
    match scope {
        "facility" => ScopeInfo {
            name: "Facilities".to_string(),
            description: "View the facilities you are registered with".to_string(),
        },
        "medication" => ScopeInfo {
            name: "Medication".to_string(),
            description: "View your medication list".to_string(),
        },
        "prescription" => ScopeInfo {
            name: "Prescriptions".to_string(),
            description: "View your prescriptions".to_string(),
        },
        "appointment" => ScopeInfo {
            name: "Appointments".to_string(),
            description: "View your appointments".to_string(),
        },
        _ => ScopeInfo {
            name: scope.to_string(),
            description: format!("Access to {}", scope),
        },
    }
}

#[derive(Template)]
#[template(path = "consent.html")]
struct ConsentTemplate {
    user_email: String,
    client_name: String,
    client_id: String,
    redirect_uri: String,
    response_type: String,
    scope: String,
    state: String,
    scopes: Vec<ScopeInfo>,
}

/// Authorization request parameters. The consent form posts the same fields
/// back, plus `allow` when the user approves.
#[derive(Debug, Deserialize, ToSchema)]
pub struct AuthorizeParams {
    /// Client identifier issued during registration
    pub client_id: Option<String>,
    /// Must exactly match one of the client's registered redirect URIs
    pub redirect_uri: Option<String>,
    /// Defaults to "code"
    pub response_type: Option<String>,
    /// Space-separated list of requested scopes
    pub scope: Option<String>,
    /// Opaque value echoed back to the client
    pub state: Option<String>,
    /// Present when the user approved the request
    pub allow: Option<String>,
}

/// A request that passed client validation.
struct ValidatedRequest {
    client: Client,
    redirect_uri: String,
    response_type: String,
    scope: Scope,
    state: Option<String>,
}

/// Creates the authorization endpoint router.
pub fn router() -> OpenApiRouter<OAuth2State> {
    OpenApiRouter::new()
        .routes(routes!(authorize_page))
        .routes(routes!(authorize_submit))
}

async fn validate_request(
    state: &OAuth2State,
    params: &AuthorizeParams,
) -> Result<ValidatedRequest, OAuthError> {
    let client_id = params
        .client_id
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| OAuthError::InvalidRequest("client_id is required".into()))?;
    let redirect_uri = params
        .redirect_uri
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| OAuthError::InvalidRequest("redirect_uri is required".into()))?;
    let response_type = params
        .response_type
        .as_deref()
        .filter(|s| !s.is_empty())
        .unwrap_or(CODE_RESPONSE_TYPE);
    // Only the code flow is implemented, whatever the client registered.
    if response_type != CODE_RESPONSE_TYPE {
        return Err(OAuthError::UnsupportedResponseType);
    }
    let scope = Scope::parse(params.scope.as_deref().unwrap_or_default());

    let client = state
        .registry
        .validate(
            client_id,
            ClientCheck {
                redirect_uri: Some(redirect_uri),
                response_type: Some(response_type),
                scope: Some(&scope),
                ..ClientCheck::default()
            },
        )
        .await?;

    Ok(ValidatedRequest {
        client,
        redirect_uri: redirect_uri.to_string(),
        response_type: response_type.to_string(),
        scope,
        state: params.state.clone().filter(|s| !s.is_empty()),
    })
}

/// Display the consent page.
#[tracing::instrument(skip(state, user), fields(user_id = %user.0.id))]
#[utoipa::path(
    get,
    path = "/authorise",
    tag = super::OAUTH2_TAG,
    operation_id = "OAuth2 Authorize",
    summary = "Start an authorization request",
    description = "Validates the client, redirect URI, response type and scope, then renders a consent \
                   page for the logged-in user. Without a session the browser is redirected to the \
                   login page and returned here afterwards.",
    params(
        ("client_id" = String, Query, description = "Client identifier"),
        ("redirect_uri" = String, Query, description = "Registered redirect URI, matched exactly"),
        ("response_type" = Option<String>, Query, description = "Must be `code` (default)"),
        ("scope" = Option<String>, Query, description = "Space-separated scopes"),
        ("state" = Option<String>, Query, description = "Opaque value echoed to the client"),
    ),
    responses(
        (status = 200, description = "Consent page HTML"),
        (status = 302, description = "Redirect to the login page"),
        (status = 400, description = "Invalid client, redirect URI, response type or scope", body = crate::error::ErrorResponse),
    )
)]
async fn authorize_page(
    State(state): State<OAuth2State>,
    user: CurrentUser,
    Query(params): Query<AuthorizeParams>,
) -> Response {
    let request = match validate_request(&state, &params).await {
        Ok(r) => r,
        Err(e) => return e.into_authorize_response(),
    };

    let template = ConsentTemplate {
        user_email: user.0.email,
        client_name: request.client.name.clone(),
        client_id: request.client.client_id.clone(),
        redirect_uri: request.redirect_uri,
        response_type: request.response_type,
        scope: request.scope.to_string(),
        state: request.state.unwrap_or_default(),
        scopes: request.scope.tokens().map(get_scope_info).collect(),
    };

    match template.render() {
        Ok(html) => Html(html).into_response(),
        Err(e) => OAuthError::Server(format!("failed to render consent template: {e}"))
            .into_authorize_response(),
    }
}

/// Handle the consent decision.
#[tracing::instrument(skip(state, user, params), fields(user_id = %user.0.id))]
#[utoipa::path(
    post,
    path = "/authorise",
    tag = super::OAUTH2_TAG,
    operation_id = "OAuth2 Authorize Submit",
    summary = "Submit the consent decision",
    description = "Re-validates the request. With `allow` present an authorization code is issued and \
                   the browser is redirected to `redirect_uri?code=...&state=...`; otherwise it is \
                   redirected with `error=access_denied`.",
    request_body(
        content = AuthorizeParams,
        content_type = "application/x-www-form-urlencoded",
        description = "Round-tripped authorization parameters and the decision"
    ),
    responses(
        (status = 302, description = "Redirect to the client with a code or an error"),
        (status = 400, description = "Invalid client, redirect URI, response type or scope", body = crate::error::ErrorResponse),
    )
)]
async fn authorize_submit(
    State(state): State<OAuth2State>,
    user: CurrentUser,
    Form(params): Form<AuthorizeParams>,
) -> Response {
    let request = match validate_request(&state, &params).await {
        Ok(r) => r,
        Err(e) => return e.into_authorize_response(),
    };

    if params.allow.is_none() {
        tracing::info!(client_id = %request.client.client_id, "user denied consent");
        let mut query = vec![("error", OAuthError::AccessDenied.code())];
        if let Some(s) = request.state.as_deref() {
            query.push(("state", s));
        }
        return found(&append_query(&request.redirect_uri, &query));
    }

    match issue_code(&state, &user, &request).await {
        Ok(code) => {
            tracing::info!(
                client_id = %request.client.client_id,
                scope = %request.scope,
                "user granted consent"
            );
            let mut query = vec![("code", code.as_str())];
            if let Some(s) = request.state.as_deref() {
                query.push(("state", s));
            }
            found(&append_query(&request.redirect_uri, &query))
        }
        Err(e) => e.into_authorize_response(),
    }
}

async fn issue_code(
    state: &OAuth2State,
    user: &CurrentUser,
    request: &ValidatedRequest,
) -> Result<String, OAuthError> {
    let code = OAuth2State::generate_token()?;
    let now = OAuth2State::now();
    state
        .store
        .insert_authorization_code(oauth2_authorization::Model {
            code: code.clone(),
            client_id: request.client.client_id.clone(),
            user_id: user.0.id.clone(),
            redirect_uri: request.redirect_uri.clone(),
            scope: request.scope.to_string(),
            created_at: now,
            expires_at: now + state.authorization_code_lifetime,
        })
        .await?;
    Ok(code)
}

/// Append percent-encoded query parameters to a URI that may already carry
/// a query string.
pub fn append_query(uri: &str, params: &[(&str, &str)]) -> String {
    let mut out = uri.to_string();
    for (key, value) in params {
        if !(out.ends_with('?') || out.ends_with('&')) {
            out.push(if out.contains('?') { '&' } else { '?' });
        }
        out.push_str(key);
        out.push('=');
        out.push_str(&urlencoding::encode(value));
    }
    out
}
