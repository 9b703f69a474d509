//! Connected applications page for the logged-in user.

use askama::Template;
use axum::{
    Form,
    extract::State,
    response::{Html, IntoResponse, Response},
};
use serde::Deserialize;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::error::{ErrorResponse, OAuthError};
use crate::oauth2::OAUTH2_TAG;
use crate::oauth2::session::{CurrentUser, DEFAULT_LANDING, found};
use crate::oauth2::state::OAuth2State;

struct AuthorizedApp {
    client_id: String,
    name: String,
}

#[derive(Template)]
#[template(path = "manage_apps.html")]
struct ManageAppsTemplate {
    user_email: String,
    apps: Vec<AuthorizedApp>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct DeauthoriseForm {
    pub client_id: Option<String>,
}

pub fn router() -> OpenApiRouter<OAuth2State> {
    OpenApiRouter::new()
        .routes(routes!(manage_apps))
        .routes(routes!(deauthorise))
}

/// List applications the user has granted access to.
#[tracing::instrument(skip(state, user), fields(user_id = %user.0.id))]
#[utoipa::path(
    get,
    path = "/manage-apps",
    tag = OAUTH2_TAG,
    operation_id = "Manage Apps",
    summary = "List connected applications",
    description = "Shows every client the logged-in user currently holds tokens for.",
    responses(
        (status = 200, description = "Connected applications HTML"),
        (status = 302, description = "Redirect to the login page"),
    )
)]
async fn manage_apps(State(state): State<OAuth2State>, user: CurrentUser) -> Response {
    let apps = match load_apps(&state, &user.0.id).await {
        Ok(apps) => apps,
        Err(e) => return e.into_response(),
    };
    let template = ManageAppsTemplate {
        user_email: user.0.email,
        apps,
    };
    match template.render() {
        Ok(html) => Html(html).into_response(),
        Err(e) => OAuthError::Server(format!("failed to render manage-apps template: {e}"))
            .into_response(),
    }
}

async fn load_apps(state: &OAuth2State, user_id: &str) -> Result<Vec<AuthorizedApp>, OAuthError> {
    let client_ids = state.store.authorized_client_ids(user_id).await?;
    let clients = state.store.find_clients(&client_ids).await?;
    Ok(clients
        .into_iter()
        .map(|c| AuthorizedApp {
            client_id: c.client_id,
            name: c.name,
        })
        .collect())
}

/// Revoke every token the user granted to one client.
#[tracing::instrument(skip(state, user, form), fields(user_id = %user.0.id))]
#[utoipa::path(
    post,
    path = "/deauthorise",
    tag = OAUTH2_TAG,
    operation_id = "Deauthorise App",
    summary = "Disconnect an application",
    description = "Deletes all tokens the logged-in user granted to `client_id`, then returns to the \
                   connected applications page.",
    request_body(
        content = DeauthoriseForm,
        content_type = "application/x-www-form-urlencoded",
        description = "Client to disconnect"
    ),
    responses(
        (status = 302, description = "Tokens deleted; redirect to the connected applications page"),
        (status = 400, description = "Missing client_id", body = ErrorResponse),
    )
)]
async fn deauthorise(
    State(state): State<OAuth2State>,
    user: CurrentUser,
    Form(form): Form<DeauthoriseForm>,
) -> Result<Response, OAuthError> {
    let client_id = form
        .client_id
        .as_deref()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| OAuthError::InvalidRequest("client_id is required".into()))?;

    let deleted = state.store.delete_tokens_for(&user.0.id, client_id).await?;
    tracing::info!(client_id, deleted, "user deauthorised client");

    Ok(found(DEFAULT_LANDING))
}
