//! Session login, logout and end-user registration.

use askama::Template;
use axum::{
    Form, Json,
    extract::{Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::entity::app_user;
use crate::error::{ErrorResponse, OAuthError};
use crate::oauth2::OAUTH2_TAG;
use crate::oauth2::endpoints::normalize_email;
use crate::oauth2::session::{
    DEFAULT_LANDING, LOGIN_PATH, clear_session_cookie, found, is_local_path, session_cookie,
};
use crate::oauth2::state::OAuth2State;

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Template)]
#[template(path = "login.html")]
struct LoginTemplate {
    next: String,
    email: String,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    pub next: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
    /// Local path to return to after signing in
    pub next: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterForm {
    pub email: String,
    pub password: String,
    pub name: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RegisterResponse {
    pub user_id: String,
}

/// Creates the login router.
pub fn router() -> OpenApiRouter<OAuth2State> {
    OpenApiRouter::new()
        .routes(routes!(login_page))
        .routes(routes!(login_submit))
        .routes(routes!(logout))
        .routes(routes!(register))
}

fn safe_next(next: Option<&str>) -> String {
    match next {
        Some(n) if is_local_path(n) => n.to_string(),
        _ => DEFAULT_LANDING.to_string(),
    }
}

fn render_login(status: StatusCode, template: LoginTemplate) -> Response {
    match template.render() {
        Ok(html) => (status, Html(html)).into_response(),
        Err(e) => OAuthError::Server(format!("failed to render login template: {e}")).into_response(),
    }
}

/// Display the login page.
#[tracing::instrument(skip_all)]
#[utoipa::path(
    get,
    path = "/login",
    tag = OAUTH2_TAG,
    operation_id = "Login Page",
    summary = "Display the login page",
    params(
        ("next" = Option<String>, Query, description = "Local path to return to after signing in"),
    ),
    responses(
        (status = 200, description = "Login page HTML"),
    )
)]
async fn login_page(Query(params): Query<LoginQuery>) -> Response {
    render_login(
        StatusCode::OK,
        LoginTemplate {
            next: safe_next(params.next.as_deref()),
            email: String::new(),
            error: None,
        },
    )
}

/// Handle login form submission.
#[tracing::instrument(skip(state, form))]
#[utoipa::path(
    post,
    path = "/login",
    tag = OAUTH2_TAG,
    operation_id = "Login Submit",
    summary = "Sign in with email and password",
    description = "Verifies the credentials, sets the session cookie and redirects to `next` \
                   (or the connected applications page).",
    request_body(
        content = LoginForm,
        content_type = "application/x-www-form-urlencoded",
        description = "Login credentials"
    ),
    responses(
        (status = 302, description = "Signed in; redirect to the return target"),
        (status = 401, description = "Login page HTML with an error message"),
    )
)]
async fn login_submit(State(state): State<OAuth2State>, Form(form): Form<LoginForm>) -> Response {
    let next = safe_next(form.next.as_deref());
    let email = normalize_email(&form.email);

    let user = match state.store.find_user_by_email(&email).await {
        Ok(user) => user,
        Err(e) => return OAuthError::from(e).into_response(),
    };
    let verified = match &user {
        Some(u) => {
            state
                .passwords
                .verify_blocking(form.password, u.password_hash.clone())
                .await
        }
        None => false,
    };
    let Some(user) = user.filter(|_| verified) else {
        tracing::warn!("failed login attempt");
        return render_login(
            StatusCode::UNAUTHORIZED,
            LoginTemplate {
                next,
                email,
                error: Some("Incorrect email address or password".to_string()),
            },
        );
    };

    let now = OAuth2State::now();
    let token = match state.sessions.issue(&user.id, now, state.session_lifetime) {
        Ok(t) => t,
        Err(e) => return OAuthError::Server(format!("failed to sign session: {e}")).into_response(),
    };
    if let Err(e) = state.store.touch_last_login(&user.id, now).await {
        tracing::warn!("Failed to update last_login_at: {}", e);
    }
    tracing::info!(user_id = %user.id, "user signed in");

    with_cookie(found(&next), &session_cookie(&token, state.session_lifetime))
}

/// Clear the session.
#[tracing::instrument]
#[utoipa::path(
    get,
    path = "/logout",
    tag = OAUTH2_TAG,
    operation_id = "Logout",
    summary = "Sign out",
    responses(
        (status = 302, description = "Session cleared; redirect to the login page"),
    )
)]
async fn logout() -> Response {
    with_cookie(found(LOGIN_PATH), &clear_session_cookie())
}

/// Register an end user.
#[tracing::instrument(skip(state, form))]
#[utoipa::path(
    post,
    path = "/register",
    tag = OAUTH2_TAG,
    operation_id = "Register User",
    summary = "Create an end-user account",
    request_body(
        content = RegisterForm,
        content_type = "application/x-www-form-urlencoded",
        description = "New account details"
    ),
    responses(
        (status = 201, description = "Account created", body = RegisterResponse),
        (status = 400, description = "Missing email or password too short", body = ErrorResponse),
        (status = 409, description = "Email already registered", body = ErrorResponse),
    )
)]
async fn register(
    State(state): State<OAuth2State>,
    Form(form): Form<RegisterForm>,
) -> Result<(StatusCode, Json<RegisterResponse>), OAuthError> {
    let email = normalize_email(&form.email);
    if email.is_empty() || !email.contains('@') {
        return Err(OAuthError::InvalidRequest("a valid email is required".into()));
    }
    if form.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(OAuthError::InvalidRequest(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    if state.store.find_user_by_email(&email).await?.is_some() {
        return Err(OAuthError::EmailTaken);
    }

    let password_hash = state
        .passwords
        .hash_blocking(form.password)
        .await
        .map_err(|e| OAuthError::Server(format!("failed to hash password: {e}")))?;

    let user = app_user::Model {
        id: uuid::Uuid::new_v4().to_string(),
        email,
        password_hash,
        name: form.name.filter(|n| !n.trim().is_empty()),
        created_at: OAuth2State::now(),
        last_login_at: None,
    };
    let user = match state.store.insert_user(user).await {
        Ok(u) => u,
        Err(e) if e.is_unique_violation() => return Err(OAuthError::EmailTaken),
        Err(e) => return Err(e.into()),
    };
    tracing::info!(user_id = %user.id, "registered user");

    Ok((StatusCode::CREATED, Json(RegisterResponse { user_id: user.id })))
}

fn with_cookie(mut response: Response, cookie: &str) -> Response {
    match HeaderValue::from_str(cookie) {
        Ok(value) => {
            response.headers_mut().append(header::SET_COOKIE, value);
            response
        }
        Err(_) => OAuthError::Server("unencodable session cookie".into()).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_falls_back_to_landing_page() {
        assert_eq!(safe_next(None), DEFAULT_LANDING);
        assert_eq!(safe_next(Some("https://evil.example")), DEFAULT_LANDING);
        assert_eq!(safe_next(Some("//evil.example")), DEFAULT_LANDING);
        assert_eq!(
            safe_next(Some("/oauth/authorise?client_id=c1")),
            "/oauth/authorise?client_id=c1"
        );
    }
}
