use axum::{
    Form, Json,
    extract::{FromRequest, Request, rejection::FormRejection},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;
use utoipa::ToSchema;

use crate::store::StoreError;

/// JSON error body shared by every OAuth endpoint.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

/// Protocol errors of the authorization server.
///
/// Every variant maps to one snake_case `error` code. Infrastructure failures
/// collapse into [`OAuthError::Server`], whose detail is logged but never sent.
#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("client authentication failed")]
    InvalidClient,
    #[error("redirect_uri is not registered for this client")]
    InvalidRedirectUri,
    #[error("response_type is not allowed for this client")]
    UnsupportedResponseType,
    #[error("requested scope exceeds the client's allowed scopes")]
    InvalidScope,
    #[error("invalid grant: {0}")]
    InvalidGrant(&'static str),
    #[error("grant_type is not allowed for this client")]
    UnsupportedGrantType,
    #[error("the resource owner denied the request")]
    AccessDenied,
    #[error("invalid token: {0}")]
    InvalidToken(&'static str),
    #[error("email address is already registered")]
    EmailTaken,
    #[error("server error: {0}")]
    Server(String),
}

impl OAuthError {
    pub fn code(&self) -> &'static str {
        match self {
            OAuthError::InvalidRequest(_) => "invalid_request",
            OAuthError::InvalidClient => "invalid_client",
            OAuthError::InvalidRedirectUri => "invalid_redirect_uri",
            OAuthError::UnsupportedResponseType => "unsupported_response_type",
            OAuthError::InvalidScope => "invalid_scope",
            OAuthError::InvalidGrant(_) => "invalid_grant",
            OAuthError::UnsupportedGrantType => "unsupported_grant_type",
            OAuthError::AccessDenied => "access_denied",
            OAuthError::InvalidToken(_) => "invalid_token",
            OAuthError::EmailTaken => "email_taken",
            OAuthError::Server(_) => "server_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            OAuthError::InvalidClient | OAuthError::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            OAuthError::AccessDenied => StatusCode::FORBIDDEN,
            OAuthError::EmailTaken => StatusCode::CONFLICT,
            OAuthError::Server(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    pub fn body(&self) -> ErrorResponse {
        let description = match self {
            OAuthError::Server(_) => "internal server error".to_string(),
            other => other.to_string(),
        };
        ErrorResponse {
            error: self.code().to_string(),
            error_description: Some(description),
        }
    }

    /// The authorization endpoint answers every failure with 400.
    pub fn into_authorize_response(self) -> Response {
        let status = match self {
            OAuthError::Server(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        };
        if let OAuthError::Server(detail) = &self {
            tracing::error!("authorization endpoint failure: {}", detail);
        }
        (status, Json(self.body())).into_response()
    }
}

impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        if let OAuthError::Server(detail) = &self {
            tracing::error!("server error: {}", detail);
        }
        let mut response = (self.status(), Json(self.body())).into_response();
        match self {
            OAuthError::InvalidToken(_) => {
                response.headers_mut().insert(
                    header::WWW_AUTHENTICATE,
                    HeaderValue::from_static("Bearer error=\"invalid_token\""),
                );
            }
            OAuthError::InvalidClient => {
                response.headers_mut().insert(
                    header::WWW_AUTHENTICATE,
                    HeaderValue::from_static("Basic"),
                );
            }
            _ => {}
        }
        response
    }
}

impl From<StoreError> for OAuthError {
    fn from(e: StoreError) -> Self {
        OAuthError::Server(e.to_string())
    }
}

impl From<FormRejection> for OAuthError {
    fn from(rejection: FormRejection) -> Self {
        OAuthError::InvalidRequest(rejection.body_text())
    }
}

/// `application/x-www-form-urlencoded` body whose rejections are reported
/// as `invalid_request` JSON instead of axum's plain-text responses.
#[derive(Debug)]
pub struct OAuthForm<T>(pub T);

impl<T, S> FromRequest<S> for OAuthForm<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = OAuthError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Form(value) = Form::<T>::from_request(req, state).await?;
        Ok(OAuthForm(value))
    }
}

impl From<getrandom::Error> for OAuthError {
    fn from(e: getrandom::Error) -> Self {
        OAuthError::Server(format!("random generator failure: {e}"))
    }
}
