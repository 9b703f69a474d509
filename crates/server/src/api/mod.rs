//! HTTP surface of the authorization server.
//!
//! - `health` - Health check endpoint (/healthz)
//! - `openapi` - OpenAPI/Utoipa configuration
//!
//! The OAuth2 routes themselves live in [`crate::oauth2`] and are nested
//! under `/oauth` here.

pub mod health;
pub mod openapi;

pub use health::MISC_TAG;

use axum::Router;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_axum::{router::OpenApiRouter, routes};
use utoipa_redoc::{Redoc, Servable};

use crate::oauth2::{self, OAuth2State};

/// Build the complete application router, including the API docs.
pub fn app(state: OAuth2State) -> Router {
    let (router, api) = OpenApiRouter::with_openapi(openapi::ApiDoc::openapi())
        .nest("/oauth", oauth2::router(state.clone()))
        .merge(oauth2::well_known_router(state))
        .routes(routes!(health::health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .split_for_parts();

    router.merge(Redoc::with_url("/api-docs", api))
}

/// Starts the web server with all configured routes.
#[tracing::instrument(skip(state))]
pub async fn start_webserver(state: OAuth2State, bind_address: &str) -> color_eyre::Result<()> {
    let router = app(state);

    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    tracing::info!(addr = %bind_address, "Server running");
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await
    .map_err(|e| color_eyre::Report::msg(format!("Failed to start server: {e}")))?;

    Ok(())
}
