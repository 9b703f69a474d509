//! OAuth2 Authorization Server module.
//!
//! ## Supported Flows
//!
//! - Authorization Code with user consent
//! - Refresh Token (single-use, rotated on every exchange)
//! - Resource Owner Password Credentials
//!
//! ## Endpoints
//!
//! - `GET|POST /oauth/authorise` - Authorization endpoint and consent
//! - `POST /oauth/token` - Token endpoint
//! - `POST /oauth/revoke` - Token revocation
//! - `GET /oauth/userinfo` - Example bearer-protected resource
//! - `GET /oauth/manage-apps`, `POST /oauth/deauthorise` - Connected applications
//! - `GET|POST /oauth/login`, `GET /oauth/logout`, `POST /oauth/register` - End-user session
//! - `GET /.well-known/oauth-authorization-server` - Server metadata

pub mod apps;
pub mod authorize;
pub mod endpoints;
pub mod guard;
pub mod login;
pub mod password;
pub mod registrar;
pub mod scope;
pub mod seed;
pub mod session;
mod state;

use axum::middleware;
use utoipa_axum::router::OpenApiRouter;

pub use guard::Principal;
pub use registrar::{AuthMethod, Client, ClientRegistry, GrantType};
pub use scope::Scope;
pub use session::CurrentUser;
pub use state::OAuth2State;

/// OpenAPI tag for OAuth2 endpoints
pub const OAUTH2_TAG: &str = "OAuth2";

/// Every route under `/oauth`.
pub fn router(state: OAuth2State) -> OpenApiRouter {
    let protected = endpoints::protected_router().route_layer(middleware::from_fn_with_state(
        state.clone(),
        guard::require_bearer,
    ));

    OpenApiRouter::new()
        .merge(authorize::router())
        .merge(endpoints::router())
        .merge(protected)
        .merge(apps::router())
        .merge(login::router())
        .with_state(state)
}

/// Routes served from the site root.
pub fn well_known_router(state: OAuth2State) -> OpenApiRouter {
    endpoints::well_known_router().with_state(state)
}
