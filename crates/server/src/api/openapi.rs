//! OpenAPI/Utoipa configuration.

use crate::api::health::MISC_TAG;
use crate::oauth2::OAUTH2_TAG;
use utoipa::{
    Modify, OpenApi,
    openapi::security::{
        AuthorizationCode, Flow, HttpAuthScheme, HttpBuilder, OAuth2, Password, Scopes,
        SecurityScheme,
    },
};

/// Security addon for OpenAPI documentation.
pub struct SecurityAddon;

impl Modify for SecurityAddon {
    #[tracing::instrument(skip(self, openapi))]
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            let bearer = HttpBuilder::new()
                .scheme(HttpAuthScheme::Bearer)
                .description(Some(
                    "Opaque access token issued by the `/oauth/token` endpoint.",
                ))
                .build();
            components.add_security_scheme("Authorization", SecurityScheme::Http(bearer));

            let scopes = || {
                Scopes::from_iter([
                    ("facility", "View registered facilities"),
                    ("medication", "View medication"),
                    ("prescription", "View prescriptions"),
                    ("appointment", "View appointments"),
                ])
            };
            let oauth2 = OAuth2::new([
                Flow::AuthorizationCode(AuthorizationCode::new(
                    "/oauth/authorise",
                    "/oauth/token",
                    scopes(),
                )),
                Flow::Password(Password::new("/oauth/token", scopes())),
            ]);
            components.add_security_scheme("OAuth2", SecurityScheme::OAuth2(oauth2));
        }
    }
}

/// OpenAPI documentation configuration.
#[derive(OpenApi)]
#[openapi(
    modifiers(&SecurityAddon),
    info(
        title = "Prescription Manager Authorization Server",
        version = "1.0.0",
        description = "OAuth2 authorization server for the prescription management platform."
    ),
    tags(
        (name = MISC_TAG, description = "Miscellaneous endpoints"),
        (name = OAUTH2_TAG, description = "OAuth2 authorization server endpoints")
    )
)]
pub struct ApiDoc;
