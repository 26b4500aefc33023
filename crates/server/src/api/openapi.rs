//! OpenAPI/Utoipa configuration.

use crate::api::health::MISC_TAG;
use crate::oauth2::{ANON_USER_CREATE_SCOPE, OAUTH2_TAG};
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
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        let bearer = HttpBuilder::new()
            .scheme(HttpAuthScheme::Bearer)
            .description(Some("Access token issued by `/oauth/token`."))
            .build();
        components.add_security_scheme("bearer_auth", SecurityScheme::Http(bearer));

        let scopes = || {
            Scopes::from_iter([(
                ANON_USER_CREATE_SCOPE,
                "Authorize a named identity without login (bootstrap only)",
            )])
        };
        let oauth2 = OAuth2::new([
            Flow::AuthorizationCode(AuthorizationCode::new(
                "/oauth/authorize",
                "/oauth/token",
                scopes(),
            )),
            Flow::Password(Password::new("/oauth/token", scopes())),
        ]);
        components.add_security_scheme("OAuth2", SecurityScheme::OAuth2(oauth2));
    }
}

/// OpenAPI documentation configuration.
#[derive(OpenApi)]
#[openapi(
    modifiers(&SecurityAddon),
    info(
        title = "Federated Front Door API",
        version = "1.0.0",
        description = "OAuth2 authorization server for a single federated identity. Clients \
                       identified by a URL are registered from their client metadata document."
    ),
    tags(
        (name = MISC_TAG, description = "Miscellaneous endpoints"),
        (name = OAUTH2_TAG, description = "OAuth2 authorization endpoints")
    )
)]
pub struct ApiDoc;
