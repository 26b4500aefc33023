//! OAuth2 HTTP endpoints.
//!
//! - `GET|POST /oauth/authorize` - authorization endpoint with login step
//! - `POST /oauth/token` - token endpoint (`authorization_code`, `password`)
//! - `GET /oauth/userinfo` - identity behind a bearer token
//! - `GET /.well-known/oauth-authorization-server` - discovery document

use axum::{
    Form, Json,
    extract::{Query, State},
    http::{
        HeaderMap, StatusCode,
        header::{AUTHORIZATION, CACHE_CONTROL},
    },
    response::{IntoResponse, Redirect, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use url::Url;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::error::{ErrorKind, OAuthError};
use crate::oauth2::engine::PendingAuthorization;
use crate::oauth2::login::{LoginPage, error_page, login_page};
use crate::oauth2::registrar::{bound_redirect, check_client};
use crate::oauth2::state::{OAuth2State, RequestClient};
use crate::oauth2::{ANON_USER_CREATE_SCOPE, OAUTH2_TAG};
use crate::storage::AccessGrant;

/// Creates the router mounted under `/oauth`.
pub fn router(state: OAuth2State) -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(authorize, authorize_submit))
        .routes(routes!(token))
        .routes(routes!(userinfo))
        .with_state(state)
}

/// Creates the router for the discovery document at the server root.
pub fn discovery_router(state: OAuth2State) -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(authorization_server_metadata))
        .with_state(state)
}

// =============================================================================
// Request/Response Types
// =============================================================================

/// OAuth2 authorization request parameters.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct AuthorizeRequest {
    /// `code`, or `id` which is treated as `code`
    #[serde(default)]
    pub response_type: Option<String>,
    /// Local client id or client identifier URL
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub redirect_uri: Option<String>,
    /// Space-separated list of requested scopes
    #[serde(default)]
    pub scope: Option<String>,
    /// Opaque value for CSRF protection
    #[serde(default)]
    pub state: Option<String>,
    /// Identity to bootstrap with the anonymous-create scope
    #[serde(default)]
    pub actor: Option<String>,
}

/// Login form posted back to the authorization endpoint.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct AuthorizeForm {
    #[serde(default)]
    pub response_type: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub redirect_uri: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub handle: String,
    #[serde(default)]
    pub pw: String,
}

impl AuthorizeForm {
    fn request(&self) -> AuthorizeRequest {
        AuthorizeRequest {
            response_type: self.response_type.clone(),
            client_id: self.client_id.clone(),
            redirect_uri: self.redirect_uri.clone(),
            scope: self.scope.clone(),
            state: self.state.clone(),
            actor: None,
        }
    }
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct TokenRequest {
    #[serde(default)]
    pub grant_type: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub redirect_uri: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub scope: String,
}

impl From<AccessGrant> for TokenResponse {
    fn from(grant: AccessGrant) -> Self {
        Self {
            expires_in: grant.expires_in(),
            access_token: grant.access_token,
            token_type: "Bearer".to_string(),
            refresh_token: grant.refresh_token,
            scope: grant.scope,
        }
    }
}

/// Result of the anonymous-create bootstrap.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AnonymousCreateResponse {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    pub redirect_uri: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AuthorizationServerMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub userinfo_endpoint: String,
    pub response_types_supported: Vec<String>,
    pub grant_types_supported: Vec<String>,
    pub token_endpoint_auth_methods_supported: Vec<String>,
    pub scopes_supported: Vec<String>,
}

impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        (
            self.status(),
            Json(ErrorResponse {
                error: self.code.to_string(),
                error_description: self.description,
            }),
        )
            .into_response()
    }
}

// =============================================================================
// Endpoints
// =============================================================================

/// OAuth2 Authorization endpoint.
#[tracing::instrument(skip(state, params), fields(client_id = ?params.client_id))]
#[utoipa::path(
    get,
    path = "/authorize",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Authorize",
    summary = "Start the authorization-code flow",
    description = "Validates the client and redirect URI and renders the login form.\n\n\
                   **Clients:** `client_id` is either a locally registered id or a client identifier URL. \
                   URL identifiers are resolved by fetching the client's metadata document; the client \
                   does not need to register first.\n\n\
                   **Bootstrap:** with `scope=anonUserCreate` the request is authorized without a login \
                   step for the identity named by `actor`, and the code is returned as JSON.",
    params(
        ("response_type" = String, Query, description = "`code` (or `id`, treated as `code`)."),
        ("client_id" = String, Query, description = "Local client id or client identifier URL."),
        ("redirect_uri" = Option<String>, Query, description = "Must match a registered redirect URI. Defaults to the first one."),
        ("scope" = Option<String>, Query, description = "Space-separated list of requested scopes."),
        ("state" = Option<String>, Query, description = "Opaque value returned unchanged in the redirect."),
        ("actor" = Option<String>, Query, description = "Identity IRI for the `anonUserCreate` bootstrap."),
    ),
    responses(
        (status = 200, description = "Login form, or the bootstrap code as JSON", body = AnonymousCreateResponse),
        (status = 303, description = "Redirect back to the client with an error"),
        (status = 400, description = "Unknown client or unregistered redirect_uri (HTML error page)"),
    )
)]
pub async fn authorize(
    State(state): State<OAuth2State>,
    Query(params): Query<AuthorizeRequest>,
) -> Response {
    let (client, pending) = match validate_request(&state, &params).await {
        Ok(validated) => validated,
        Err(response) => return response,
    };

    if pending.scope == ANON_USER_CREATE_SCOPE {
        return anonymous_create(&state, &pending, params.actor.as_deref()).await;
    }

    login_page(
        &pending,
        LoginPage {
            client_name: &client.display_name(),
            principal: &state.principal.name,
        },
    )
}

/// Login form submission.
#[tracing::instrument(skip(state, form), fields(client_id = ?form.client_id, handle = %form.handle))]
#[utoipa::path(
    post,
    path = "/authorize",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Authorize Submit",
    summary = "Submit login credentials",
    description = "Checks `handle` and `pw` against the stored credentials. On success an authorization \
                   code is issued and the user agent is redirected to the client with `code` and `state`; \
                   on failure it is redirected with `error=access_denied` and no code is issued.",
    request_body(
        content = AuthorizeForm,
        content_type = "application/x-www-form-urlencoded",
        description = "Authorization request parameters and login credentials"
    ),
    responses(
        (status = 303, description = "Redirect back to the client with a code or an error"),
        (status = 400, description = "Unknown client or unregistered redirect_uri (HTML error page)"),
    )
)]
pub async fn authorize_submit(
    State(state): State<OAuth2State>,
    Form(form): Form<AuthorizeForm>,
) -> Response {
    let (_client, pending) = match validate_request(&state, &form.request()).await {
        Ok(validated) => validated,
        Err(response) => return response,
    };

    let identity = match state.authenticate(&form.handle, &form.pw).await {
        Ok(identity) => identity,
        Err(e) => {
            warn!(error = %e, "Login failed");
            return error_redirect(&pending, &e.with_code("access_denied"));
        }
    };

    match state.engine.finalize_authorize(&pending, &identity.id).await {
        Ok(grant) => {
            info!(identity = %identity.id, client_id = %pending.client_id, "Authorization granted");
            redirect_with(
                &pending.redirect_uri,
                &[("code", Some(grant.code.as_str())), ("state", pending.state.as_deref())],
            )
        }
        Err(e) => error_redirect(&pending, &e),
    }
}

/// OAuth2 Token endpoint.
#[tracing::instrument(skip(state, headers, params), fields(grant_type = ?params.grant_type))]
#[utoipa::path(
    post,
    path = "/token",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Token",
    summary = "Exchange an authorization code or password for an access token",
    description = "**Supported grant types:**\n\
                   - `authorization_code`: `code` and optional `redirect_uri`\n\
                   - `password`: `username` (identity IRI or display name) and `password`\n\n\
                   **Client authentication:** HTTP Basic auth or `client_id`/`client_secret` in the body. \
                   Public clients send only `client_id`.\n\n\
                   Failures other than malformed requests are reported as a generic 401.",
    request_body(
        content = TokenRequest,
        content_type = "application/x-www-form-urlencoded",
        description = "Token request parameters"
    ),
    responses(
        (status = 200, description = "Token issued", body = TokenResponse),
        (status = 400, description = "Missing parameters or unsupported grant type", body = ErrorResponse),
        (status = 401, description = "The request could not be authorized", body = ErrorResponse),
    )
)]
pub async fn token(
    State(state): State<OAuth2State>,
    headers: HeaderMap,
    Form(params): Form<TokenRequest>,
) -> Response {
    match issue_token(&state, &headers, params).await {
        Ok(grant) => (
            StatusCode::OK,
            [(CACHE_CONTROL, "no-store")],
            Json(TokenResponse::from(grant)),
        )
            .into_response(),
        Err(e) if e.kind == ErrorKind::InvalidRequest => e.into_response(),
        Err(e) => {
            warn!(error = %e, kind = ?e.kind, "Token request denied");
            OAuthError::unauthorized("the request could not be authorized").into_response()
        }
    }
}

/// Identity behind a bearer token.
#[tracing::instrument(skip(state, headers))]
#[utoipa::path(
    get,
    path = "/userinfo",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 UserInfo",
    summary = "Get the identity an access token was issued for",
    description = "Returns the identity object referenced by the token's grant.\n\n\
                   **Authentication:** Include the access token as a Bearer token in the Authorization header.",
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "Identity object"),
        (status = 401, description = "Missing, unknown or expired access token", body = ErrorResponse),
    )
)]
pub async fn userinfo(State(state): State<OAuth2State>, headers: HeaderMap) -> Response {
    let Some(access_token) = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
    else {
        return OAuthError::unauthorized("Missing or invalid Authorization header")
            .with_code("invalid_token")
            .into_response();
    };

    let grant = match state.engine.load_access(access_token).await {
        Ok(grant) => grant,
        Err(e) => return e.with_code("invalid_token").into_response(),
    };
    match state.identity(&grant.user_data).await {
        Ok(identity) => Json(identity).into_response(),
        Err(e) if e.kind == ErrorKind::Internal => e.into_response(),
        Err(e) => e.with_code("invalid_token").into_response(),
    }
}

/// OAuth2 Authorization Server Metadata (RFC 8414).
#[utoipa::path(
    get,
    path = "/.well-known/oauth-authorization-server",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Discovery",
    summary = "Authorization server metadata",
    description = "Endpoint URLs and the response types, grant types and client authentication \
                   methods this server supports.",
    responses(
        (status = 200, description = "Authorization server metadata", body = AuthorizationServerMetadata),
    )
)]
pub async fn authorization_server_metadata(
    State(state): State<OAuth2State>,
) -> Json<AuthorizationServerMetadata> {
    Json(AuthorizationServerMetadata {
        issuer: state.issuer_url.clone(),
        authorization_endpoint: state.endpoint("/oauth/authorize"),
        token_endpoint: state.endpoint("/oauth/token"),
        userinfo_endpoint: state.endpoint("/oauth/userinfo"),
        response_types_supported: vec!["code".to_string()],
        grant_types_supported: vec!["authorization_code".to_string(), "password".to_string()],
        token_endpoint_auth_methods_supported: vec![
            "client_secret_basic".to_string(),
            "none".to_string(),
        ],
        scopes_supported: vec![ANON_USER_CREATE_SCOPE.to_string()],
    })
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Resolves the client and binds the redirect URI. Until both succeed no
/// redirect target can be trusted, so errors render an error page.
async fn validate_request(
    state: &OAuth2State,
    params: &AuthorizeRequest,
) -> Result<(RequestClient, PendingAuthorization), Response> {
    let client = state
        .request_client(params.client_id.as_deref().unwrap_or_default())
        .await
        .map_err(|e| error_page(&e))?;
    let redirect_uri = bound_redirect(&client.record, params.redirect_uri.as_deref())
        .map_err(|e| error_page(&e))?;

    let pending = PendingAuthorization {
        client_id: client.record.id.clone(),
        redirect_uri,
        scope: params.scope.clone().unwrap_or_default(),
        state: params.state.clone().filter(|s| !s.is_empty()),
    };

    match params.response_type.as_deref() {
        Some("code") | Some("id") => Ok((client, pending)),
        _ => Err(error_redirect(
            &pending,
            &OAuthError::invalid_request("Only 'code' response type is supported")
                .with_code("unsupported_response_type"),
        )),
    }
}

/// Authorizes the identity named in the request without a login step.
async fn anonymous_create(
    state: &OAuth2State,
    pending: &PendingAuthorization,
    actor: Option<&str>,
) -> Response {
    let Some(actor) = actor.and_then(|a| Url::parse(a).ok()) else {
        return error_redirect(
            pending,
            &OAuthError::invalid_request("actor must be an absolute URL"),
        );
    };
    warn!(
        identity = %actor,
        client_id = %pending.client_id,
        "Authorizing without login via the anonymous-create scope"
    );

    match state.engine.finalize_authorize(pending, &actor).await {
        Ok(grant) => Json(AnonymousCreateResponse {
            code: grant.code,
            state: grant.state,
            redirect_uri: grant.redirect_uri,
        })
        .into_response(),
        Err(e) => error_redirect(pending, &e),
    }
}

async fn issue_token(
    state: &OAuth2State,
    headers: &HeaderMap,
    params: TokenRequest,
) -> Result<AccessGrant, OAuthError> {
    let grant_type = non_empty(params.grant_type.as_deref())
        .ok_or_else(|| OAuthError::invalid_request("grant_type is required"))?;
    let (client_id, client_secret) = client_credentials(headers, &params);
    let client_id = client_id.ok_or_else(|| OAuthError::invalid_request("client_id is required"))?;

    let client = state
        .request_client(&client_id)
        .await
        .map_err(|e| OAuthError::unauthorized(format!("client {client_id}: {e}")))?;
    check_client(&client.record, client_secret.as_deref().map(str::as_bytes))?;

    match grant_type {
        "authorization_code" => {
            let code = non_empty(params.code.as_deref())
                .ok_or_else(|| OAuthError::invalid_request("code is required"))?;
            let grant = state
                .engine
                .exchange_code(code, &client.record.id, non_empty(params.redirect_uri.as_deref()))
                .await?;
            let identity = state.identity(&grant.user_data).await?;
            state
                .engine
                .issue_access(&client.record.id, identity.id.as_str(), &grant.scope, Some(grant.code))
                .await
        }
        "password" => {
            let (Some(username), Some(password)) = (
                non_empty(params.username.as_deref()),
                non_empty(params.password.as_deref()),
            ) else {
                return Err(OAuthError::invalid_request("username and password are required"));
            };
            let identity = state.authenticate(username, password).await?;
            state
                .engine
                .issue_access(
                    &client.record.id,
                    identity.id.as_str(),
                    params.scope.as_deref().unwrap_or_default(),
                    None,
                )
                .await
        }
        other => Err(OAuthError::invalid_request(format!("grant_type {other} is not supported"))
            .with_code("unsupported_grant_type")),
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Client credentials from HTTP Basic auth, falling back to the form body.
fn client_credentials(headers: &HeaderMap, params: &TokenRequest) -> (Option<String>, Option<String>) {
    if let Some(auth) = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Basic "))
        && let Ok(decoded) =
            base64::Engine::decode(&base64::engine::general_purpose::STANDARD, auth.trim())
        && let Ok(creds) = String::from_utf8(decoded)
        && let Some((id, secret)) = creds.split_once(':')
    {
        // RFC 6749 section 2.3.1: both parts are form-urlencoded
        let id = urlencoding::decode(id).map(|c| c.into_owned()).unwrap_or_else(|_| id.to_string());
        let secret = urlencoding::decode(secret)
            .map(|c| c.into_owned())
            .unwrap_or_else(|_| secret.to_string());
        return (Some(id), Some(secret));
    }

    (
        non_empty(params.client_id.as_deref()).map(str::to_string),
        params.client_secret.clone(),
    )
}

fn redirect_with(redirect_uri: &str, pairs: &[(&str, Option<&str>)]) -> Response {
    let mut url = match Url::parse(redirect_uri) {
        Ok(url) => url,
        Err(_) => {
            return error_page(&OAuthError::invalid_request("redirect_uri is not a valid URL"));
        }
    };
    {
        let mut query = url.query_pairs_mut();
        for (key, value) in pairs {
            if let Some(value) = value {
                query.append_pair(key, value);
            }
        }
    }
    Redirect::to(url.as_str()).into_response()
}

fn error_redirect(pending: &PendingAuthorization, err: &OAuthError) -> Response {
    redirect_with(
        &pending.redirect_uri,
        &[
            ("error", Some(err.code)),
            ("error_description", err.description.as_deref()),
            ("state", pending.state.as_deref()),
        ],
    )
}
