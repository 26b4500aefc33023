//! Login step of the authorization-code flow.
//!
//! `GET /oauth/authorize` renders the login form; the form posts back to the
//! same endpoint with `handle` and `pw`.

use askama::Template;
use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};

use crate::error::OAuthError;
use crate::oauth2::engine::PendingAuthorization;

#[derive(Template)]
#[template(path = "login.html")]
struct LoginTemplate<'a> {
    response_type: &'a str,
    client_id: &'a str,
    client_name: &'a str,
    principal: &'a str,
    redirect_uri: &'a str,
    scope: &'a str,
    scopes: Vec<&'a str>,
    state: &'a str,
}

#[derive(Template)]
#[template(path = "error.html")]
struct ErrorTemplate<'a> {
    error: &'a str,
    description: Option<&'a str>,
}

/// What the login form shows besides the pending request.
pub struct LoginPage<'a> {
    pub client_name: &'a str,
    pub principal: &'a str,
}

fn render(template: impl Template) -> Result<String, Response> {
    template.render().map_err(|e| {
        tracing::error!("Failed to render template: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
    })
}

/// Renders the login form for a validated authorization request.
pub fn login_page(pending: &PendingAuthorization, page: LoginPage<'_>) -> Response {
    let template = LoginTemplate {
        response_type: "code",
        client_id: &pending.client_id,
        client_name: page.client_name,
        principal: page.principal,
        redirect_uri: &pending.redirect_uri,
        scope: &pending.scope,
        scopes: pending.scope.split_whitespace().collect(),
        state: pending.state.as_deref().unwrap_or_default(),
    };
    match render(template) {
        Ok(html) => Html(html).into_response(),
        Err(response) => response,
    }
}

/// Renders an authorization error when no redirect URI can be trusted.
pub fn error_page(err: &OAuthError) -> Response {
    let template = ErrorTemplate {
        error: err.code,
        description: err.description.as_deref(),
    };
    match render(template) {
        Ok(html) => (err.status(), Html(html)).into_response(),
        Err(response) => response,
    }
}
