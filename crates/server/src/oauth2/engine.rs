//! Code and token minting.
//!
//! The endpoints decide whether a request is authorized; this engine decides
//! how codes and tokens look, how long they live and how they are stored.

use std::sync::Arc;

use time::{Duration, OffsetDateTime};
use tracing::{debug, error};
use url::Url;

use crate::config::OAuth2Config;
use crate::error::OAuthError;
use crate::oauth2::password::generate_token;
use crate::storage::{AccessGrant, AuthorizeGrant, ClientStore, StoreError};

/// An authorization request whose client and redirect URI were validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAuthorization {
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: String,
    pub state: Option<String>,
}

pub struct OAuth2Engine {
    clients: Arc<dyn ClientStore>,
    settings: OAuth2Config,
}

fn new_token() -> Result<String, OAuthError> {
    generate_token().map_err(|e| {
        error!(error = %e, "Random token generation failed");
        OAuthError::internal()
    })
}

fn store_failure(e: StoreError) -> OAuthError {
    error!(error = %e, "Grant storage failed");
    OAuthError::internal()
}

impl OAuth2Engine {
    pub fn new(clients: Arc<dyn ClientStore>, settings: OAuth2Config) -> Self {
        Self { clients, settings }
    }

    pub fn settings(&self) -> &OAuth2Config {
        &self.settings
    }

    /// Mints and stores an authorization code for `user`.
    pub async fn finalize_authorize(
        &self,
        pending: &PendingAuthorization,
        user: &Url,
    ) -> Result<AuthorizeGrant, OAuthError> {
        let now = OffsetDateTime::now_utc();
        let grant = AuthorizeGrant {
            code: new_token()?,
            client_id: pending.client_id.clone(),
            user_data: user.to_string(),
            redirect_uri: pending.redirect_uri.clone(),
            scope: pending.scope.clone(),
            state: pending.state.clone(),
            expires_at: now + Duration::seconds(self.settings.authorization_lifetime),
            created_at: now,
        };
        self.clients
            .save_authorize(&grant)
            .await
            .map_err(store_failure)?;
        debug!(client_id = %grant.client_id, "Authorization code issued");
        Ok(grant)
    }

    /// Consumes `code`. A code can be exchanged once; every later attempt
    /// fails as unauthorized.
    pub async fn exchange_code(
        &self,
        code: &str,
        client_id: &str,
        redirect_uri: Option<&str>,
    ) -> Result<AuthorizeGrant, OAuthError> {
        let grant = self.clients.consume_authorize(code).await.map_err(|e| match e {
            StoreError::NotFound(_) => OAuthError::unauthorized("unknown or already used code"),
            other => store_failure(other),
        })?;

        if grant.client_id != client_id {
            return Err(OAuthError::unauthorized("code was issued to another client"));
        }
        if let Some(uri) = redirect_uri
            && uri != grant.redirect_uri
        {
            return Err(OAuthError::unauthorized("redirect_uri mismatch"));
        }
        if grant.is_expired() {
            return Err(OAuthError::unauthorized("code expired"));
        }
        Ok(grant)
    }

    /// Mints and stores an access token, plus a refresh token when enabled.
    pub async fn issue_access(
        &self,
        client_id: &str,
        user_data: &str,
        scope: &str,
        authorize_code: Option<String>,
    ) -> Result<AccessGrant, OAuthError> {
        let now = OffsetDateTime::now_utc();
        let (refresh_token, refresh_expires_at) = if self.settings.issue_refresh_tokens {
            (
                Some(new_token()?),
                Some(now + Duration::seconds(self.settings.refresh_token_lifetime)),
            )
        } else {
            (None, None)
        };
        let grant = AccessGrant {
            access_token: new_token()?,
            refresh_token,
            refresh_expires_at,
            client_id: client_id.to_string(),
            user_data: user_data.to_string(),
            scope: scope.to_string(),
            authorize_code,
            expires_at: now + Duration::seconds(self.settings.access_token_lifetime),
            created_at: now,
        };
        self.clients.save_access(&grant).await.map_err(store_failure)?;
        debug!(client_id = %grant.client_id, "Access token issued");
        Ok(grant)
    }

    /// Looks up a live access token.
    pub async fn load_access(&self, access_token: &str) -> Result<AccessGrant, OAuthError> {
        let grant = self
            .clients
            .load_access(access_token)
            .await
            .map_err(|e| match e {
                StoreError::NotFound(_) => OAuthError::unauthorized("unknown token"),
                other => store_failure(other),
            })?;
        if grant.is_expired() {
            return Err(OAuthError::unauthorized("token expired"));
        }
        Ok(grant)
    }
}
