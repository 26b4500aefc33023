//! OAuth2 state management.
//!
//! Holds the collaborators the authorization server needs, injected at
//! construction so tests can assemble them from any store.

use std::sync::Arc;

use tracing::{debug, error, warn};
use url::Url;

use crate::config::AppConfig;
use crate::error::OAuthError;
use crate::federation::transport::Transport;
use crate::oauth2::engine::OAuth2Engine;
use crate::oauth2::resolver::{ClientResolver, ResolverSettings};
use crate::objects::{Actor, Item, ItemKind, client_id_for, is_client_identifier_url};
use crate::storage::{
    ClientRecord, ClientStore, CredentialChecker, CredentialError, KeyStore, ObjectStore, Query,
    StoreError,
};

/// A client an authorization request was resolved to.
#[derive(Debug, Clone)]
pub struct RequestClient {
    pub record: ClientRecord,
    /// The client's identity, when it was resolved from a client identifier URL.
    pub identity: Option<Actor>,
}

impl RequestClient {
    pub fn display_name(&self) -> String {
        self.identity
            .as_ref()
            .map(|actor| actor.name.clone())
            .unwrap_or_else(|| self.record.id.clone())
    }
}

#[derive(Clone)]
pub struct OAuth2State {
    pub clients: Arc<dyn ClientStore>,
    pub objects: Arc<dyn ObjectStore>,
    pub credentials: Arc<dyn CredentialChecker>,
    pub engine: Arc<OAuth2Engine>,
    pub resolver: Arc<ClientResolver>,
    /// The identity tokens are issued for.
    pub principal: Arc<Actor>,
    /// Base URL for the OAuth2 server, without trailing slash.
    pub issuer_url: String,
}

impl OAuth2State {
    pub fn new<S>(
        store: Arc<S>,
        transport: Arc<dyn Transport>,
        principal: Actor,
        config: &AppConfig,
    ) -> Self
    where
        S: ClientStore + ObjectStore + CredentialChecker + KeyStore + 'static,
    {
        let resolver = ClientResolver::new(
            store.clone(),
            store.clone(),
            store.clone(),
            transport,
            ResolverSettings {
                fetch_timeout: config.federation.fetch_timeout(),
                user_agent: config.federation.user_agent.clone(),
                key_kind: config.principal.key_kind,
            },
        );
        Self {
            engine: Arc::new(OAuth2Engine::new(store.clone(), config.oauth2.clone())),
            clients: store.clone(),
            objects: store.clone(),
            credentials: store,
            resolver: Arc::new(resolver),
            principal: Arc::new(principal),
            issuer_url: config.base_url.as_str().trim_end_matches('/').to_string(),
        }
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.issuer_url, path)
    }

    /// Finds the client an authorization request names.
    ///
    /// URL identifiers go through dynamic resolution; anything else is a
    /// locally registered client id.
    pub async fn request_client(&self, client_id: &str) -> Result<RequestClient, OAuthError> {
        let client_id = client_id.trim();
        if client_id.is_empty() {
            return Err(OAuthError::invalid_request("client_id is required"));
        }

        let (local_id, identity) = if is_client_identifier_url(client_id) {
            match self.resolver.resolve(client_id, &self.principal).await {
                Ok(Some(actor)) => (client_id_for(&actor.id), Some(actor)),
                Ok(None) => return Err(OAuthError::invalid_request("client_id is required")),
                Err(e) => {
                    warn!(
                        client_id,
                        error = %e,
                        kind = ?e.kind(),
                        retryable = e.is_retryable(),
                        "Client resolution failed"
                    );
                    return Err(OAuthError::invalid_request(format!(
                        "client could not be resolved: {e}"
                    )));
                }
            }
        } else {
            (client_id.to_string(), None)
        };

        match self.clients.get_client(&local_id).await {
            Ok(record) => Ok(RequestClient { record, identity }),
            Err(StoreError::NotFound(_)) => Err(OAuthError::invalid_request("unknown client")),
            Err(e) => {
                error!(client_id = %local_id, error = %e, "Client lookup failed");
                Err(OAuthError::internal())
            }
        }
    }

    /// Identities a login handle may refer to, oldest first.
    async fn candidates(&self, handle: &str) -> Result<Vec<Actor>, StoreError> {
        let query = match Url::parse(handle) {
            Ok(iri) => Query::by_iri(&iri),
            Err(_) => Query::by_name(handle).of_kind(ItemKind::Actor),
        };
        match self.objects.load(&query).await {
            Ok(item) => Ok(item.into_actors()),
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Verifies a handle and secret. When several identities share the
    /// handle the first one whose credential matches wins.
    pub async fn authenticate(&self, handle: &str, secret: &str) -> Result<Actor, OAuthError> {
        let handle = handle.trim();
        if handle.is_empty() || secret.is_empty() {
            return Err(OAuthError::unauthorized("handle and password are required"));
        }

        let candidates = self.candidates(handle).await.map_err(|e| {
            error!(error = %e, "Identity lookup failed");
            OAuthError::unauthorized("invalid credentials")
        })?;
        if candidates.len() > 1 {
            warn!(handle, count = candidates.len(), "Login handle matches several identities");
        }

        for actor in candidates {
            match self
                .credentials
                .check_credential(&actor.id, secret.as_bytes())
                .await
            {
                Ok(()) => return Ok(actor),
                Err(CredentialError::Store(e)) => {
                    error!(identity = %actor.id, error = %e, "Credential lookup failed");
                }
                Err(e) => debug!(identity = %actor.id, reason = %e, "Credential rejected"),
            }
        }
        Err(OAuthError::unauthorized("invalid credentials"))
    }

    /// Loads the identity stored as a grant's `user_data`.
    pub async fn identity(&self, user_data: &str) -> Result<Actor, OAuthError> {
        let iri = Url::parse(user_data)
            .map_err(|_| OAuthError::unauthorized("grant does not name an identity"))?;
        match self.objects.load(&Query::by_iri(&iri)).await {
            Ok(Item::Actor(actor)) => Ok(actor),
            Ok(_) => Err(OAuthError::unauthorized("grant does not name an identity")),
            Err(e) if e.is_not_found() => {
                Err(OAuthError::unauthorized("identity no longer exists"))
            }
            Err(e) => {
                error!(identity = %iri, error = %e, "Identity lookup failed");
                Err(OAuthError::internal())
            }
        }
    }
}
