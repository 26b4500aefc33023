//! Dynamic client resolution.
//!
//! Turns a client identifier URL into a local client identity and OAuth2
//! client record without any prior registration step:
//!
//! 1. look for an identity stored under the identifier, then for a `Create`
//!    activity in the principal's outbox that targets it
//! 2. otherwise fetch the client metadata document from the identifier
//!    through the principal's signing transport and validate it
//! 3. synthesize an `Application` identity under
//!    `<principal>/clients/<software_id>`, record its creation and make sure
//!    a client record exists
//!
//! Concurrent first resolutions of the same identifier are serialized with a
//! per-identifier lock, and a client record that already exists is kept as is.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::error::{ErrorKind, FetchError, KeyError};
use crate::federation::keys::{KeyKind, PrivateKey};
use crate::federation::transport::{Transport, fetch_json};
use crate::oauth2::metadata::{ClientMetadata, MetadataError};
use crate::objects::{
    Activity, ActivityType, Actor, ActorType, Item, ItemKind, MAIN_KEY_FRAGMENT, child_iri,
    client_id_for, client_iri,
};
use crate::security::SecureJsonParser;
use crate::storage::{ClientRecord, ClientStore, KeyStore, ObjectStore, Query, StoreError};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Client identifier is not a URL: {0}")]
    InvalidIdentifier(String),
    #[error("Fetching client metadata failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("Invalid client metadata: {0}")]
    Invalid(#[from] MetadataError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error("{iri} already belongs to another client than {identifier}")]
    Conflict { iri: Url, identifier: Url },
}

impl ResolveError {
    /// Timeouts and network failures may succeed on a later attempt;
    /// validation failures will not.
    pub fn is_retryable(&self) -> bool {
        match self {
            ResolveError::Fetch(e) => e.is_retryable(),
            _ => false,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ResolveError::InvalidIdentifier(_) | ResolveError::Invalid(_) => {
                ErrorKind::InvalidRequest
            }
            ResolveError::Fetch(e) if e.is_retryable() => ErrorKind::Upstream,
            ResolveError::Fetch(_) => ErrorKind::InvalidRequest,
            ResolveError::Conflict { .. } => ErrorKind::Conflict,
            ResolveError::Store(_) | ResolveError::Key(_) => ErrorKind::Internal,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolverSettings {
    pub fetch_timeout: Duration,
    pub user_agent: String,
    /// Key type generated for newly resolved clients.
    pub key_kind: KeyKind,
}

pub struct ClientResolver {
    objects: Arc<dyn ObjectStore>,
    clients: Arc<dyn ClientStore>,
    keys: Arc<dyn KeyStore>,
    transport: Arc<dyn Transport>,
    settings: ResolverSettings,
    parser: SecureJsonParser,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ClientResolver {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        clients: Arc<dyn ClientStore>,
        keys: Arc<dyn KeyStore>,
        transport: Arc<dyn Transport>,
        settings: ResolverSettings,
    ) -> Self {
        Self {
            objects,
            clients,
            keys,
            transport,
            settings,
            parser: SecureJsonParser::default(),
            locks: DashMap::new(),
        }
    }

    /// Resolves `client_id` to the identity representing that client.
    ///
    /// An empty identifier yields `Ok(None)`: the request is anonymous.
    #[tracing::instrument(name = "resolve_client", skip(self, principal), fields(principal = %principal.id))]
    pub async fn resolve(
        &self,
        client_id: &str,
        principal: &Actor,
    ) -> Result<Option<Actor>, ResolveError> {
        let client_id = client_id.trim();
        if client_id.is_empty() {
            return Ok(None);
        }
        let identifier = Url::parse(client_id)
            .map_err(|_| ResolveError::InvalidIdentifier(client_id.to_string()))?;

        if let Some(actor) = self.lookup(&identifier, principal).await? {
            debug!(client = %actor.id, "Client identity already known");
            return Ok(Some(actor));
        }

        let key = identifier.as_str().to_ascii_lowercase();
        let lock = self.locks.entry(key.clone()).or_default().clone();
        let resolved = {
            let _guard = lock.lock().await;
            // A concurrent resolution may have finished while we waited.
            match self.lookup(&identifier, principal).await? {
                Some(actor) => Ok(actor),
                None => self.register(client_id, &identifier, principal).await,
            }
        };
        drop(lock);
        self.locks.remove_if(&key, |_, lock| Arc::strong_count(lock) == 1);

        resolved.map(Some)
    }

    async fn lookup(&self, identifier: &Url, principal: &Actor) -> Result<Option<Actor>, ResolveError> {
        match self.objects.load(&Query::by_iri(identifier)).await {
            Ok(Item::Actor(actor)) => return Ok(Some(actor)),
            Ok(_) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        let history = Query::in_collection(&principal.outbox())
            .with_url(identifier)
            .of_kind(ItemKind::Activity);
        let Item::Collection(collection) = self.objects.load(&history).await? else {
            return Ok(None);
        };
        for item in collection.items {
            let Item::Activity(activity) = item else {
                continue;
            };
            if activity.activity_type != ActivityType::Create {
                continue;
            }
            match self.objects.load(&Query::by_iri(&activity.object)).await {
                Ok(Item::Actor(actor)) => return Ok(Some(actor)),
                Ok(_) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }

    async fn register(
        &self,
        requested: &str,
        identifier: &Url,
        principal: &Actor,
    ) -> Result<Actor, ResolveError> {
        let metadata = self.fetch_metadata(identifier).await?;
        let software_id = metadata.validate(requested)?;

        let mut actor = synthesize_actor(&metadata, identifier, principal, &software_id);
        self.check_unclaimed(&actor.id, identifier).await?;
        let key = self.client_key(&actor.id).await?;
        actor.rotate_key(MAIN_KEY_FRAGMENT, key.public_key_pem()?);

        self.objects.save(actor.clone().into()).await?;
        let created = Activity {
            id: child_iri(&principal.outbox(), &format!("create-{software_id}")),
            activity_type: ActivityType::Create,
            actor: principal.id.clone(),
            object: actor.id.clone(),
            url: vec![identifier.clone()],
        };
        self.objects.append(&principal.outbox(), created.into()).await?;

        self.ensure_client(&actor, &metadata).await?;
        info!(client = %actor.id, name = %actor.name, "Resolved new client");
        Ok(actor)
    }

    /// An identity derived from a `software_id` stays bound to the identifier
    /// that first claimed it.
    async fn check_unclaimed(&self, iri: &Url, identifier: &Url) -> Result<(), ResolveError> {
        let existing = match self.objects.load(&Query::by_iri(iri)).await {
            Ok(Item::Actor(actor)) => actor,
            Ok(_) => {
                return Err(ResolveError::Conflict {
                    iri: iri.clone(),
                    identifier: identifier.clone(),
                });
            }
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if existing
            .url
            .iter()
            .any(|url| url.as_str().eq_ignore_ascii_case(identifier.as_str()))
        {
            return Ok(());
        }
        warn!(
            client = %iri,
            identifier = %identifier,
            kind = ?ErrorKind::Conflict,
            "software_id already claimed by another client identifier"
        );
        Err(ResolveError::Conflict {
            iri: iri.clone(),
            identifier: identifier.clone(),
        })
    }

    async fn fetch_metadata(&self, identifier: &Url) -> Result<ClientMetadata, ResolveError> {
        let body = fetch_json(
            self.transport.as_ref(),
            identifier,
            &self.settings.user_agent,
            self.settings.fetch_timeout,
        )
        .await?;
        self.parser
            .parse_document(&body)
            .map_err(|e| MetadataError::Malformed(e.to_string()).into())
    }

    /// Loads the client's key, generating and storing one when absent.
    async fn client_key(&self, iri: &Url) -> Result<PrivateKey, ResolveError> {
        match self.keys.load_private_key(iri).await {
            Ok(key) => return Ok(key),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        let kind = self.settings.key_kind;
        let key = tokio::task::spawn_blocking(move || PrivateKey::generate(kind))
            .await
            .map_err(|e| KeyError::Generation(e.to_string()))??;
        match self.keys.save_private_key(iri, &key).await {
            Ok(()) => Ok(key),
            Err(StoreError::AlreadyExists(_)) => Ok(self.keys.load_private_key(iri).await?),
            Err(e) => Err(e.into()),
        }
    }

    async fn ensure_client(
        &self,
        actor: &Actor,
        metadata: &ClientMetadata,
    ) -> Result<(), ResolveError> {
        let record = ClientRecord {
            id: client_id_for(&actor.id),
            secret: String::new(),
            redirect_uris: metadata.redirect_uris.clone(),
            user_data: serde_json::to_vec(metadata)
                .map_err(|e| StoreError::Serialization(e.to_string()))?,
        };
        match self.clients.create_client(&record).await {
            Ok(()) => Ok(()),
            Err(StoreError::AlreadyExists(_)) => {
                warn!(
                    client_id = %record.id,
                    kind = ?ErrorKind::Conflict,
                    "Client record already exists, keeping stored registration"
                );
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn synthesize_actor(
    metadata: &ClientMetadata,
    identifier: &Url,
    principal: &Actor,
    software_id: &Uuid,
) -> Actor {
    let mut actor = Actor::new(
        client_iri(&principal.id, software_id),
        ActorType::Application,
        metadata.display_name(),
    );
    actor.preferred_username = metadata.client_name.clone();
    actor.attributed_to = Some(principal.id.clone());
    if let Some(uri) = &metadata.client_uri {
        actor.push_url(uri.clone());
    }
    if let Ok(declared) = Url::parse(&metadata.client_id) {
        actor.push_url(declared);
    }
    actor.push_url(identifier.clone());
    for redirect in metadata.redirect_uris.iter().filter_map(|uri| Url::parse(uri).ok()) {
        actor.push_url(redirect);
    }
    actor
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;

    #[test]
    fn timeouts_are_retryable_validation_is_not() {
        let timeout = ResolveError::Fetch(FetchError::Timeout(Duration::from_secs(1)));
        assert!(timeout.is_retryable());
        assert_eq!(timeout.kind(), ErrorKind::Upstream);

        let server_error = ResolveError::Fetch(FetchError::Http {
            status: StatusCode::BAD_GATEWAY,
            context: "x".into(),
        });
        assert!(server_error.is_retryable());

        let not_found = ResolveError::Fetch(FetchError::Http {
            status: StatusCode::NOT_FOUND,
            context: "x".into(),
        });
        assert!(!not_found.is_retryable());

        let conflict = ResolveError::Conflict {
            iri: Url::parse("https://fed.example/actors/admin/clients/x").unwrap(),
            identifier: Url::parse("https://other.example/client.json").unwrap(),
        };
        assert!(!conflict.is_retryable());
        assert_eq!(conflict.kind(), ErrorKind::Conflict);

        let invalid = ResolveError::Invalid(MetadataError::MissingSoftwareId);
        assert!(!invalid.is_retryable());
        assert_eq!(invalid.kind(), ErrorKind::InvalidRequest);
    }

    #[test]
    fn synthesized_actor_carries_alternate_urls() {
        let principal = Actor::new(
            Url::parse("https://fed.example/actors/admin").unwrap(),
            ActorType::Person,
            "admin",
        );
        let identifier = Url::parse("https://app.example/client.json").unwrap();
        let software_id = Uuid::new_v4();
        let metadata = ClientMetadata {
            client_id: "https://APP.example/client.json".into(),
            client_name: Some("App".into()),
            client_uri: Some(Url::parse("https://app.example/").unwrap()),
            redirect_uris: vec!["https://app.example/cb".into(), "https://app.example".into()],
            logo_uri: None,
            software_id: Some(software_id),
            token_endpoint_auth_method: None,
            client_id_issued_at: None,
        };

        let actor = synthesize_actor(&metadata, &identifier, &principal, &software_id);
        assert_eq!(actor.id, client_iri(&principal.id, &software_id));
        assert_eq!(actor.actor_type, ActorType::Application);
        assert_eq!(actor.attributed_to.as_ref(), Some(&principal.id));
        assert_eq!(
            actor.url,
            vec![
                Url::parse("https://app.example/").unwrap(),
                identifier.clone(),
                Url::parse("https://app.example/cb").unwrap(),
            ]
        );
    }
}
