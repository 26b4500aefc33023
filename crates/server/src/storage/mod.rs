//! Storage collaborators the front door depends on.
//!
//! Each capability is its own trait so call sites only ask for what they use:
//! - [`ClientStore`]: OAuth2 client records and grants
//! - [`ObjectStore`]: identity objects, activities and collections
//! - [`CredentialChecker`]: secret verification for identities
//! - [`KeyStore`]: private keys of identities provisioned here
//!
//! [`DbStore`] implements all of them on sea-orm.

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;
use url::Url;

use crate::error::KeyError;
use crate::federation::keys::PrivateKey;
use crate::objects::{Item, ItemKind};

pub mod db;

pub use db::DbStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Already exists: {0}")]
    AlreadyExists(String),
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Credential hashing failed: {0}")]
    Hashing(String),
    #[error(transparent)]
    Key(#[from] KeyError),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Credential mismatch")]
    Mismatch,
    #[error("No credential stored for {0}")]
    NoCredential(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The OAuth2 registration view of an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRecord {
    pub id: String,
    /// Empty for public clients.
    pub secret: String,
    pub redirect_uris: Vec<String>,
    pub user_data: Vec<u8>,
}

impl ClientRecord {
    pub fn is_public(&self) -> bool {
        self.secret.is_empty()
    }

    pub fn allows_redirect(&self, uri: &str) -> bool {
        self.redirect_uris.iter().any(|allowed| allowed == uri)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizeGrant {
    pub code: String,
    pub client_id: String,
    /// Identifier of the identity that authorized the grant.
    pub user_data: String,
    pub redirect_uri: String,
    pub scope: String,
    pub state: Option<String>,
    pub expires_at: OffsetDateTime,
    pub created_at: OffsetDateTime,
}

impl AuthorizeGrant {
    pub fn is_expired(&self) -> bool {
        self.expires_at < OffsetDateTime::now_utc()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub refresh_expires_at: Option<OffsetDateTime>,
    pub client_id: String,
    pub user_data: String,
    pub scope: String,
    pub authorize_code: Option<String>,
    pub expires_at: OffsetDateTime,
    pub created_at: OffsetDateTime,
}

impl AccessGrant {
    pub fn is_expired(&self) -> bool {
        self.expires_at < OffsetDateTime::now_utc()
    }

    pub fn expires_in(&self) -> i64 {
        (self.expires_at - OffsetDateTime::now_utc())
            .whole_seconds()
            .max(0)
    }
}

/// Selects stored items.
///
/// A query naming only an identifier loads that single item. Any other
/// combination yields a [`Collection`](crate::objects::Collection) of matches
/// in creation order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    pub iri: Option<Url>,
    pub collection: Option<Url>,
    pub name: Option<String>,
    pub url: Option<Url>,
    pub kinds: Vec<ItemKind>,
}

impl Query {
    pub fn by_iri(iri: &Url) -> Self {
        Self {
            iri: Some(iri.clone()),
            ..Self::default()
        }
    }

    pub fn in_collection(collection: &Url) -> Self {
        Self {
            collection: Some(collection.clone()),
            ..Self::default()
        }
    }

    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_url(mut self, url: &Url) -> Self {
        self.url = Some(url.clone());
        self
    }

    pub fn of_kind(mut self, kind: ItemKind) -> Self {
        self.kinds.push(kind);
        self
    }

    pub fn is_single(&self) -> bool {
        self.iri.is_some()
            && self.collection.is_none()
            && self.name.is_none()
            && self.url.is_none()
            && self.kinds.is_empty()
    }
}

#[async_trait]
pub trait ClientStore: Send + Sync {
    async fn get_client(&self, id: &str) -> Result<ClientRecord, StoreError>;
    /// Fails with [`StoreError::AlreadyExists`] when the id is taken.
    async fn create_client(&self, client: &ClientRecord) -> Result<(), StoreError>;
    async fn update_client(&self, client: &ClientRecord) -> Result<(), StoreError>;
    async fn list_clients(&self) -> Result<Vec<ClientRecord>, StoreError>;
    async fn save_authorize(&self, grant: &AuthorizeGrant) -> Result<(), StoreError>;
    /// Removes and returns the grant. Only one caller can consume a code.
    async fn consume_authorize(&self, code: &str) -> Result<AuthorizeGrant, StoreError>;
    async fn save_access(&self, grant: &AccessGrant) -> Result<(), StoreError>;
    async fn load_access(&self, access_token: &str) -> Result<AccessGrant, StoreError>;
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn load(&self, query: &Query) -> Result<Item, StoreError>;
    /// Creates or replaces the item keyed by its identifier.
    async fn save(&self, item: Item) -> Result<Item, StoreError>;
    /// Saves the item as a member of `collection`.
    async fn append(&self, collection: &Url, item: Item) -> Result<Item, StoreError>;
}

#[async_trait]
pub trait CredentialChecker: Send + Sync {
    /// `Ok(())` when `secret` matches the credential stored for `identity`.
    async fn check_credential(&self, identity: &Url, secret: &[u8]) -> Result<(), CredentialError>;
}

#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn save_private_key(&self, iri: &Url, key: &PrivateKey) -> Result<(), StoreError>;
    async fn load_private_key(&self, iri: &Url) -> Result<PrivateKey, StoreError>;
}
