//! sea-orm implementation of the storage collaborators.

use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, QueryOrder, SqlErr,
};
use time::OffsetDateTime;
use tracing::debug;
use url::Url;

use crate::entity::{actor_key, credential, oauth2_authorization, oauth2_client, oauth2_token, object};
use crate::federation::keys::PrivateKey;
use crate::oauth2::password::{hash_password, verify_password};
use crate::objects::{Collection, Item};
use crate::storage::{
    AccessGrant, AuthorizeGrant, ClientRecord, ClientStore, CredentialChecker, CredentialError,
    KeyStore, ObjectStore, Query, StoreError,
};

#[derive(Clone, Debug)]
pub struct DbStore {
    db: Arc<DatabaseConnection>,
}

impl DbStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        self.db.as_ref()
    }

    /// Stores (or replaces) the Argon2 hash of `secret` for `identity`.
    pub async fn set_credential(&self, identity: &Url, secret: &[u8]) -> Result<(), StoreError> {
        let secret = secret.to_vec();
        let password_hash = tokio::task::spawn_blocking(move || hash_password(&secret))
            .await
            .map_err(|e| StoreError::Hashing(e.to_string()))?
            .map_err(|e| StoreError::Hashing(e.to_string()))?;
        let active = credential::ActiveModel {
            iri: Set(identity.to_string()),
            password_hash: Set(password_hash),
            updated_at: Set(OffsetDateTime::now_utc()),
        };
        credential::Entity::insert(active)
            .on_conflict(
                OnConflict::column(credential::Column::Iri)
                    .update_columns([
                        credential::Column::PasswordHash,
                        credential::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(self.connection())
            .await?;
        Ok(())
    }

    async fn upsert_object(
        &self,
        item: Item,
        collection: Option<&Url>,
    ) -> Result<Item, StoreError> {
        let iri = item
            .iri()
            .ok_or_else(|| StoreError::Serialization("item has no identifier".into()))?
            .to_string();
        let raw = serde_json::to_string(&item).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let attributed_to = match &item {
            Item::Actor(actor) => actor.attributed_to.as_ref().map(Url::to_string),
            Item::Activity(activity) => Some(activity.actor.to_string()),
            Item::Collection(_) | Item::Link(_) => None,
        };

        let now = OffsetDateTime::now_utc();
        let active = object::ActiveModel {
            iri: Set(iri.clone()),
            kind: Set(item.kind().as_str().to_string()),
            object_type: Set(item.type_name()),
            name: Set(item.name().map(str::to_string)),
            collection: Set(collection.map(Url::to_string)),
            attributed_to: Set(attributed_to),
            raw: Set(raw),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let mut on_conflict = OnConflict::column(object::Column::Iri);
        on_conflict.update_columns([
            object::Column::Kind,
            object::Column::ObjectType,
            object::Column::Name,
            object::Column::AttributedTo,
            object::Column::Raw,
            object::Column::UpdatedAt,
        ]);
        if collection.is_some() {
            on_conflict.update_column(object::Column::Collection);
        }

        object::Entity::insert(active)
            .on_conflict(on_conflict)
            .exec_without_returning(self.connection())
            .await?;
        debug!(%iri, kind = item.kind().as_str(), "Saved object");
        Ok(item)
    }
}

fn decode_item(model: &object::Model) -> Result<Item, StoreError> {
    serde_json::from_str(&model.raw).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn already_exists(err: DbErr, what: String) -> StoreError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => StoreError::AlreadyExists(what),
        _ => StoreError::Database(err),
    }
}

impl From<oauth2_client::Model> for ClientRecord {
    fn from(model: oauth2_client::Model) -> Self {
        Self {
            redirect_uris: model.redirect_uris_list(),
            id: model.id,
            secret: model.secret.unwrap_or_default(),
            user_data: model.user_data.unwrap_or_default(),
        }
    }
}

impl From<oauth2_authorization::Model> for AuthorizeGrant {
    fn from(model: oauth2_authorization::Model) -> Self {
        Self {
            code: model.code,
            client_id: model.client_id,
            user_data: model.user_data,
            redirect_uri: model.redirect_uri,
            scope: model.scope,
            state: model.state,
            expires_at: model.expires_at,
            created_at: model.created_at,
        }
    }
}

impl From<oauth2_token::Model> for AccessGrant {
    fn from(model: oauth2_token::Model) -> Self {
        Self {
            access_token: model.access_token,
            refresh_token: model.refresh_token,
            refresh_expires_at: model.refresh_expires_at,
            client_id: model.client_id,
            user_data: model.user_data,
            scope: model.scope,
            authorize_code: model.authorize_code,
            expires_at: model.expires_at,
            created_at: model.created_at,
        }
    }
}

fn non_empty<T: AsRef<[u8]> + Clone>(value: &T) -> Option<T> {
    (!value.as_ref().is_empty()).then(|| value.clone())
}

#[async_trait]
impl ClientStore for DbStore {
    async fn get_client(&self, id: &str) -> Result<ClientRecord, StoreError> {
        oauth2_client::Entity::find_by_id(id.to_string())
            .one(self.connection())
            .await?
            .map(ClientRecord::from)
            .ok_or_else(|| StoreError::NotFound(format!("client {id}")))
    }

    async fn create_client(&self, client: &ClientRecord) -> Result<(), StoreError> {
        let now = OffsetDateTime::now_utc();
        let active = oauth2_client::ActiveModel {
            id: Set(client.id.clone()),
            secret: Set(non_empty(&client.secret)),
            redirect_uris: Set(client.redirect_uris.join("\n")),
            user_data: Set(non_empty(&client.user_data)),
            created_at: Set(now),
            updated_at: Set(now),
        };
        oauth2_client::Entity::insert(active)
            .exec_without_returning(self.connection())
            .await
            .map_err(|e| already_exists(e, format!("client {}", client.id)))?;
        Ok(())
    }

    async fn update_client(&self, client: &ClientRecord) -> Result<(), StoreError> {
        let existing = oauth2_client::Entity::find_by_id(client.id.clone())
            .one(self.connection())
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("client {}", client.id)))?;

        let mut active: oauth2_client::ActiveModel = existing.into();
        active.secret = Set(non_empty(&client.secret));
        active.redirect_uris = Set(client.redirect_uris.join("\n"));
        active.user_data = Set(non_empty(&client.user_data));
        active.updated_at = Set(OffsetDateTime::now_utc());
        active.update(self.connection()).await?;
        Ok(())
    }

    async fn list_clients(&self) -> Result<Vec<ClientRecord>, StoreError> {
        Ok(oauth2_client::Entity::find()
            .order_by_asc(oauth2_client::Column::CreatedAt)
            .all(self.connection())
            .await?
            .into_iter()
            .map(ClientRecord::from)
            .collect())
    }

    async fn save_authorize(&self, grant: &AuthorizeGrant) -> Result<(), StoreError> {
        let active = oauth2_authorization::ActiveModel {
            code: Set(grant.code.clone()),
            client_id: Set(grant.client_id.clone()),
            user_data: Set(grant.user_data.clone()),
            redirect_uri: Set(grant.redirect_uri.clone()),
            scope: Set(grant.scope.clone()),
            state: Set(grant.state.clone()),
            expires_at: Set(grant.expires_at),
            created_at: Set(grant.created_at),
        };
        oauth2_authorization::Entity::insert(active)
            .exec_without_returning(self.connection())
            .await
            .map_err(|e| already_exists(e, "authorization code".into()))?;
        Ok(())
    }

    async fn consume_authorize(&self, code: &str) -> Result<AuthorizeGrant, StoreError> {
        let grant = oauth2_authorization::Entity::find_by_id(code.to_string())
            .one(self.connection())
            .await?
            .ok_or_else(|| StoreError::NotFound("authorization code".into()))?;

        let deleted = oauth2_authorization::Entity::delete_by_id(code.to_string())
            .exec(self.connection())
            .await?;
        if deleted.rows_affected == 0 {
            return Err(StoreError::NotFound("authorization code".into()));
        }
        Ok(grant.into())
    }

    async fn save_access(&self, grant: &AccessGrant) -> Result<(), StoreError> {
        let active = oauth2_token::ActiveModel {
            access_token: Set(grant.access_token.clone()),
            refresh_token: Set(grant.refresh_token.clone()),
            refresh_expires_at: Set(grant.refresh_expires_at),
            client_id: Set(grant.client_id.clone()),
            user_data: Set(grant.user_data.clone()),
            scope: Set(grant.scope.clone()),
            authorize_code: Set(grant.authorize_code.clone()),
            expires_at: Set(grant.expires_at),
            created_at: Set(grant.created_at),
        };
        oauth2_token::Entity::insert(active)
            .exec_without_returning(self.connection())
            .await
            .map_err(|e| already_exists(e, "access token".into()))?;
        Ok(())
    }

    async fn load_access(&self, access_token: &str) -> Result<AccessGrant, StoreError> {
        oauth2_token::Entity::find_by_id(access_token.to_string())
            .one(self.connection())
            .await?
            .map(AccessGrant::from)
            .ok_or_else(|| StoreError::NotFound("access token".into()))
    }
}

#[async_trait]
impl ObjectStore for DbStore {
    async fn load(&self, query: &Query) -> Result<Item, StoreError> {
        if query.is_single()
            && let Some(iri) = &query.iri
        {
            let model = object::Entity::find_by_id(iri.to_string())
                .one(self.connection())
                .await?
                .ok_or_else(|| StoreError::NotFound(iri.to_string()))?;
            return decode_item(&model);
        }

        let mut select = object::Entity::find();
        if let Some(iri) = &query.iri {
            select = select.filter(object::Column::Iri.eq(iri.to_string()));
        }
        if let Some(collection) = &query.collection {
            select = select.filter(object::Column::Collection.eq(collection.to_string()));
        }
        if let Some(name) = &query.name {
            select = select.filter(object::Column::Name.eq(name.clone()));
        }
        if !query.kinds.is_empty() {
            select = select.filter(
                object::Column::Kind.is_in(query.kinds.iter().map(|kind| kind.as_str())),
            );
        }

        let models = select
            .order_by_asc(object::Column::CreatedAt)
            .order_by_asc(object::Column::Iri)
            .all(self.connection())
            .await?;

        let mut items = Vec::with_capacity(models.len());
        for model in &models {
            let item = decode_item(model)?;
            if let Some(url) = &query.url
                && !item.urls().contains(url)
            {
                continue;
            }
            items.push(item);
        }

        Ok(Item::Collection(Collection { id: None, items }))
    }

    async fn save(&self, item: Item) -> Result<Item, StoreError> {
        self.upsert_object(item, None).await
    }

    async fn append(&self, collection: &Url, item: Item) -> Result<Item, StoreError> {
        self.upsert_object(item, Some(collection)).await
    }
}

#[async_trait]
impl CredentialChecker for DbStore {
    async fn check_credential(&self, identity: &Url, secret: &[u8]) -> Result<(), CredentialError> {
        let stored = credential::Entity::find_by_id(identity.to_string())
            .one(self.connection())
            .await
            .map_err(StoreError::from)?
            .ok_or_else(|| CredentialError::NoCredential(identity.to_string()))?;

        let secret = secret.to_vec();
        let matches =
            tokio::task::spawn_blocking(move || verify_password(&secret, &stored.password_hash))
                .await
                .map_err(|e| StoreError::Hashing(e.to_string()))?;
        if matches {
            Ok(())
        } else {
            Err(CredentialError::Mismatch)
        }
    }
}

#[async_trait]
impl KeyStore for DbStore {
    async fn save_private_key(&self, iri: &Url, key: &PrivateKey) -> Result<(), StoreError> {
        let active = actor_key::ActiveModel {
            iri: Set(iri.to_string()),
            private_key_pem: Set(key.to_pem()?),
            created_at: Set(OffsetDateTime::now_utc()),
        };
        actor_key::Entity::insert(active)
            .exec_without_returning(self.connection())
            .await
            .map_err(|e| already_exists(e, format!("key for {iri}")))?;
        Ok(())
    }

    async fn load_private_key(&self, iri: &Url) -> Result<PrivateKey, StoreError> {
        let model = actor_key::Entity::find_by_id(iri.to_string())
            .one(self.connection())
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("key for {iri}")))?;
        Ok(PrivateKey::from_pem(&model.private_key_pem)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::Database;
    use time::Duration;

    async fn store() -> DbStore {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        DbStore::new(Arc::new(db))
    }

    fn client(secret: &str) -> ClientRecord {
        ClientRecord {
            id: "app".into(),
            secret: secret.into(),
            redirect_uris: vec!["https://app.example/cb".into(), "https://app.example/alt".into()],
            user_data: b"{}".to_vec(),
        }
    }

    #[tokio::test]
    async fn second_create_reports_existing_client() {
        let store = store().await;
        store.create_client(&client("first")).await.unwrap();

        let err = store.create_client(&client("second")).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
        assert_eq!(store.get_client("app").await.unwrap().secret, "first");
    }

    #[tokio::test]
    async fn update_rotates_secret() {
        let store = store().await;
        store.create_client(&client("")).await.unwrap();
        store.update_client(&client("rotated")).await.unwrap();

        let stored = store.get_client("app").await.unwrap();
        assert_eq!(stored.secret, "rotated");
        assert_eq!(stored.redirect_uris.len(), 2);

        let mut missing = client("x");
        missing.id = "nobody".into();
        assert!(store.update_client(&missing).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn authorization_code_is_consumed_once() {
        let store = store().await;
        let now = OffsetDateTime::now_utc();
        let grant = AuthorizeGrant {
            code: "code-1".into(),
            client_id: "app".into(),
            user_data: "https://fed.example/actors/admin".into(),
            redirect_uri: "https://app.example/cb".into(),
            scope: String::new(),
            state: Some("xyz".into()),
            expires_at: now + Duration::minutes(5),
            created_at: now,
        };
        store.save_authorize(&grant).await.unwrap();

        assert_eq!(store.consume_authorize("code-1").await.unwrap().state, grant.state);
        assert!(store.consume_authorize("code-1").await.unwrap_err().is_not_found());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn concurrent_credential_checks_all_complete() {
        let store = Arc::new(store().await);
        let iri = Url::parse("https://fed.example/actors/carol").unwrap();
        store.set_credential(&iri, b"pw").await.unwrap();

        let checks: Vec<_> = ["pw", "nope", "pw"]
            .into_iter()
            .map(|secret| {
                let store = store.clone();
                let iri = iri.clone();
                tokio::spawn(async move { store.check_credential(&iri, secret.as_bytes()).await })
            })
            .collect();

        let mut results = Vec::new();
        for check in checks {
            results.push(check.await.unwrap().is_ok());
        }
        assert_eq!(results, vec![true, false, true]);
    }

    #[tokio::test]
    async fn credentials_are_checked_against_their_hash() {
        let store = store().await;
        let iri = Url::parse("https://fed.example/actors/bob").unwrap();

        assert!(matches!(
            store.check_credential(&iri, b"pw").await,
            Err(CredentialError::NoCredential(_))
        ));
        store.set_credential(&iri, b"pw").await.unwrap();
        store.check_credential(&iri, b"pw").await.unwrap();
        assert!(matches!(
            store.check_credential(&iri, b"nope").await,
            Err(CredentialError::Mismatch)
        ));
    }
}
