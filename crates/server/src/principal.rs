//! Startup provisioning of the local principal.

use tracing::info;

use crate::config::PrincipalConfig;
use crate::error::KeyError;
use crate::federation::keys::{KeyProvider, PrivateKey};
use crate::objects::{Actor, ActorType, Item, MAIN_KEY_FRAGMENT};
use crate::storage::db::DbStore;
use crate::storage::{KeyStore, ObjectStore, Query, StoreError};

/// The principal's identity and signing key.
#[derive(Debug, Clone)]
pub struct Principal {
    pub actor: Actor,
    pub keys: KeyProvider,
}

/// Makes sure the configured principal exists: key pair, identity object
/// carrying the public key and, when configured, a credential.
///
/// Safe to run on every start; an existing key is reused.
pub async fn provision(store: &DbStore, config: &PrincipalConfig) -> Result<Principal, StoreError> {
    let key = match store.load_private_key(&config.iri).await {
        Ok(key) => key,
        Err(e) if e.is_not_found() => {
            let kind = config.key_kind;
            let key = tokio::task::spawn_blocking(move || PrivateKey::generate(kind))
                .await
                .map_err(|e| KeyError::Generation(e.to_string()))??;
            store.save_private_key(&config.iri, &key).await?;
            info!(identity = %config.iri, key_kind = %kind, "Generated principal key");
            key
        }
        Err(e) => return Err(e),
    };

    let mut actor = match store.load(&Query::by_iri(&config.iri)).await {
        Ok(Item::Actor(actor)) => actor,
        Ok(_) => {
            return Err(StoreError::AlreadyExists(format!(
                "{} is stored as a non-actor object",
                config.iri
            )));
        }
        Err(e) if e.is_not_found() => Actor::new(config.iri.clone(), ActorType::Person, ""),
        Err(e) => return Err(e),
    };
    actor.name = config.name.clone();
    actor.preferred_username = Some(config.name.clone());
    actor.rotate_key(MAIN_KEY_FRAGMENT, key.public_key_pem()?);
    store.save(actor.clone().into()).await?;

    if let Some(password) = &config.password {
        store.set_credential(&actor.id, password.as_bytes()).await?;
    }

    let keys = KeyProvider::for_actor(key, &actor);
    Ok(Principal { actor, keys })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::federation::keys::KeyKind;
    use crate::storage::CredentialChecker;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::Database;
    use std::sync::Arc;
    use url::Url;

    async fn store() -> DbStore {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        DbStore::new(Arc::new(db))
    }

    fn config(password: Option<&str>) -> PrincipalConfig {
        PrincipalConfig {
            iri: Url::parse("https://fed.example/actors/admin").unwrap(),
            name: "admin".into(),
            key_kind: KeyKind::Ed25519,
            password: password.map(String::from),
        }
    }

    #[tokio::test]
    async fn provisioning_is_repeatable() {
        let store = store().await;
        let first = provision(&store, &config(Some("hunter2"))).await.unwrap();
        let second = provision(&store, &config(None)).await.unwrap();

        assert_eq!(first.actor.id, second.actor.id);
        assert_eq!(first.keys.key_id(), second.keys.key_id());
        assert_eq!(
            first.keys.key().public_key_pem().unwrap(),
            second.keys.key().public_key_pem().unwrap()
        );
        assert!(second.actor.public_key.is_some());

        store
            .check_credential(&first.actor.id, b"hunter2")
            .await
            .unwrap();
    }
}
