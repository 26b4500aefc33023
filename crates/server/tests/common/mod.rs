//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use axum_test::TestServer;
use federated_frontdoor::{
    api,
    config::{AppConfig, FederationConfig, OAuth2Config, PrincipalConfig},
    federation::{KeyKind, MessageSigner, SignedTransport},
    oauth2::OAuth2State,
    objects::{Actor, ActorType},
    principal::{self, Principal},
    storage::{ClientRecord, ClientStore, DbStore, ObjectStore},
};
use migration::{Migrator, MigratorTrait};
use sea_orm::Database;
use url::Url;

pub const PRINCIPAL_IRI: &str = "https://fed.example/actors/admin";
pub const PRINCIPAL_PASSWORD: &str = "correct horse battery staple";
pub const REDIRECT_URI: &str = "http://localhost:3000/callback";
pub const PUBLIC_CLIENT: &str = "test-client";
pub const CONFIDENTIAL_CLIENT: &str = "confidential-client";
pub const CLIENT_SECRET: &str = "secret123";

pub async fn create_test_store() -> Arc<DbStore> {
    let db = Database::connect("sqlite::memory:").await.expect("connect");
    Migrator::up(&db, None).await.expect("migrate");
    Arc::new(DbStore::new(Arc::new(db)))
}

pub fn create_test_config(fetch_timeout_secs: u64) -> AppConfig {
    AppConfig {
        database_url: "sqlite::memory:".into(),
        listen_addr: "127.0.0.1:0".parse().expect("addr"),
        base_url: Url::parse("https://fed.example/").expect("base url"),
        principal: PrincipalConfig {
            iri: Url::parse(PRINCIPAL_IRI).expect("principal iri"),
            name: "admin".into(),
            key_kind: KeyKind::Ed25519,
            password: Some(PRINCIPAL_PASSWORD.into()),
        },
        oauth2: OAuth2Config::default(),
        federation: FederationConfig {
            fetch_timeout_secs,
            user_agent: "frontdoor-tests".into(),
        },
    }
}

pub struct TestApp {
    pub store: Arc<DbStore>,
    pub state: OAuth2State,
    pub principal: Principal,
    pub config: AppConfig,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(create_test_config(5)).await
    }

    pub async fn with_config(config: AppConfig) -> Self {
        let store = create_test_store().await;
        let principal = principal::provision(&store, &config.principal)
            .await
            .expect("provision principal");

        let transport = Arc::new(SignedTransport::new(
            reqwest::Client::new(),
            MessageSigner::new(principal.keys.clone()),
        ));
        let state = OAuth2State::new(store.clone(), transport, principal.actor.clone(), &config);

        register_client(&store, PUBLIC_CLIENT, "").await;
        register_client(&store, CONFIDENTIAL_CLIENT, CLIENT_SECRET).await;

        Self {
            store,
            state,
            principal,
            config,
        }
    }

    pub fn server(&self) -> TestServer {
        TestServer::new(api::router(self.state.clone())).expect("create test server")
    }

    /// Stores a person identity with a credential.
    pub async fn add_person(&self, iri: &str, name: &str, password: &str) -> Actor {
        let iri = Url::parse(iri).expect("iri");
        let actor = Actor::new(iri.clone(), ActorType::Person, name);
        self.store.save(actor.clone().into()).await.expect("save actor");
        self.store
            .set_credential(&iri, password.as_bytes())
            .await
            .expect("set credential");
        actor
    }
}

pub async fn register_client(store: &DbStore, id: &str, secret: &str) {
    store
        .create_client(&ClientRecord {
            id: id.into(),
            secret: secret.into(),
            redirect_uris: vec![REDIRECT_URI.into()],
            user_data: Vec::new(),
        })
        .await
        .expect("register client");
}

/// Query parameters of a redirect `Location`.
pub fn location_params(response: &axum_test::TestResponse) -> Vec<(String, String)> {
    let location = response
        .headers()
        .get("location")
        .and_then(|v| v.to_str().ok())
        .expect("location header");
    Url::parse(location)
        .expect("absolute location")
        .query_pairs()
        .into_owned()
        .collect()
}

pub fn param<'a>(params: &'a [(String, String)], key: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}
