use std::sync::Arc;

use federated_frontdoor::api::start_webserver;
use federated_frontdoor::config::load_config;
use federated_frontdoor::federation::{MessageSigner, SignedTransport};
use federated_frontdoor::oauth2::OAuth2State;
use federated_frontdoor::principal;
use federated_frontdoor::storage::db::DbStore;
use migration::{Migrator, MigratorTrait};
use sea_orm::Database;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

fn initialize_tracing() {
    let default_directives = "federated_frontdoor=info,hyper=warn,sea_orm=info";
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));

    let registry = tracing_subscriber::registry().with(env_filter);
    let layer = fmt::layer().with_target(true).with_level(true);

    registry.with(layer).init();
}

#[tokio::main]
async fn main() -> color_eyre::eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();
    initialize_tracing();

    let config = load_config()?;

    let db = Arc::new(Database::connect(&config.database_url).await?);
    Migrator::up(db.as_ref(), None).await?;
    let store = Arc::new(DbStore::new(db));

    let principal = principal::provision(&store, &config.principal).await?;
    tracing::info!(
        identity = %principal.actor.id,
        key_id = %principal.keys.key_id(),
        "Principal ready"
    );

    // Every outbound request, including client metadata fetches, is signed
    // with the principal's key.
    let http = reqwest::Client::builder()
        .user_agent(&config.federation.user_agent)
        .build()?;
    let transport = Arc::new(SignedTransport::new(
        http,
        MessageSigner::new(principal.keys.clone()),
    ));

    let state = OAuth2State::new(store, transport, principal.actor, &config);
    start_webserver(state, config.listen_addr).await
}
