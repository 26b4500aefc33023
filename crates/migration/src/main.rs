use config::Config;
use sea_orm_migration::prelude::*;
use std::env;

/// Reads `database_url` from `config.yaml` unless `DATABASE_URL` is set.
fn database_url_from_config() -> Option<String> {
    Config::builder()
        .add_source(config::File::with_name("config.yaml").required(false))
        .build()
        .ok()?
        .get_string("database_url")
        .ok()
}

#[tokio::main]
async fn main() {
    if env::var("DATABASE_URL").is_err() {
        if let Some(url) = database_url_from_config() {
            env::set_var("DATABASE_URL", url);
        }
    }
    cli::run_cli(migration::Migrator).await;
}
