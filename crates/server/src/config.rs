use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::federation::keys::KeyKind;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration build error: {0}")]
    Build(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// The single local identity tokens are issued for.
#[derive(Clone, Debug, Deserialize)]
pub struct PrincipalConfig {
    pub iri: Url,
    pub name: String,
    #[serde(default = "default_key_kind")]
    pub key_kind: KeyKind,
    /// When set, the principal's credential is (re)set to this secret at startup.
    #[serde(default)]
    pub password: Option<String>,
}

/// Lifetimes are in seconds.
#[derive(Clone, Debug, Deserialize)]
pub struct OAuth2Config {
    #[serde(default = "default_authorization_lifetime")]
    pub authorization_lifetime: i64,
    #[serde(default = "default_access_token_lifetime")]
    pub access_token_lifetime: i64,
    #[serde(default = "default_refresh_token_lifetime")]
    pub refresh_token_lifetime: i64,
    #[serde(default = "default_issue_refresh_tokens")]
    pub issue_refresh_tokens: bool,
}

impl Default for OAuth2Config {
    fn default() -> Self {
        Self {
            authorization_lifetime: default_authorization_lifetime(),
            access_token_lifetime: default_access_token_lifetime(),
            refresh_token_lifetime: default_refresh_token_lifetime(),
            issue_refresh_tokens: default_issue_refresh_tokens(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct FederationConfig {
    /// Deadline for fetching a client metadata document.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl FederationConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: default_fetch_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    /// Public base URL of this server, used as the OAuth2 issuer.
    pub base_url: Url,
    pub principal: PrincipalConfig,
    #[serde(default)]
    pub oauth2: OAuth2Config,
    #[serde(default)]
    pub federation: FederationConfig,
}

fn default_key_kind() -> KeyKind {
    KeyKind::Rsa
}

fn default_authorization_lifetime() -> i64 {
    600
}

fn default_access_token_lifetime() -> i64 {
    3600
}

fn default_refresh_token_lifetime() -> i64 {
    86400 * 30
}

fn default_issue_refresh_tokens() -> bool {
    true
}

fn default_fetch_timeout_secs() -> u64 {
    10
}

fn default_user_agent() -> String {
    format!("federated-frontdoor/{}", env!("CARGO_PKG_VERSION"))
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.principal.iri.host_str().is_none_or(str::is_empty) {
            return Err(ConfigError::Validation(
                "principal.iri must be an absolute URL with a host".into(),
            ));
        }
        if self.principal.name.trim().is_empty() {
            return Err(ConfigError::Validation("principal.name must not be empty".into()));
        }
        if self.oauth2.authorization_lifetime <= 0
            || self.oauth2.access_token_lifetime <= 0
            || self.oauth2.refresh_token_lifetime <= 0
        {
            return Err(ConfigError::Validation(
                "oauth2 lifetimes must be positive".into(),
            ));
        }
        if self.federation.fetch_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "federation.fetch_timeout_secs must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Load application configuration from `config.yaml` + environment overrides.
///
/// Any variable matching the key path separated by double underscores
/// (e.g. `OAUTH2__ACCESS_TOKEN_LIFETIME`) overrides the file value.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from("config.yaml")
}

pub fn load_config_from(path: &str) -> Result<AppConfig, ConfigError> {
    use config::{Config, Environment, File};
    let cfg = Config::builder()
        .add_source(File::with_name(path))
        .add_source(Environment::default().separator("__"))
        .build()?;

    let app: AppConfig = cfg.try_deserialize()?;
    app.validate()?;
    Ok(app)
}
