use serde::Deserialize;
use thiserror::Error;

use crate::oauth2::registrar::CODE_RESPONSE_TYPE;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration build error: {0}")]
    Build(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// HMAC key for the login session cookie. Must be at least 32 bytes.
    pub session_secret: String,
    #[serde(default)]
    pub oauth2: OAuth2Config,
}

#[derive(Clone, Debug, Deserialize)]
pub struct OAuth2Config {
    /// Public base URL, used for the metadata document
    #[serde(default = "default_issuer_url")]
    pub issuer_url: String,
    /// Access token lifetime in seconds
    #[serde(default = "default_access_token_lifetime")]
    pub access_token_lifetime: i64,
    /// Authorization code lifetime in seconds
    #[serde(default = "default_authorization_code_lifetime")]
    pub authorization_code_lifetime: i64,
    /// Login session lifetime in seconds
    #[serde(default = "default_session_lifetime")]
    pub session_lifetime: i64,
    /// Seconds between purges of expired codes and tokens. 0 disables the task.
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: u64,
    #[serde(default)]
    pub password_hash: PasswordHashConfig,
    /// Clients upserted into the store at startup
    #[serde(default)]
    pub clients: Vec<ClientSeed>,
}

impl Default for OAuth2Config {
    fn default() -> Self {
        Self {
            issuer_url: default_issuer_url(),
            access_token_lifetime: default_access_token_lifetime(),
            authorization_code_lifetime: default_authorization_code_lifetime(),
            session_lifetime: default_session_lifetime(),
            cleanup_interval: default_cleanup_interval(),
            password_hash: PasswordHashConfig::default(),
            clients: Vec::new(),
        }
    }
}

/// Argon2id work factors.
#[derive(Clone, Debug, Deserialize)]
pub struct PasswordHashConfig {
    #[serde(default = "default_memory_kib")]
    pub memory_kib: u32,
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    #[serde(default = "default_parallelism")]
    pub parallelism: u32,
}

impl Default for PasswordHashConfig {
    fn default() -> Self {
        Self {
            memory_kib: default_memory_kib(),
            iterations: default_iterations(),
            parallelism: default_parallelism(),
        }
    }
}

/// A client registration as written in `config.yaml`.
#[derive(Clone, Debug, Deserialize)]
pub struct ClientSeed {
    pub client_id: String,
    pub client_secret: String,
    pub name: String,
    pub redirect_uris: Vec<String>,
    #[serde(default = "default_seed_grant_types")]
    pub grant_types: Vec<String>,
    #[serde(default = "default_seed_response_types")]
    pub response_types: Vec<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default = "default_seed_auth_methods")]
    pub token_endpoint_auth_methods: Vec<String>,
}

fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_issuer_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_access_token_lifetime() -> i64 {
    3600
}

fn default_authorization_code_lifetime() -> i64 {
    600
}

fn default_session_lifetime() -> i64 {
    86400
}

fn default_cleanup_interval() -> u64 {
    3600
}

fn default_memory_kib() -> u32 {
    argon2::Params::DEFAULT_M_COST
}

fn default_iterations() -> u32 {
    argon2::Params::DEFAULT_T_COST
}

fn default_parallelism() -> u32 {
    argon2::Params::DEFAULT_P_COST
}

pub(crate) fn default_seed_grant_types() -> Vec<String> {
    vec!["authorization_code".into(), "refresh_token".into()]
}

fn default_seed_response_types() -> Vec<String> {
    vec![CODE_RESPONSE_TYPE.into()]
}

pub(crate) fn default_seed_auth_methods() -> Vec<String> {
    vec!["client_secret_basic".into(), "client_secret_post".into()]
}

impl AppConfig {
    /// Check invariants that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session_secret.len() < 32 {
            return Err(ConfigError::Validation(
                "session_secret must be at least 32 characters".into(),
            ));
        }
        let oauth2 = &self.oauth2;
        if oauth2.access_token_lifetime <= 0 {
            return Err(ConfigError::Validation(
                "oauth2.access_token_lifetime must be > 0".into(),
            ));
        }
        if oauth2.authorization_code_lifetime <= 0 {
            return Err(ConfigError::Validation(
                "oauth2.authorization_code_lifetime must be > 0".into(),
            ));
        }
        if oauth2.session_lifetime <= 0 {
            return Err(ConfigError::Validation(
                "oauth2.session_lifetime must be > 0".into(),
            ));
        }
        argon2::Params::new(
            oauth2.password_hash.memory_kib,
            oauth2.password_hash.iterations,
            oauth2.password_hash.parallelism,
            None,
        )
        .map_err(|e| ConfigError::Validation(format!("oauth2.password_hash: {e}")))?;

        for seed in &oauth2.clients {
            seed.validate()?;
        }
        Ok(())
    }
}

impl ClientSeed {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |msg: String| Err(ConfigError::Validation(msg));
        if self.client_id.trim().is_empty() {
            return fail("client seed with empty client_id".into());
        }
        if self.client_secret.is_empty() {
            return fail(format!("client {}: client_secret is empty", self.client_id));
        }
        if self.name.trim().is_empty() {
            return fail(format!("client {}: name is empty", self.client_id));
        }
        if self.redirect_uris.is_empty() {
            return fail(format!("client {}: no redirect_uris", self.client_id));
        }
        for uri in &self.redirect_uris {
            if url::Url::parse(uri).is_err() {
                return fail(format!(
                    "client {}: redirect uri {uri} is not an absolute URL",
                    self.client_id
                ));
            }
        }
        for grant in &self.grant_types {
            if grant.parse::<crate::oauth2::GrantType>().is_err() {
                return fail(format!(
                    "client {}: unknown grant type {grant}",
                    self.client_id
                ));
            }
        }
        for method in &self.token_endpoint_auth_methods {
            if method.parse::<crate::oauth2::AuthMethod>().is_err() {
                return fail(format!(
                    "client {}: unknown auth method {method}",
                    self.client_id
                ));
            }
        }
        for response_type in &self.response_types {
            if response_type != CODE_RESPONSE_TYPE {
                return fail(format!(
                    "client {}: unsupported response type {response_type}",
                    self.client_id
                ));
            }
        }
        Ok(())
    }
}

/// Load application configuration from `config.yaml` + environment overrides.
///
/// Any environment variable matching the key path separated by double
/// underscores (e.g. `OAUTH2__ACCESS_TOKEN_LIFETIME`) overrides the file value.
/// A `.env` file, if present, is loaded into the environment first.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    use config::{Config, Environment, File};
    dotenvy::dotenv().ok();

    let cfg = Config::builder()
        .add_source(File::with_name("config.yaml").required(false))
        .add_source(Environment::default().separator("__"))
        .build()?;

    let app: AppConfig = cfg.try_deserialize()?;
    app.validate()?;
    Ok(app)
}

/// Convenience helper for binaries wanting panic-on-error behaviour.
pub fn load_config_or_panic() -> AppConfig {
    match load_config() {
        Ok(c) => c,
        Err(e) => panic!("Failed to load configuration: {e}"),
    }
}
