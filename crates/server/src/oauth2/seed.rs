//! Client registration, from configuration or by an operator.

use time::OffsetDateTime;

use crate::config::{ClientSeed, ConfigError, default_seed_auth_methods, default_seed_grant_types};
use crate::entity::oauth2_client;
use crate::oauth2::{OAuth2State, registrar::CODE_RESPONSE_TYPE};
use crate::store::{CredentialStore, StoreError};

/// Stored row for a configured client.
pub fn seed_to_model(seed: &ClientSeed, now: OffsetDateTime) -> Result<oauth2_client::Model, serde_json::Error> {
    Ok(oauth2_client::Model {
        client_id: seed.client_id.clone(),
        client_secret: seed.client_secret.clone(),
        name: seed.name.clone(),
        redirect_uris: serde_json::to_string(&seed.redirect_uris)?,
        grant_types: seed.grant_types.join(" "),
        response_types: seed.response_types.join(" "),
        scopes: seed.scopes.join(" "),
        token_endpoint_auth_methods: seed.token_endpoint_auth_methods.join(" "),
        revoked: false,
        created_at: now,
        updated_at: now,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    #[error("client {client_id}: {source}")]
    Encode {
        client_id: String,
        source: serde_json::Error,
    },
    #[error(transparent)]
    Invalid(#[from] ConfigError),
    #[error("failed to generate client credentials: {0}")]
    Random(getrandom::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Upsert every configured client. Returns the number of clients written.
pub async fn seed_clients(store: &CredentialStore, seeds: &[ClientSeed]) -> Result<usize, SeedError> {
    let now = OffsetDateTime::now_utc();
    for seed in seeds {
        let model = seed_to_model(seed, now).map_err(|source| SeedError::Encode {
            client_id: seed.client_id.clone(),
            source,
        })?;
        store.upsert_client(model).await?;
        tracing::info!(client_id = %seed.client_id, "registered client from configuration");
    }
    Ok(seeds.len())
}

/// A new client as described by an operator. Empty `grant_types` means the
/// authorization code and refresh token grants.
#[derive(Clone, Debug, Default)]
pub struct ClientRegistration {
    pub name: String,
    pub redirect_uris: Vec<String>,
    pub scopes: Vec<String>,
    pub grant_types: Vec<String>,
}

/// Register a client under a freshly minted `client_id` and `client_secret`.
///
/// The returned row is the only place the secret is handed out.
pub async fn register_client(
    store: &CredentialStore,
    registration: ClientRegistration,
) -> Result<oauth2_client::Model, SeedError> {
    let grant_types = if registration.grant_types.is_empty() {
        default_seed_grant_types()
    } else {
        registration.grant_types
    };
    let seed = ClientSeed {
        client_id: OAuth2State::generate_token().map_err(SeedError::Random)?,
        client_secret: OAuth2State::generate_token().map_err(SeedError::Random)?,
        name: registration.name.trim().to_string(),
        redirect_uris: registration.redirect_uris,
        grant_types,
        response_types: vec![CODE_RESPONSE_TYPE.to_string()],
        scopes: registration.scopes,
        token_endpoint_auth_methods: default_seed_auth_methods(),
    };
    seed.validate()?;

    let model = seed_to_model(&seed, OffsetDateTime::now_utc()).map_err(|source| SeedError::Encode {
        client_id: seed.client_id.clone(),
        source,
    })?;
    let client = store.insert_client(model).await?;
    tracing::info!(client_id = %client.client_id, name = %client.name, "registered new client");
    Ok(client)
}
