//! OAuth2 state shared by every handler.

use std::sync::Arc;

use base64::Engine;
use sea_orm::DatabaseConnection;
use time::{Duration, OffsetDateTime};

use crate::config::AppConfig;
use crate::oauth2::password::PasswordService;
use crate::oauth2::registrar::ClientRegistry;
use crate::oauth2::session::SessionKeys;
use crate::store::CredentialStore;

#[derive(Clone)]
pub struct OAuth2State {
    pub store: CredentialStore,
    pub registry: ClientRegistry,
    pub passwords: PasswordService,
    pub sessions: SessionKeys,
    /// Base URL for the metadata document
    pub issuer_url: String,
    pub access_token_lifetime: Duration,
    pub authorization_code_lifetime: Duration,
    pub session_lifetime: Duration,
}

impl OAuth2State {
    pub fn new(db: Arc<DatabaseConnection>, config: &AppConfig) -> Result<Self, argon2::Error> {
        let store = CredentialStore::new(db);
        let oauth2 = &config.oauth2;
        Ok(Self {
            registry: ClientRegistry::new(store.clone()),
            store,
            passwords: PasswordService::new(&oauth2.password_hash)?,
            sessions: SessionKeys::new(config.session_secret.as_bytes()),
            issuer_url: oauth2.issuer_url.trim_end_matches('/').to_string(),
            access_token_lifetime: Duration::seconds(oauth2.access_token_lifetime),
            authorization_code_lifetime: Duration::seconds(oauth2.authorization_code_lifetime),
            session_lifetime: Duration::seconds(oauth2.session_lifetime),
        })
    }

    pub fn now() -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }

    /// Generate an unguessable token: 256 bits from the OS generator,
    /// base64url without padding.
    pub fn generate_token() -> Result<String, getrandom::Error> {
        let mut bytes = [0u8; 32];
        getrandom::fill(&mut bytes)?;
        Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_tokens_are_unique_and_url_safe() {
        let a = OAuth2State::generate_token().unwrap();
        let b = OAuth2State::generate_token().unwrap();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(
            a.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }
}
