//! Database-backed client registry.
//!
//! Decodes stored client registrations into [`Client`] values and checks
//! incoming requests against them. Each check in [`ClientCheck`] is optional
//! so the authorization endpoint can validate redirect, response type and
//! scope without a secret while the token endpoint validates the secret and
//! auth method only.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use axum::http::{HeaderMap, header};
use base64::Engine;
use subtle::ConstantTimeEq;
use thiserror::Error;
use time::OffsetDateTime;

use crate::entity::oauth2_client;
use crate::error::OAuthError;
use crate::oauth2::scope::Scope;
use crate::store::CredentialStore;

#[derive(Debug, Error)]
#[error("unknown value {0:?}")]
pub struct UnknownValue(pub String);

/// The only response type the authorization endpoint issues.
pub const CODE_RESPONSE_TYPE: &str = "code";

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GrantType {
    AuthorizationCode,
    RefreshToken,
    Password,
}

impl GrantType {
    pub const ALL: [GrantType; 3] = [
        GrantType::AuthorizationCode,
        GrantType::RefreshToken,
        GrantType::Password,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            GrantType::AuthorizationCode => "authorization_code",
            GrantType::RefreshToken => "refresh_token",
            GrantType::Password => "password",
        }
    }
}

impl FromStr for GrantType {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "authorization_code" => Ok(GrantType::AuthorizationCode),
            "refresh_token" => Ok(GrantType::RefreshToken),
            "password" => Ok(GrantType::Password),
            other => Err(UnknownValue(other.to_string())),
        }
    }
}

impl fmt::Display for GrantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a client authenticated at the token or revocation endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AuthMethod {
    ClientSecretBasic,
    ClientSecretPost,
}

impl AuthMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthMethod::ClientSecretBasic => "client_secret_basic",
            AuthMethod::ClientSecretPost => "client_secret_post",
        }
    }
}

impl FromStr for AuthMethod {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "client_secret_basic" => Ok(AuthMethod::ClientSecretBasic),
            "client_secret_post" => Ok(AuthMethod::ClientSecretPost),
            other => Err(UnknownValue(other.to_string())),
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered application, decoded from its stored row.
#[derive(Clone, Debug)]
pub struct Client {
    pub client_id: String,
    secret: String,
    pub name: String,
    pub redirect_uris: Vec<String>,
    pub grant_types: BTreeSet<GrantType>,
    pub response_types: BTreeSet<String>,
    pub scopes: BTreeSet<String>,
    pub auth_methods: BTreeSet<AuthMethod>,
    pub revoked: bool,
    pub created_at: OffsetDateTime,
}

impl Client {
    /// Exact membership, no prefix or normalisation.
    pub fn has_redirect_uri(&self, uri: &str) -> bool {
        self.redirect_uris.iter().any(|u| u == uri)
    }

    pub fn allows_grant(&self, grant: GrantType) -> bool {
        self.grant_types.contains(&grant)
    }

    pub fn secret_matches(&self, candidate: &str) -> bool {
        bool::from(self.secret.as_bytes().ct_eq(candidate.as_bytes()))
    }

    /// The client's full allowed scope set as a scope value.
    pub fn full_scope(&self) -> Scope {
        Scope::from(&self.scopes)
    }
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split_whitespace()
}

impl From<oauth2_client::Model> for Client {
    fn from(model: oauth2_client::Model) -> Self {
        let redirect_uris = serde_json::from_str::<Vec<String>>(&model.redirect_uris)
            .unwrap_or_else(|_| split_list(&model.redirect_uris).map(String::from).collect());

        let mut grant_types: BTreeSet<GrantType> = split_list(&model.grant_types)
            .filter_map(|g| match g.parse() {
                Ok(g) => Some(g),
                Err(e) => {
                    tracing::warn!(client_id = %model.client_id, "ignoring grant type: {}", e);
                    None
                }
            })
            .collect();
        if grant_types.is_empty() {
            grant_types = [GrantType::AuthorizationCode, GrantType::RefreshToken].into();
        }

        let mut response_types: BTreeSet<String> =
            split_list(&model.response_types).map(String::from).collect();
        if response_types.is_empty() {
            response_types.insert(CODE_RESPONSE_TYPE.to_string());
        }

        let mut auth_methods: BTreeSet<AuthMethod> = split_list(&model.token_endpoint_auth_methods)
            .filter_map(|m| m.parse().ok())
            .collect();
        if auth_methods.is_empty() {
            auth_methods = [AuthMethod::ClientSecretBasic, AuthMethod::ClientSecretPost].into();
        }

        Client {
            scopes: split_list(&model.scopes).map(String::from).collect(),
            client_id: model.client_id,
            secret: model.client_secret,
            name: model.name,
            redirect_uris,
            grant_types,
            response_types,
            auth_methods,
            revoked: model.revoked,
            created_at: model.created_at,
        }
    }
}

/// Which parts of a request to check against the client registration.
#[derive(Clone, Copy, Debug, Default)]
pub struct ClientCheck<'a> {
    pub secret: Option<&'a str>,
    pub auth_method: Option<AuthMethod>,
    pub redirect_uri: Option<&'a str>,
    pub response_type: Option<&'a str>,
    pub scope: Option<&'a Scope>,
}

#[derive(Clone, Debug)]
pub struct ClientRegistry {
    store: CredentialStore,
}

impl ClientRegistry {
    pub fn new(store: CredentialStore) -> Self {
        Self { store }
    }

    /// Load `client_id` and run the requested checks in order: existence,
    /// secret, auth method, redirect URI, response type, scope.
    pub async fn validate(&self, client_id: &str, check: ClientCheck<'_>) -> Result<Client, OAuthError> {
        let Some(model) = self.store.find_client(client_id).await? else {
            tracing::warn!(client_id, "unknown client");
            return Err(OAuthError::InvalidClient);
        };
        let client = Client::from(model);
        if client.revoked {
            tracing::warn!(client_id, "client registration is revoked");
            return Err(OAuthError::InvalidClient);
        }

        if let Some(secret) = check.secret
            && !client.secret_matches(secret)
        {
            tracing::warn!(client_id, "client secret mismatch");
            return Err(OAuthError::InvalidClient);
        }

        if let Some(method) = check.auth_method
            && !client.auth_methods.contains(&method)
        {
            tracing::warn!(client_id, %method, "auth method not allowed for client");
            return Err(OAuthError::InvalidClient);
        }

        if let Some(uri) = check.redirect_uri
            && !client.has_redirect_uri(uri)
        {
            return Err(OAuthError::InvalidRedirectUri);
        }

        if let Some(response_type) = check.response_type
            && !client.response_types.contains(response_type)
        {
            return Err(OAuthError::UnsupportedResponseType);
        }

        if let Some(scope) = check.scope
            && !scope.is_subset_of(&client.scopes)
        {
            return Err(OAuthError::InvalidScope);
        }

        Ok(client)
    }

    /// Authenticate a client from request credentials, requiring a secret.
    pub async fn authenticate(&self, credentials: &ClientCredentials) -> Result<Client, OAuthError> {
        self.validate(
            &credentials.client_id,
            ClientCheck {
                secret: Some(&credentials.client_secret),
                auth_method: Some(credentials.method),
                ..ClientCheck::default()
            },
        )
        .await
    }
}

/// Client id and secret presented at the token or revocation endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub method: AuthMethod,
}

/// Resolve client credentials from the `Authorization: Basic` header or the
/// `client_id`/`client_secret` form fields. Presenting both is an error.
pub fn extract_client_credentials(
    headers: &HeaderMap,
    form_client_id: Option<&str>,
    form_client_secret: Option<&str>,
) -> Result<ClientCredentials, OAuthError> {
    let basic = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split_once(' '))
        .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("basic"))
        .map(|(_, encoded)| encoded);

    if let Some(encoded) = basic {
        if form_client_secret.is_some() {
            return Err(OAuthError::InvalidRequest(
                "client credentials supplied in both header and body".into(),
            ));
        }
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|_| OAuthError::InvalidClient)?;
        let creds = String::from_utf8(decoded).map_err(|_| OAuthError::InvalidClient)?;
        let (id, secret) = creds.split_once(':').ok_or(OAuthError::InvalidClient)?;
        let client_id = urlencoding::decode(id).map_err(|_| OAuthError::InvalidClient)?;
        let client_secret = urlencoding::decode(secret).map_err(|_| OAuthError::InvalidClient)?;
        if let Some(form_id) = form_client_id
            && form_id != client_id
        {
            return Err(OAuthError::InvalidRequest(
                "client_id does not match the authenticated client".into(),
            ));
        }
        return Ok(ClientCredentials {
            client_id: client_id.into_owned(),
            client_secret: client_secret.into_owned(),
            method: AuthMethod::ClientSecretBasic,
        });
    }

    match (form_client_id, form_client_secret) {
        (Some(id), Some(secret)) => Ok(ClientCredentials {
            client_id: id.to_string(),
            client_secret: secret.to_string(),
            method: AuthMethod::ClientSecretPost,
        }),
        _ => Err(OAuthError::InvalidClient),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn model() -> oauth2_client::Model {
        let now = OffsetDateTime::now_utc();
        oauth2_client::Model {
            client_id: "c1".into(),
            client_secret: "s3cret".into(),
            name: "Test".into(),
            redirect_uris: r#"["https://app/cb"]"#.into(),
            grant_types: "".into(),
            response_types: "".into(),
            scopes: "read write".into(),
            token_endpoint_auth_methods: "client_secret_post".into(),
            revoked: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn decoding_applies_defaults() {
        let client = Client::from(model());
        assert_eq!(client.redirect_uris, vec!["https://app/cb"]);
        assert!(client.allows_grant(GrantType::AuthorizationCode));
        assert!(client.allows_grant(GrantType::RefreshToken));
        assert!(!client.allows_grant(GrantType::Password));
        assert!(client.response_types.contains("code"));
        assert_eq!(
            client.auth_methods,
            BTreeSet::from([AuthMethod::ClientSecretPost])
        );
    }

    #[test]
    fn redirect_match_is_exact() {
        let client = Client::from(model());
        assert!(client.has_redirect_uri("https://app/cb"));
        assert!(!client.has_redirect_uri("https://app/cb/"));
        assert!(!client.has_redirect_uri("https://app/c"));
        assert!(!client.has_redirect_uri("https://app/cb?x=1"));
        assert!(!client.has_redirect_uri("HTTPS://app/cb"));
    }

    #[test]
    fn secret_comparison() {
        let client = Client::from(model());
        assert!(client.secret_matches("s3cret"));
        assert!(!client.secret_matches("s3cre"));
        assert!(!client.secret_matches("s3cret "));
        assert!(!client.secret_matches(""));
    }

    #[test]
    fn basic_credentials_are_percent_decoded() {
        let mut headers = HeaderMap::new();
        let encoded = base64::engine::general_purpose::STANDARD.encode("my%20app:p%3Ass");
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {encoded}")).unwrap(),
        );
        let creds = extract_client_credentials(&headers, None, None).unwrap();
        assert_eq!(creds.client_id, "my app");
        assert_eq!(creds.client_secret, "p:ss");
        assert_eq!(creds.method, AuthMethod::ClientSecretBasic);
    }

    #[test]
    fn basic_scheme_is_case_insensitive() {
        let encoded = base64::engine::general_purpose::STANDARD.encode("c1:s3cret");
        for scheme in ["basic", "BASIC", "bAsIc"] {
            let mut headers = HeaderMap::new();
            headers.insert(
                header::AUTHORIZATION,
                HeaderValue::from_str(&format!("{scheme} {encoded}")).unwrap(),
            );
            let creds = extract_client_credentials(&headers, None, None).unwrap();
            assert_eq!(creds.client_id, "c1");
            assert_eq!(creds.client_secret, "s3cret");
            assert_eq!(creds.method, AuthMethod::ClientSecretBasic);
        }

        // A bearer header is not client authentication.
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert!(matches!(
            extract_client_credentials(&headers, None, None),
            Err(OAuthError::InvalidClient)
        ));
    }

    #[test]
    fn form_credentials() {
        let creds = extract_client_credentials(&HeaderMap::new(), Some("c1"), Some("s")).unwrap();
        assert_eq!(creds.method, AuthMethod::ClientSecretPost);
        assert!(matches!(
            extract_client_credentials(&HeaderMap::new(), Some("c1"), None),
            Err(OAuthError::InvalidClient)
        ));
    }

    #[test]
    fn both_methods_is_invalid_request() {
        let mut headers = HeaderMap::new();
        let encoded = base64::engine::general_purpose::STANDARD.encode("c1:s");
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {encoded}")).unwrap(),
        );
        assert!(matches!(
            extract_client_credentials(&headers, Some("c1"), Some("s")),
            Err(OAuthError::InvalidRequest(_))
        ));
    }

    #[test]
    fn grant_type_names() {
        for grant in GrantType::ALL {
            assert_eq!(grant.as_str().parse::<GrantType>().unwrap(), grant);
        }
        assert!("client_credentials".parse::<GrantType>().is_err());
    }
}
