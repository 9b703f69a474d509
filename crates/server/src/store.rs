//! Credential store.
//!
//! Persists clients, authorization codes, tokens and users behind one handle
//! that is cloned into every component. One-time credentials (authorization
//! codes and refresh tokens) are consumed with [`CredentialStore::take_authorization_code`]
//! and [`CredentialStore::take_refresh_token`]: the row is read, then deleted
//! with a predicate on the same keys, and only the caller whose delete hit
//! the row gets it back. Concurrent redemptions therefore have one winner.

use std::sync::Arc;

use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, Condition, DatabaseConnection, DbErr,
    EntityTrait, QueryFilter, QueryOrder, QuerySelect,
};
use thiserror::Error;
use time::OffsetDateTime;

use crate::entity::{app_user, oauth2_authorization, oauth2_client, oauth2_token};

#[derive(Debug, Error)]
#[error("credential store error: {0}")]
pub struct StoreError(#[from] DbErr);

impl StoreError {
    pub fn is_unique_violation(&self) -> bool {
        matches!(
            self.0.sql_err(),
            Some(sea_orm::SqlErr::UniqueConstraintViolation(_))
        )
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Counts returned by [`CredentialStore::purge_expired`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PurgeStats {
    pub authorization_codes: u64,
    pub tokens: u64,
}

#[derive(Clone, Debug)]
pub struct CredentialStore {
    db: Arc<DatabaseConnection>,
}

impl CredentialStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        self.db.as_ref()
    }

    // ---------------------------------------------------------------------
    // Clients
    // ---------------------------------------------------------------------

    pub async fn find_client(&self, client_id: &str) -> StoreResult<Option<oauth2_client::Model>> {
        Ok(oauth2_client::Entity::find_by_id(client_id.to_owned())
            .one(self.connection())
            .await?)
    }

    /// Clients with the given ids, ordered by display name.
    pub async fn find_clients(&self, client_ids: &[String]) -> StoreResult<Vec<oauth2_client::Model>> {
        if client_ids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(oauth2_client::Entity::find()
            .filter(oauth2_client::Column::ClientId.is_in(client_ids.iter().cloned()))
            .order_by_asc(oauth2_client::Column::Name)
            .all(self.connection())
            .await?)
    }

    pub async fn list_clients(&self) -> StoreResult<Vec<oauth2_client::Model>> {
        Ok(oauth2_client::Entity::find()
            .order_by_asc(oauth2_client::Column::ClientId)
            .all(self.connection())
            .await?)
    }

    pub async fn insert_client(&self, client: oauth2_client::Model) -> StoreResult<oauth2_client::Model> {
        Ok(client_active_model(client).insert(self.connection()).await?)
    }

    /// Replace the registration of an existing client. Returns `None` if the
    /// client does not exist. `created_at` is preserved, `updated_at` bumped.
    pub async fn update_client(
        &self,
        client: oauth2_client::Model,
    ) -> StoreResult<Option<oauth2_client::Model>> {
        let Some(existing) = self.find_client(&client.client_id).await? else {
            return Ok(None);
        };
        let mut active = client_active_model(client);
        active.created_at = Set(existing.created_at);
        active.updated_at = Set(OffsetDateTime::now_utc());
        Ok(Some(active.update(self.connection()).await?))
    }

    /// Insert the client, or overwrite its registration if it already exists.
    pub async fn upsert_client(&self, client: oauth2_client::Model) -> StoreResult<oauth2_client::Model> {
        if let Some(updated) = self.update_client(client.clone()).await? {
            return Ok(updated);
        }
        self.insert_client(client).await
    }

    pub async fn delete_client(&self, client_id: &str) -> StoreResult<bool> {
        let res = oauth2_client::Entity::delete_by_id(client_id.to_owned())
            .exec(self.connection())
            .await?;
        Ok(res.rows_affected > 0)
    }

    // ---------------------------------------------------------------------
    // Authorization codes
    // ---------------------------------------------------------------------

    pub async fn insert_authorization_code(
        &self,
        code: oauth2_authorization::Model,
    ) -> StoreResult<()> {
        let active = oauth2_authorization::ActiveModel {
            code: Set(code.code),
            client_id: Set(code.client_id),
            user_id: Set(code.user_id),
            redirect_uri: Set(code.redirect_uri),
            scope: Set(code.scope),
            created_at: Set(code.created_at),
            expires_at: Set(code.expires_at),
        };
        active.insert(self.connection()).await?;
        Ok(())
    }

    /// Find-and-delete the code issued to `client_id`. Expiry is left to the
    /// caller; an expired code is still removed.
    pub async fn take_authorization_code(
        &self,
        code: &str,
        client_id: &str,
    ) -> StoreResult<Option<oauth2_authorization::Model>> {
        let matches = || {
            Condition::all()
                .add(oauth2_authorization::Column::Code.eq(code))
                .add(oauth2_authorization::Column::ClientId.eq(client_id))
        };
        let Some(row) = oauth2_authorization::Entity::find()
            .filter(matches())
            .one(self.connection())
            .await?
        else {
            return Ok(None);
        };
        let res = oauth2_authorization::Entity::delete_many()
            .filter(matches())
            .exec(self.connection())
            .await?;
        Ok((res.rows_affected == 1).then_some(row))
    }

    // ---------------------------------------------------------------------
    // Tokens
    // ---------------------------------------------------------------------

    pub async fn insert_token(&self, token: oauth2_token::Model) -> StoreResult<oauth2_token::Model> {
        let active = oauth2_token::ActiveModel {
            id: Set(token.id),
            access_token: Set(token.access_token),
            refresh_token: Set(token.refresh_token),
            client_id: Set(token.client_id),
            user_id: Set(token.user_id),
            scope: Set(token.scope),
            created_at: Set(token.created_at),
            expires_at: Set(token.expires_at),
            revoked: Set(token.revoked),
        };
        Ok(active.insert(self.connection()).await?)
    }

    pub async fn find_token_by_access(
        &self,
        access_token: &str,
    ) -> StoreResult<Option<oauth2_token::Model>> {
        Ok(oauth2_token::Entity::find()
            .filter(oauth2_token::Column::AccessToken.eq(access_token))
            .one(self.connection())
            .await?)
    }

    /// Find-and-delete the token record holding `refresh_token` for `client_id`.
    pub async fn take_refresh_token(
        &self,
        refresh_token: &str,
        client_id: &str,
    ) -> StoreResult<Option<oauth2_token::Model>> {
        let matches = || {
            Condition::all()
                .add(oauth2_token::Column::RefreshToken.eq(refresh_token))
                .add(oauth2_token::Column::ClientId.eq(client_id))
        };
        let Some(row) = oauth2_token::Entity::find()
            .filter(matches())
            .one(self.connection())
            .await?
        else {
            return Ok(None);
        };
        let res = oauth2_token::Entity::delete_many()
            .filter(matches())
            .exec(self.connection())
            .await?;
        Ok((res.rows_affected == 1).then_some(row))
    }

    /// Delete records whose access or refresh token equals `token` and that
    /// belong to `client_id`. Returns the number of deleted records.
    pub async fn delete_tokens_matching(&self, token: &str, client_id: &str) -> StoreResult<u64> {
        let res = oauth2_token::Entity::delete_many()
            .filter(
                Condition::any()
                    .add(oauth2_token::Column::AccessToken.eq(token))
                    .add(oauth2_token::Column::RefreshToken.eq(token)),
            )
            .filter(oauth2_token::Column::ClientId.eq(client_id))
            .exec(self.connection())
            .await?;
        Ok(res.rows_affected)
    }

    /// Bulk revocation of everything `user_id` granted to `client_id`.
    pub async fn delete_tokens_for(&self, user_id: &str, client_id: &str) -> StoreResult<u64> {
        let res = oauth2_token::Entity::delete_many()
            .filter(oauth2_token::Column::UserId.eq(user_id))
            .filter(oauth2_token::Column::ClientId.eq(client_id))
            .exec(self.connection())
            .await?;
        Ok(res.rows_affected)
    }

    /// Distinct client ids the user currently holds token records for.
    pub async fn authorized_client_ids(&self, user_id: &str) -> StoreResult<Vec<String>> {
        Ok(oauth2_token::Entity::find()
            .select_only()
            .column(oauth2_token::Column::ClientId)
            .distinct()
            .filter(oauth2_token::Column::UserId.eq(user_id))
            .order_by_asc(oauth2_token::Column::ClientId)
            .into_tuple::<String>()
            .all(self.connection())
            .await?)
    }

    /// Remove expired authorization codes and expired access tokens that can
    /// no longer be refreshed.
    pub async fn purge_expired(&self, now: OffsetDateTime) -> StoreResult<PurgeStats> {
        let codes = oauth2_authorization::Entity::delete_many()
            .filter(oauth2_authorization::Column::ExpiresAt.lt(now))
            .exec(self.connection())
            .await?;
        let tokens = oauth2_token::Entity::delete_many()
            .filter(oauth2_token::Column::ExpiresAt.lte(now))
            .filter(
                Condition::any()
                    .add(oauth2_token::Column::RefreshToken.is_null())
                    .add(oauth2_token::Column::Revoked.eq(true)),
            )
            .exec(self.connection())
            .await?;
        Ok(PurgeStats {
            authorization_codes: codes.rows_affected,
            tokens: tokens.rows_affected,
        })
    }

    // ---------------------------------------------------------------------
    // Users
    // ---------------------------------------------------------------------

    pub async fn insert_user(&self, user: app_user::Model) -> StoreResult<app_user::Model> {
        let active = app_user::ActiveModel {
            id: Set(user.id),
            email: Set(user.email),
            password_hash: Set(user.password_hash),
            name: Set(user.name),
            created_at: Set(user.created_at),
            last_login_at: Set(user.last_login_at),
        };
        Ok(active.insert(self.connection()).await?)
    }

    pub async fn find_user(&self, user_id: &str) -> StoreResult<Option<app_user::Model>> {
        Ok(app_user::Entity::find_by_id(user_id.to_owned())
            .one(self.connection())
            .await?)
    }

    pub async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<app_user::Model>> {
        Ok(app_user::Entity::find()
            .filter(app_user::Column::Email.eq(email))
            .one(self.connection())
            .await?)
    }

    pub async fn touch_last_login(&self, user_id: &str, at: OffsetDateTime) -> StoreResult<()> {
        app_user::Entity::update_many()
            .col_expr(
                app_user::Column::LastLoginAt,
                sea_orm::sea_query::Expr::value(Some(at)),
            )
            .filter(app_user::Column::Id.eq(user_id))
            .exec(self.connection())
            .await?;
        Ok(())
    }
}

/// Purge expired credentials every `every` until the runtime shuts down.
pub fn spawn_purge_task(store: CredentialStore, every: std::time::Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match store.purge_expired(OffsetDateTime::now_utc()).await {
                Ok(stats) => tracing::debug!(
                    authorization_codes = stats.authorization_codes,
                    tokens = stats.tokens,
                    "purged expired credentials"
                ),
                Err(e) => tracing::error!("Failed to purge expired credentials: {}", e),
            }
        }
    })
}

fn client_active_model(client: oauth2_client::Model) -> oauth2_client::ActiveModel {
    oauth2_client::ActiveModel {
        client_id: Set(client.client_id),
        client_secret: Set(client.client_secret),
        name: Set(client.name),
        redirect_uris: Set(client.redirect_uris),
        grant_types: Set(client.grant_types),
        response_types: Set(client.response_types),
        scopes: Set(client.scopes),
        token_endpoint_auth_methods: Set(client.token_endpoint_auth_methods),
        revoked: Set(client.revoked),
        created_at: Set(client.created_at),
        updated_at: Set(client.updated_at),
    }
}
