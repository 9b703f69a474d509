//! Secondary indexes for the lookups the authorization server performs:
//! codes by client and expiry, tokens by client, by user+client and by expiry.

use crate::m20260301_000000_create_credential_tables::{Oauth2Authorization, Oauth2Token};
use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_oauth2_authorization_client_id")
                    .table(Oauth2Authorization::Table)
                    .col(Oauth2Authorization::ClientId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_oauth2_authorization_expires_at")
                    .table(Oauth2Authorization::Table)
                    .col(Oauth2Authorization::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_oauth2_token_client_id")
                    .table(Oauth2Token::Table)
                    .col(Oauth2Token::ClientId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_oauth2_token_user_client")
                    .table(Oauth2Token::Table)
                    .col(Oauth2Token::UserId)
                    .col(Oauth2Token::ClientId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_oauth2_token_expires_at")
                    .table(Oauth2Token::Table)
                    .col(Oauth2Token::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        for name in [
            "idx_oauth2_token_expires_at",
            "idx_oauth2_token_user_client",
            "idx_oauth2_token_client_id",
            "idx_oauth2_authorization_expires_at",
            "idx_oauth2_authorization_client_id",
        ] {
            manager
                .drop_index(Index::drop().name(name).to_owned())
                .await?;
        }

        Ok(())
    }
}
