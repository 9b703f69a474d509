//! Creates the credential tables backing the authorization server:
//! - oauth2_client: registered applications
//! - app_user: end users that can grant consent or use the password grant
//! - oauth2_authorization: one-time authorization codes
//! - oauth2_token: access/refresh token pairs

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Oauth2Client::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Oauth2Client::ClientId)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Oauth2Client::ClientSecret)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Oauth2Client::Name).string().not_null())
                    .col(ColumnDef::new(Oauth2Client::RedirectUris).text().not_null())
                    .col(
                        ColumnDef::new(Oauth2Client::GrantTypes)
                            .text()
                            .not_null()
                            .default("authorization_code refresh_token"),
                    )
                    .col(
                        ColumnDef::new(Oauth2Client::ResponseTypes)
                            .text()
                            .not_null()
                            .default("code"),
                    )
                    .col(
                        ColumnDef::new(Oauth2Client::Scopes)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(Oauth2Client::TokenEndpointAuthMethods)
                            .text()
                            .not_null()
                            .default("client_secret_basic client_secret_post"),
                    )
                    .col(
                        ColumnDef::new(Oauth2Client::Revoked)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Oauth2Client::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Oauth2Client::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(AppUser::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AppUser::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(AppUser::Email)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(AppUser::PasswordHash).string().not_null())
                    .col(ColumnDef::new(AppUser::Name).string().null())
                    .col(
                        ColumnDef::new(AppUser::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AppUser::LastLoginAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Oauth2Authorization::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Oauth2Authorization::Code)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Oauth2Authorization::ClientId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Oauth2Authorization::UserId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Oauth2Authorization::RedirectUri)
                            .text()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Oauth2Authorization::Scope).text().not_null())
                    .col(
                        ColumnDef::new(Oauth2Authorization::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Oauth2Authorization::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Oauth2Token::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Oauth2Token::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Oauth2Token::AccessToken)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(Oauth2Token::RefreshToken)
                            .string()
                            .null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Oauth2Token::ClientId).string().not_null())
                    .col(ColumnDef::new(Oauth2Token::UserId).string().not_null())
                    .col(ColumnDef::new(Oauth2Token::Scope).text().not_null())
                    .col(
                        ColumnDef::new(Oauth2Token::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Oauth2Token::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Oauth2Token::Revoked)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Oauth2Token::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Oauth2Authorization::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(AppUser::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Oauth2Client::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
pub(crate) enum Oauth2Client {
    #[sea_orm(iden = "oauth2_client")]
    Table,
    ClientId,
    ClientSecret,
    Name,
    RedirectUris,
    GrantTypes,
    ResponseTypes,
    Scopes,
    TokenEndpointAuthMethods,
    Revoked,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
pub(crate) enum AppUser {
    #[sea_orm(iden = "app_user")]
    Table,
    Id,
    Email,
    PasswordHash,
    Name,
    CreatedAt,
    LastLoginAt,
}

#[derive(DeriveIden)]
pub(crate) enum Oauth2Authorization {
    #[sea_orm(iden = "oauth2_authorization")]
    Table,
    Code,
    ClientId,
    UserId,
    RedirectUri,
    Scope,
    CreatedAt,
    ExpiresAt,
}

#[derive(DeriveIden)]
pub(crate) enum Oauth2Token {
    #[sea_orm(iden = "oauth2_token")]
    Table,
    Id,
    AccessToken,
    RefreshToken,
    ClientId,
    UserId,
    Scope,
    CreatedAt,
    ExpiresAt,
    Revoked,
}
