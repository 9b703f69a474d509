//! SeaORM entities for the credential store.

pub mod app_user;
pub mod oauth2_authorization;
pub mod oauth2_client;
pub mod oauth2_token;
