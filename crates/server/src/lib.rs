//! OAuth2 authorization server for the prescription management platform.
//!
//! Registers client applications, runs the authorization code flow with
//! user consent, issues and rotates bearer tokens, and guards protected
//! resources with them.

pub mod api;
pub mod config;
pub mod entity;
pub mod error;
pub mod oauth2;
pub mod store;
