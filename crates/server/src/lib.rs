//! An OAuth2 front door for a single federated identity.
//!
//! Issues authorization codes and access tokens for the configured principal,
//! registers OAuth2 clients on first use from the metadata document served at
//! their client identifier URL, and signs every outbound federated request
//! with HTTP Signatures.

pub mod api;
pub mod config;
pub mod entity;
pub mod error;
pub mod federation;
pub mod oauth2;
pub mod objects;
pub mod principal;
pub mod security;
pub mod storage;
