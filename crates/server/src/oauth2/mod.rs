//! OAuth2 Authorization Server module.
//!
//! Issues tokens on behalf of the single local principal. Clients either
//! register locally or identify themselves with a URL serving their client
//! metadata document, which is resolved on first use.
//!
//! ## Supported Flows
//!
//! - Authorization Code, with a login step on the authorize endpoint
//! - Resource Owner Password Credentials
//!
//! ## Endpoints
//!
//! - `GET|POST /oauth/authorize` - Authorization endpoint
//! - `POST /oauth/token` - Token endpoint
//! - `GET /oauth/userinfo` - Identity behind an access token
//! - `GET /.well-known/oauth-authorization-server` - Discovery document

pub mod endpoints;
pub mod engine;
pub mod login;
pub mod metadata;
pub mod password;
pub mod registrar;
pub mod resolver;
mod state;

pub use endpoints::{discovery_router, router};
pub use engine::{OAuth2Engine, PendingAuthorization};
pub use metadata::ClientMetadata;
pub use password::{generate_token, hash_password, verify_password};
pub use resolver::{ClientResolver, ResolveError, ResolverSettings};
pub use state::{OAuth2State, RequestClient};

/// OpenAPI tag for OAuth2 endpoints
pub const OAUTH2_TAG: &str = "OAuth2";

/// Scope that authorizes the identity named in the request without a login
/// step. Only meant for bootstrapping a fresh deployment.
pub const ANON_USER_CREATE_SCOPE: &str = "anonUserCreate";
