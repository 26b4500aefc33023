pub mod actor_key;
pub mod credential;
pub mod oauth2_authorization;
pub mod oauth2_client;
pub mod oauth2_token;
pub mod object;
