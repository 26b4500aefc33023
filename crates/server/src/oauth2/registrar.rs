//! Client registration checks: redirect binding and client authentication.

use crate::error::OAuthError;
use crate::storage::ClientRecord;

/// Picks the redirect URI for an authorization request.
///
/// A requested URI must be registered verbatim. Without one the first
/// registered URI is used.
pub fn bound_redirect(client: &ClientRecord, requested: Option<&str>) -> Result<String, OAuthError> {
    match requested.filter(|uri| !uri.is_empty()) {
        Some(uri) if client.allows_redirect(uri) => Ok(uri.to_string()),
        Some(_) => Err(OAuthError::invalid_request("redirect_uri is not registered for this client")),
        None => client
            .redirect_uris
            .first()
            .cloned()
            .ok_or_else(|| OAuthError::invalid_request("client has no registered redirect_uri")),
    }
}

/// Authenticates a client at the token endpoint. Public clients pass
/// without a secret.
pub fn check_client(client: &ClientRecord, secret: Option<&[u8]>) -> Result<(), OAuthError> {
    if client.is_public() {
        return Ok(());
    }
    match secret {
        Some(provided) if constant_time_eq(client.secret.as_bytes(), provided) => Ok(()),
        _ => Err(OAuthError::unauthorized("client authentication failed")),
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
