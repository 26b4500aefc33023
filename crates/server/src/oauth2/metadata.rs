//! Client metadata documents.
//!
//! A remote OAuth2 client describes itself with a JSON document served from
//! its own client identifier URL. The document is self-asserted, so it is
//! checked against the URL it was fetched from before anything is derived
//! from it.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;
use uuid::Uuid;

/// Authentication method clients may not declare.
pub const DISALLOWED_AUTH_METHOD: &str = "client_secret_post";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMetadata {
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_uri: Option<Url>,
    /// Kept as declared; requests must repeat them verbatim.
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo_uri: Option<Url>,
    /// Stable identifier the local identity is derived from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub software_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint_auth_method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id_issued_at: Option<i64>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MetadataError {
    #[error("Malformed metadata document: {0}")]
    Malformed(String),
    #[error("Declared client_id {declared} does not match {fetched}")]
    IdentifierMismatch { declared: String, fetched: String },
    #[error("Token endpoint auth method {0} is not allowed")]
    DisallowedAuthMethod(String),
    #[error("Metadata document has no software_id")]
    MissingSoftwareId,
    #[error("Redirect URI {0} is not an absolute URL")]
    InvalidRedirectUri(String),
}

impl ClientMetadata {
    /// Checks the document against the identifier it was fetched from.
    pub fn validate(&self, fetched_from: &str) -> Result<Uuid, MetadataError> {
        if !identifiers_match(&self.client_id, fetched_from) {
            return Err(MetadataError::IdentifierMismatch {
                declared: self.client_id.clone(),
                fetched: fetched_from.to_string(),
            });
        }

        if let Some(method) = &self.token_endpoint_auth_method
            && method.eq_ignore_ascii_case(DISALLOWED_AUTH_METHOD)
        {
            return Err(MetadataError::DisallowedAuthMethod(method.clone()));
        }

        if let Some(bad) = self
            .redirect_uris
            .iter()
            .find(|uri| Url::parse(uri).is_err())
        {
            return Err(MetadataError::InvalidRedirectUri(bad.clone()));
        }

        self.software_id.ok_or(MetadataError::MissingSoftwareId)
    }

    /// Name shown for the client: its declared name, else its host.
    pub fn display_name(&self) -> String {
        self.client_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .or_else(|| {
                self.client_uri
                    .as_ref()
                    .and_then(|uri| uri.host_str())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| self.client_id.clone())
    }
}

/// Case-insensitive identifier comparison. URLs that only differ by
/// normalization (e.g. a trailing `/` on a bare origin) are equal.
fn identifiers_match(declared: &str, fetched: &str) -> bool {
    if declared.eq_ignore_ascii_case(fetched) {
        return true;
    }
    match (Url::parse(declared), Url::parse(fetched)) {
        (Ok(declared), Ok(fetched)) => declared.as_str().eq_ignore_ascii_case(fetched.as_str()),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FETCHED: &str = "https://App.Example/oauth/client.json";

    fn metadata(client_id: &str) -> ClientMetadata {
        ClientMetadata {
            client_id: client_id.to_string(),
            client_name: Some("Example App".into()),
            client_uri: Some(Url::parse("https://app.example").unwrap()),
            redirect_uris: vec!["https://app.example/cb".into()],
            logo_uri: None,
            software_id: Some(Uuid::new_v4()),
            token_endpoint_auth_method: Some("none".into()),
            client_id_issued_at: None,
        }
    }

    #[test]
    fn matching_identifier_is_accepted_case_insensitively() {
        let doc = metadata("https://app.example/OAUTH/client.json");
        assert_eq!(doc.validate(FETCHED), Ok(doc.software_id.unwrap()));
    }

    #[test]
    fn mismatched_identifier_is_rejected() {
        let doc = metadata("https://evil.example/oauth/client.json");
        assert!(matches!(
            doc.validate(FETCHED),
            Err(MetadataError::IdentifierMismatch { .. })
        ));
    }

    #[test]
    fn client_secret_post_is_rejected() {
        let mut doc = metadata(FETCHED);
        doc.token_endpoint_auth_method = Some("client_secret_post".into());
        assert_eq!(
            doc.validate(FETCHED),
            Err(MetadataError::DisallowedAuthMethod("client_secret_post".into()))
        );
    }

    #[test]
    fn other_auth_methods_pass() {
        for method in [None, Some("client_secret_basic"), Some("private_key_jwt")] {
            let mut doc = metadata(FETCHED);
            doc.token_endpoint_auth_method = method.map(String::from);
            assert!(doc.validate(FETCHED).is_ok());
        }
    }

    #[test]
    fn missing_software_id_is_rejected() {
        let mut doc = metadata(FETCHED);
        doc.software_id = None;
        assert_eq!(doc.validate(FETCHED), Err(MetadataError::MissingSoftwareId));
    }

    #[test]
    fn relative_redirect_uri_is_rejected() {
        let mut doc = metadata(FETCHED);
        doc.redirect_uris.push("/cb".into());
        assert_eq!(
            doc.validate(FETCHED),
            Err(MetadataError::InvalidRedirectUri("/cb".into()))
        );
    }

    #[test]
    fn bare_origin_matches_normalized_form() {
        let doc = metadata("https://app.example");
        assert!(doc.validate("https://app.example/").is_ok());
    }

    #[test]
    fn display_name_falls_back_to_host() {
        let mut doc = metadata(FETCHED);
        doc.client_name = Some("  ".into());
        assert_eq!(doc.display_name(), "app.example");
        doc.client_uri = None;
        assert_eq!(doc.display_name(), FETCHED);
    }
}
