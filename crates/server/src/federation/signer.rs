//! HTTP message signatures for requests made on behalf of an identity.
//!
//! Requests are signed over `(request-target) host date digest` and carry a
//! `Signature` header with `keyId`, `algorithm`, `created`, `expires`,
//! `headers` and `signature` parameters. The algorithm is picked from the
//! concrete key type; the first candidate that signs successfully wins.

use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use bytes::Bytes;
use http::header::{DATE, HOST, HeaderName, HeaderValue};
use http::Request;
use p256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use rsa::Pkcs1v15Sign;
use sha2::{Digest, Sha256, Sha512};
use time::OffsetDateTime;
use time::macros::format_description;
use tracing::debug;

use crate::error::SignError;
use crate::federation::keys::{KeyKind, KeyProvider, PrivateKey, PublicKey};

/// How long a signature stays valid after it is produced.
pub const SIGNATURE_VALIDITY_SECS: i64 = 3600;

/// Headers covered by every outbound signature, in signing order.
pub const SIGNED_HEADERS: [&str; 4] = ["(request-target)", "host", "date", "digest"];

pub static SIGNATURE: HeaderName = HeaderName::from_static("signature");
pub static DIGEST: HeaderName = HeaderName::from_static("digest");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    RsaSha256,
    RsaSha512,
    EcdsaSha256,
    EcdsaSha512,
    Ed25519,
}

impl Algorithm {
    pub fn name(self) -> &'static str {
        match self {
            Algorithm::RsaSha256 => "rsa-sha256",
            Algorithm::RsaSha512 => "rsa-sha512",
            Algorithm::EcdsaSha256 => "ecdsa-sha256",
            Algorithm::EcdsaSha512 => "ecdsa-sha512",
            Algorithm::Ed25519 => "ed25519",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "rsa-sha256" => Some(Algorithm::RsaSha256),
            "rsa-sha512" => Some(Algorithm::RsaSha512),
            "ecdsa-sha256" => Some(Algorithm::EcdsaSha256),
            "ecdsa-sha512" => Some(Algorithm::EcdsaSha512),
            "ed25519" => Some(Algorithm::Ed25519),
            _ => None,
        }
    }

    /// Algorithms compatible with `kind`, in preference order.
    pub fn candidates(kind: KeyKind) -> &'static [Algorithm] {
        match kind {
            KeyKind::Rsa => &[Algorithm::RsaSha256, Algorithm::RsaSha512],
            KeyKind::Ecdsa => &[Algorithm::EcdsaSha512, Algorithm::EcdsaSha256],
            KeyKind::Ed25519 => &[Algorithm::Ed25519],
        }
    }

    pub fn key_kind(self) -> KeyKind {
        match self {
            Algorithm::RsaSha256 | Algorithm::RsaSha512 => KeyKind::Rsa,
            Algorithm::EcdsaSha256 | Algorithm::EcdsaSha512 => KeyKind::Ecdsa,
            Algorithm::Ed25519 => KeyKind::Ed25519,
        }
    }
}

/// Material derived while signing or verifying one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureContext {
    pub algorithm: Algorithm,
    pub digest: String,
    pub key_id: String,
    pub headers: Vec<String>,
    pub created: i64,
    pub expires: i64,
}

/// Signs outbound requests with one identity's key.
#[derive(Debug, Clone)]
pub struct MessageSigner {
    provider: KeyProvider,
    allowed: Option<Vec<Algorithm>>,
}

impl MessageSigner {
    pub fn new(provider: KeyProvider) -> Self {
        Self {
            provider,
            allowed: None,
        }
    }

    /// Restricts signing to the given algorithms. Candidates incompatible with
    /// the key are still never attempted.
    pub fn with_algorithms(mut self, allowed: Vec<Algorithm>) -> Self {
        self.allowed = Some(allowed);
        self
    }

    pub fn provider(&self) -> &KeyProvider {
        &self.provider
    }

    #[tracing::instrument(
        name = "sign_request",
        skip_all,
        fields(key_id = %self.provider.key_id(), method = %request.method(), uri = %request.uri())
    )]
    pub fn sign(&self, request: &mut Request<Bytes>) -> Result<SignatureContext, SignError> {
        let candidates: Vec<Algorithm> = Algorithm::candidates(self.provider.key().kind())
            .iter()
            .copied()
            .filter(|alg| {
                self.allowed
                    .as_ref()
                    .is_none_or(|allowed| allowed.contains(alg))
            })
            .collect();
        sign_with(
            request,
            self.provider.key(),
            self.provider.key_id().as_str(),
            &candidates,
        )
    }
}

/// Signs `request` in place with `key`, trying every algorithm compatible with
/// the key type.
pub fn sign_request(
    request: &mut Request<Bytes>,
    key: &PrivateKey,
    key_id: &str,
) -> Result<SignatureContext, SignError> {
    sign_with(request, key, key_id, Algorithm::candidates(key.kind()))
}

fn sign_with(
    request: &mut Request<Bytes>,
    key: &PrivateKey,
    key_id: &str,
    candidates: &[Algorithm],
) -> Result<SignatureContext, SignError> {
    let host = match request.headers().get(HOST) {
        Some(host) => host.clone(),
        None => {
            let authority = request
                .uri()
                .authority()
                .ok_or(SignError::MissingHost)?
                .as_str();
            HeaderValue::from_str(authority).map_err(|_| SignError::InvalidHeader("host"))?
        }
    };
    request.headers_mut().insert(HOST, host);

    let now = OffsetDateTime::now_utc();
    if !request.headers().contains_key(DATE) {
        let date = http_date(now)?;
        request.headers_mut().insert(
            DATE,
            HeaderValue::from_str(&date).map_err(|_| SignError::InvalidHeader("date"))?,
        );
    }

    let digest = body_digest(request.body());
    request.headers_mut().insert(
        DIGEST.clone(),
        HeaderValue::from_str(&digest).map_err(|_| SignError::InvalidHeader("digest"))?,
    );

    let headers: Vec<String> = SIGNED_HEADERS.iter().map(|h| h.to_string()).collect();
    let created = now.unix_timestamp();
    let expires = created + SIGNATURE_VALIDITY_SECS;
    let signing_string = signing_string(request, &headers, created, expires)?;

    let mut attempted = Vec::with_capacity(candidates.len());
    for &algorithm in candidates {
        attempted.push(algorithm.name());
        if algorithm.key_kind() != key.kind() {
            continue;
        }
        let signature = match sign_bytes(algorithm, key, signing_string.as_bytes()) {
            Ok(signature) => signature,
            Err(reason) => {
                debug!(algorithm = algorithm.name(), %reason, "Signer candidate failed");
                continue;
            }
        };

        let header = format!(
            "keyId=\"{}\",algorithm=\"{}\",created={},expires={},headers=\"{}\",signature=\"{}\"",
            key_id,
            algorithm.name(),
            created,
            expires,
            headers.join(" "),
            BASE64_STANDARD.encode(signature)
        );
        request.headers_mut().insert(
            SIGNATURE.clone(),
            HeaderValue::from_str(&header).map_err(|_| SignError::InvalidHeader("signature"))?,
        );

        return Ok(SignatureContext {
            algorithm,
            digest,
            key_id: key_id.to_string(),
            headers,
            created,
            expires,
        });
    }

    Err(SignError::NoSuitableSigner {
        key_type: key.kind().as_str(),
        attempted,
    })
}

/// `SHA-256=<base64>` digest of the exact body bytes.
pub fn body_digest(body: &[u8]) -> String {
    format!("SHA-256={}", BASE64_STANDARD.encode(Sha256::digest(body)))
}

fn http_date(at: OffsetDateTime) -> Result<String, SignError> {
    at.format(format_description!(
        "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
    ))
    .map_err(|_| SignError::InvalidHeader("date"))
}

fn signing_string(
    request: &Request<Bytes>,
    headers: &[String],
    created: i64,
    expires: i64,
) -> Result<String, SignError> {
    let mut lines = Vec::with_capacity(headers.len());
    for name in headers {
        let line = match name.as_str() {
            "(request-target)" => {
                let target = request
                    .uri()
                    .path_and_query()
                    .map(|pq| pq.as_str())
                    .unwrap_or("/");
                format!(
                    "(request-target): {} {}",
                    request.method().as_str().to_ascii_lowercase(),
                    target
                )
            }
            "(created)" => format!("(created): {created}"),
            "(expires)" => format!("(expires): {expires}"),
            header => {
                let value = request
                    .headers()
                    .get(header)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| {
                        SignError::MalformedSignature(format!("signed header {header} missing"))
                    })?;
                format!("{header}: {}", value.trim())
            }
        };
        lines.push(line);
    }
    Ok(lines.join("\n"))
}

fn sign_bytes(algorithm: Algorithm, key: &PrivateKey, message: &[u8]) -> Result<Vec<u8>, String> {
    match (algorithm, key) {
        (Algorithm::RsaSha256, PrivateKey::Rsa(key)) => key
            .sign(Pkcs1v15Sign::new::<Sha256>(), &Sha256::digest(message))
            .map_err(|e| e.to_string()),
        (Algorithm::RsaSha512, PrivateKey::Rsa(key)) => key
            .sign(Pkcs1v15Sign::new::<Sha512>(), &Sha512::digest(message))
            .map_err(|e| e.to_string()),
        (Algorithm::EcdsaSha256, PrivateKey::Ecdsa(key)) => {
            let signature: p256::ecdsa::Signature = key
                .sign_prehash(&Sha256::digest(message))
                .map_err(|e| e.to_string())?;
            Ok(signature.to_der().as_bytes().to_vec())
        }
        (Algorithm::EcdsaSha512, PrivateKey::Ecdsa(key)) => {
            let signature: p256::ecdsa::Signature = key
                .sign_prehash(&Sha512::digest(message))
                .map_err(|e| e.to_string())?;
            Ok(signature.to_der().as_bytes().to_vec())
        }
        (Algorithm::Ed25519, PrivateKey::Ed25519(key)) => {
            use ed25519_dalek::Signer;
            key.try_sign(message)
                .map(|signature| signature.to_bytes().to_vec())
                .map_err(|e| e.to_string())
        }
        (algorithm, key) => Err(format!(
            "{} cannot sign with a {} key",
            algorithm.name(),
            key.kind()
        )),
    }
}

fn verify_bytes(
    algorithm: Algorithm,
    key: &PublicKey,
    message: &[u8],
    signature: &[u8],
) -> Result<(), SignError> {
    let failed = |e: &dyn std::fmt::Display| SignError::Verification(e.to_string());
    match (algorithm, key) {
        (Algorithm::RsaSha256, PublicKey::Rsa(key)) => key
            .verify(
                Pkcs1v15Sign::new::<Sha256>(),
                &Sha256::digest(message),
                signature,
            )
            .map_err(|e| failed(&e)),
        (Algorithm::RsaSha512, PublicKey::Rsa(key)) => key
            .verify(
                Pkcs1v15Sign::new::<Sha512>(),
                &Sha512::digest(message),
                signature,
            )
            .map_err(|e| failed(&e)),
        (Algorithm::EcdsaSha256, PublicKey::Ecdsa(key)) => {
            let signature = p256::ecdsa::Signature::from_der(signature).map_err(|e| failed(&e))?;
            key.verify_prehash(&Sha256::digest(message), &signature)
                .map_err(|e| failed(&e))
        }
        (Algorithm::EcdsaSha512, PublicKey::Ecdsa(key)) => {
            let signature = p256::ecdsa::Signature::from_der(signature).map_err(|e| failed(&e))?;
            key.verify_prehash(&Sha512::digest(message), &signature)
                .map_err(|e| failed(&e))
        }
        (Algorithm::Ed25519, PublicKey::Ed25519(key)) => {
            use ed25519_dalek::Verifier;
            let signature =
                ed25519_dalek::Signature::from_slice(signature).map_err(|e| failed(&e))?;
            key.verify(message, &signature).map_err(|e| failed(&e))
        }
        (algorithm, key) => Err(SignError::Verification(format!(
            "{} is incompatible with a {} key",
            algorithm.name(),
            key.kind()
        ))),
    }
}

struct SignatureParams {
    key_id: String,
    algorithm: Option<String>,
    created: Option<i64>,
    expires: Option<i64>,
    headers: Vec<String>,
    signature: Vec<u8>,
}

fn parse_signature_header(header: &str) -> Result<SignatureParams, SignError> {
    let malformed = |what: &str| SignError::MalformedSignature(what.to_string());

    let mut key_id = None;
    let mut algorithm = None;
    let mut created = None;
    let mut expires = None;
    let mut headers = None;
    let mut signature = None;

    let mut rest = header.trim();
    while !rest.is_empty() {
        let (name, after) = rest.split_once('=').ok_or_else(|| malformed("parameter"))?;
        let (value, after) = if let Some(quoted) = after.strip_prefix('"') {
            let end = quoted.find('"').ok_or_else(|| malformed("unterminated quote"))?;
            (&quoted[..end], &quoted[end + 1..])
        } else {
            let end = after.find(',').unwrap_or(after.len());
            (&after[..end], &after[end..])
        };
        match name.trim() {
            "keyId" => key_id = Some(value.to_string()),
            "algorithm" => algorithm = Some(value.to_string()),
            "created" => created = Some(value.parse().map_err(|_| malformed("created"))?),
            "expires" => expires = Some(value.parse().map_err(|_| malformed("expires"))?),
            "headers" => headers = Some(value.split_whitespace().map(str::to_lowercase).collect()),
            "signature" => {
                signature = Some(
                    BASE64_STANDARD
                        .decode(value)
                        .map_err(|_| malformed("signature encoding"))?,
                )
            }
            _ => {}
        }
        rest = after.trim_start_matches(',').trim_start();
    }

    Ok(SignatureParams {
        key_id: key_id.ok_or_else(|| malformed("keyId"))?,
        algorithm,
        created,
        expires,
        headers: headers.unwrap_or_else(|| vec!["date".to_string()]),
        signature: signature.ok_or_else(|| malformed("signature"))?,
    })
}

/// Checks the `Signature` header of `request` against `public_key_pem`.
///
/// When `digest` is among the signed headers the body is re-hashed and must
/// match. An `expires` in the past is rejected.
pub fn verify(request: &Request<Bytes>, public_key_pem: &str) -> Result<SignatureContext, SignError> {
    let header = request
        .headers()
        .get(&SIGNATURE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| SignError::MalformedSignature("no Signature header".into()))?;
    let params = parse_signature_header(header)?;
    let key = PublicKey::from_pem(public_key_pem)?;

    let now = OffsetDateTime::now_utc().unix_timestamp();
    if let Some(expires) = params.expires.filter(|expires| *expires < now) {
        return Err(SignError::Expired(expires));
    }

    let digest = body_digest(request.body());
    if params.headers.iter().any(|h| h == "digest") {
        let sent = request
            .headers()
            .get(&DIGEST)
            .and_then(|v| v.to_str().ok())
            .ok_or(SignError::DigestMismatch)?;
        if sent != digest {
            return Err(SignError::DigestMismatch);
        }
    }

    let created = params.created.unwrap_or(now);
    let expires = params.expires.unwrap_or(created + SIGNATURE_VALIDITY_SECS);
    let message = signing_string(request, &params.headers, created, expires)?;

    let declared = params
        .algorithm
        .as_deref()
        .and_then(Algorithm::from_name);
    let candidates: &[Algorithm] = match declared {
        Some(ref algorithm) => std::slice::from_ref(algorithm),
        None => Algorithm::candidates(key.kind()),
    };

    let mut last_error = SignError::Verification("no candidate algorithm".into());
    for &algorithm in candidates {
        match verify_bytes(algorithm, &key, message.as_bytes(), &params.signature) {
            Ok(()) => {
                return Ok(SignatureContext {
                    algorithm,
                    digest,
                    key_id: params.key_id,
                    headers: params.headers,
                    created,
                    expires,
                });
            }
            Err(e) => last_error = e,
        }
    }
    Err(last_error)
}
