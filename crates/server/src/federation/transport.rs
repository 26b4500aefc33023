//! Outbound HTTP transport and its signing wrapper.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response, StatusCode, header};
use http_body_util::BodyExt;
use tracing::{debug, warn};

use crate::error::FetchError;
use crate::federation::signer::MessageSigner;

/// A pluggable HTTP transport.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_http(&self, request: Request<Bytes>) -> Result<Response<Bytes>, FetchError>;
}

#[async_trait]
impl Transport for reqwest::Client {
    async fn send_http(&self, request: Request<Bytes>) -> Result<Response<Bytes>, FetchError> {
        let (parts, body) = request.into_parts();

        let response = self
            .request(parts.method, parts.uri.to_string())
            .headers(parts.headers)
            .body(body)
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let mut builder = Response::builder().status(response.status());
        for (name, value) in response.headers() {
            builder = builder.header(name, value);
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        builder
            .body(body)
            .map_err(|e| FetchError::Network(e.to_string()))
    }
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send_http(&self, request: Request<Bytes>) -> Result<Response<Bytes>, FetchError> {
        self.as_ref().send_http(request).await
    }
}

/// Signs every request with the wrapped identity's key before handing it to
/// the inner transport. A request that cannot be signed is never sent.
pub struct SignedTransport<T> {
    inner: T,
    signer: MessageSigner,
}

impl<T: Transport> SignedTransport<T> {
    pub fn new(inner: T, signer: MessageSigner) -> Self {
        Self { inner, signer }
    }

    pub fn signer(&self) -> &MessageSigner {
        &self.signer
    }

    /// Buffers an arbitrary request body, signs, and sends.
    pub async fn send_body<B>(&self, request: Request<B>) -> Result<Response<Bytes>, FetchError>
    where
        B: http_body::Body + Send,
        B::Error: std::fmt::Display,
    {
        let (parts, body) = request.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?
            .to_bytes();
        self.send_http(Request::from_parts(parts, body)).await
    }
}

#[async_trait]
impl<T: Transport> Transport for SignedTransport<T> {
    async fn send_http(&self, mut request: Request<Bytes>) -> Result<Response<Bytes>, FetchError> {
        let context = self.signer.sign(&mut request)?;
        debug!(
            algorithm = context.algorithm.name(),
            key_id = %context.key_id,
            "Signed outbound request"
        );
        self.inner.send_http(request).await
    }
}

/// GETs a JSON document, bounded by `deadline`.
#[tracing::instrument(name = "fetch_json", skip(transport), fields(url = %url))]
pub async fn fetch_json(
    transport: &dyn Transport,
    url: &url::Url,
    user_agent: &str,
    deadline: Duration,
) -> Result<Bytes, FetchError> {
    let request = Request::get(url.as_str())
        .header(header::ACCEPT, "application/json")
        .header(header::USER_AGENT, user_agent)
        .body(Bytes::new())
        .map_err(|e| FetchError::Network(e.to_string()))?;

    let response = tokio::time::timeout(deadline, transport.send_http(request))
        .await
        .map_err(|_| {
            warn!(timeout = ?deadline, "Timed out fetching document");
            FetchError::Timeout(deadline)
        })??;

    let status = response.status();
    if status != StatusCode::OK {
        return Err(FetchError::Http {
            status,
            context: url.to_string(),
        });
    }

    if let Some(content_type) = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        && !content_type.to_ascii_lowercase().contains("json")
    {
        return Err(FetchError::UnexpectedContentType(content_type.to_string()));
    }

    Ok(response.into_body())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::federation::keys::{KeyKind, KeyProvider, PrivateKey};
    use crate::federation::signer::{self, SIGNATURE};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<Request<Bytes>>>,
    }

    #[async_trait]
    impl Transport for Recorder {
        async fn send_http(&self, request: Request<Bytes>) -> Result<Response<Bytes>, FetchError> {
            self.seen.lock().unwrap().push(request);
            Ok(Response::builder()
                .status(200)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Bytes::from_static(b"{}"))
                .unwrap())
        }
    }

    fn signed(recorder: Arc<Recorder>) -> (SignedTransport<Arc<Recorder>>, String) {
        let key = PrivateKey::generate(KeyKind::Ed25519).unwrap();
        let pem = key.public_key_pem().unwrap();
        let provider = KeyProvider::new(
            key,
            url::Url::parse("https://fed.example/actors/admin#main").unwrap(),
        );
        (SignedTransport::new(recorder, MessageSigner::new(provider)), pem)
    }

    #[tokio::test]
    async fn every_request_leaves_signed() {
        let recorder = Arc::new(Recorder::default());
        let (transport, pem) = signed(recorder.clone());

        let url = url::Url::parse("https://app.example/client.json").unwrap();
        fetch_json(&transport, &url, "test-agent", Duration::from_secs(5))
            .await
            .unwrap();

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].headers().contains_key(&SIGNATURE));
        signer::verify(&seen[0], &pem).unwrap();
    }

    #[tokio::test]
    async fn streaming_body_is_buffered_before_signing() {
        let recorder = Arc::new(Recorder::default());
        let (transport, pem) = signed(recorder.clone());

        let request = Request::post("https://remote.example/inbox")
            .body(http_body_util::Full::new(Bytes::from_static(b"hello")))
            .unwrap();
        transport.send_body(request).await.unwrap();

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen[0].body().as_ref(), b"hello");
        let ctx = signer::verify(&seen[0], &pem).unwrap();
        assert_eq!(ctx.digest, signer::body_digest(b"hello"));
    }

    #[tokio::test]
    async fn non_json_response_is_rejected() {
        struct Html;
        #[async_trait]
        impl Transport for Html {
            async fn send_http(&self, _: Request<Bytes>) -> Result<Response<Bytes>, FetchError> {
                Ok(Response::builder()
                    .status(200)
                    .header(header::CONTENT_TYPE, "text/html")
                    .body(Bytes::from_static(b"<html/>"))
                    .unwrap())
            }
        }

        let url = url::Url::parse("https://app.example/").unwrap();
        let err = fetch_json(&Html, &url, "ua", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::UnexpectedContentType(_)));
        assert!(!err.is_retryable());
    }
}
