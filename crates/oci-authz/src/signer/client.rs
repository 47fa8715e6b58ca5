//! Signing HTTP client
//!
//! [`SigningClient`] prepares, signs and sends requests over any
//! [`HttpClient`] transport. When the key supplier signals a rotation the
//! client remembers the replacement key id, re-runs the prepare step and
//! signs again, exactly once per call.
//!
//! ## Prepare step
//!
//! [`OciRequestPreparer`] sets `Date` on every request. For POST, PUT and
//! PATCH it also sets `x-content-sha256`, `Content-Length` and a default
//! `Content-Type: application/json`. Request bodies are buffered [`Bytes`],
//! so a body can be hashed and re-sent any number of times.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, DATE};
use http::{HeaderValue, Request, Response};
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::algorithm::Algorithm;
use super::headers::{DEFAULT_READ_HEADERS, DEFAULT_WRITE_HEADERS, HDR_X_CONTENT_SHA256, is_write_method};
use super::key::{KeyIdSupplier, KeySupplier};
use super::request::{RequestSigner, SignOutcome};
use crate::error::{AuthzError, Result};

/// Default wall-clock timeout of the reqwest transport
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const DEFAULT_CONTENT_TYPE: &str = "application/json";

/// Sends a fully buffered HTTP request
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Execute `request` and buffer the response body
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::Transport`] when the request cannot be sent or
    /// the response cannot be read.
    async fn execute(&self, request: Request<Bytes>) -> Result<Response<Bytes>>;
}

/// [`HttpClient`] over `reqwest` with rustls
#[derive(Clone)]
pub struct ReqwestClient {
    inner: reqwest::Client,
}

impl ReqwestClient {
    /// Create a transport with the given timeout
    ///
    /// Redirects are not followed, so a signed request is never replayed
    /// against another host.
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::Transport`] if the TLS backend cannot be
    /// initialised.
    pub fn new(timeout: Duration) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(timeout)
            .build()?;
        Ok(Self { inner })
    }

    /// Create from an existing reqwest client
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { inner: client }
    }
}

impl std::fmt::Debug for ReqwestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestClient")
            .field("inner", &"<reqwest::Client>")
            .finish()
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn execute(&self, request: Request<Bytes>) -> Result<Response<Bytes>> {
        let request = reqwest::Request::try_from(request)?;
        let response = self.inner.execute(request).await?;

        let status = response.status();
        let version = response.version();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        let mut out = Response::new(body);
        *out.status_mut() = status;
        *out.version_mut() = version;
        *out.headers_mut() = headers;
        Ok(out)
    }
}

/// Signing client options
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Transport timeout
    pub timeout: Duration,
    /// Headers signed on GET, HEAD, DELETE and other reads
    pub read_headers: Vec<String>,
    /// Headers signed on POST, PUT and PATCH
    pub write_headers: Vec<String>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            read_headers: DEFAULT_READ_HEADERS.iter().map(|h| (*h).to_string()).collect(),
            write_headers: DEFAULT_WRITE_HEADERS.iter().map(|h| (*h).to_string()).collect(),
        }
    }
}

/// Sets mandatory headers and picks the headers to sign
#[async_trait]
pub trait PrepareRequest: Send + Sync {
    /// Mutate `request` and return the header names to sign
    ///
    /// # Errors
    ///
    /// Returns an error if a header value cannot be built.
    async fn prepare(&self, request: &mut Request<Bytes>) -> Result<Vec<String>>;
}

/// The OCI prepare step
#[derive(Debug, Clone)]
pub struct OciRequestPreparer {
    read_headers: Vec<String>,
    write_headers: Vec<String>,
}

impl OciRequestPreparer {
    /// Preparer signing the header lists of `options`
    pub fn new(options: &ClientOptions) -> Self {
        Self {
            read_headers: options.read_headers.clone(),
            write_headers: options.write_headers.clone(),
        }
    }
}

impl Default for OciRequestPreparer {
    fn default() -> Self {
        Self::new(&ClientOptions::default())
    }
}

/// Current time in HTTP date format
pub fn http_date() -> String {
    chrono::Utc::now()
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

/// Base64 SHA-256 of a request body
pub fn body_sha256(body: &[u8]) -> String {
    STANDARD.encode(Sha256::digest(body))
}

fn header(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| AuthzError::InvalidRequest(e.to_string()))
}

#[async_trait]
impl PrepareRequest for OciRequestPreparer {
    async fn prepare(&self, request: &mut Request<Bytes>) -> Result<Vec<String>> {
        request.headers_mut().insert(DATE, header(&http_date())?);

        if !is_write_method(request.method()) {
            return Ok(self.read_headers.clone());
        }

        let digest = body_sha256(request.body());
        let length = request.body().len().to_string();
        let headers = request.headers_mut();
        headers.insert(HDR_X_CONTENT_SHA256, header(&digest)?);
        headers.insert(CONTENT_LENGTH, header(&length)?);
        if headers.get(CONTENT_TYPE).is_none_or(|v| v.is_empty()) {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(DEFAULT_CONTENT_TYPE));
        }

        Ok(self.write_headers.clone())
    }
}

/// HTTP client that signs every request before sending it
pub struct SigningClient {
    transport: Arc<dyn HttpClient>,
    preparer: Arc<dyn PrepareRequest>,
    signer: RequestSigner,
    key_id: RwLock<String>,
    key_id_supplier: Option<Arc<dyn KeyIdSupplier>>,
}

impl SigningClient {
    /// Signing client over a reqwest transport with default options
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::Transport`] if the transport cannot be built.
    pub fn new(signer: RequestSigner, key_id: impl Into<String>) -> Result<Self> {
        Self::with_options(signer, key_id, &ClientOptions::default())
    }

    /// Signing client over a reqwest transport
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::Transport`] if the transport cannot be built.
    pub fn with_options(
        signer: RequestSigner,
        key_id: impl Into<String>,
        options: &ClientOptions,
    ) -> Result<Self> {
        let transport = Arc::new(ReqwestClient::new(options.timeout)?);
        Ok(Self::with_transport(transport, signer, key_id, options))
    }

    /// Signing client over any transport
    pub fn with_transport(
        transport: Arc<dyn HttpClient>,
        signer: RequestSigner,
        key_id: impl Into<String>,
        options: &ClientOptions,
    ) -> Self {
        Self {
            transport,
            preparer: Arc::new(OciRequestPreparer::new(options)),
            signer,
            key_id: RwLock::new(key_id.into()),
            key_id_supplier: None,
        }
    }

    /// Signing client whose key id is resolved through `supplier` on every call
    pub fn from_key_id_supplier<K>(
        transport: Arc<dyn HttpClient>,
        supplier: Arc<K>,
        algorithm: Arc<dyn Algorithm>,
        options: &ClientOptions,
    ) -> Self
    where
        K: KeyIdSupplier + 'static,
    {
        let key_supplier: Arc<dyn KeySupplier> = supplier.clone();
        let key_id_supplier: Arc<dyn KeyIdSupplier> = supplier;
        let mut client = Self::with_transport(
            transport,
            RequestSigner::new(key_supplier, algorithm),
            String::new(),
            options,
        );
        client.key_id_supplier = Some(key_id_supplier);
        client
    }

    /// Replace the prepare step
    #[must_use]
    pub fn with_preparer(mut self, preparer: Arc<dyn PrepareRequest>) -> Self {
        self.preparer = preparer;
        self
    }

    /// Last key id this client signed with
    pub fn key_id(&self) -> String {
        self.key_id.read().clone()
    }

    /// Override the stored key id
    pub fn set_key_id(&self, key_id: impl Into<String>) {
        *self.key_id.write() = key_id.into();
    }

    /// Request signer used by this client
    pub fn signer(&self) -> &RequestSigner {
        &self.signer
    }

    async fn active_key_id(&self) -> Result<String> {
        match &self.key_id_supplier {
            Some(supplier) => {
                let key_id = supplier.key_id().await?;
                self.set_key_id(key_id.clone());
                Ok(key_id)
            }
            None => Ok(self.key_id()),
        }
    }

    /// Prepare and sign `request` without sending it
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::ReplacementKeyIdEmpty`] if a rotation carries no
    /// replacement id, [`AuthzError::KeyRotated`] if the retry rotates again,
    /// and any prepare, key supplier or algorithm error.
    pub async fn sign(&self, mut request: Request<Bytes>) -> Result<Request<Bytes>> {
        let headers = self.preparer.prepare(&mut request).await?;
        let key_id = self.active_key_id().await?;

        let rotation = match self.signer.sign(&mut request, &key_id, &headers).await? {
            SignOutcome::Signed => return Ok(request),
            SignOutcome::Rotate(rotation) => rotation,
        };

        if rotation.replacement_key_id.is_empty() {
            return Err(AuthzError::ReplacementKeyIdEmpty);
        }
        warn!(
            old_key_id_len = rotation.old_key_id.len(),
            new_key_id_len = rotation.replacement_key_id.len(),
            "Signing key rotated, retrying once"
        );
        self.set_key_id(rotation.replacement_key_id.clone());

        let headers = self.preparer.prepare(&mut request).await?;
        match self
            .signer
            .sign(&mut request, &rotation.replacement_key_id, &headers)
            .await?
        {
            SignOutcome::Signed => Ok(request),
            SignOutcome::Rotate(again) => Err(AuthzError::KeyRotated(again)),
        }
    }
}

impl std::fmt::Debug for SigningClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningClient")
            .field("signer", &self.signer)
            .field("key_id_supplier", &self.key_id_supplier.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl HttpClient for SigningClient {
    async fn execute(&self, request: Request<Bytes>) -> Result<Response<Bytes>> {
        let request = self.sign(request).await?;
        debug!(method = %request.method(), uri = %request.uri(), "Sending signed request");
        self.transport.execute(request).await
    }
}
