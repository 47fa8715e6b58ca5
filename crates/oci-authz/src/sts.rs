//! Security-token-service key supplier
//!
//! [`StsKeySupplier`] exchanges an X.509 identity for a short-lived STS token
//! and signs requests with an ephemeral session key registered alongside it.
//! Requests signed through it carry the key id `ST$<token>`.
//!
//! ## Token lifecycle
//!
//! - A token is usable while it stays valid for at least the expiry padding
//!   (10 minutes by default).
//! - A refresh generates a new session keypair, posts the certificate chain
//!   and the session public key to `{endpoint}/x509`, and verifies the
//!   returned token against the identity key service (unless the
//!   verification policy says otherwise).
//! - The replaced token is kept as the previous token, so signers still
//!   holding its key id are answered with a rotation instead of a failure.
//!
//! All state changes happen under one async mutex held for the whole
//! operation.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use chrono::{DateTime, TimeDelta, Utc};
use http::header::CONTENT_TYPE;
use http::{HeaderValue, Method, Request, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{AuthzError, Result, ServiceResponseError};
use crate::jwt::{Token, TokenParser, VerificationPolicy, always_verify, never_verify};
use crate::keys::{KeyCache, KeyServiceKeySupplier, STS_TOKEN_PREFIX, SessionKeySupplier};
use crate::signer::{
    ClientOptions, DEFAULT_TIMEOUT, FORCE_ROTATE, HttpClient, Key, KeyIdSupplier, KeyOutcome,
    KeyRotation, KeySupplier, ReqwestClient, RequestSigner, RsaPssSha256, SigningClient,
    StaticKeySupplier,
};
use crate::x509::{CertificateSupplier, UrlX509CertificateSupplier, base64_encode_certificate};

/// Remaining lifetime below which a token is replaced
pub const STS_EXPIRY_PADDING: Duration = Duration::from_secs(10 * 60);

/// Instance metadata URL of the leaf certificate
pub const INSTANCE_CERTIFICATE_URL: &str = "http://169.254.169.254/opc/v1/identity/cert.pem";
/// Instance metadata URL of the leaf private key
pub const INSTANCE_KEY_URL: &str = "http://169.254.169.254/opc/v1/identity/key.pem";
/// Instance metadata URL of the intermediate certificate
pub const INSTANCE_INTERMEDIATE_URL: &str =
    "http://169.254.169.254/opc/v1/identity/intermediate.pem";
/// Token purpose requested by service instances
pub const SERVICE_PRINCIPAL_PURPOSE: &str = "SERVICE_PRINCIPAL";

const X509_PATH: &str = "x509";

/// Body of the `/x509` token request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct X509TokenRequest {
    /// Base64 DER of the leaf certificate
    pub certificate: String,
    /// Base64 DER of each intermediate certificate
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub intermediate_certificates: Vec<String>,
    /// Base64 PKIX DER of the session public key
    pub public_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
}

/// `{token}` body returned by the token endpoints
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub token: String,
}

/// A decoded STS token and its raw form
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StsToken {
    token: Token,
    raw: String,
}

impl StsToken {
    pub fn new(raw: impl Into<String>, token: Token) -> Self {
        Self {
            token,
            raw: raw.into(),
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn token(&self) -> &Token {
        &self.token
    }

    /// `ST$<raw>`, or the empty string for an empty token
    pub fn key_id(&self) -> String {
        if self.raw.is_empty() {
            return String::new();
        }
        format!("{STS_TOKEN_PREFIX}{}", self.raw)
    }
}

impl fmt::Display for StsToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key_id())
    }
}

#[derive(Debug, Default)]
struct StsState {
    current: Option<StsToken>,
    previous: Option<StsToken>,
}

/// Signs as an STS token minted from an X.509 identity
pub struct StsKeySupplier {
    certificates: Arc<dyn CertificateSupplier>,
    client: Arc<dyn HttpClient>,
    endpoint: String,
    purpose: Option<String>,
    session: SessionKeySupplier,
    state: Mutex<StsState>,
    verification: VerificationPolicy,
    validation_transport: Arc<dyn HttpClient>,
    validation_options: ClientOptions,
    key_cache: Arc<KeyCache>,
    expiry_padding: Duration,
}

impl StsKeySupplier {
    /// Supplier minting tokens at `endpoint` through `client`
    ///
    /// `client` must authenticate as the certificate identity (typically a
    /// [`SigningClient`] over the certificate supplier).
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::InvalidEndpoint`] for an empty endpoint and
    /// [`AuthzError::Transport`] if the default validation transport cannot be
    /// built.
    pub fn new(
        certificates: Arc<dyn CertificateSupplier>,
        client: Arc<dyn HttpClient>,
        endpoint: &str,
    ) -> Result<Self> {
        if endpoint.is_empty() {
            return Err(AuthzError::InvalidEndpoint);
        }
        let validation_options = ClientOptions::default();
        let validation_transport = Arc::new(ReqwestClient::new(validation_options.timeout)?);

        Ok(Self {
            certificates,
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            purpose: None,
            session: SessionKeySupplier::new(),
            state: Mutex::new(StsState::default()),
            verification: always_verify(),
            validation_transport,
            validation_options,
            key_cache: Arc::new(KeyCache::new()),
            expiry_padding: STS_EXPIRY_PADDING,
        })
    }

    /// Instance-principal supplier reading its identity from the instance
    /// metadata service
    ///
    /// Tokens are not verified, since the key service is not reachable from
    /// instances.
    ///
    /// # Errors
    ///
    /// See [`StsKeySupplier::new`].
    pub fn instance(
        tenant_id: &str,
        endpoint: &str,
        metadata_client: Arc<dyn HttpClient>,
    ) -> Result<Self> {
        let transport = Arc::new(ReqwestClient::new(DEFAULT_TIMEOUT)?);
        Self::instance_with_transport(tenant_id, endpoint, metadata_client, transport)
    }

    /// Like [`StsKeySupplier::instance`], sending token requests over `transport`
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::InvalidTenantId`] for an empty tenant id and the
    /// errors of [`StsKeySupplier::new`].
    pub fn instance_with_transport(
        tenant_id: &str,
        endpoint: &str,
        metadata_client: Arc<dyn HttpClient>,
        transport: Arc<dyn HttpClient>,
    ) -> Result<Self> {
        let certificates = Arc::new(UrlX509CertificateSupplier::new(
            metadata_client,
            tenant_id,
            INSTANCE_CERTIFICATE_URL,
            INSTANCE_KEY_URL,
            None,
            &[INSTANCE_INTERMEDIATE_URL],
        )?);
        let client = SigningClient::from_key_id_supplier(
            transport,
            Arc::clone(&certificates),
            Arc::new(RsaPssSha256::new()),
            &ClientOptions::default(),
        );

        Ok(Self::new(certificates, Arc::new(client), endpoint)?
            .with_verification_policy(never_verify()))
    }

    /// Instance supplier requesting service-principal tokens
    ///
    /// # Errors
    ///
    /// See [`StsKeySupplier::instance`].
    pub fn service_instance(
        tenant_id: &str,
        endpoint: &str,
        metadata_client: Arc<dyn HttpClient>,
    ) -> Result<Self> {
        Ok(Self::instance(tenant_id, endpoint, metadata_client)?
            .with_purpose(SERVICE_PRINCIPAL_PURPOSE))
    }

    /// Decide per token whether its signature is verified
    #[must_use]
    pub fn with_verification_policy(mut self, policy: VerificationPolicy) -> Self {
        self.verification = policy;
        self
    }

    /// Purpose sent with every token request
    #[must_use]
    pub fn with_purpose(mut self, purpose: impl Into<String>) -> Self {
        self.purpose = Some(purpose.into());
        self
    }

    /// Transport used to fetch the key that verifies minted tokens
    #[must_use]
    pub fn with_validation_transport(mut self, transport: Arc<dyn HttpClient>) -> Self {
        self.validation_transport = transport;
        self
    }

    /// Cache for the keys that verify minted tokens
    #[must_use]
    pub fn with_key_cache(mut self, cache: Arc<KeyCache>) -> Self {
        self.key_cache = cache;
        self
    }

    #[must_use]
    pub fn with_expiry_padding(mut self, padding: Duration) -> Self {
        self.expiry_padding = padding;
        self
    }

    /// Current token, refreshed first if it is no longer usable
    ///
    /// # Errors
    ///
    /// Returns the refresh error when no usable token can be obtained.
    pub async fn security_token(&self) -> Result<StsToken> {
        let mut state = self.state.lock().await;
        self.update_security_token(&mut state, false).await
    }

    /// Whether the held token is usable without a refresh
    pub async fn is_security_token_valid(&self) -> bool {
        let state = self.state.lock().await;
        self.is_valid(&state)
    }

    fn is_valid(&self, state: &StsState) -> bool {
        let padding = TimeDelta::from_std(self.expiry_padding).unwrap_or(TimeDelta::MAX);
        let clock = Utc::now()
            .checked_add_signed(padding)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        state
            .current
            .as_ref()
            .is_some_and(|token| !token.raw.is_empty() && token.token.valid_for(clock).is_ok())
    }

    async fn update_security_token(&self, state: &mut StsState, force: bool) -> Result<StsToken> {
        if !force
            && self.is_valid(state)
            && let Some(current) = &state.current
        {
            return Ok(current.clone());
        }

        self.session.refresh_keys()?;
        let token = self.token_from_server().await?;

        state.previous = Some(state.current.take().unwrap_or_default());
        state.current = Some(token.clone());
        info!(token_len = token.raw.len(), forced = force, "STS token refreshed");
        Ok(token)
    }

    async fn rotate_key(&self, state: &mut StsState, force: bool) -> Result<KeyRotation> {
        let token = self.update_security_token(state, force).await?;
        let previous = state
            .previous
            .as_ref()
            .map(StsToken::key_id)
            .unwrap_or_default();
        Ok(KeyRotation::new(token.key_id(), previous))
    }

    async fn token_request(&self) -> Result<X509TokenRequest> {
        let certificate = self.certificates.certificate().await?;
        let intermediates = self.certificates.intermediates().await?;

        Ok(X509TokenRequest {
            certificate: base64_encode_certificate(&certificate),
            intermediate_certificates: intermediates.iter().map(base64_encode_certificate).collect(),
            public_key: STANDARD.encode(self.session.public_key_der()?),
            purpose: self.purpose.clone(),
        })
    }

    async fn token_from_server(&self) -> Result<StsToken> {
        let body = serde_json::to_vec(&self.token_request().await?)?;
        let url = format!("{}/{X509_PATH}", self.endpoint);
        debug!(url = %url, "Requesting STS token");

        let request = Request::builder()
            .method(Method::POST)
            .uri(&url)
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .body(Bytes::from(body))?;
        let response = self.client.execute(request).await?;
        if response.status() != StatusCode::OK {
            warn!(url = %url, status = %response.status(), "STS token request failed");
            return Err(ServiceResponseError::from_response(url, &response).into());
        }

        let result: TokenResponse = serde_json::from_slice(response.body())?;
        let parser = TokenParser::with_jwt_algorithms(Arc::new(
            self.validation_key_supplier(&result.token)?,
        ));
        let token = parser
            .parse_with_policy(&result.token, self.verification.as_ref())
            .await?;
        Ok(StsToken::new(result.token, token))
    }

    /// Key service client authenticating with the token being validated
    fn validation_key_supplier(&self, raw: &str) -> Result<KeyServiceKeySupplier> {
        let key_id = format!("{STS_TOKEN_PREFIX}{raw}");
        let supplier = Arc::new(StaticKeySupplier::new(
            self.session.private_key()?,
            key_id.clone(),
        ));
        let signer = RequestSigner::new(supplier, Arc::new(RsaPssSha256::new()));
        let client = SigningClient::with_transport(
            Arc::clone(&self.validation_transport),
            signer,
            key_id,
            &self.validation_options,
        );
        KeyServiceKeySupplier::system(Arc::new(client), &self.endpoint, Arc::clone(&self.key_cache))
    }
}

impl fmt::Debug for StsKeySupplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StsKeySupplier")
            .field("endpoint", &self.endpoint)
            .field("purpose", &self.purpose)
            .field("expiry_padding", &self.expiry_padding)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl KeySupplier for StsKeySupplier {
    async fn key(&self, key_id: &str) -> Result<KeyOutcome> {
        let mut state = self.state.lock().await;

        if key_id == FORCE_ROTATE {
            return Ok(KeyOutcome::Rotate(self.rotate_key(&mut state, true).await?));
        }

        if let Some(previous) = &state.previous
            && !previous.raw.is_empty()
            && key_id == previous.key_id()
        {
            let current = state
                .current
                .as_ref()
                .map(StsToken::key_id)
                .unwrap_or_default();
            return Ok(KeyOutcome::Rotate(KeyRotation::new(current, previous.key_id())));
        }

        let valid = self.is_valid(&state);
        if valid
            && let Some(current) = &state.current
            && key_id != current.key_id()
        {
            return Err(AuthzError::KeyNotFound);
        }

        if !valid {
            return Ok(KeyOutcome::Rotate(self.rotate_key(&mut state, false).await?));
        }

        Ok(KeyOutcome::Found(Key::Private(self.session.private_key()?)))
    }
}

#[async_trait]
impl KeyIdSupplier for StsKeySupplier {
    async fn key_id(&self) -> Result<String> {
        Ok(self.security_token().await?.key_id())
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use pretty_assertions::assert_eq;
    use rsa::pkcs1::{EncodeRsaPrivateKey, LineEnding};

    use super::test_support::FakeIdentity;
    use super::*;
    use crate::signer::key::test_keys;
    use crate::signer::extract_signature_fields;
    use crate::x509::X509CertificateSupplier;
    use crate::x509::test_support::{UrlMap, certificate_pem};

    const ENDPOINT: &str = "https://identity.test/v1";

    fn certificates() -> Arc<X509CertificateSupplier> {
        let pem = certificate_pem();
        let key = test_keys::private_key().to_pkcs1_pem(LineEnding::LF).unwrap();
        let no_intermediates: [&[u8]; 0] = [];
        Arc::new(
            X509CertificateSupplier::from_pem(
                "ocid1.tenancy.test",
                pem.as_bytes(),
                no_intermediates,
                key.as_bytes(),
                None,
            )
            .unwrap(),
        )
    }

    fn supplier(identity: &Arc<FakeIdentity>) -> StsKeySupplier {
        StsKeySupplier::new(certificates(), identity.clone(), ENDPOINT)
            .unwrap()
            .with_validation_transport(identity.clone())
    }

    fn trusted_identity() -> Arc<FakeIdentity> {
        FakeIdentity::new(test_keys::other_private_key(), test_keys::other_private_key())
    }

    fn raw(key_id: &str) -> &str {
        key_id.strip_prefix(STS_TOKEN_PREFIX).unwrap()
    }

    #[tokio::test]
    async fn test_key_id_refreshes_once() {
        let identity = trusted_identity();
        let sts = supplier(&identity);

        let first = sts.key_id().await.unwrap();
        let second = sts.key_id().await.unwrap();

        assert!(first.starts_with(STS_TOKEN_PREFIX));
        assert_eq!(first, second);
        assert_eq!(identity.issued.load(Ordering::SeqCst), 1);
        assert!(sts.is_security_token_valid().await);

        let auth = identity.key_fetch_auth.lock().pop().unwrap();
        let mut headers = http::HeaderMap::new();
        headers.insert(http::header::AUTHORIZATION, auth.parse().unwrap());
        assert_eq!(extract_signature_fields(&headers).unwrap().key_id, first);
    }

    #[tokio::test]
    async fn test_token_request_body() {
        let identity = trusted_identity();
        let sts = supplier(&identity).with_purpose(SERVICE_PRINCIPAL_PURPOSE);
        sts.key_id().await.unwrap();

        let body = identity.token_requests.lock().pop().unwrap();
        let certificate = certificates().certificate().await.unwrap();
        assert_eq!(body["certificate"], base64_encode_certificate(&certificate));
        assert!(body.get("intermediateCertificates").is_none());
        assert_eq!(body["purpose"], SERVICE_PRINCIPAL_PURPOSE);
        assert_eq!(
            body["publicKey"],
            STANDARD.encode(sts.session.public_key_der().unwrap())
        );
    }

    #[tokio::test]
    async fn test_key_serves_session_key() {
        let identity = trusted_identity();
        let sts = supplier(&identity);
        let key_id = sts.key_id().await.unwrap();

        let key = sts.key(&key_id).await.unwrap().into_key().unwrap();
        assert_eq!(key, Key::Private(sts.session.private_key().unwrap()));

        let token = sts.security_token().await.unwrap();
        assert_eq!(
            Key::from(token.token().public_key().unwrap()),
            Key::from(sts.session.public_key().unwrap())
        );
    }

    #[tokio::test]
    async fn test_first_forced_rotation_has_empty_previous() {
        let identity = trusted_identity();
        let sts = supplier(&identity);

        let outcome = sts.key(FORCE_ROTATE).await.unwrap();
        let KeyOutcome::Rotate(rotation) = outcome else {
            panic!("expected rotation, got {outcome:?}");
        };
        assert!(rotation.replacement_key_id.starts_with(STS_TOKEN_PREFIX));
        assert_eq!(rotation.old_key_id, "");
    }

    #[tokio::test]
    async fn test_forced_rotation_keeps_previous() {
        let identity = trusted_identity();
        let sts = supplier(&identity);
        let t1 = sts.key_id().await.unwrap();

        let KeyOutcome::Rotate(rotation) = sts.key(FORCE_ROTATE).await.unwrap() else {
            panic!("expected rotation");
        };
        let t2 = rotation.replacement_key_id.clone();
        assert_ne!(raw(&t1), raw(&t2));
        assert_eq!(rotation.old_key_id, t1);
        assert_eq!(sts.security_token().await.unwrap().raw(), raw(&t2));

        // stale signer is redirected without a network call
        assert_eq!(
            sts.key(&t1).await.unwrap(),
            KeyOutcome::Rotate(KeyRotation::new(t2.clone(), t1.clone()))
        );
        assert_eq!(identity.issued.load(Ordering::SeqCst), 2);

        assert!(matches!(sts.key("ST$foreign").await, Err(AuthzError::KeyNotFound)));
        assert!(sts.key(&t2).await.unwrap().into_key().is_ok());
    }

    #[tokio::test]
    async fn test_expiring_token_is_replaced() {
        let identity = trusted_identity();
        identity.lifetime_secs.store(60, Ordering::SeqCst);
        let sts = supplier(&identity);

        let t1 = sts.key_id().await.unwrap();
        assert!(!sts.is_security_token_valid().await);
        identity.lifetime_secs.store(3600, Ordering::SeqCst);

        let KeyOutcome::Rotate(rotation) = sts.key(&t1).await.unwrap() else {
            panic!("expected rotation");
        };
        assert_eq!(rotation.old_key_id, t1);
        assert_eq!(sts.key_id().await.unwrap(), rotation.replacement_key_id);
        assert_eq!(identity.issued.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_refresh_failure_surfaces_response() {
        let identity = trusted_identity();
        identity.status.store(503, Ordering::SeqCst);
        let sts = supplier(&identity);

        assert!(matches!(
            sts.key_id().await,
            Err(AuthzError::ServiceResponse(err)) if err.status == Some(StatusCode::SERVICE_UNAVAILABLE)
        ));
        assert!(!sts.is_security_token_valid().await);
    }

    #[tokio::test]
    async fn test_untrusted_token_rejected_unless_policy_skips() {
        let identity = FakeIdentity::new(test_keys::other_private_key(), test_keys::private_key());

        let verifying = supplier(&identity);
        assert!(matches!(
            verifying.key_id().await,
            Err(AuthzError::SignatureVerification)
        ));

        let skipping = supplier(&identity).with_verification_policy(never_verify());
        assert!(skipping.key_id().await.is_ok());
    }

    #[tokio::test]
    async fn test_validation_keys_are_cached() {
        let identity = trusted_identity();
        let cache = Arc::new(KeyCache::new());
        let sts = supplier(&identity).with_key_cache(cache.clone());

        sts.key_id().await.unwrap();
        sts.key(FORCE_ROTATE).await.unwrap();

        assert_eq!(identity.key_fetches.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_instance_supplier_signs_with_metadata_identity() {
        let metadata = Arc::new(UrlMap::default());
        let pem = certificate_pem();
        metadata.set(INSTANCE_CERTIFICATE_URL, pem.clone());
        metadata.set(INSTANCE_INTERMEDIATE_URL, pem);
        metadata.set(
            INSTANCE_KEY_URL,
            test_keys::private_key().to_pkcs1_pem(LineEnding::LF).unwrap().to_string(),
        );
        // issuer is not trusted: instance tokens are never verified
        let identity = FakeIdentity::new(test_keys::other_private_key(), test_keys::private_key());

        let sts = StsKeySupplier::instance_with_transport(
            "ocid1.tenancy.test",
            ENDPOINT,
            metadata,
            identity.clone(),
        )
        .unwrap()
        .with_purpose(SERVICE_PRINCIPAL_PURPOSE);

        assert!(sts.key_id().await.is_ok());
        assert_eq!(identity.key_fetches.load(Ordering::SeqCst), 0);
        let body = identity.token_requests.lock().pop().unwrap();
        assert_eq!(body["intermediateCertificates"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_sts_token_key_id() {
        assert_eq!(StsToken::default().key_id(), "");
        let token = StsToken::new("a.b.c", Token::default());
        assert_eq!(token.key_id(), "ST$a.b.c");
        assert_eq!(token.to_string(), "ST$a.b.c");
    }
}
