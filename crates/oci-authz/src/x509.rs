//! X.509 identity material
//!
//! A [`CertificateSupplier`] hands out the leaf certificate, its
//! intermediates and the private key of a workload identity. Two suppliers
//! are provided:
//!
//! - [`X509CertificateSupplier`] holds fixed material; its key id is derived
//!   once at construction.
//! - [`UrlX509CertificateSupplier`] re-fetches every accessor from URLs (the
//!   instance metadata service). A key id computed from an older certificate
//!   is answered with a rotation to the current one.
//!
//! Key ids have the form `{tenant}/fed-x509/{SHA-1 fingerprint}` where the
//! fingerprint is upper-case hex, colon separated.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use http::{Method, Request, StatusCode};
use pkcs8::EncryptedPrivateKeyInfo;
use rsa::RsaPrivateKey;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use tracing::{debug, warn};
use url::Url;

use crate::error::{AuthzError, Result, ServiceResponseError};
use crate::signer::{HttpClient, Key, KeyIdSupplier, KeyOutcome, KeyRotation, KeySupplier};

const CERTIFICATE_TYPE: &str = "CERTIFICATE";
const PKCS1_KEY_TYPE: &str = "RSA PRIVATE KEY";
const PKCS8_KEY_TYPE: &str = "PRIVATE KEY";
const ENCRYPTED_PKCS8_KEY_TYPE: &str = "ENCRYPTED PRIVATE KEY";
const LEGACY_ENCRYPTION_HEADER: &str = "Proc-Type";
const KEY_ID_SEPARATOR: &str = "fed-x509";

/// DER-encoded X.509 certificate
#[derive(Clone, PartialEq, Eq)]
pub struct Certificate {
    der: Vec<u8>,
}

impl Certificate {
    pub fn from_der(der: impl Into<Vec<u8>>) -> Self {
        Self { der: der.into() }
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// PEM encoding of the certificate
    pub fn to_pem(&self) -> String {
        pem::encode(&pem::Pem::new(CERTIFICATE_TYPE, self.der.clone()))
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("der_len", &self.der.len())
            .finish()
    }
}

/// Decode the first PEM `CERTIFICATE` block of `data`
///
/// # Errors
///
/// Returns [`AuthzError::InvalidCertPem`] if there is no PEM block, the block
/// is not a certificate or it is empty.
pub fn parse_certificate_pem(data: &[u8]) -> Result<Certificate> {
    let block = pem::parse(data).map_err(|_| AuthzError::InvalidCertPem)?;
    if block.tag() != CERTIFICATE_TYPE || block.contents().is_empty() {
        return Err(AuthzError::InvalidCertPem);
    }
    Ok(Certificate::from_der(block.into_contents()))
}

/// Decode an RSA private key from PEM
///
/// Accepts PKCS#1 `RSA PRIVATE KEY`, PKCS#8 `PRIVATE KEY` and encrypted
/// PKCS#8 `ENCRYPTED PRIVATE KEY` blocks. The passphrase is only consulted
/// for the encrypted form.
///
/// # Errors
///
/// Returns [`AuthzError::InvalidPrivateKeyPem`] for malformed input, non-RSA
/// keys, OpenSSL legacy encryption, and encrypted keys given no (or the wrong)
/// passphrase.
pub fn parse_private_key_pem(data: &[u8], passphrase: Option<&[u8]>) -> Result<RsaPrivateKey> {
    let block = pem::parse(data).map_err(|_| AuthzError::InvalidPrivateKeyPem)?;
    if block.headers().get(LEGACY_ENCRYPTION_HEADER).is_some() {
        return Err(AuthzError::InvalidPrivateKeyPem);
    }

    match block.tag() {
        PKCS1_KEY_TYPE => RsaPrivateKey::from_pkcs1_der(block.contents())
            .map_err(|_| AuthzError::InvalidPrivateKeyPem),
        PKCS8_KEY_TYPE => RsaPrivateKey::from_pkcs8_der(block.contents())
            .map_err(|_| AuthzError::InvalidPrivateKeyPem),
        ENCRYPTED_PKCS8_KEY_TYPE => {
            let passphrase = passphrase.ok_or(AuthzError::InvalidPrivateKeyPem)?;
            let encrypted = EncryptedPrivateKeyInfo::try_from(block.contents())
                .map_err(|_| AuthzError::InvalidPrivateKeyPem)?;
            let document = encrypted
                .decrypt(passphrase)
                .map_err(|_| AuthzError::InvalidPrivateKeyPem)?;
            RsaPrivateKey::from_pkcs8_der(document.as_bytes())
                .map_err(|_| AuthzError::InvalidPrivateKeyPem)
        }
        _ => Err(AuthzError::InvalidPrivateKeyPem),
    }
}

/// Standard base64 of the certificate DER (a PEM body without its armour)
pub fn base64_encode_certificate(certificate: &Certificate) -> String {
    STANDARD.encode(certificate.der())
}

/// Key id of a certificate within a tenant
pub fn generate_key_id(certificate: &Certificate, tenant_id: &str) -> String {
    let digest = ring::digest::digest(&ring::digest::SHA1_FOR_LEGACY_USE_ONLY, certificate.der());
    let fingerprint = digest
        .as_ref()
        .iter()
        .map(|byte| format!("{byte:02X}"))
        .collect::<Vec<_>>()
        .join(":");
    format!("{tenant_id}/{KEY_ID_SEPARATOR}/{fingerprint}")
}

/// Source of a certificate, its chain and its private key
#[async_trait]
pub trait CertificateSupplier: Send + Sync {
    /// Leaf certificate
    async fn certificate(&self) -> Result<Certificate>;

    /// Intermediate certificates, leaf-most first
    async fn intermediates(&self) -> Result<Vec<Certificate>>;

    /// Private key of the leaf certificate
    async fn private_key(&self) -> Result<Arc<RsaPrivateKey>>;
}

/// Fixed certificate material
#[derive(Clone)]
pub struct X509CertificateSupplier {
    certificate: Certificate,
    intermediates: Vec<Certificate>,
    private_key: Arc<RsaPrivateKey>,
    tenant_id: String,
    key_id: String,
}

impl X509CertificateSupplier {
    /// Create a supplier from decoded material
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::InvalidCertificate`] for an empty certificate and
    /// [`AuthzError::InvalidTenantId`] for an empty tenant id.
    pub fn new(
        tenant_id: impl Into<String>,
        certificate: Certificate,
        intermediates: Vec<Certificate>,
        private_key: Arc<RsaPrivateKey>,
    ) -> Result<Self> {
        if certificate.der().is_empty() {
            return Err(AuthzError::InvalidCertificate);
        }
        let tenant_id = tenant_id.into();
        if tenant_id.is_empty() {
            return Err(AuthzError::InvalidTenantId);
        }

        let key_id = generate_key_id(&certificate, &tenant_id);
        Ok(Self {
            certificate,
            intermediates,
            private_key,
            tenant_id,
            key_id,
        })
    }

    /// Create a supplier from PEM encoded material
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::InvalidTenantId`] for an empty tenant id,
    /// [`AuthzError::InvalidCertPem`], [`AuthzError::InvalidIntermediateCertPem`]
    /// or [`AuthzError::InvalidPrivateKeyPem`] for undecodable input.
    pub fn from_pem<I, C>(
        tenant_id: impl Into<String>,
        certificate: &[u8],
        intermediates: I,
        private_key: &[u8],
        passphrase: Option<&[u8]>,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = C>,
        C: AsRef<[u8]>,
    {
        let tenant_id = tenant_id.into();
        if tenant_id.is_empty() {
            return Err(AuthzError::InvalidTenantId);
        }
        let certificate = parse_certificate_pem(certificate)?;
        let intermediates = intermediates
            .into_iter()
            .map(|pem| {
                parse_certificate_pem(pem.as_ref())
                    .map_err(|_| AuthzError::InvalidIntermediateCertPem)
            })
            .collect::<Result<Vec<_>>>()?;
        let private_key = parse_private_key_pem(private_key, passphrase)?;

        Self::new(tenant_id, certificate, intermediates, Arc::new(private_key))
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }
}

impl fmt::Debug for X509CertificateSupplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("X509CertificateSupplier")
            .field("key_id", &self.key_id)
            .field("intermediates", &self.intermediates.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CertificateSupplier for X509CertificateSupplier {
    async fn certificate(&self) -> Result<Certificate> {
        Ok(self.certificate.clone())
    }

    async fn intermediates(&self) -> Result<Vec<Certificate>> {
        Ok(self.intermediates.clone())
    }

    async fn private_key(&self) -> Result<Arc<RsaPrivateKey>> {
        Ok(Arc::clone(&self.private_key))
    }
}

#[async_trait]
impl KeySupplier for X509CertificateSupplier {
    async fn key(&self, key_id: &str) -> Result<KeyOutcome> {
        if key_id != self.key_id {
            return Err(AuthzError::KeyNotFound);
        }
        Ok(KeyOutcome::Found(Key::Private(Arc::clone(&self.private_key))))
    }
}

#[async_trait]
impl KeyIdSupplier for X509CertificateSupplier {
    async fn key_id(&self) -> Result<String> {
        Ok(self.key_id.clone())
    }
}

/// Certificate material fetched from URLs on every access
pub struct UrlX509CertificateSupplier {
    client: Arc<dyn HttpClient>,
    tenant_id: String,
    certificate_url: Url,
    private_key_url: Url,
    passphrase: Option<Vec<u8>>,
    intermediate_urls: Vec<Url>,
}

impl UrlX509CertificateSupplier {
    /// Create a supplier reading from the given URLs
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::InvalidTenantId`] for an empty tenant id and
    /// [`AuthzError::InvalidUrl`] if any URL does not parse.
    pub fn new<S: AsRef<str>>(
        client: Arc<dyn HttpClient>,
        tenant_id: impl Into<String>,
        certificate_url: &str,
        private_key_url: &str,
        passphrase: Option<Vec<u8>>,
        intermediate_urls: &[S],
    ) -> Result<Self> {
        let tenant_id = tenant_id.into();
        if tenant_id.is_empty() {
            return Err(AuthzError::InvalidTenantId);
        }

        Ok(Self {
            client,
            tenant_id,
            certificate_url: Url::parse(certificate_url)?,
            private_key_url: Url::parse(private_key_url)?,
            passphrase,
            intermediate_urls: intermediate_urls
                .iter()
                .map(|u| Url::parse(u.as_ref()))
                .collect::<std::result::Result<_, _>>()?,
        })
    }

    async fn fetch(&self, url: &Url) -> Result<Bytes> {
        debug!(url = %url, "Fetching identity material");
        let request = Request::builder()
            .method(Method::GET)
            .uri(url.as_str())
            .body(Bytes::new())?;
        let response = self.client.execute(request).await?;

        if response.status() != StatusCode::OK {
            warn!(url = %url, status = %response.status(), "Identity material fetch failed");
            return Err(ServiceResponseError::from_response(url.as_str(), &response).into());
        }
        Ok(response.into_body())
    }

    async fn current_key_id(&self) -> Result<String> {
        let certificate = self.certificate().await?;
        Ok(generate_key_id(&certificate, &self.tenant_id))
    }
}

impl fmt::Debug for UrlX509CertificateSupplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UrlX509CertificateSupplier")
            .field("tenant_id", &self.tenant_id)
            .field("certificate_url", &self.certificate_url.as_str())
            .field("private_key_url", &self.private_key_url.as_str())
            .field("intermediate_urls", &self.intermediate_urls.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CertificateSupplier for UrlX509CertificateSupplier {
    async fn certificate(&self) -> Result<Certificate> {
        parse_certificate_pem(&self.fetch(&self.certificate_url).await?)
    }

    async fn intermediates(&self) -> Result<Vec<Certificate>> {
        let mut certificates = Vec::with_capacity(self.intermediate_urls.len());
        for url in &self.intermediate_urls {
            certificates.push(parse_certificate_pem(&self.fetch(url).await?)?);
        }
        Ok(certificates)
    }

    async fn private_key(&self) -> Result<Arc<RsaPrivateKey>> {
        let content = self.fetch(&self.private_key_url).await?;
        let key = parse_private_key_pem(&content, self.passphrase.as_deref())?;
        Ok(Arc::new(key))
    }
}

#[async_trait]
impl KeySupplier for UrlX509CertificateSupplier {
    async fn key(&self, key_id: &str) -> Result<KeyOutcome> {
        let current = self.current_key_id().await?;
        if key_id != current {
            debug!("Certificate rotated since key id was issued");
            return Ok(KeyOutcome::Rotate(KeyRotation::new(current, key_id)));
        }
        Ok(KeyOutcome::Found(Key::Private(self.private_key().await?)))
    }
}

#[async_trait]
impl KeyIdSupplier for UrlX509CertificateSupplier {
    async fn key_id(&self) -> Result<String> {
        self.current_key_id().await
    }
}
