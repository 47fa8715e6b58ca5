//! Public keys from the identity key service
//!
//! Two flavours share one implementation:
//!
//! - [`KeyServiceKeySupplier::system`] fetches token-signing keys from
//!   `{endpoint}/keys/{id}`. Only ids matching `^(?i)asw[a-zA-Z0-9_-]{0,50}$`
//!   are looked up, so ids like `../x` never reach the network.
//! - [`KeyServiceKeySupplier::api_key`] fetches customer API keys from
//!   `{endpoint}/SR/keys/{id}`.
//!
//! Fetched keys are kept in a [`KeyCache`] under a class-prefixed id.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Method, Request, StatusCode};
use regex::Regex;
use rsa::RsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use tracing::{debug, warn};

use super::cache::{API_KEY_PREFIX, KeyCache, SYSTEM_KEY_PREFIX};
use crate::error::{AuthzError, Result, ServiceResponseError};
use crate::jwt::Jwk;
use crate::signer::{HttpClient, Key, KeyOutcome, KeySupplier};

/// Accepted format of system key ids
pub const SYSTEM_KEY_PATTERN: &str = r"^(?i)asw[a-zA-Z0-9_-]{0,50}$";

/// Cache period of system keys
pub const SYSTEM_KEY_CACHE_PERIOD: Duration = Duration::from_secs(60 * 60);
/// Cache period of customer API keys
pub const API_KEY_CACHE_PERIOD: Duration = Duration::from_secs(10 * 60);

const PKIX_PUBLIC_KEY_TYPE: &str = "PUBLIC KEY";
const PKIX_PREAMBLE: &[u8] = b"-----BEGIN PUBLIC KEY-----";

/// Looks up public keys from the identity key service
pub struct KeyServiceKeySupplier {
    client: Arc<dyn HttpClient>,
    uri: String,
    cache: Arc<KeyCache>,
    cache_period: Duration,
    cache_prefix: &'static str,
    key_filter: Option<Regex>,
}

impl KeyServiceKeySupplier {
    /// Supplier of token-signing system keys
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::InvalidEndpoint`] for an empty endpoint.
    pub fn system(
        client: Arc<dyn HttpClient>,
        endpoint: &str,
        cache: Arc<KeyCache>,
    ) -> Result<Self> {
        let filter = Regex::new(SYSTEM_KEY_PATTERN).map_err(|_| AuthzError::InvalidArg)?;
        Self::build(
            client,
            endpoint,
            "keys",
            cache,
            SYSTEM_KEY_CACHE_PERIOD,
            SYSTEM_KEY_PREFIX,
            Some(filter),
        )
    }

    /// Supplier of customer API public keys
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::InvalidEndpoint`] for an empty endpoint.
    pub fn api_key(
        client: Arc<dyn HttpClient>,
        endpoint: &str,
        cache: Arc<KeyCache>,
    ) -> Result<Self> {
        Self::build(
            client,
            endpoint,
            "SR/keys",
            cache,
            API_KEY_CACHE_PERIOD,
            API_KEY_PREFIX,
            None,
        )
    }

    fn build(
        client: Arc<dyn HttpClient>,
        endpoint: &str,
        path: &str,
        cache: Arc<KeyCache>,
        cache_period: Duration,
        cache_prefix: &'static str,
        key_filter: Option<Regex>,
    ) -> Result<Self> {
        if endpoint.is_empty() {
            return Err(AuthzError::InvalidEndpoint);
        }
        Ok(Self {
            client,
            uri: format!("{}/{path}", endpoint.trim_end_matches('/')),
            cache,
            cache_period,
            cache_prefix,
            key_filter,
        })
    }

    /// Override how long fetched keys stay cached
    #[must_use]
    pub fn with_cache_period(mut self, period: Duration) -> Self {
        self.cache_period = period;
        self
    }

    async fn fetch(&self, key_id: &str) -> Result<RsaPublicKey> {
        let url = format!("{}/{key_id}", self.uri);
        debug!(url = %url, "Fetching public key");

        let request = Request::builder()
            .method(Method::GET)
            .uri(&url)
            .body(Bytes::new())?;
        let response = self.client.execute(request).await?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => return Err(AuthzError::KeyNotFound),
            status => {
                warn!(url = %url, status = %status, "Key service returned unexpected status");
                return Err(ServiceResponseError::from_response(url, &response).into());
            }
        }

        let body = response.body();
        if body
            .windows(PKIX_PREAMBLE.len())
            .any(|window| window == PKIX_PREAMBLE)
        {
            decode_pkix_public_key(body)
        } else {
            decode_jwk(body)
        }
    }
}

/// Decode a PEM `PUBLIC KEY` block holding an RSA key
///
/// # Errors
///
/// Returns [`AuthzError::PemDecode`] when there is no `PUBLIC KEY` block and
/// [`AuthzError::Crypto`] when the block is not an RSA key.
pub fn decode_pkix_public_key(encoded: &[u8]) -> Result<RsaPublicKey> {
    let block = pem::parse(encoded).map_err(|_| AuthzError::PemDecode)?;
    if block.tag() != PKIX_PUBLIC_KEY_TYPE {
        return Err(AuthzError::PemDecode);
    }
    RsaPublicKey::from_public_key_der(block.contents())
        .map_err(|err| AuthzError::Crypto(err.to_string()))
}

fn decode_jwk(encoded: &[u8]) -> Result<RsaPublicKey> {
    let jwk: Jwk = serde_json::from_slice(encoded)?;
    jwk.public_key()
}

impl fmt::Debug for KeyServiceKeySupplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyServiceKeySupplier")
            .field("uri", &self.uri)
            .field("cache_prefix", &self.cache_prefix)
            .field("cache_period", &self.cache_period)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl KeySupplier for KeyServiceKeySupplier {
    async fn key(&self, key_id: &str) -> Result<KeyOutcome> {
        if let Some(filter) = &self.key_filter
            && !filter.is_match(key_id)
        {
            return Err(AuthzError::UnsupportedKeyFormat);
        }

        let cache_key = KeyCache::namespaced(self.cache_prefix, key_id);
        if let Some(key) = self.cache.get(&cache_key) {
            debug!(cache_key = %cache_key, "Public key cache hit");
            return Ok(KeyOutcome::Found(key));
        }

        let key = Key::from(self.fetch(key_id).await?);
        self.cache.store(cache_key, key.clone(), self.cache_period);
        Ok(KeyOutcome::Found(key))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use http::Response;
    use rsa::pkcs8::{EncodePublicKey, LineEnding};

    use super::*;
    use crate::signer::key::test_keys;

    struct StaticResponse {
        status: u16,
        body: Bytes,
        calls: AtomicUsize,
    }

    impl StaticResponse {
        fn new(status: u16, body: impl Into<Bytes>) -> Arc<Self> {
            Arc::new(Self {
                status,
                body: body.into(),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl HttpClient for StaticResponse {
        async fn execute(&self, _request: Request<Bytes>) -> Result<Response<Bytes>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Response::builder()
                .status(self.status)
                .body(self.body.clone())
                .unwrap())
        }
    }

    fn public_pem() -> String {
        test_keys::private_key()
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .unwrap()
    }

    #[tokio::test]
    async fn test_system_key_filter_blocks_before_network() {
        let transport = StaticResponse::new(200, public_pem());
        let supplier =
            KeyServiceKeySupplier::system(transport.clone(), "https://id", Arc::new(KeyCache::new()))
                .unwrap();

        for key_id in ["../../etc", "asw/../x", "other", "asw..x"] {
            assert!(matches!(
                supplier.key(key_id).await,
                Err(AuthzError::UnsupportedKeyFormat)
            ));
        }
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_pem_key_fetched_once_then_cached() {
        let transport = StaticResponse::new(200, public_pem());
        let supplier =
            KeyServiceKeySupplier::system(transport.clone(), "https://id", Arc::new(KeyCache::new()))
                .unwrap();

        let first = supplier.key("ASW1").await.unwrap().into_key().unwrap();
        let second = supplier.key("ASW1").await.unwrap().into_key().unwrap();

        assert_eq!(first, Key::from(test_keys::private_key().to_public_key()));
        assert_eq!(first, second);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_jwk_body() {
        let public = test_keys::private_key().to_public_key();
        let body = serde_json::to_vec(&Jwk::from_public_key("k", &public)).unwrap();
        let supplier = KeyServiceKeySupplier::api_key(
            StaticResponse::new(200, body),
            "https://id",
            Arc::new(KeyCache::new()),
        )
        .unwrap();

        let key = supplier.key("ocid1.key").await.unwrap().into_key().unwrap();
        assert_eq!(key, Key::from(public));
    }

    #[tokio::test]
    async fn test_status_handling() {
        let cache = Arc::new(KeyCache::new());
        let missing =
            KeyServiceKeySupplier::api_key(StaticResponse::new(404, ""), "https://id", cache.clone())
                .unwrap();
        assert!(matches!(missing.key("k").await, Err(AuthzError::KeyNotFound)));

        let failing =
            KeyServiceKeySupplier::api_key(StaticResponse::new(500, ""), "https://id", cache)
                .unwrap();
        assert!(matches!(
            failing.key("k").await,
            Err(AuthzError::ServiceResponse(err)) if err.status == Some(StatusCode::INTERNAL_SERVER_ERROR)
        ));
    }

    #[test]
    fn test_pem_block_type_checked() {
        let pem = "-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n";
        assert!(matches!(
            decode_pkix_public_key(pem.as_bytes()),
            Err(AuthzError::PemDecode)
        ));
    }

    #[test]
    fn test_empty_endpoint_rejected() {
        assert!(matches!(
            KeyServiceKeySupplier::system(StaticResponse::new(200, ""), "", Arc::new(KeyCache::new())),
            Err(AuthzError::InvalidEndpoint)
        ));
    }
}
