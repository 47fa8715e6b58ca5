//! Client configuration
//!
//! [`IdentityConfig`] collects the settings shared by the signing client, the
//! key suppliers and the authorization client, and builds each of them.
//! Every field has a default, so a configuration file only needs to name the
//! endpoint.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::authz::AuthorizationClient;
use crate::error::{AuthzError, Result};
use crate::keys::{
    API_KEY_CACHE_PERIOD, KeyCache, KeyServiceKeySupplier, SYSTEM_KEY_CACHE_PERIOD,
};
use crate::signer::headers::{DEFAULT_READ_HEADERS, DEFAULT_WRITE_HEADERS};
use crate::signer::{ClientOptions, DEFAULT_TIMEOUT, HttpClient, ReqwestClient};
use crate::sts::{STS_EXPIRY_PADDING, StsKeySupplier};
use crate::x509::CertificateSupplier;

/// Identity service client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Identity service base URL, e.g. `https://auth.region.example.com/v1`
    pub endpoint: String,
    /// Transport timeout in seconds
    pub timeout_secs: u64,
    /// Headers signed on reads
    pub read_headers: Vec<String>,
    /// Headers signed on POST, PUT and PATCH
    pub write_headers: Vec<String>,
    /// How long system keys stay cached, in seconds
    pub system_key_cache_secs: u64,
    /// How long customer API keys stay cached, in seconds
    pub api_key_cache_secs: u64,
    /// STS tokens expiring within this many seconds are refreshed
    pub sts_expiry_padding_secs: u64,
    /// Purpose sent with STS token requests
    pub sts_purpose: Option<String>,
    /// Submit tag slugs with authorization requests
    pub authorization_tags: bool,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            read_headers: DEFAULT_READ_HEADERS.iter().map(|h| (*h).to_string()).collect(),
            write_headers: DEFAULT_WRITE_HEADERS.iter().map(|h| (*h).to_string()).collect(),
            system_key_cache_secs: SYSTEM_KEY_CACHE_PERIOD.as_secs(),
            api_key_cache_secs: API_KEY_CACHE_PERIOD.as_secs(),
            sts_expiry_padding_secs: STS_EXPIRY_PADDING.as_secs(),
            sts_purpose: None,
            authorization_tags: false,
        }
    }
}

impl IdentityConfig {
    /// Default configuration for `endpoint`
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    /// Parse a JSON configuration document
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::Json`] for malformed input and the errors of
    /// [`validate`](Self::validate).
    pub fn from_json(data: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the endpoint and timeout
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::InvalidEndpoint`] for an empty endpoint,
    /// [`AuthzError::InvalidUrl`] for an unparsable one and
    /// [`AuthzError::InvalidArg`] for a zero timeout.
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.is_empty() {
            return Err(AuthzError::InvalidEndpoint);
        }
        url::Url::parse(&self.endpoint)?;
        if self.timeout_secs == 0 {
            return Err(AuthzError::InvalidArg);
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn system_key_cache_period(&self) -> Duration {
        Duration::from_secs(self.system_key_cache_secs)
    }

    pub fn api_key_cache_period(&self) -> Duration {
        Duration::from_secs(self.api_key_cache_secs)
    }

    pub fn sts_expiry_padding(&self) -> Duration {
        Duration::from_secs(self.sts_expiry_padding_secs)
    }

    /// Runtime options of the signing client
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            timeout: self.timeout(),
            read_headers: self.read_headers.clone(),
            write_headers: self.write_headers.clone(),
        }
    }

    /// Unsigned reqwest transport with the configured timeout
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::Transport`] if the client cannot be built.
    pub fn transport(&self) -> Result<ReqwestClient> {
        ReqwestClient::new(self.timeout())
    }

    /// System key supplier over `client`
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::InvalidEndpoint`] for an empty endpoint.
    pub fn system_key_supplier(
        &self,
        client: Arc<dyn HttpClient>,
        cache: Arc<KeyCache>,
    ) -> Result<KeyServiceKeySupplier> {
        Ok(KeyServiceKeySupplier::system(client, &self.endpoint, cache)?
            .with_cache_period(self.system_key_cache_period()))
    }

    /// Customer API key supplier over `client`
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::InvalidEndpoint`] for an empty endpoint.
    pub fn api_key_supplier(
        &self,
        client: Arc<dyn HttpClient>,
        cache: Arc<KeyCache>,
    ) -> Result<KeyServiceKeySupplier> {
        Ok(KeyServiceKeySupplier::api_key(client, &self.endpoint, cache)?
            .with_cache_period(self.api_key_cache_period()))
    }

    /// STS key supplier minting tokens for `certificates`
    ///
    /// # Errors
    ///
    /// See [`StsKeySupplier::new`].
    pub fn sts_key_supplier(
        &self,
        certificates: Arc<dyn CertificateSupplier>,
        client: Arc<dyn HttpClient>,
    ) -> Result<StsKeySupplier> {
        let supplier = StsKeySupplier::new(certificates, client, &self.endpoint)?
            .with_expiry_padding(self.sts_expiry_padding());
        Ok(match &self.sts_purpose {
            Some(purpose) => supplier.with_purpose(purpose.clone()),
            None => supplier,
        })
    }

    /// Authorization client over `client`, in tag mode when configured
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::InvalidEndpoint`] for an empty endpoint.
    pub fn authorization_client(&self, client: Arc<dyn HttpClient>) -> Result<AuthorizationClient> {
        if self.authorization_tags {
            AuthorizationClient::with_tags(client, self.endpoint.clone())
        } else {
            AuthorizationClient::new(client, self.endpoint.clone())
        }
    }
}
