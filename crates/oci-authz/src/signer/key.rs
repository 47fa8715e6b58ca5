//! Key suppliers
//!
//! A [`KeySupplier`] maps a key id to key material. Suppliers that own
//! rotating material (STS tokens, URL-backed certificates) answer with
//! [`KeyOutcome::Rotate`] when the requested id is no longer current; the
//! signing client consumes that signal and retries once with the replacement.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use rsa::{RsaPrivateKey, RsaPublicKey};

use crate::error::{AuthzError, Result};

/// Key id that asks a rotating supplier to discard its current material
pub const FORCE_ROTATE: &str = "KEYID_FORCE_ROTATE";

/// RSA key material handed out by a supplier
#[derive(Clone)]
pub enum Key {
    /// Signing key
    Private(Arc<RsaPrivateKey>),
    /// Verification key
    Public(Arc<RsaPublicKey>),
}

impl Key {
    /// Public half of the key
    #[must_use]
    pub fn public_key(&self) -> RsaPublicKey {
        match self {
            Self::Private(private) => private.to_public_key(),
            Self::Public(public) => public.as_ref().clone(),
        }
    }

    /// Private key, if this is one
    #[must_use]
    pub fn as_private(&self) -> Option<&Arc<RsaPrivateKey>> {
        match self {
            Self::Private(private) => Some(private),
            Self::Public(_) => None,
        }
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Private(_) => f.write_str("Key::Private(<redacted>)"),
            Self::Public(public) => f.debug_tuple("Key::Public").field(public).finish(),
        }
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Private(a), Self::Private(b)) => a == b,
            (Self::Public(a), Self::Public(b)) => a == b,
            _ => false,
        }
    }
}

impl From<RsaPrivateKey> for Key {
    fn from(key: RsaPrivateKey) -> Self {
        Self::Private(Arc::new(key))
    }
}

impl From<RsaPublicKey> for Key {
    fn from(key: RsaPublicKey) -> Self {
        Self::Public(Arc::new(key))
    }
}

/// Rotation signal: the requested key is stale, sign with `replacement_key_id`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRotation {
    /// Key id to use from now on
    pub replacement_key_id: String,
    /// Key id that was requested
    pub old_key_id: String,
}

impl KeyRotation {
    /// Create a rotation from `old` to `replacement`
    pub fn new(replacement: impl Into<String>, old: impl Into<String>) -> Self {
        Self {
            replacement_key_id: replacement.into(),
            old_key_id: old.into(),
        }
    }
}

/// Successful answer of a [`KeySupplier`]
#[derive(Debug, Clone, PartialEq)]
pub enum KeyOutcome {
    /// The key for the requested id
    Found(Key),
    /// The requested id is stale
    Rotate(KeyRotation),
}

impl KeyOutcome {
    /// Unwrap the key, turning a rotation into [`AuthzError::KeyRotated`]
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::KeyRotated`] for a [`KeyOutcome::Rotate`].
    pub fn into_key(self) -> Result<Key> {
        match self {
            Self::Found(key) => Ok(key),
            Self::Rotate(rotation) => Err(AuthzError::KeyRotated(rotation)),
        }
    }
}

/// Supplies key material by key id
#[async_trait]
pub trait KeySupplier: Send + Sync {
    /// Look up the key for `key_id`
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::KeyNotFound`] when the supplier holds no such key
    /// and [`AuthzError::UnsupportedKeyFormat`] when `key_id` does not match
    /// the supplier's key-id grammar.
    async fn key(&self, key_id: &str) -> Result<KeyOutcome>;
}

/// A key supplier that also knows which key id callers should sign as
#[async_trait]
pub trait KeyIdSupplier: KeySupplier {
    /// The key id currently in effect
    ///
    /// # Errors
    ///
    /// Returns the underlying refresh error when no usable key id exists.
    async fn key_id(&self) -> Result<String>;
}

#[async_trait]
impl<T: KeySupplier + ?Sized> KeySupplier for Arc<T> {
    async fn key(&self, key_id: &str) -> Result<KeyOutcome> {
        (**self).key(key_id).await
    }
}

/// Holds one private key under one id
#[derive(Clone)]
pub struct StaticKeySupplier {
    key: Arc<RsaPrivateKey>,
    key_id: String,
}

impl StaticKeySupplier {
    /// Create a supplier answering `key_id` with `key`
    pub fn new(key: Arc<RsaPrivateKey>, key_id: impl Into<String>) -> Self {
        Self {
            key,
            key_id: key_id.into(),
        }
    }

    /// Key id served by this supplier
    pub fn key_id(&self) -> &str {
        &self.key_id
    }
}

impl fmt::Debug for StaticKeySupplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticKeySupplier")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl KeySupplier for StaticKeySupplier {
    async fn key(&self, key_id: &str) -> Result<KeyOutcome> {
        if key_id != self.key_id {
            return Err(AuthzError::KeyNotFound);
        }
        Ok(KeyOutcome::Found(Key::Private(Arc::clone(&self.key))))
    }
}

/// Holds one public key under one id
#[derive(Debug, Clone)]
pub struct StaticPublicKeySupplier {
    key: Arc<RsaPublicKey>,
    key_id: String,
}

impl StaticPublicKeySupplier {
    /// Create a supplier answering `key_id` with `key`
    pub fn new(key: Arc<RsaPublicKey>, key_id: impl Into<String>) -> Self {
        Self {
            key,
            key_id: key_id.into(),
        }
    }
}

#[async_trait]
impl KeySupplier for StaticPublicKeySupplier {
    async fn key(&self, key_id: &str) -> Result<KeyOutcome> {
        if key_id != self.key_id {
            return Err(AuthzError::KeyNotFound);
        }
        Ok(KeyOutcome::Found(Key::Public(Arc::clone(&self.key))))
    }
}

/// Routes key ids to suppliers by regular expression
///
/// Routes are tried in insertion order and the first matching pattern wins.
///
/// # Example
///
/// ```
/// use oci_authz::signer::KeySupplierMux;
/// use oci_authz::{AuthzError, KeySupplier};
///
/// # tokio_test::block_on(async {
/// let mux = KeySupplierMux::new();
/// assert!(matches!(mux.key("asw1").await, Err(AuthzError::KeyNotFound)));
/// # });
/// ```
#[derive(Default)]
pub struct KeySupplierMux {
    routes: Vec<(Regex, Arc<dyn KeySupplier>)>,
}

impl KeySupplierMux {
    /// Empty mux; every lookup misses
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a route
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::InvalidArg`] if `pattern` is not a valid regex.
    pub fn route(mut self, pattern: &str, supplier: Arc<dyn KeySupplier>) -> Result<Self> {
        let regex = Regex::new(pattern).map_err(|_| AuthzError::InvalidArg)?;
        self.routes.push((regex, supplier));
        Ok(self)
    }
}

impl fmt::Debug for KeySupplierMux {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.routes.iter().map(|(re, _)| re.as_str()))
            .finish()
    }
}

#[async_trait]
impl KeySupplier for KeySupplierMux {
    async fn key(&self, key_id: &str) -> Result<KeyOutcome> {
        match self.routes.iter().find(|(re, _)| re.is_match(key_id)) {
            Some((_, supplier)) => supplier.key(key_id).await,
            None => Err(AuthzError::KeyNotFound),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_supplier_matches_only_its_id() {
        let supplier = StaticKeySupplier::new(test_keys::private_key(), "kid");

        let key = supplier.key("kid").await.unwrap().into_key().unwrap();
        assert!(key.as_private().is_some());
        assert!(matches!(supplier.key("other").await, Err(AuthzError::KeyNotFound)));
    }

    #[tokio::test]
    async fn test_static_public_supplier() {
        let public = Arc::new(test_keys::private_key().to_public_key());
        let supplier = StaticPublicKeySupplier::new(Arc::clone(&public), "kid");

        let key = supplier.key("kid").await.unwrap().into_key().unwrap();
        assert_eq!(key, Key::Public(public));
        assert!(matches!(supplier.key("ni").await, Err(AuthzError::KeyNotFound)));
    }

    #[tokio::test]
    async fn test_mux_first_match_wins() {
        let first: Arc<dyn KeySupplier> =
            Arc::new(StaticKeySupplier::new(test_keys::private_key(), "asw-1"));
        let second: Arc<dyn KeySupplier> =
            Arc::new(StaticKeySupplier::new(test_keys::other_private_key(), "asw-1"));

        let mux = KeySupplierMux::new()
            .route("^asw", first)
            .unwrap()
            .route(".*", second)
            .unwrap();

        let key = mux.key("asw-1").await.unwrap().into_key().unwrap();
        assert_eq!(key, Key::Private(test_keys::private_key()));
        assert!(matches!(mux.key("zzz").await, Err(AuthzError::KeyNotFound)));
    }

    #[tokio::test]
    async fn test_empty_mux_misses() {
        assert!(matches!(
            KeySupplierMux::new().key("anything").await,
            Err(AuthzError::KeyNotFound)
        ));
    }

    #[test]
    fn test_invalid_route_pattern() {
        let supplier: Arc<dyn KeySupplier> =
            Arc::new(StaticKeySupplier::new(test_keys::private_key(), "k"));
        assert!(matches!(
            KeySupplierMux::new().route("(", supplier),
            Err(AuthzError::InvalidArg)
        ));
    }

    #[test]
    fn test_rotation_outcome_into_key() {
        let outcome = KeyOutcome::Rotate(KeyRotation::new("new", "old"));
        match outcome.into_key() {
            Err(AuthzError::KeyRotated(rotation)) => {
                assert_eq!(rotation.replacement_key_id, "new");
                assert_eq!(rotation.old_key_id, "old");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
