//! Ephemeral session keypair

use std::sync::Arc;

use parking_lot::RwLock;
use rand::rngs::OsRng;
use rsa::pkcs8::EncodePublicKey;
use rsa::{RsaPrivateKey, RsaPublicKey};
use tracing::debug;

use crate::error::{AuthzError, Result};

/// Bit length of session keys
pub const SESSION_KEY_BITS: usize = 2048;

/// Holds one in-memory RSA keypair that can be replaced on demand
///
/// The first call to [`private_key`](Self::private_key) or
/// [`public_key`](Self::public_key) generates the pair if none exists yet.
#[derive(Debug, Default)]
pub struct SessionKeySupplier {
    key: RwLock<Option<Arc<RsaPrivateKey>>>,
}

impl SessionKeySupplier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a fresh pair, releasing the previous one
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::Crypto`] if key generation fails.
    pub fn refresh_keys(&self) -> Result<()> {
        let key = RsaPrivateKey::new(&mut OsRng, SESSION_KEY_BITS)?;
        *self.key.write() = Some(Arc::new(key));
        debug!("Session keypair refreshed");
        Ok(())
    }

    /// Current private key
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::Crypto`] if a first pair has to be generated and
    /// generation fails.
    pub fn private_key(&self) -> Result<Arc<RsaPrivateKey>> {
        if let Some(key) = self.key.read().as_ref() {
            return Ok(Arc::clone(key));
        }
        self.refresh_keys()?;
        self.key
            .read()
            .as_ref()
            .map(Arc::clone)
            .ok_or(AuthzError::InvalidPrivateKey)
    }

    /// Public half of the current pair
    ///
    /// # Errors
    ///
    /// See [`SessionKeySupplier::private_key`].
    pub fn public_key(&self) -> Result<RsaPublicKey> {
        Ok(self.private_key()?.to_public_key())
    }

    /// PKIX (SubjectPublicKeyInfo) DER of the public key
    ///
    /// # Errors
    ///
    /// See [`SessionKeySupplier::private_key`]; encoding failures are
    /// [`AuthzError::Crypto`].
    pub fn public_key_der(&self) -> Result<Vec<u8>> {
        let der = self
            .public_key()?
            .to_public_key_der()
            .map_err(|err| AuthzError::Crypto(err.to_string()))?;
        Ok(der.into_vec())
    }
}
