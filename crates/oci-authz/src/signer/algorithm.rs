//! Signature algorithms and the algorithm registry
//!
//! Two RSA algorithms are provided, each registered under its HTTP-signature
//! name by [`Algorithms::standard`] and under its JWS name by
//! [`Algorithms::jwt`]:
//!
//! - `rsa-sha256` / `RS256`: RSASSA-PKCS1-v1_5 over SHA-256
//! - `rsa-pss-sha256` / `PS256`: RSASSA-PSS over SHA-256 with a 32 byte salt

use std::collections::HashMap;
use std::sync::Arc;

use rand::rngs::OsRng;
use rsa::{Pkcs1v15Sign, Pss, RsaPublicKey};
use sha2::{Digest, Sha256};

use super::key::Key;
use crate::error::{AuthzError, Result};

/// HTTP-signature name of RSASSA-PKCS1-v1_5 with SHA-256
pub const ALG_RSA_SHA256: &str = "rsa-sha256";
/// HTTP-signature name of RSASSA-PSS with SHA-256
pub const ALG_RSA_PSS_SHA256: &str = "rsa-pss-sha256";
/// JWS name of RSASSA-PKCS1-v1_5 with SHA-256
pub const JWT_ALG_RS256: &str = "RS256";
/// JWS name of RSASSA-PSS with SHA-256
pub const JWT_ALG_PS256: &str = "PS256";

const PSS_SALT_LEN: usize = 32;

/// A signature algorithm
pub trait Algorithm: Send + Sync + std::fmt::Debug {
    /// Name the algorithm is registered under in signatures
    fn name(&self) -> &str;

    /// Sign `message` with a private key
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::InvalidKey`] if `key` is not a private key.
    fn sign(&self, message: &[u8], key: &Key) -> Result<Vec<u8>>;

    /// Verify `signature` over `message`
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::SignatureVerification`] if the signature does not
    /// match.
    fn verify(&self, message: &[u8], signature: &[u8], key: &Key) -> Result<()>;
}

fn digest(message: &[u8]) -> Vec<u8> {
    Sha256::digest(message).to_vec()
}

fn verifying_key(key: &Key) -> RsaPublicKey {
    match key {
        Key::Public(public) => public.as_ref().clone(),
        Key::Private(private) => private.to_public_key(),
    }
}

/// RSASSA-PKCS1-v1_5 with SHA-256
#[derive(Debug, Clone)]
pub struct RsaSha256 {
    name: &'static str,
}

impl RsaSha256 {
    /// Algorithm registered as `rsa-sha256`
    #[must_use]
    pub fn new() -> Self {
        Self {
            name: ALG_RSA_SHA256,
        }
    }

    /// Same algorithm registered as `RS256`
    #[must_use]
    pub fn jws() -> Self {
        Self {
            name: JWT_ALG_RS256,
        }
    }
}

impl Default for RsaSha256 {
    fn default() -> Self {
        Self::new()
    }
}

impl Algorithm for RsaSha256 {
    fn name(&self) -> &str {
        self.name
    }

    fn sign(&self, message: &[u8], key: &Key) -> Result<Vec<u8>> {
        let Key::Private(private) = key else {
            return Err(AuthzError::InvalidKey);
        };
        Ok(private.sign(Pkcs1v15Sign::new::<Sha256>(), &digest(message))?)
    }

    fn verify(&self, message: &[u8], signature: &[u8], key: &Key) -> Result<()> {
        verifying_key(key)
            .verify(Pkcs1v15Sign::new::<Sha256>(), &digest(message), signature)
            .map_err(|_| AuthzError::SignatureVerification)
    }
}

/// RSASSA-PSS with SHA-256 and a 32 byte salt
#[derive(Debug, Clone)]
pub struct RsaPssSha256 {
    name: &'static str,
}

impl RsaPssSha256 {
    /// Algorithm registered as `rsa-pss-sha256`
    #[must_use]
    pub fn new() -> Self {
        Self {
            name: ALG_RSA_PSS_SHA256,
        }
    }

    /// Same algorithm registered as `PS256`
    #[must_use]
    pub fn jws() -> Self {
        Self {
            name: JWT_ALG_PS256,
        }
    }
}

impl Default for RsaPssSha256 {
    fn default() -> Self {
        Self::new()
    }
}

impl Algorithm for RsaPssSha256 {
    fn name(&self) -> &str {
        self.name
    }

    fn sign(&self, message: &[u8], key: &Key) -> Result<Vec<u8>> {
        let Key::Private(private) = key else {
            return Err(AuthzError::InvalidKey);
        };
        Ok(private.sign_with_rng(
            &mut OsRng,
            Pss::new_with_salt::<Sha256>(PSS_SALT_LEN),
            &digest(message),
        )?)
    }

    fn verify(&self, message: &[u8], signature: &[u8], key: &Key) -> Result<()> {
        verifying_key(key)
            .verify(
                Pss::new_with_salt::<Sha256>(PSS_SALT_LEN),
                &digest(message),
                signature,
            )
            .map_err(|_| AuthzError::SignatureVerification)
    }
}

/// Looks up an [`Algorithm`] by name
pub trait AlgorithmSupplier: Send + Sync {
    /// Return the algorithm registered under `name`
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::UnsupportedAlgorithm`] for unknown names.
    fn algorithm(&self, name: &str) -> Result<Arc<dyn Algorithm>>;
}

/// Name-keyed algorithm registry
#[derive(Debug, Clone, Default)]
pub struct Algorithms {
    registry: HashMap<String, Arc<dyn Algorithm>>,
}

impl Algorithms {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// HTTP-signature algorithms: `rsa-sha256` and `rsa-pss-sha256`
    #[must_use]
    pub fn standard() -> Self {
        Self::new()
            .with(Arc::new(RsaSha256::new()))
            .with(Arc::new(RsaPssSha256::new()))
    }

    /// JWS algorithms: `RS256` and `PS256`
    #[must_use]
    pub fn jwt() -> Self {
        Self::new()
            .with(Arc::new(RsaSha256::jws()))
            .with(Arc::new(RsaPssSha256::jws()))
    }

    /// Register an algorithm under its own name
    #[must_use]
    pub fn with(mut self, algorithm: Arc<dyn Algorithm>) -> Self {
        self.registry.insert(algorithm.name().to_string(), algorithm);
        self
    }
}

impl AlgorithmSupplier for Algorithms {
    fn algorithm(&self, name: &str) -> Result<Arc<dyn Algorithm>> {
        self.registry
            .get(name)
            .cloned()
            .ok_or_else(|| AuthzError::UnsupportedAlgorithm(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::key::test_keys;

    #[test]
    fn test_standard_registry_names() {
        let algorithms = Algorithms::standard();
        assert_eq!(algorithms.algorithm("rsa-sha256").unwrap().name(), "rsa-sha256");
        assert_eq!(
            algorithms.algorithm("rsa-pss-sha256").unwrap().name(),
            "rsa-pss-sha256"
        );
        assert!(matches!(
            algorithms.algorithm("RS256"),
            Err(AuthzError::UnsupportedAlgorithm(name)) if name == "RS256"
        ));
    }

    #[test]
    fn test_jwt_registry_names() {
        let algorithms = Algorithms::jwt();
        assert!(algorithms.algorithm("RS256").is_ok());
        assert!(algorithms.algorithm("PS256").is_ok());
        assert!(algorithms.algorithm("HS256").is_err());
    }

    #[test]
    fn test_sign_and_verify_both_algorithms() {
        let private = test_keys::private_key();
        let public = Key::Public(Arc::new(private.to_public_key()));
        let private = Key::Private(private);

        for algorithm in [
            Arc::new(RsaSha256::new()) as Arc<dyn Algorithm>,
            Arc::new(RsaPssSha256::new()),
        ] {
            let signature = algorithm.sign(b"message", &private).unwrap();
            algorithm.verify(b"message", &signature, &public).unwrap();
            assert!(matches!(
                algorithm.verify(b"tampered", &signature, &public),
                Err(AuthzError::SignatureVerification)
            ));
        }
    }

    #[test]
    fn test_sign_with_public_key_is_invalid() {
        let public = Key::Public(Arc::new(test_keys::private_key().to_public_key()));
        assert!(matches!(
            RsaSha256::new().sign(b"m", &public),
            Err(AuthzError::InvalidKey)
        ));
        assert!(matches!(
            RsaPssSha256::new().sign(b"m", &public),
            Err(AuthzError::InvalidKey)
        ));
    }

    #[test]
    fn test_pkcs1_signature_is_deterministic() {
        let private = Key::Private(test_keys::private_key());
        let a = RsaSha256::new().sign(b"m", &private).unwrap();
        let b = RsaSha256::new().sign(b"m", &private).unwrap();
        assert_eq!(a, b);
    }
}
