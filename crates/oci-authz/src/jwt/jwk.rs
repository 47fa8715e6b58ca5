//! RSA JSON Web Keys

use base64::Engine as _;
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPublicKey};
use serde::{Deserialize, Serialize};

use super::TOKEN_PART;
use super::token::decode_part;
use crate::error::{AuthzError, Result};

const KEY_TYPE_RSA: &str = "RSA";
const MAX_EXPONENT_LEN: usize = 8;

/// JSON Web Key holding an RSA public key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Jwk {
    /// Key id
    #[serde(rename = "kid")]
    pub key_id: String,
    /// Key type; only `RSA` is supported
    #[serde(rename = "kty")]
    pub key_type: String,
    /// Algorithm
    #[serde(rename = "alg")]
    pub algorithm: String,
    /// Intended use
    #[serde(rename = "use")]
    pub key_use: String,
    /// Base64url modulus
    pub n: String,
    /// Base64url exponent
    pub e: String,
}

impl Jwk {
    /// RS256 signing key with the given modulus and exponent
    pub fn new(key_id: impl Into<String>, n: impl Into<String>, e: impl Into<String>) -> Self {
        Self {
            key_id: key_id.into(),
            key_type: KEY_TYPE_RSA.to_string(),
            algorithm: "RS256".to_string(),
            key_use: "sig".to_string(),
            n: n.into(),
            e: e.into(),
        }
    }

    /// Encode an RSA public key
    pub fn from_public_key(key_id: impl Into<String>, key: &RsaPublicKey) -> Self {
        Self::new(
            key_id,
            TOKEN_PART.encode(key.n().to_bytes_be()),
            TOKEN_PART.encode(key.e().to_bytes_be()),
        )
    }

    /// Decode the RSA public key
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::UnsupportedJwkType`] for a non-RSA key,
    /// [`AuthzError::InvalidJwk`] for an empty or undecodable modulus or
    /// exponent and [`AuthzError::UnsupportedExponentSize`] for an exponent
    /// longer than 8 bytes.
    pub fn public_key(&self) -> Result<RsaPublicKey> {
        if self.key_type != KEY_TYPE_RSA {
            return Err(AuthzError::UnsupportedJwkType);
        }

        let n = decode_component(&self.n)?;
        let e = decode_exponent(&self.e)?;

        RsaPublicKey::new(BigUint::from_bytes_be(&n), BigUint::from(e))
            .map_err(|_| AuthzError::InvalidJwk)
    }
}

fn decode_component(value: &str) -> Result<Vec<u8>> {
    if value.is_empty() {
        return Err(AuthzError::InvalidJwk);
    }
    decode_part(value).map_err(|_| AuthzError::InvalidJwk)
}

/// Decode a big-endian exponent of at most 8 bytes
pub(crate) fn decode_exponent(value: &str) -> Result<u64> {
    let bytes = decode_component(value)?;
    if bytes.len() > MAX_EXPONENT_LEN {
        return Err(AuthzError::UnsupportedExponentSize);
    }

    let mut padded = [0u8; MAX_EXPONENT_LEN];
    padded[MAX_EXPONENT_LEN - bytes.len()..].copy_from_slice(&bytes);
    Ok(u64::from_be_bytes(padded))
}
