//! JWT parsing, verification and signing

use std::fmt;
use std::sync::Arc;

use base64::Engine as _;
use chrono::{DateTime, Utc};
use rsa::RsaPublicKey;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::TOKEN_PART;
use super::claims::{CLAIM_EXPIRES, CLAIM_JWK, CLAIM_NOT_BEFORE, Claims};
use super::jwk::Jwk;
use crate::error::{AuthzError, Result};
use crate::signer::{AlgorithmSupplier, Algorithms, Key, KeyOutcome, KeySupplier};

/// Decides per raw token whether its signature is checked
///
/// Skipping verification is only meant for bootstrap flows where the
/// verifying key service cannot be reached yet.
pub type VerificationPolicy = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Policy that verifies every token
#[must_use]
pub fn always_verify() -> VerificationPolicy {
    Arc::new(|_| true)
}

/// Policy that verifies no token
#[must_use]
pub fn never_verify() -> VerificationPolicy {
    Arc::new(|_| false)
}

/// Decoded JOSE header
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Header {
    /// Key id of the signing key
    #[serde(rename = "kid", skip_serializing_if = "String::is_empty")]
    pub key_id: String,
    /// Signature algorithm name
    #[serde(rename = "alg", skip_serializing_if = "String::is_empty")]
    pub algorithm: String,
}

/// A decoded JSON Web Token
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Token {
    pub header: Header,
    pub claims: Claims,
}

impl Token {
    /// Check `nbf <= clock <= exp`
    ///
    /// A missing or zero `nbf` passes.
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::TokenNotValidYet`], [`AuthzError::TokenExpired`]
    /// or [`AuthzError::InvalidClaim`] for a non-integer time claim.
    pub fn valid_for(&self, clock: DateTime<Utc>) -> Result<()> {
        let now = clock.timestamp_millis();

        let nbf = self.claims.get_int(CLAIM_NOT_BEFORE)?;
        if nbf > 0 && now < nbf.saturating_mul(1000) {
            return Err(AuthzError::TokenNotValidYet);
        }

        let exp = self.claims.get_int(CLAIM_EXPIRES)?;
        if now > exp.saturating_mul(1000) {
            return Err(AuthzError::TokenExpired);
        }

        Ok(())
    }

    /// Public key carried in the `jwk` claim
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::NoJwk`] when the claim is absent,
    /// [`AuthzError::Json`] when it is not a JWK object, or the JWK's own
    /// conversion error.
    pub fn public_key(&self) -> Result<RsaPublicKey> {
        let raw = self.claims.get_string(CLAIM_JWK);
        if raw.is_empty() {
            return Err(AuthzError::NoJwk);
        }
        let jwk: Jwk = serde_json::from_str(raw)?;
        jwk.public_key()
    }
}

/// Parses and verifies tokens against one trust class of keys
///
/// The key supplier must only hand out keys trusted for token signing. Do not
/// pass a supplier that can resolve both system keys and customer API keys.
#[derive(Clone)]
pub struct TokenParser {
    key_supplier: Arc<dyn KeySupplier>,
    algorithms: Arc<dyn AlgorithmSupplier>,
}

impl TokenParser {
    pub fn new(key_supplier: Arc<dyn KeySupplier>, algorithms: Arc<dyn AlgorithmSupplier>) -> Self {
        Self {
            key_supplier,
            algorithms,
        }
    }

    /// Parser using the JWS algorithm names (`RS256`, `PS256`)
    pub fn with_jwt_algorithms(key_supplier: Arc<dyn KeySupplier>) -> Self {
        Self::new(key_supplier, Arc::new(Algorithms::jwt()))
    }

    /// Decode and verify `raw`
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::JwtMalformed`] unless `raw` has three segments,
    /// decoding errors for bad segments, and any key lookup or signature
    /// verification error unchanged.
    pub async fn parse(&self, raw: &str) -> Result<Token> {
        self.parse_inner(raw, None).await
    }

    /// Decode `raw`, verifying it only when `should_verify(raw)` holds
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::InvalidArg`] for an empty token, otherwise the
    /// errors of [`TokenParser::parse`].
    pub async fn parse_with_policy(
        &self,
        raw: &str,
        should_verify: &(dyn Fn(&str) -> bool + Send + Sync),
    ) -> Result<Token> {
        if raw.is_empty() {
            return Err(AuthzError::InvalidArg);
        }
        self.parse_inner(raw, Some(should_verify)).await
    }

    async fn parse_inner(
        &self,
        raw: &str,
        should_verify: Option<&(dyn Fn(&str) -> bool + Send + Sync)>,
    ) -> Result<Token> {
        let (header, body, signature) = extract_parts(raw)?;

        if should_verify.is_none_or(|verify| verify(raw)) {
            self.verify(&header, &signature, raw).await?;
        } else {
            debug!(kid = %header.key_id, "token signature check skipped by policy");
        }

        let claims = Claims::from_json(&body)?;
        Ok(Token { header, claims })
    }

    async fn verify(&self, header: &Header, signature: &[u8], raw: &str) -> Result<()> {
        let signed_len = raw.rfind('.').ok_or(AuthzError::JwtMalformed)?;

        let key = self.key_supplier.key(&header.key_id).await?.into_key()?;
        let algorithm = self.algorithms.algorithm(&header.algorithm)?;

        algorithm.verify(&raw.as_bytes()[..signed_len], signature, &key)
    }
}

impl fmt::Debug for TokenParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenParser").finish_non_exhaustive()
    }
}

fn extract_parts(raw: &str) -> Result<(Header, Vec<u8>, Vec<u8>)> {
    let parts: Vec<&str> = raw.split('.').collect();
    let [header, body, signature] = parts.as_slice() else {
        return Err(AuthzError::JwtMalformed);
    };

    let header: Header = serde_json::from_slice(&decode_part(header)?)?;
    Ok((header, decode_part(body)?, decode_part(signature)?))
}

/// Base64url-decode one token segment, with or without padding
///
/// # Errors
///
/// Returns [`AuthzError::Base64`] for invalid input.
pub fn decode_part(part: &str) -> Result<Vec<u8>> {
    Ok(TOKEN_PART.decode(part)?)
}

/// Base64url-encode one token segment without padding
pub fn encode_part(data: impl AsRef<[u8]>) -> String {
    TOKEN_PART.encode(data)
}

fn signing_input(key_id: &str, algorithm: &str, claims: &str) -> Result<String> {
    let header = Header {
        key_id: key_id.to_string(),
        algorithm: algorithm.to_string(),
    };
    Ok(format!(
        "{}.{}",
        encode_part(serde_json::to_vec(&header)?),
        encode_part(claims)
    ))
}

fn sign_with(
    key_id: &str,
    algorithm: &str,
    claims: &str,
    key: &Key,
    algorithms: &dyn AlgorithmSupplier,
) -> Result<String> {
    let algorithm_impl = algorithms.algorithm(algorithm)?;
    let input = signing_input(key_id, algorithm, claims)?;
    let signature = algorithm_impl.sign(input.as_bytes(), key)?;
    Ok(format!("{input}.{}", encode_part(signature)))
}

/// Build a signed JWT `header.claims.signature` over the JSON `claims`
///
/// The key is looked up once; a rotation signal is returned as
/// [`AuthzError::KeyRotated`].
///
/// # Errors
///
/// Returns key lookup, algorithm lookup or signing errors.
pub async fn generate_jwt(
    key_id: &str,
    algorithm: &str,
    claims: &str,
    key_supplier: &dyn KeySupplier,
    algorithms: &dyn AlgorithmSupplier,
) -> Result<String> {
    let key = key_supplier.key(key_id).await?.into_key()?;
    sign_with(key_id, algorithm, claims, &key, algorithms)
}

/// Like [`generate_jwt`], but follows one key rotation
///
/// When the supplier signals a rotation the token is signed with the
/// replacement key and carries the replacement id as `kid`.
///
/// # Errors
///
/// Returns [`AuthzError::ReplacementKeyIdEmpty`] for a rotation without a
/// replacement id and [`AuthzError::KeyRotated`] for a second rotation.
pub async fn sign_jwt(
    key_id: &str,
    algorithm: &str,
    claims: &str,
    key_supplier: &dyn KeySupplier,
    algorithms: &dyn AlgorithmSupplier,
) -> Result<String> {
    match key_supplier.key(key_id).await? {
        KeyOutcome::Found(key) => sign_with(key_id, algorithm, claims, &key, algorithms),
        KeyOutcome::Rotate(rotation) => {
            if rotation.replacement_key_id.is_empty() {
                return Err(AuthzError::ReplacementKeyIdEmpty);
            }
            debug!("key rotated while signing token, retrying once");
            let replacement = rotation.replacement_key_id;
            let key = key_supplier.key(&replacement).await?.into_key()?;
            sign_with(&replacement, algorithm, claims, &key, algorithms)
        }
    }
}
