//! Verifier-side public keys of STS-signed requests
//!
//! A request signed by an STS key supplier carries the key id `ST$<jwt>`.
//! The token is verified with a [`TokenParser`] and the public key embedded in
//! its `jwk` claim is the key that verifies the request.

use async_trait::async_trait;

use crate::error::{AuthzError, Result};
use crate::jwt::TokenParser;
use crate::signer::{Key, KeyOutcome, KeySupplier};

/// Prefix of key ids that carry an STS token
pub const STS_TOKEN_PREFIX: &str = "ST$";

/// Resolves `ST$<jwt>` key ids to the public key inside the token
#[derive(Debug, Clone)]
pub struct StsPublicKeySupplier {
    parser: TokenParser,
}

impl StsPublicKeySupplier {
    pub fn new(parser: TokenParser) -> Self {
        Self { parser }
    }
}

#[async_trait]
impl KeySupplier for StsPublicKeySupplier {
    async fn key(&self, key_id: &str) -> Result<KeyOutcome> {
        let Some(raw) = key_id.strip_prefix(STS_TOKEN_PREFIX) else {
            return Err(AuthzError::InvalidKey);
        };

        let token = self.parser.parse(raw).await?;
        Ok(KeyOutcome::Found(Key::from(token.public_key()?)))
    }
}
