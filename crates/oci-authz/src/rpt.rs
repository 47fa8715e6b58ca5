//! Resource principal tokens
//!
//! An RPT is a JWT asserting the identity of a resource, signed with the
//! service principal session key and presented to the identity service to
//! obtain a resource principal session token.

use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use data_encoding::BASE32;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AuthzError, Result};
use crate::jwt::{Token, TokenParser, generate_jwt};
use crate::signer::{
    AlgorithmSupplier, KeyOutcome, KeySupplier, StaticKeySupplier, StaticPublicKeySupplier,
};

/// `kid` carried by every RPT, naming the trusted system key
pub const RPT_FIXED_KEY_ID: &str = "asw";

const TOKEN_LIFETIME: TimeDelta = TimeDelta::hours(2);
const TOKEN_AUDIENCE: &str = "oci";
const RESOURCE_PRINCIPAL_TYPE: &str = "resource";
const CLOCK_SKEW: TimeDelta = TimeDelta::seconds(2);
const TOKEN_ID_BYTES: usize = 10;

/// Claims of a resource principal token
///
/// Callers fill the resource fields; [`encode`](Self::encode) fills the rest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcePrincipalTokenClaims {
    #[serde(rename = "aud")]
    pub audience: String,
    #[serde(rename = "jti")]
    pub id: String,
    #[serde(rename = "iat")]
    pub issued_at: i64,
    #[serde(rename = "nbf")]
    pub not_before: i64,
    #[serde(rename = "sub")]
    pub subject: String,
    /// Expiry in epoch seconds, two hours from encoding when zero
    #[serde(rename = "exp")]
    pub expiry: i64,
    #[serde(rename = "ptype")]
    pub principal_type: String,
    #[serde(rename = "iss")]
    pub issuer: String,
    #[serde(rename = "ttype")]
    pub token_type: String,
    #[serde(rename = "res_type")]
    pub resource_type: String,
    #[serde(rename = "res_tenant")]
    pub tenant_id: String,
    /// Copy of `res_tenant` still read by the identity service
    #[serde(rename = "tenant")]
    pub dup_tenant_id: String,
    #[serde(rename = "res_compartment")]
    pub compartment_id: String,
    #[serde(rename = "res_id")]
    pub resource_id: String,
    #[serde(rename = "res_tag")]
    pub resource_tag: String,
    /// Session public key of the resource
    #[serde(rename = "res_pbk")]
    pub public_key: String,
}

impl ResourcePrincipalTokenClaims {
    fn validate(&self) -> Result<()> {
        let required = [
            (&self.issuer, AuthzError::InvalidClaimIssuer),
            (&self.token_type, AuthzError::InvalidClaimTokenType),
            (&self.resource_type, AuthzError::InvalidClaimResourceType),
            (&self.tenant_id, AuthzError::InvalidClaimTenantId),
            (&self.compartment_id, AuthzError::InvalidClaimCompartmentId),
            (&self.resource_id, AuthzError::InvalidClaimResourceId),
            (&self.resource_tag, AuthzError::InvalidClaimResourceTag),
            (&self.public_key, AuthzError::InvalidClaimPublicKey),
        ];
        for (value, err) in required {
            if value.is_empty() {
                return Err(err);
            }
        }
        Ok(())
    }

    /// Validate the resource fields and fill the standard ones
    ///
    /// # Errors
    ///
    /// Returns the `InvalidClaim*` error of the first empty required field.
    pub fn complete(&self) -> Result<Self> {
        self.validate()?;

        let now = Utc::now();
        let issued = (now - CLOCK_SKEW).timestamp();
        let expiry = if self.expiry == 0 {
            (now + TOKEN_LIFETIME).timestamp()
        } else {
            self.expiry
        };

        Ok(Self {
            audience: TOKEN_AUDIENCE.to_string(),
            id: token_id(),
            issued_at: issued,
            not_before: issued,
            subject: self.resource_id.clone(),
            expiry,
            principal_type: RESOURCE_PRINCIPAL_TYPE.to_string(),
            dup_tenant_id: self.tenant_id.clone(),
            ..self.clone()
        })
    }

    /// JSON claims of the completed token
    ///
    /// # Errors
    ///
    /// See [`complete`](Self::complete).
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.complete()?)?)
    }
}

/// Lower-case base32 of 10 random bytes
fn token_id() -> String {
    let mut bytes = [0u8; TOKEN_ID_BYTES];
    OsRng.fill_bytes(&mut bytes);
    BASE32.encode(&bytes).to_ascii_lowercase()
}

/// Signs and verifies RPTs with the service principal session key
///
/// The key supplier should only hold keys trusted for token signing, such as
/// an [`StsKeySupplier`](crate::sts::StsKeySupplier).
pub struct ResourcePrincipalTokenProvider {
    key_supplier: Arc<dyn KeySupplier>,
    algorithms: Arc<dyn AlgorithmSupplier>,
}

impl ResourcePrincipalTokenProvider {
    pub fn new(key_supplier: Arc<dyn KeySupplier>, algorithms: Arc<dyn AlgorithmSupplier>) -> Self {
        Self {
            key_supplier,
            algorithms,
        }
    }

    /// Sign `claims` with the key behind `spst`, under key id `asw`
    ///
    /// A rotation signalled for `spst` is followed once.
    ///
    /// # Errors
    ///
    /// Returns claim validation errors, key lookup errors,
    /// [`AuthzError::InvalidKey`] when the key is not private and
    /// [`AuthzError::UnsupportedAlgorithm`] for an unknown `algorithm`.
    pub async fn generate_rpt(
        &self,
        spst: &str,
        algorithm: &str,
        claims: &ResourcePrincipalTokenClaims,
    ) -> Result<String> {
        let encoded = claims.encode()?;

        let key = match self.key_supplier.key(spst).await? {
            KeyOutcome::Found(key) => key,
            KeyOutcome::Rotate(rotation) => {
                debug!("session key rotated while signing RPT, retrying once");
                self.key_supplier
                    .key(&rotation.replacement_key_id)
                    .await?
                    .into_key()?
            }
        };
        let private = key.as_private().ok_or(AuthzError::InvalidKey)?;
        let signer = StaticKeySupplier::new(Arc::clone(private), RPT_FIXED_KEY_ID);

        generate_jwt(
            RPT_FIXED_KEY_ID,
            algorithm,
            &encoded,
            &signer,
            self.algorithms.as_ref(),
        )
        .await
    }

    /// Verify `raw` against the public half of the key behind `spst`
    ///
    /// # Errors
    ///
    /// Returns key lookup errors and the parser's verification errors.
    pub async fn parse_rpt(&self, raw: &str, spst: &str) -> Result<Token> {
        let key = self.key_supplier.key(spst).await?.into_key()?;
        let verifier = StaticPublicKeySupplier::new(Arc::new(key.public_key()), RPT_FIXED_KEY_ID);
        TokenParser::new(Arc::new(verifier), Arc::clone(&self.algorithms))
            .parse(raw)
            .await
    }
}

impl std::fmt::Debug for ResourcePrincipalTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourcePrincipalTokenProvider").finish_non_exhaustive()
    }
}
