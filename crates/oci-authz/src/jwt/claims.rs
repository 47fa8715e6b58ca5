//! Token claims
//!
//! Claims are kept as a multimap from claim key to claim records. Every value
//! is stored in its string form: JSON numbers keep their textual form,
//! booleans become `true`/`false` and arrays or objects become
//! [`INVALID_CLAIM_TYPE`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AuthzError, Result};

/// Issuer of claims copied from signed request headers
pub const HEADER_CLAIM_ISSUER: &str = "h";
/// Key prefix of claims copied from signed request headers
pub const HEADER_CLAIM_PREFIX: &str = "h_";
/// Value stored for claims that are not JSON scalars
pub const INVALID_CLAIM_TYPE: &str = "<INVALID_CLAIM_TYPE>";

// Registered claims
pub const CLAIM_ISSUER: &str = "iss";
pub const CLAIM_SUBJECT: &str = "sub";
pub const CLAIM_AUDIENCE: &str = "aud";
pub const CLAIM_EXPIRES: &str = "exp";
pub const CLAIM_NOT_BEFORE: &str = "nbf";
pub const CLAIM_ISSUED_AT: &str = "iat";
pub const CLAIM_JWT_ID: &str = "jti";
pub const CLAIM_JWK: &str = "jwk";

// Identity claims
pub const CLAIM_CN: &str = "CN";
pub const CLAIM_ORG_UNIT: &str = "OU";
pub const CLAIM_ORG: &str = "O";
pub const CLAIM_ISSUER_CN: &str = "IssuerCN";
pub const CLAIM_SERIAL: &str = "Serial";
pub const CLAIM_EMAIL: &str = "Email";
pub const CLAIM_NOT_BEFORE_CN: &str = "NotBefore";
pub const CLAIM_NOT_AFTER_CN: &str = "NotAfter";
pub const CLAIM_MFA_VERIFIED: &str = "mfa_verified";
pub const CLAIM_SERVICE_NAME: &str = "svc";
pub const CLAIM_FINGERPRINT: &str = "fprint";
pub const CLAIM_PRINCIPAL_TYPE: &str = "ptype";
pub const CLAIM_PRINCIPAL_SUB_TYPE: &str = "pstype";
pub const CLAIM_TOKEN_TYPE: &str = "ttype";
pub const CLAIM_TENANT: &str = "tenant";
pub const CLAIM_TARGET_TENANT: &str = "tgt";
pub const CLAIM_TARGET_TENANT_IDS: &str = "tgts";
pub const CLAIM_TARGET_SERVICE_NAME: &str = "tgt_name";
pub const CLAIM_TARGET_SERVICE_NAMES: &str = "tgt_names";
pub const CLAIM_DELEGATE_GROUPS: &str = "dgrps";
pub const CLAIM_CALL_CHAIN: &str = "chain";
pub const CLAIM_PREVIOUS_TOKEN_ID: &str = "pti";
pub const CLAIM_OWNER: &str = "own";
pub const CLAIM_FEDERATED_USER_GROUPS: &str = "grps";
pub const CLAIM_OBO_TOKEN: &str = "obo_tk";
pub const CLAIM_BODY: &str = "body";
pub const CLAIM_SESSION_EXPIRATION: &str = "sess_exp";
pub const CLAIM_CROSS_TENANCY_REQUEST_HEADER: &str = "h_x-cross-tenancy-request";
pub const CLAIM_SUBSCRIPTION_HEADER: &str = "h_x-subscription";

// Instance certificate claims
pub const CLAIM_OPC_CERT_TYPE: &str = "opc-certtype";
pub const CLAIM_OPC_INSTANCE: &str = "opc-instance";
pub const CLAIM_OPC_COMPARTMENT: &str = "opc-compartment";
pub const CLAIM_OPC_HOSTNAME: &str = "opc-hostname";
pub const CLAIM_OPC_TAG: &str = "opc-tag";
pub const CLAIM_OPC_BUMP: &str = "opc-bump";
pub const CLAIM_OPC_EPOCH: &str = "opc-epoch";
pub const CLAIM_OPC_IDENTITY: &str = "opc-identity";
pub const CLAIM_OPC_TENANT: &str = "opc-tenant";

/// A single claim record
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Claim {
    /// Issuer of the claim
    pub issuer: String,
    /// Claim key
    pub key: String,
    /// String form of the claim value
    pub value: String,
}

impl Claim {
    /// Create a claim
    pub fn new(issuer: impl Into<String>, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            key: key.into(),
            value: value.into(),
        }
    }

    /// True for the all-empty claim
    pub fn is_empty(&self) -> bool {
        self.issuer.is_empty() && self.key.is_empty() && self.value.is_empty()
    }
}

/// Multimap from claim key to claim records
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Claims {
    entries: BTreeMap<String, Vec<Claim>>,
}

impl Claims {
    /// Empty claim set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON object of claims
    ///
    /// The issuer of every claim is the value of the `iss` claim. Numbers
    /// keep the text they were written with.
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::Json`] if `data` is not a JSON object.
    pub fn from_json(data: &[u8]) -> Result<Self> {
        let decoded: serde_json::Map<String, Value> = serde_json::from_slice(data)?;

        let normalized: Vec<(String, String)> = decoded
            .into_iter()
            .map(|(key, value)| {
                let value = match value {
                    Value::String(s) => s,
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    _ => INVALID_CLAIM_TYPE.to_string(),
                };
                (key, value)
            })
            .collect();

        let issuer = normalized
            .iter()
            .find(|(key, _)| key == CLAIM_ISSUER)
            .map(|(_, value)| value.clone())
            .unwrap_or_default();

        let mut claims = Self::new();
        for (key, value) in normalized {
            claims.add(Claim::new(issuer.clone(), key, value));
        }
        Ok(claims)
    }

    /// First claim recorded under `key`
    pub fn get_single(&self, key: &str) -> Option<&Claim> {
        self.entries.get(key).and_then(|claims| claims.first())
    }

    /// All claims recorded under `key`
    pub fn get_all(&self, key: &str) -> &[Claim] {
        self.entries.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    /// Value of the first claim under `key`, or the empty string
    pub fn get_string(&self, key: &str) -> &str {
        self.get_single(key).map_or("", |claim| claim.value.as_str())
    }

    /// Value of the first claim under `key` as an integer; 0 when absent
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::InvalidClaim`] if the value is not an integer.
    pub fn get_int(&self, key: &str) -> Result<i64> {
        let value = self.get_string(key);
        if value.is_empty() {
            return Ok(0);
        }
        value.parse().map_err(|_| AuthzError::InvalidClaim {
            key: key.to_string(),
            reason: format!("'{value}' is not an integer"),
        })
    }

    /// Append a claim under its key
    pub fn add(&mut self, claim: Claim) {
        self.entries.entry(claim.key.clone()).or_default().push(claim);
    }

    /// Every claim record, ordered by key
    pub fn to_vec(&self) -> Vec<Claim> {
        self.entries.values().flatten().cloned().collect()
    }

    /// Iterate over keys and their records
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<Claim>)> {
        self.entries.iter()
    }

    /// Number of distinct keys
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no claims are recorded
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<Claim> for Claims {
    fn from_iter<I: IntoIterator<Item = Claim>>(iter: I) -> Self {
        let mut claims = Self::new();
        for claim in iter {
            claims.add(claim);
        }
        claims
    }
}
