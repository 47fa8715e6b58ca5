//! Error types shared by every component of the crate
//!
//! A single [`AuthzError`] enum covers the signer, the key suppliers, the
//! token parser, the authorization client and the derived-token issuers, so
//! errors raised deep inside a key supplier reach the caller of a top-level
//! operation unchanged.
//!
//! Key rotation is modelled as a successful [`KeyOutcome::Rotate`] value and
//! only becomes [`AuthzError::KeyRotated`] when a rotation escapes the single
//! consumer that is allowed to handle it.
//!
//! [`KeyOutcome::Rotate`]: crate::signer::KeyOutcome::Rotate

use std::fmt;

use bytes::Bytes;
use http::StatusCode;

use crate::signer::KeyRotation;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, AuthzError>;

/// Response header carrying the identity service request id
pub const OPC_REQUEST_ID: &str = "opc-request-id";

const UNKNOWN: &str = "unknown";

/// Errors produced by request signing, key supply, token handling and
/// authorization calls
#[derive(Debug, thiserror::Error)]
pub enum AuthzError {
    /// A function argument is invalid
    #[error("invalid argument")]
    InvalidArg,

    /// Leaf certificate missing
    #[error("certificate must be a non-nil value")]
    InvalidCertificate,

    /// Private key missing
    #[error("private key must be a non-nil value")]
    InvalidPrivateKey,

    /// Tenant id empty
    #[error("tenant id must be a non-empty string")]
    InvalidTenantId,

    /// Leaf certificate PEM could not be decoded
    #[error("certificate PEM data is invalid")]
    InvalidCertPem,

    /// Intermediate certificate PEM could not be decoded
    #[error("intermediate certificate PEM data is invalid")]
    InvalidIntermediateCertPem,

    /// Private key PEM could not be decoded or is not RSA
    #[error("private Key PEM data is invalid")]
    InvalidPrivateKeyPem,

    /// Endpoint empty
    #[error("endpoint must be a non-empty string")]
    InvalidEndpoint,

    /// The supplier does not hold a key with the requested id
    #[error("key not found")]
    KeyNotFound,

    /// The requested key id does not match the supplier's key-id grammar
    #[error("the format of the requested keyID is not supported")]
    UnsupportedKeyFormat,

    /// A key rotation escaped the signing retry loop
    #[error("key rotated from '{}' to '{}'", .0.old_key_id, .0.replacement_key_id)]
    KeyRotated(KeyRotation),

    /// A key rotation was signalled without a replacement key id
    #[error("replacement key id must be a non-empty value")]
    ReplacementKeyIdEmpty,

    /// The key is of the wrong kind for the requested operation
    #[error("key is not valid for this operation")]
    InvalidKey,

    /// The key id used for signing is empty
    #[error("key id must be a non-empty value")]
    InvalidKeyId,

    /// No algorithm is registered under this name
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The request carries no Authorization header
    #[error("authorization header missing from the request")]
    MissingAuthzHeader,

    /// The Authorization header uses a scheme other than `Signature`
    #[error("unsupported authorization scheme")]
    UnsupportedScheme,

    /// Signature verification failed
    #[error("signature verification failed")]
    SignatureVerification,

    /// A JWT did not split into three segments
    #[error("jWT token should consist of three parts")]
    JwtMalformed,

    /// The token `nbf` is in the future
    #[error("token not valid yet")]
    TokenNotValidYet,

    /// The token `exp` is in the past
    #[error("token expired")]
    TokenExpired,

    /// The JWK key type is not RSA
    #[error("the JWK key type is not supported")]
    UnsupportedJwkType,

    /// The token carries no `jwk` claim
    #[error("token does not contain a JWK")]
    NoJwk,

    /// The JWK modulus or exponent is empty or undecodable
    #[error("invalid JWK")]
    InvalidJwk,

    /// The JWK exponent is larger than 8 bytes
    #[error("unsupported public key exponent size")]
    UnsupportedExponentSize,

    /// A public key PEM block could not be decoded
    #[error("failed to decode public key PEM block")]
    PemDecode,

    /// A claim value could not be interpreted
    #[error("invalid claim '{key}': {reason}")]
    InvalidClaim {
        /// Claim key
        key: String,
        /// What was wrong with it
        reason: String,
    },

    /// Required signing headers are missing
    #[error("required headers missing from the request object")]
    RequiredHeaderMissing,

    /// Token string empty
    #[error("token must be a non-nil value")]
    InvalidToken,

    /// Authorization request has no operation id
    #[error("operationID must be a non-empty value")]
    InvalidOperationId,

    /// Authorization request has no compartment id
    #[error("compartmentID must be a non-empty value")]
    InvalidCompartmentId,

    /// Authorization request has no region
    #[error("requestRegion must be a non-empty value")]
    InvalidRequestRegion,

    /// Authorization request has no physical availability domain
    #[error("physicalAD must be a non-empty value")]
    InvalidPhysicalAd,

    /// Action kind outside the closed enumeration
    #[error("invalid ActionKind")]
    InvalidActionKind,

    /// Neither a user nor a service principal was supplied
    #[error("either UserPrincipal or ServicePrincipal must be a non-nil value")]
    InvalidPrincipal,

    /// Authorization request context is empty
    #[error("authorization request must contain permissions")]
    NoPermissionsSet,

    /// A context variable carries an unknown type tag
    #[error("invalid context variable type")]
    InvalidCtxVarType,

    /// Association call with fewer than two requests
    #[error("association call must include at least 2 authorization requests")]
    AssociationInsufficientRequests,

    /// Association response length differs from the request length
    #[error(
        "authorization response does not equal the length of authorization requests inside association request"
    )]
    UnexpectedAssociationResponseLength,

    /// The service rejected the submitted tags
    #[error("tag authorization failed: {0}")]
    TagAuthorization(String),

    /// OBO request principal missing or incomplete
    #[error("requestPrincipal must be a non-nil value")]
    InvalidRequestPrincipal,

    /// OBO request without target services
    #[error("targetServiceNames must be non-empty")]
    NoTargetServiceNames,

    /// OBO request type outside {OBO, DELEGATION}
    #[error("requestType must be 'OBO' or 'DELEGATION'")]
    InvalidRequestType,

    /// Delegation request without delegate groups
    #[error("delegateGroups must not be empty")]
    InvalidDelegateGroups,

    /// RPT issuer empty
    #[error("issuer claim must be a non-empty value")]
    InvalidClaimIssuer,

    /// RPT token type empty
    #[error("token type claim must be a non-empty value")]
    InvalidClaimTokenType,

    /// RPT resource type empty
    #[error("resource type claim must be a non-empty value")]
    InvalidClaimResourceType,

    /// RPT resource tenant empty
    #[error("resource tenant claim must be a non-empty value")]
    InvalidClaimTenantId,

    /// RPT resource compartment empty
    #[error("resource compartment claim must be a non-empty value")]
    InvalidClaimCompartmentId,

    /// RPT resource id empty
    #[error("resource id claim must be a non-empty value")]
    InvalidClaimResourceId,

    /// RPT resource tag empty
    #[error("resource tag claim must be a non-empty value")]
    InvalidClaimResourceTag,

    /// RPT public key empty
    #[error("public key claim must be a non-empty value")]
    InvalidClaimPublicKey,

    /// The identity service answered with an unexpected status
    #[error(transparent)]
    ServiceResponse(#[from] ServiceResponseError),

    /// JSON encoding or decoding failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Base64 decoding failed
    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Tag slug protobuf decoding failed
    #[error("tag slug decode error: {0}")]
    TagSlugDecode(#[from] prost::DecodeError),

    /// A URL could not be parsed
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// An HTTP request could not be built
    #[error("invalid HTTP request: {0}")]
    InvalidRequest(String),

    /// The HTTP transport failed
    #[error("transport error: {0}")]
    Transport(String),

    /// A cryptographic primitive failed
    #[error("crypto error: {0}")]
    Crypto(String),
}

impl From<http::Error> for AuthzError {
    fn from(err: http::Error) -> Self {
        Self::InvalidRequest(err.to_string())
    }
}

impl From<reqwest::Error> for AuthzError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<rsa::Error> for AuthzError {
    fn from(err: rsa::Error) -> Self {
        Self::Crypto(err.to_string())
    }
}

/// A non-200 response from the identity service
///
/// The response status, target and body are kept so the caller may inspect
/// them.
#[derive(Debug, Clone)]
pub struct ServiceResponseError {
    /// Response status
    pub status: Option<StatusCode>,
    /// Target URL of the failed request
    pub url: Option<String>,
    /// `opc-request-id` header of the response
    pub request_id: Option<String>,
    /// Raw response body
    pub body: Bytes,
}

impl ServiceResponseError {
    /// Capture the parts of a response needed to describe the failure
    pub fn from_response(url: impl Into<String>, response: &http::Response<Bytes>) -> Self {
        let request_id = response
            .headers()
            .get(OPC_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_owned);

        Self {
            status: Some(response.status()),
            url: Some(url.into()),
            request_id,
            body: response.body().clone(),
        }
    }
}

impl fmt::Display for ServiceResponseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = self
            .status
            .map_or_else(|| UNKNOWN.to_string(), |s| s.to_string());
        write!(
            f,
            "Unexpected status code of '{}' returned from {}. OPC-Request-ID: {}",
            status,
            self.url.as_deref().unwrap_or(UNKNOWN),
            self.request_id.as_deref().unwrap_or(UNKNOWN),
        )
    }
}

impl std::error::Error for ServiceResponseError {}
