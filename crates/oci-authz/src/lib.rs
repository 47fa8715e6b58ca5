//! # OCI Authz - Request Signing and Authorization Client
//!
//! Client library for an OCI-style identity service: signs outbound HTTP
//! requests, supplies and rotates the keys behind those signatures, verifies
//! identity tokens, and asks the identity service for authorization decisions
//! and derived tokens.
//!
//! ## Key Features
//!
//! - **HTTP Signatures** - `Signature` Authorization headers with RSA PKCS#1 v1.5 or PSS
//! - **Key Rotation** - rotation is a result variant, retried once by the signing client
//! - **STS Tokens** - short-lived session tokens minted from an X.509 identity
//! - **Key Service** - system and customer API keys, cached under separate namespaces
//! - **Authorization** - permission checks, association checks and tag authorization
//! - **Derived Tokens** - on-behalf-of, delegation and resource principal session tokens
//!
//! ## Architecture
//!
//! - [`signer`] - algorithms, key suppliers, request signing and the signing client
//! - [`jwt`] - token parsing and verification, claims, JWKs and token signing
//! - [`keys`] - key cache, key service suppliers, session keys, STS public keys
//! - [`x509`] - certificate suppliers backed by PEM data or URLs
//! - [`sts`] - the STS key supplier and its instance-principal constructors
//! - [`principal`] - caller identity built from a verified token
//! - [`authz`] - authorization requests, responses and the authorization client
//! - [`obo`], [`rpt`], [`rpst`] - derived tokens
//! - [`tagging`] - tag slug blobs
//! - [`config`] - serde configuration building the clients above
//! - [`error`] - the shared [`AuthzError`]
//!
//! ## Quick Start
//!
//! ```rust
//! use oci_authz::Principal;
//! use oci_authz::authz::{ActionKind, AuthorizationRequest, AuthzVariable};
//!
//! let user = Principal::new("ocid1.user.oc1..alice", "ocid1.tenancy.oc1..example");
//! let mut request = AuthorizationRequest::new(
//!     "request-1",
//!     "GetBucket",
//!     "ocid1.compartment.oc1..example",
//!     "objectstorage",
//!     Some(user),
//!     None,
//!     "us-phoenix-1",
//!     "PHX-AD-1",
//! )?;
//! request.set_action_kind(ActionKind::Read);
//! request.set_permission_variables(
//!     "BUCKET_READ",
//!     vec![AuthzVariable::string("target.bucket.name", "logs")],
//! );
//!
//! assert_eq!(request.requested_permissions(), vec!["BUCKET_READ"]);
//! # Ok::<(), oci_authz::AuthzError>(())
//! ```
//!
//! The request is then sent with
//! [`AuthorizationClient::all`](authz::AuthorizationClient::all) over a
//! [`SigningClient`](signer::SigningClient).

pub mod authz;
pub mod config;
pub mod error;
pub mod jwt;
pub mod keys;
pub mod obo;
pub mod principal;
pub mod rpst;
pub mod rpt;
pub mod signer;
pub mod sts;
pub mod tagging;
pub mod x509;

pub use authz::{
    ActionKind, AssociationAuthorizationRequest, AuthorizationClient, AuthorizationRequest,
    AuthorizationResponse, AuthzVariable,
};
pub use config::IdentityConfig;
pub use error::{AuthzError, OPC_REQUEST_ID, Result, ServiceResponseError};
pub use jwt::{Claim, Claims, Token, TokenParser};
pub use obo::{DEFAULT_TOKEN_EXPIRATION, OboRequestType, get_delegation_token, get_obo_token};
pub use principal::Principal;
pub use rpst::ResourcePrincipalSessionTokenProvider;
pub use rpt::{RPT_FIXED_KEY_ID, ResourcePrincipalTokenClaims, ResourcePrincipalTokenProvider};
pub use signer::{
    Algorithms, HttpClient, Key, KeyIdSupplier, KeyOutcome, KeyRotation, KeySupplier,
    ReqwestClient, RequestSigner, SigningClient,
};
pub use sts::StsKeySupplier;
pub use tagging::TagSlug;
