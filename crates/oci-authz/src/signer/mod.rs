//! HTTP request signing
//!
//! - [`algorithm`]: RSA PKCS#1 v1.5 and PSS signature algorithms and their registry
//! - [`key`]: key suppliers and the rotation signal
//! - [`request`]: signing string, `Authorization` header, verification
//! - [`client`]: transport trait and the rotation-aware signing client
//! - [`headers`]: header names and required-header checks

pub mod algorithm;
pub mod client;
pub mod headers;
pub mod key;
pub mod request;

pub use algorithm::{
    ALG_RSA_PSS_SHA256, ALG_RSA_SHA256, Algorithm, AlgorithmSupplier, Algorithms, JWT_ALG_PS256,
    JWT_ALG_RS256, RsaPssSha256, RsaSha256,
};
pub use client::{
    ClientOptions, DEFAULT_TIMEOUT, HttpClient, OciRequestPreparer, PrepareRequest, ReqwestClient,
    SigningClient,
};
pub use headers::{check_required_headers, check_required_headers_list};
pub use key::{
    FORCE_ROTATE, Key, KeyIdSupplier, KeyOutcome, KeyRotation, KeySupplier, KeySupplierMux,
    StaticKeySupplier, StaticPublicKeySupplier,
};
pub use request::{
    RequestSigner, RequestVerifier, SignOutcome, SignatureFields, extract_signature_fields,
    sign_request, verify_request,
};
