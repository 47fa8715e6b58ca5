//! JSON Web Tokens
//!
//! - [`claims`]: claim records and the claims multimap
//! - [`jwk`]: RSA JSON Web Keys
//! - [`token`]: parsing, verification, validity window and signing

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};

pub mod claims;
pub mod jwk;
pub mod token;

pub use claims::{Claim, Claims, HEADER_CLAIM_ISSUER, HEADER_CLAIM_PREFIX, INVALID_CLAIM_TYPE};
pub use jwk::Jwk;
pub use token::{
    Header, Token, TokenParser, VerificationPolicy, always_verify, decode_part, encode_part,
    generate_jwt, never_verify, sign_jwt,
};

/// Base64url without padding on encode, padding optional on decode
pub(crate) const TOKEN_PART: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);
