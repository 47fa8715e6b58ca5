//! Key material beyond static keys
//!
//! - [`cache`]: class-namespaced public-key cache
//! - [`key_service`]: system and API public keys from the identity key service
//! - [`session`]: ephemeral session keypair
//! - [`sts_pub`]: public keys embedded in `ST$` key ids

pub mod cache;
pub mod key_service;
pub mod session;
pub mod sts_pub;

pub use cache::{API_KEY_PREFIX, KeyCache, SYSTEM_KEY_PREFIX};
pub use key_service::{
    API_KEY_CACHE_PERIOD, KeyServiceKeySupplier, SYSTEM_KEY_CACHE_PERIOD, SYSTEM_KEY_PATTERN,
    decode_pkix_public_key,
};
pub use session::{SESSION_KEY_BITS, SessionKeySupplier};
pub use sts_pub::{STS_TOKEN_PREFIX, StsPublicKeySupplier};
