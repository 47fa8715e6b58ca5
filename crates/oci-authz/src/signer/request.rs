//! HTTP request signing and verification
//!
//! The signing string is one line per signed header, in the order given,
//! joined by `\n`:
//!
//! - `(request-target): <lowercase method> <path>?<query>`
//! - `host: <authority>`
//! - `<lowercase name>: <value>` for any other header
//!
//! The signature is carried in an `Authorization` header:
//!
//! ```text
//! Signature version="1",headers="date (request-target)",keyId="…",algorithm="rsa-sha256",signature="…"
//! ```

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use http::header::AUTHORIZATION;
use http::{HeaderMap, HeaderValue, Request};
use tracing::debug;

use super::algorithm::{Algorithm, AlgorithmSupplier};
use super::headers::{HDR_DATE, HDR_HOST, HDR_REQUEST_TARGET};
use super::key::{KeyOutcome, KeyRotation, KeySupplier};
use crate::error::{AuthzError, Result};

const SIGNATURE_SCHEME: &str = "Signature";

/// Result of a signing attempt
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum SignOutcome {
    /// The Authorization header was set
    Signed,
    /// The key supplier asked the caller to sign with another key id
    Rotate(KeyRotation),
}

/// Fields of a `Signature` Authorization header
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignatureFields {
    /// Signed header names, lowercased
    pub headers: Vec<String>,
    /// Key id the request was signed with
    pub key_id: String,
    /// Base64 signature
    pub signature: String,
    /// Algorithm name
    pub algorithm: String,
}

/// The `(request-target)` value: lowercase method, path and query
pub fn request_target<B>(request: &Request<B>) -> String {
    let path = request
        .uri()
        .path_and_query()
        .map_or("/", |pq| pq.as_str());
    format!("{} {}", request.method().as_str().to_lowercase(), path)
}

pub(crate) fn host<B>(request: &Request<B>) -> String {
    match request.uri().authority() {
        Some(authority) => authority.to_string(),
        None => header_value(request.headers(), HDR_HOST),
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
        .unwrap_or_default()
}

/// Build the string that is signed for `headers_to_sign`
pub fn string_to_sign<B, S: AsRef<str>>(request: &Request<B>, headers_to_sign: &[S]) -> String {
    headers_to_sign
        .iter()
        .map(|header| {
            let name = header.as_ref().to_lowercase();
            let value = if name == HDR_REQUEST_TARGET {
                request_target(request)
            } else if name == HDR_HOST {
                host(request)
            } else {
                header_value(request.headers(), &name)
            };
            format!("{name}: {value}")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render the Authorization header value
pub fn authorization_header(
    headers: &[String],
    key_id: &str,
    algorithm: &str,
    signature: &[u8],
) -> String {
    format!(
        r#"Signature version="1",headers="{}",keyId="{}",algorithm="{}",signature="{}""#,
        headers.join(" "),
        key_id,
        algorithm,
        STANDARD.encode(signature)
    )
}

/// Sign `request` with the key that `key_supplier` holds for `key_id`
///
/// An empty `headers_to_sign` signs only `date`.
///
/// # Errors
///
/// Returns [`AuthzError::InvalidKeyId`] for an empty key id, and any error of
/// the key supplier or the algorithm.
pub async fn sign_request<S: AsRef<str>>(
    request: &mut Request<bytes::Bytes>,
    key_id: &str,
    key_supplier: &dyn KeySupplier,
    headers_to_sign: &[S],
    algorithm: &dyn Algorithm,
) -> Result<SignOutcome> {
    if key_id.is_empty() {
        return Err(AuthzError::InvalidKeyId);
    }

    let key = match key_supplier.key(key_id).await? {
        KeyOutcome::Found(key) => key,
        KeyOutcome::Rotate(rotation) => return Ok(SignOutcome::Rotate(rotation)),
    };

    let mut headers: Vec<String> = headers_to_sign
        .iter()
        .map(|h| h.as_ref().to_lowercase())
        .collect();
    if headers.is_empty() {
        headers.push(HDR_DATE.to_string());
    }

    let signature = algorithm.sign(string_to_sign(request, headers.as_slice()).as_bytes(), &key)?;
    let value = authorization_header(&headers, key_id, algorithm.name(), &signature);
    let value = HeaderValue::from_str(&value).map_err(|e| AuthzError::InvalidRequest(e.to_string()))?;
    request.headers_mut().insert(AUTHORIZATION, value);

    debug!(key_id_len = key_id.len(), algorithm = algorithm.name(), "Signed request");
    Ok(SignOutcome::Signed)
}

/// Signs requests with a fixed key supplier and algorithm
#[derive(Clone)]
pub struct RequestSigner {
    key_supplier: Arc<dyn KeySupplier>,
    algorithm: Arc<dyn Algorithm>,
}

impl RequestSigner {
    /// Create a signer
    pub fn new(key_supplier: Arc<dyn KeySupplier>, algorithm: Arc<dyn Algorithm>) -> Self {
        Self {
            key_supplier,
            algorithm,
        }
    }

    /// Algorithm used by this signer
    pub fn algorithm(&self) -> &Arc<dyn Algorithm> {
        &self.algorithm
    }

    /// Sign `request` as `key_id`
    ///
    /// # Errors
    ///
    /// See [`sign_request`].
    pub async fn sign<S: AsRef<str>>(
        &self,
        request: &mut Request<bytes::Bytes>,
        key_id: &str,
        headers_to_sign: &[S],
    ) -> Result<SignOutcome> {
        sign_request(
            request,
            key_id,
            self.key_supplier.as_ref(),
            headers_to_sign,
            self.algorithm.as_ref(),
        )
        .await
    }
}

impl std::fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSigner")
            .field("algorithm", &self.algorithm.name())
            .finish_non_exhaustive()
    }
}

/// Parse the `Signature` Authorization header
///
/// Unknown fields are ignored and missing fields are left empty.
///
/// # Errors
///
/// Returns [`AuthzError::MissingAuthzHeader`] if there is no Authorization
/// header and [`AuthzError::UnsupportedScheme`] for any scheme other than
/// `Signature`.
pub fn extract_signature_fields(headers: &HeaderMap) -> Result<SignatureFields> {
    let value = header_value(headers, AUTHORIZATION.as_str());
    if value.is_empty() {
        return Err(AuthzError::MissingAuthzHeader);
    }

    let (scheme, params) = value.split_once(' ').unwrap_or((value.as_str(), ""));
    if scheme != SIGNATURE_SCHEME {
        return Err(AuthzError::UnsupportedScheme);
    }

    let mut fields = SignatureFields::default();
    for field in params.split(',') {
        let field = field.trim_matches(' ');
        let (key, value) = field.split_once('=').unwrap_or((field, ""));
        let value = value.trim_matches('"');
        match key.to_lowercase().as_str() {
            "headers" => fields.headers = value.split_whitespace().map(str::to_string).collect(),
            "keyid" => fields.key_id = value.to_string(),
            "signature" => fields.signature = value.to_string(),
            "algorithm" => fields.algorithm = value.to_string(),
            _ => {}
        }
    }

    Ok(fields)
}

/// Verify the signature carried by `request`
///
/// # Errors
///
/// Returns the header parsing errors of [`extract_signature_fields`], key
/// supplier and algorithm lookup errors, [`AuthzError::Base64`] for an
/// undecodable signature and [`AuthzError::SignatureVerification`] when the
/// signature does not match.
pub async fn verify_request<B>(
    request: &Request<B>,
    key_supplier: &dyn KeySupplier,
    algorithms: &dyn AlgorithmSupplier,
) -> Result<()> {
    let fields = extract_signature_fields(request.headers())?;
    let key = key_supplier.key(&fields.key_id).await?.into_key()?;
    let algorithm = algorithms.algorithm(&fields.algorithm)?;
    let signature = STANDARD.decode(fields.signature.as_bytes())?;

    algorithm.verify(
        string_to_sign(request, fields.headers.as_slice()).as_bytes(),
        &signature,
        &key,
    )
}

/// Verifies signed requests with a fixed key supplier and algorithm registry
#[derive(Clone)]
pub struct RequestVerifier {
    key_supplier: Arc<dyn KeySupplier>,
    algorithms: Arc<dyn AlgorithmSupplier>,
}

impl RequestVerifier {
    /// Create a verifier
    pub fn new(key_supplier: Arc<dyn KeySupplier>, algorithms: Arc<dyn AlgorithmSupplier>) -> Self {
        Self {
            key_supplier,
            algorithms,
        }
    }

    /// Verify `request`
    ///
    /// # Errors
    ///
    /// See [`verify_request`].
    pub async fn verify<B>(&self, request: &Request<B>) -> Result<()> {
        verify_request(request, self.key_supplier.as_ref(), self.algorithms.as_ref()).await
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::signer::algorithm::{Algorithms, RsaPssSha256, RsaSha256};
    use crate::signer::key::{StaticKeySupplier, StaticPublicKeySupplier, test_keys};

    fn get_request() -> Request<Bytes> {
        Request::builder()
            .method("GET")
            .uri("https://identity.example.com:443/v1/keys?limit=5")
            .header("Date", "Thu, 05 Jan 2014 21:31:40 GMT")
            .header("X-Custom", "abc")
            .body(Bytes::new())
            .unwrap()
    }

    #[test]
    fn test_string_to_sign() {
        let request = get_request();
        let signed = string_to_sign(&request, &["Date", "(request-target)", "host", "x-custom"]);
        assert_eq!(
            signed,
            "date: Thu, 05 Jan 2014 21:31:40 GMT\n\
             (request-target): get /v1/keys?limit=5\n\
             host: identity.example.com:443\n\
             x-custom: abc"
        );
    }

    #[test]
    fn test_missing_header_signs_empty_value() {
        let request = get_request();
        assert_eq!(string_to_sign(&request, &["x-missing"]), "x-missing: ");
    }

    #[tokio::test]
    async fn test_sign_and_verify_round_trip() {
        let private = test_keys::private_key();
        let signer = RequestSigner::new(
            Arc::new(StaticKeySupplier::new(Arc::clone(&private), "kid")),
            Arc::new(RsaPssSha256::new()),
        );

        let mut request = get_request();
        let outcome = signer
            .sign(&mut request, "kid", &["date", "(request-target)"])
            .await
            .unwrap();
        assert_eq!(outcome, SignOutcome::Signed);

        let verifier = RequestVerifier::new(
            Arc::new(StaticPublicKeySupplier::new(
                Arc::new(private.to_public_key()),
                "kid",
            )),
            Arc::new(Algorithms::standard()),
        );
        verifier.verify(&request).await.unwrap();

        request
            .headers_mut()
            .insert("date", HeaderValue::from_static("tampered"));
        assert!(matches!(
            verifier.verify(&request).await,
            Err(AuthzError::SignatureVerification)
        ));
    }

    #[tokio::test]
    async fn test_authorization_header_layout() {
        let supplier = StaticKeySupplier::new(test_keys::private_key(), "my/key");
        let mut request = get_request();
        sign_request(&mut request, "my/key", &supplier, &[] as &[&str], &RsaSha256::new())
            .await
            .unwrap();

        let value = request.headers()[AUTHORIZATION].to_str().unwrap().to_string();
        assert!(value.starts_with(
            r#"Signature version="1",headers="date",keyId="my/key",algorithm="rsa-sha256",signature=""#
        ));

        let fields = extract_signature_fields(request.headers()).unwrap();
        assert_eq!(fields.headers, vec!["date".to_string()]);
        assert_eq!(fields.key_id, "my/key");
        assert_eq!(fields.algorithm, "rsa-sha256");
        assert!(STANDARD.decode(&fields.signature).is_ok());
    }

    #[tokio::test]
    async fn test_resigning_replaces_authorization() {
        let supplier = StaticKeySupplier::new(test_keys::private_key(), "kid");
        let mut request = get_request();
        for _ in 0..2 {
            sign_request(&mut request, "kid", &supplier, &["date"], &RsaSha256::new())
                .await
                .unwrap();
        }
        assert_eq!(request.headers().get_all(AUTHORIZATION).iter().count(), 1);
    }

    #[tokio::test]
    async fn test_empty_key_id_rejected() {
        let supplier = StaticKeySupplier::new(test_keys::private_key(), "kid");
        let mut request = get_request();
        assert!(matches!(
            sign_request(&mut request, "", &supplier, &["date"], &RsaSha256::new()).await,
            Err(AuthzError::InvalidKeyId)
        ));
    }

    #[test]
    fn test_extract_fields_errors() {
        let mut headers = HeaderMap::new();
        assert!(matches!(
            extract_signature_fields(&headers),
            Err(AuthzError::MissingAuthzHeader)
        ));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert!(matches!(
            extract_signature_fields(&headers),
            Err(AuthzError::UnsupportedScheme)
        ));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Signature"));
        assert_eq!(extract_signature_fields(&headers).unwrap(), SignatureFields::default());
    }
}
