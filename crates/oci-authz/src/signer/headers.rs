//! Header names and required-header checks for signed OCI requests

use http::{HeaderMap, Method, Request};

use crate::error::{AuthzError, Result};

/// Pseudo-header standing for the method and request URI
pub const HDR_REQUEST_TARGET: &str = "(request-target)";
/// `Date` header
pub const HDR_DATE: &str = "date";
/// Alternative date header accepted in place of `Date`
pub const HDR_X_DATE: &str = "x-date";
/// `Host` header
pub const HDR_HOST: &str = "host";
/// `Authorization` header
pub const HDR_AUTHORIZATION: &str = "authorization";
/// Base64 SHA-256 of the request body
pub const HDR_X_CONTENT_SHA256: &str = "x-content-sha256";
/// `Content-Length` header
pub const HDR_CONTENT_LENGTH: &str = "content-length";
/// `Content-Type` header
pub const HDR_CONTENT_TYPE: &str = "content-type";

/// Headers signed on reads by default
pub const DEFAULT_READ_HEADERS: &[&str] = &[HDR_DATE, HDR_REQUEST_TARGET];

/// Headers signed on writes by default
pub const DEFAULT_WRITE_HEADERS: &[&str] = &[
    HDR_DATE,
    HDR_REQUEST_TARGET,
    HDR_X_CONTENT_SHA256,
    HDR_CONTENT_LENGTH,
    HDR_CONTENT_TYPE,
];

const REQUIRED_WRITE_HEADERS: &[&str] =
    &[HDR_CONTENT_TYPE, HDR_X_CONTENT_SHA256, HDR_CONTENT_LENGTH];

/// POST, PUT and PATCH carry a body that must be hashed and signed
pub fn is_write_method(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

fn has_value(headers: &HeaderMap, name: &str) -> bool {
    headers
        .get(name)
        .is_some_and(|value| !value.as_bytes().is_empty())
}

/// Check that a request carries the headers an OCI signature needs
///
/// Any request needs `Date` or `x-date`; writes also need `Content-Type`,
/// `x-content-sha256` and `Content-Length`.
///
/// # Errors
///
/// Returns [`AuthzError::RequiredHeaderMissing`] if a header is absent.
pub fn check_required_headers<B>(request: &Request<B>) -> Result<()> {
    let headers = request.headers();
    if !has_value(headers, HDR_DATE) && !has_value(headers, HDR_X_DATE) {
        return Err(AuthzError::RequiredHeaderMissing);
    }

    if is_write_method(request.method())
        && !REQUIRED_WRITE_HEADERS
            .iter()
            .all(|name| has_value(headers, name))
    {
        return Err(AuthzError::RequiredHeaderMissing);
    }

    Ok(())
}

/// Check a list of signed header names against the method's requirements
///
/// Names compare case-insensitively. `extra` lists caller-specific headers
/// that must also be present.
///
/// # Errors
///
/// Returns [`AuthzError::RequiredHeaderMissing`] if a header is absent.
pub fn check_required_headers_list<S: AsRef<str>>(
    method: &Method,
    headers: &[S],
    extra: &[S],
) -> Result<()> {
    let signed: Vec<String> = headers
        .iter()
        .map(|h| h.as_ref().to_ascii_lowercase())
        .collect();
    let contains = |name: &str| signed.iter().any(|h| h.eq_ignore_ascii_case(name));

    if !contains(HDR_DATE) && !contains(HDR_X_DATE) {
        return Err(AuthzError::RequiredHeaderMissing);
    }

    let mut required: Vec<&str> = vec![HDR_REQUEST_TARGET];
    if is_write_method(method) {
        required.extend_from_slice(REQUIRED_WRITE_HEADERS);
    }
    required.extend(extra.iter().map(AsRef::as_ref));

    if required.into_iter().all(contains) {
        Ok(())
    } else {
        Err(AuthzError::RequiredHeaderMissing)
    }
}
