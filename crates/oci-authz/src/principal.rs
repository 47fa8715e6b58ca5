//! Authenticated principals
//!
//! A [`Principal`] is built from a verified [`Token`] or directly from a
//! subject and tenant. Signed request headers can be attached as claims with
//! issuer [`HEADER_CLAIM_ISSUER`] and key prefix [`HEADER_CLAIM_PREFIX`].

use http::Request;

use crate::error::Result;
use crate::jwt::claims::{CLAIM_PRINCIPAL_TYPE, CLAIM_SUBJECT, CLAIM_TENANT};
use crate::jwt::{Claim, Claims, HEADER_CLAIM_ISSUER, HEADER_CLAIM_PREFIX, Token};
use crate::signer::headers::{HDR_AUTHORIZATION, HDR_HOST, HDR_REQUEST_TARGET};
use crate::signer::request::{extract_signature_fields, host, request_target};

/// Subject used when none is known
pub const SUBJECT_NOT_SPECIFIED: &str = "<subject-not-specified>";

pub const PRINCIPAL_TYPE_USER: &str = "user";
pub const PRINCIPAL_TYPE_SERVICE: &str = "service";
pub const PRINCIPAL_TYPE_INSTANCE: &str = "instance";
pub const PRINCIPAL_SUB_TYPE_FEDERATED: &str = "fed";

/// The actor of a request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Principal {
    subject: String,
    tenant_id: String,
    delegate: Option<Box<Principal>>,
    claims: Claims,
}

impl Principal {
    /// Principal with no claims; an empty subject becomes [`SUBJECT_NOT_SPECIFIED`]
    pub fn new(subject: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        let subject = subject.into();
        Self {
            subject: if subject.is_empty() {
                SUBJECT_NOT_SPECIFIED.to_string()
            } else {
                subject
            },
            tenant_id: tenant_id.into(),
            delegate: None,
            claims: Claims::new(),
        }
    }

    /// Principal described by the claims of a verified token
    pub fn from_token(token: &Token, delegate: Option<Principal>) -> Self {
        let mut principal = Self::new(
            token.claims.get_string(CLAIM_SUBJECT),
            token.claims.get_string(CLAIM_TENANT),
        );
        principal.claims = token.claims.clone();
        principal.delegate = delegate.map(Box::new);
        principal
    }

    /// Principal from a token plus the signed headers of `request`
    ///
    /// # Errors
    ///
    /// See [`Principal::add_header_claims`].
    pub fn from_token_and_request<B>(
        token: &Token,
        delegate: Option<Principal>,
        request: &Request<B>,
    ) -> Result<Self> {
        let mut principal = Self::from_token(token, delegate);
        principal.add_header_claims(request)?;
        Ok(principal)
    }

    /// Subject id
    pub fn id(&self) -> &str {
        &self.subject
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    /// Principal acting on behalf of this one, if any
    pub fn delegate(&self) -> Option<&Principal> {
        self.delegate.as_deref()
    }

    /// Value of the `ptype` claim, defaulting to [`PRINCIPAL_TYPE_USER`]
    pub fn principal_type(&self) -> &str {
        match self.claims.get_string(CLAIM_PRINCIPAL_TYPE) {
            "" => PRINCIPAL_TYPE_USER,
            ptype => ptype,
        }
    }

    /// Record every header named in the request signature, plus
    /// `authorization`, as a header claim
    ///
    /// # Errors
    ///
    /// Returns the errors of [`extract_signature_fields`] when the request
    /// carries no `Signature` Authorization header.
    pub fn add_header_claims<B>(&mut self, request: &Request<B>) -> Result<()> {
        let fields = extract_signature_fields(request.headers())?;

        let names = fields
            .headers
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(HDR_AUTHORIZATION));
        for name in names {
            let name = name.to_lowercase();
            let value = match name.as_str() {
                HDR_REQUEST_TARGET => request_target(request),
                HDR_HOST => host(request),
                _ => request
                    .headers()
                    .get(&name)
                    .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                    .unwrap_or_default(),
            };
            self.add_claim(Claim::new(
                HEADER_CLAIM_ISSUER,
                format!("{HEADER_CLAIM_PREFIX}{name}"),
                value,
            ));
        }
        Ok(())
    }

    pub fn add_claim(&mut self, claim: Claim) {
        self.claims.add(claim);
    }
}
