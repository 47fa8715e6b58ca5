//! Authorization responses and the decisions derived from them
//!
//! The identity service echoes the request, keeping only the permission
//! records it grants. Decisions compare the requested permissions of the
//! original [`AuthorizationRequest`] with the granted ones of the echo.

use serde::{Deserialize, Serialize};

use crate::authz::model::{AuthorizationRequest, OutboundAuthorizationRequest};
use crate::authz::permissions::{difference, intersect};
use crate::error::AuthzError;
use crate::tagging::TagSlug;

/// Error class reported by the service for a failed authorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthzResponseErrorType {
    NoError,
    Empty,
    ResourceAuthorizationError,
    TagAuthorizationOrNotExistError,
    TagValidationError,
}

/// Outcome of an association call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssociationAuthorizationResult {
    Success,
    #[default]
    FailUnknown,
    FailBadRequest,
    FailMissingEndorse,
    FailMissingAdmit,
}

impl AssociationAuthorizationResult {
    pub fn is_success(self) -> bool {
        self == AssociationAuthorizationResult::Success
    }
}

/// Context filled in by the client after a call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthorizationContext {
    /// Request id answered by the service, or the one sent
    pub request_id: String,
    /// Granted subset of the requested permissions
    pub permissions: Vec<String>,
    pub tag_slug_error: Option<String>,
    pub tag_slug_merged: Option<TagSlug>,
    pub response_error_type: Option<AuthzResponseErrorType>,
}

impl AuthorizationContext {
    pub fn authorize_tags(&self) -> bool {
        self.tag_slug_error.is_none()
    }

    pub fn tag_error(&self) -> Option<AuthzError> {
        self.tag_slug_error
            .as_ref()
            .map(|err| AuthzError::TagAuthorization(err.clone()))
    }

    pub fn tag_slug(&self) -> Option<&TagSlug> {
        self.tag_slug_merged.as_ref()
    }

    pub fn error_type(&self) -> Option<AuthzResponseErrorType> {
        self.response_error_type
    }
}

/// Answer to a single authorization request
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AuthorizationResponse {
    #[serde(skip)]
    pub context: AuthorizationContext,
    /// The request as sent
    #[serde(skip)]
    pub request: AuthorizationRequest,
    /// The request as echoed by the service
    #[serde(rename = "authorizationRequest", default)]
    pub outbound: OutboundAuthorizationRequest,
    #[serde(rename = "decisionCacheDuration", default)]
    pub decision_cache_duration: Option<String>,
}

impl AuthorizationResponse {
    /// Attach the request and fill the context from the echo
    pub(crate) fn complete(&mut self, request: AuthorizationRequest, request_id: String) {
        self.context.request_id = request_id;
        self.context.tag_slug_error =
            Some(self.outbound.tag_error.clone()).filter(|err| !err.is_empty());
        self.context.tag_slug_merged = self.outbound.tag_slug_merged.clone();
        self.context.response_error_type = self.outbound.response_error;
        self.request = request;
    }

    pub fn requested_permissions(&self) -> Vec<String> {
        self.request.requested_permissions()
    }

    pub fn granted_permissions(&self) -> Vec<String> {
        self.outbound.granted_permissions()
    }

    /// Requested permissions that were granted, sorted and deduplicated
    pub fn filter(&self) -> Vec<String> {
        intersect(&self.requested_permissions(), &self.granted_permissions())
    }

    pub fn any(&self) -> bool {
        !self.filter().is_empty()
    }

    /// Every requested permission was granted and the tags were accepted
    pub fn all(&self) -> bool {
        self.set(&self.requested_permissions()) && self.authorize_tags()
    }

    /// Whether every permission of `permissions` was granted
    ///
    /// False for an empty `permissions` or when nothing was granted.
    pub fn set<S: AsRef<str>>(&self, permissions: &[S]) -> bool {
        if permissions.is_empty() {
            return false;
        }
        let granted = self.granted_permissions();
        if granted.is_empty() {
            return false;
        }
        let requested: Vec<&str> = permissions.iter().map(AsRef::as_ref).collect();
        let granted: Vec<&str> = granted.iter().map(String::as_str).collect();
        difference(&requested, &granted).is_empty()
    }

    pub fn authorize_tags(&self) -> bool {
        self.outbound.tag_error.is_empty()
    }

    pub fn tag_error(&self) -> Option<AuthzError> {
        (!self.outbound.tag_error.is_empty())
            .then(|| AuthzError::TagAuthorization(self.outbound.tag_error.clone()))
    }

    pub fn tag_slug(&self) -> Option<&TagSlug> {
        self.outbound.tag_slug_merged.as_ref()
    }

    pub fn error_type(&self) -> Option<AuthzResponseErrorType> {
        self.outbound.response_error
    }
}

/// Answer to an association call, one response per request
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AssociationAuthorizationResponse {
    #[serde(default, deserialize_with = "crate::authz::model::null_as_default")]
    pub responses: Vec<AuthorizationResponse>,
    #[serde(rename = "associationResult", default)]
    pub association_result: AssociationAuthorizationResult,
}
