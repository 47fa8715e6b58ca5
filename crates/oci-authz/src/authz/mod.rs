//! Authorization client
//!
//! - [`model`]: requests, context variables and the outbound wire body
//! - [`response`]: responses and permission decisions
//! - [`permissions`]: action kinds and permission set algebra
//! - [`client`]: the HTTP client of the authorization endpoints

pub mod client;
pub mod model;
pub mod permissions;
pub mod response;

pub use client::{ASSOCIATE_PATH, AUTHORIZE_PATH, AUTHORIZE_WITH_TAGS_PATH, AuthorizationClient};
pub use model::{
    AssociationAuthorizationRequest, AuthorizationRequest, AuthorizationRequestPrincipal,
    AuthzVariable, COMMON_PERMISSION, COMPARTMENT_VARIABLE, ContextVariable, ContextVariableType,
    OPERATION_VARIABLE, OutboundAssociationAuthorizationRequest, OutboundAuthorizationRequest,
    Properties, permissions_from_context,
};
pub use permissions::{
    ACTION_KIND_SEVERITY, ActionKind, ActionProfile, difference, intersect, top_action_kind,
};
pub use response::{
    AssociationAuthorizationResponse, AssociationAuthorizationResult, AuthorizationContext,
    AuthorizationResponse, AuthzResponseErrorType,
};
