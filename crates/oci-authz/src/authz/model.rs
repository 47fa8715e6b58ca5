//! Authorization request model and its wire form
//!
//! An [`AuthorizationRequest`] is what callers build: principals, the target
//! compartment and a context of permission records. Each record starts with a
//! [`ContextVariable::Permission`] followed by the variables that qualify it.
//! [`OutboundAuthorizationRequest`] is the JSON body the identity service
//! receives, and also the shape it echoes back.

use serde::de::{self, Deserializer};
use serde::ser::{self, SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

use crate::authz::permissions::ActionKind;
use crate::error::{AuthzError, Result};
use crate::jwt::Claim;
use crate::principal::Principal;
use crate::tagging::TagSlug;

/// Reserved permission carrying request-wide variables
pub const COMMON_PERMISSION: &str = "__COMMON__";
/// Common variable holding the compartment id
pub const COMPARTMENT_VARIABLE: &str = "target.compartment.id";
/// Common variable holding the operation id
pub const OPERATION_VARIABLE: &str = "request.operation";

/// Type tag of a context variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContextVariableType {
    String,
    Boolean,
    Integer,
    List,
    Entity,
    Subnet,
}

impl ContextVariableType {
    pub fn as_str(self) -> &'static str {
        match self {
            ContextVariableType::String => "STRING",
            ContextVariableType::Boolean => "BOOLEAN",
            ContextVariableType::Integer => "INTEGER",
            ContextVariableType::List => "LIST",
            ContextVariableType::Entity => "ENTITY",
            ContextVariableType::Subnet => "SUBNET",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        [
            ContextVariableType::String,
            ContextVariableType::Boolean,
            ContextVariableType::Integer,
            ContextVariableType::List,
            ContextVariableType::Entity,
            ContextVariableType::Subnet,
        ]
        .into_iter()
        .find(|kind| kind.as_str() == name)
    }

    fn is_scalar(self) -> bool {
        matches!(
            self,
            ContextVariableType::String
                | ContextVariableType::Integer
                | ContextVariableType::Entity
                | ContextVariableType::Subnet
        )
    }
}

/// One entry of a permission record
///
/// Every variant has its own JSON shape:
///
/// | variant      | JSON                                   |
/// |--------------|----------------------------------------|
/// | `Permission` | `{"p"}`                                |
/// | `Value`      | `{"NAME","TYPE","VALUE"}`              |
/// | `Boolean`    | `{"NAME","TYPE","BOOLEAN"}`            |
/// | `List`       | `{"NAME","TYPE","TYPES","VALUES"}`     |
///
/// A `Value` whose type is `BOOLEAN` or `LIST` cannot be serialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextVariable {
    Permission(String),
    Value {
        name: String,
        kind: ContextVariableType,
        value: String,
    },
    /// `None` serializes as `null`, distinct from `false`
    Boolean { name: String, value: Option<bool> },
    List {
        name: String,
        types: String,
        values: Vec<String>,
    },
}

impl ContextVariable {
    pub fn permission(&self) -> Option<&str> {
        match self {
            ContextVariable::Permission(p) => Some(p),
            _ => None,
        }
    }

    /// Whether the variable has a wire form
    pub fn is_valid(&self) -> bool {
        match self {
            ContextVariable::Value { kind, .. } => kind.is_scalar(),
            _ => true,
        }
    }
}

impl Serialize for ContextVariable {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            ContextVariable::Permission(p) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("p", p)?;
                map.end()
            }
            ContextVariable::Value { name, kind, value } => {
                if !kind.is_scalar() {
                    return Err(ser::Error::custom(AuthzError::InvalidCtxVarType));
                }
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("NAME", name)?;
                map.serialize_entry("TYPE", kind)?;
                map.serialize_entry("VALUE", value)?;
                map.end()
            }
            ContextVariable::Boolean { name, value } => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("NAME", name)?;
                map.serialize_entry("TYPE", &ContextVariableType::Boolean)?;
                map.serialize_entry("BOOLEAN", value)?;
                map.end()
            }
            ContextVariable::List {
                name,
                types,
                values,
            } => {
                let mut map = serializer.serialize_map(Some(4))?;
                map.serialize_entry("NAME", name)?;
                map.serialize_entry("TYPE", &ContextVariableType::List)?;
                map.serialize_entry("TYPES", types)?;
                map.serialize_entry("VALUES", values)?;
                map.end()
            }
        }
    }
}

#[derive(Deserialize)]
struct RawContextVariable {
    #[serde(default)]
    p: String,
    #[serde(rename = "NAME", default)]
    name: String,
    #[serde(rename = "TYPE", default)]
    kind: String,
    #[serde(rename = "TYPES", default)]
    types: String,
    #[serde(rename = "VALUE", default)]
    value: String,
    #[serde(rename = "VALUES", default)]
    values: Option<Vec<String>>,
    #[serde(rename = "BOOLEAN", default)]
    boolean: Option<bool>,
}

impl<'de> Deserialize<'de> for ContextVariable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = RawContextVariable::deserialize(deserializer)?;
        if raw.kind.is_empty() {
            return Ok(ContextVariable::Permission(raw.p));
        }

        let kind = ContextVariableType::from_name(&raw.kind)
            .ok_or_else(|| de::Error::custom(AuthzError::InvalidCtxVarType))?;

        Ok(match kind {
            ContextVariableType::Boolean => ContextVariable::Boolean {
                name: raw.name,
                value: raw.boolean,
            },
            ContextVariableType::List => ContextVariable::List {
                name: raw.name,
                types: raw.types,
                values: raw.values.unwrap_or_default(),
            },
            kind => ContextVariable::Value {
                name: raw.name,
                kind,
                value: raw.value,
            },
        })
    }
}

/// Caller-side description of a context variable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthzVariable {
    pub name: String,
    pub kind: ContextVariableType,
    pub types: String,
    pub value: String,
    pub values: Vec<String>,
    pub boolean: bool,
}

impl AuthzVariable {
    fn scalar(name: impl Into<String>, kind: ContextVariableType, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            types: String::new(),
            value: value.into(),
            values: Vec::new(),
            boolean: false,
        }
    }

    pub fn string(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::scalar(name, ContextVariableType::String, value)
    }

    pub fn integer(name: impl Into<String>, value: i64) -> Self {
        Self::scalar(name, ContextVariableType::Integer, value.to_string())
    }

    pub fn entity(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::scalar(name, ContextVariableType::Entity, value)
    }

    pub fn subnet(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::scalar(name, ContextVariableType::Subnet, value)
    }

    pub fn boolean(name: impl Into<String>, value: bool) -> Self {
        Self {
            boolean: value,
            ..Self::scalar(name, ContextVariableType::Boolean, "")
        }
    }

    /// List of `types`-typed values
    pub fn list(name: impl Into<String>, types: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            types: types.into(),
            values,
            ..Self::scalar(name, ContextVariableType::List, "")
        }
    }
}

impl From<AuthzVariable> for ContextVariable {
    fn from(variable: AuthzVariable) -> Self {
        match variable.kind {
            ContextVariableType::Boolean => ContextVariable::Boolean {
                name: variable.name,
                value: Some(variable.boolean),
            },
            ContextVariableType::List => ContextVariable::List {
                name: variable.name,
                types: variable.types,
                values: variable.values,
            },
            kind => ContextVariable::Value {
                name: variable.name,
                kind,
                value: variable.value,
            },
        }
    }
}

/// Permissions named by `context`, skipping [`COMMON_PERMISSION`]
///
/// Only the leading entry of each record names a permission.
pub fn permissions_from_context(context: &[Vec<ContextVariable>]) -> Vec<String> {
    context
        .iter()
        .filter_map(|record| record.first().and_then(ContextVariable::permission))
        .filter(|p| *p != COMMON_PERMISSION)
        .map(str::to_string)
        .collect()
}

/// An authorization question for the identity service
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthorizationRequest {
    pub request_id: String,
    pub operation_id: String,
    pub compartment_id: String,
    pub service_name: String,
    pub user_principal: Option<Principal>,
    pub service_principal: Option<Principal>,
    pub region: String,
    pub physical_ad: String,
    pub action_kind: ActionKind,
    pub context: Vec<Vec<ContextVariable>>,
    pub tag_slug_original: Option<TagSlug>,
    pub tag_slug_changes: Option<TagSlug>,
}

impl AuthorizationRequest {
    /// Build and validate a request with action kind [`ActionKind::NotDefined`]
    ///
    /// # Errors
    ///
    /// See [`AuthorizationRequest::check_required_variables`].
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        request_id: impl Into<String>,
        operation_id: impl Into<String>,
        compartment_id: impl Into<String>,
        service_name: impl Into<String>,
        user_principal: Option<Principal>,
        service_principal: Option<Principal>,
        region: impl Into<String>,
        physical_ad: impl Into<String>,
    ) -> Result<Self> {
        let request = Self {
            request_id: request_id.into(),
            operation_id: operation_id.into(),
            compartment_id: compartment_id.into(),
            service_name: service_name.into(),
            user_principal,
            service_principal,
            region: region.into(),
            physical_ad: physical_ad.into(),
            ..Self::default()
        };
        request.check_required_variables()?;
        Ok(request)
    }

    /// Check the scalar fields every request needs
    ///
    /// # Errors
    ///
    /// Returns the first of [`AuthzError::InvalidOperationId`],
    /// [`AuthzError::InvalidCompartmentId`], [`AuthzError::InvalidRequestRegion`],
    /// [`AuthzError::InvalidPhysicalAd`] and [`AuthzError::InvalidPrincipal`]
    /// that applies.
    pub fn check_required_variables(&self) -> Result<()> {
        if self.operation_id.is_empty() {
            return Err(AuthzError::InvalidOperationId);
        }
        if self.compartment_id.is_empty() {
            return Err(AuthzError::InvalidCompartmentId);
        }
        if self.region.is_empty() {
            return Err(AuthzError::InvalidRequestRegion);
        }
        if self.physical_ad.is_empty() {
            return Err(AuthzError::InvalidPhysicalAd);
        }
        if self.user_principal.is_none() && self.service_principal.is_none() {
            return Err(AuthzError::InvalidPrincipal);
        }
        Ok(())
    }

    pub fn set_action_kind(&mut self, action_kind: ActionKind) {
        self.action_kind = action_kind;
    }

    /// Add `variables` under `permission`
    ///
    /// Variables are appended to every record that already names the
    /// permission; otherwise a new record is started.
    pub fn set_permission_variables(&mut self, permission: &str, variables: Vec<AuthzVariable>) {
        let variables: Vec<ContextVariable> =
            variables.into_iter().map(ContextVariable::from).collect();

        let mut exists = false;
        for record in &mut self.context {
            if record.first().and_then(ContextVariable::permission) == Some(permission) {
                exists = true;
                record.extend(variables.iter().cloned());
            }
        }

        if !exists {
            let mut record = Vec::with_capacity(variables.len() + 1);
            record.push(ContextVariable::Permission(permission.to_string()));
            record.extend(variables);
            self.context.push(record);
        }
    }

    /// Add one variable under [`COMMON_PERMISSION`]
    pub fn set_common_permission(&mut self, variable: AuthzVariable) {
        self.set_permission_variables(COMMON_PERMISSION, vec![variable]);
    }

    /// Add the compartment and operation variables under [`COMMON_PERMISSION`]
    pub fn set_common_permissions(&mut self) {
        let variables = vec![
            AuthzVariable::entity(COMPARTMENT_VARIABLE, self.compartment_id.clone()),
            AuthzVariable::string(OPERATION_VARIABLE, self.operation_id.clone()),
        ];
        self.set_permission_variables(COMMON_PERMISSION, variables);
    }

    pub fn set_existing_tag_slug(&mut self, slug: TagSlug) {
        self.tag_slug_original = Some(slug);
    }

    pub fn set_new_tag_slug(&mut self, slug: TagSlug) {
        self.tag_slug_changes = Some(slug);
    }

    pub fn requested_permissions(&self) -> Vec<String> {
        permissions_from_context(&self.context)
    }

    /// Validation run before a request is sent, followed by injection of
    /// the common permissions
    pub(crate) fn prepare(&mut self) -> Result<()> {
        self.check_required_variables()?;
        if self.context.is_empty() {
            return Err(AuthzError::NoPermissionsSet);
        }
        if !self.context.iter().flatten().all(ContextVariable::is_valid) {
            return Err(AuthzError::InvalidCtxVarType);
        }
        self.set_common_permissions();
        Ok(())
    }
}

/// Two or more requests authorized together
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssociationAuthorizationRequest {
    pub requests: Vec<AuthorizationRequest>,
}

impl AssociationAuthorizationRequest {
    /// # Errors
    ///
    /// Returns [`AuthzError::AssociationInsufficientRequests`] for fewer than
    /// two requests, or the validation error of the first invalid request.
    pub fn new(requests: Vec<AuthorizationRequest>) -> Result<Self> {
        if requests.len() < 2 {
            return Err(AuthzError::AssociationInsufficientRequests);
        }
        for request in &requests {
            request.check_required_variables()?;
        }
        Ok(Self { requests })
    }
}

/// Principal as sent to the identity service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationRequestPrincipal {
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub subject_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub claims: Vec<Claim>,
}

impl From<&Principal> for AuthorizationRequestPrincipal {
    fn from(principal: &Principal) -> Self {
        Self {
            tenant_id: principal.tenant_id().to_string(),
            subject_id: principal.id().to_string(),
            claims: principal.claims().to_vec(),
        }
    }
}

/// Always serialized as an empty object
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Properties {}

/// JSON body of an authorization call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundAuthorizationRequest {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client: String,
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub service_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_principal: Option<AuthorizationRequestPrincipal>,
    #[serde(rename = "svcPrincipal", default, skip_serializing_if = "Option::is_none")]
    pub service_principal: Option<AuthorizationRequestPrincipal>,
    #[serde(rename = "oboPrincipal", default, skip_serializing_if = "Option::is_none")]
    pub obo_principal: Option<AuthorizationRequestPrincipal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<AuthorizationRequestPrincipal>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub context: Vec<Vec<ContextVariable>>,
    #[serde(default)]
    pub properties: Properties,
    #[serde(default)]
    pub region: String,
    #[serde(rename = "physicalAD", default)]
    pub physical_ad: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub action_kind: ActionKind,
    #[serde(rename = "tagSlugO", default, skip_serializing_if = "Option::is_none")]
    pub tag_slug_original: Option<TagSlug>,
    #[serde(rename = "tagSlugC", default, skip_serializing_if = "Option::is_none")]
    pub tag_slug_changes: Option<TagSlug>,
    #[serde(rename = "tagSlugM", default, skip_serializing_if = "Option::is_none")]
    pub tag_slug_merged: Option<TagSlug>,
    #[serde(rename = "tagError", default, skip_serializing_if = "String::is_empty")]
    pub tag_error: String,
    #[serde(rename = "responseError", default, skip_serializing_if = "Option::is_none")]
    pub response_error: Option<crate::authz::response::AuthzResponseErrorType>,
}

impl OutboundAuthorizationRequest {
    /// Project `request` onto the wire
    ///
    /// With only a user, `principal` and `userPrincipal` carry it. With only
    /// a service, `principal` and `svcPrincipal` carry it. With both, the
    /// service is the principal and the user is also the on-behalf-of
    /// principal. Tag slugs are copied only when `with_tags` is set.
    pub fn from_request(request: &AuthorizationRequest, with_tags: bool) -> Self {
        let user = request.user_principal.as_ref().map(AuthorizationRequestPrincipal::from);
        let service = request
            .service_principal
            .as_ref()
            .map(AuthorizationRequestPrincipal::from);

        let (principal, user_principal, service_principal, obo_principal) = match (user, service) {
            (Some(user), None) => (Some(user.clone()), Some(user), None, None),
            (None, Some(service)) => (Some(service.clone()), None, Some(service), None),
            (Some(user), Some(service)) => {
                (Some(service.clone()), Some(user.clone()), Some(service), Some(user))
            }
            (None, None) => (None, None, None, None),
        };

        let (tag_slug_original, tag_slug_changes) = if with_tags {
            (
                request.tag_slug_original.clone(),
                request.tag_slug_changes.clone(),
            )
        } else {
            (None, None)
        };

        Self {
            request_id: request.request_id.clone(),
            service_name: request.service_name.clone(),
            user_principal,
            service_principal,
            obo_principal,
            principal,
            context: request.context.clone(),
            region: request.region.clone(),
            physical_ad: request.physical_ad.clone(),
            action_kind: request.action_kind,
            tag_slug_original,
            tag_slug_changes,
            ..Self::default()
        }
    }

    pub fn granted_permissions(&self) -> Vec<String> {
        permissions_from_context(&self.context)
    }
}

/// JSON body of an association call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutboundAssociationAuthorizationRequest {
    pub requests: Vec<OutboundAuthorizationRequest>,
}

impl From<&AssociationAuthorizationRequest> for OutboundAssociationAuthorizationRequest {
    fn from(association: &AssociationAuthorizationRequest) -> Self {
        Self {
            requests: association
                .requests
                .iter()
                .map(|request| OutboundAuthorizationRequest::from_request(request, false))
                .collect(),
        }
    }
}

pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
