//! Authorization calls against the identity service

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderValue, Method, Request, Response, StatusCode};
use serde::Serialize;
use tracing::{debug, warn};

use crate::authz::model::{
    AssociationAuthorizationRequest, AuthorizationRequest, OutboundAssociationAuthorizationRequest,
    OutboundAuthorizationRequest,
};
use crate::authz::response::{AssociationAuthorizationResponse, AuthorizationResponse};
use crate::error::{AuthzError, OPC_REQUEST_ID, Result, ServiceResponseError};
use crate::signer::HttpClient;

pub const AUTHORIZE_PATH: &str = "authorization/authorizerequest";
pub const AUTHORIZE_WITH_TAGS_PATH: &str = "authorization/authorizerequest2";
pub const ASSOCIATE_PATH: &str = "authorization/associaterequest";

/// Client of the authorization endpoints
///
/// The wrapped [`HttpClient`] is expected to sign requests, normally a
/// [`SigningClient`](crate::signer::SigningClient).
#[derive(Clone)]
pub struct AuthorizationClient {
    client: Arc<dyn HttpClient>,
    endpoint: String,
    with_tags: bool,
}

impl AuthorizationClient {
    /// Client without tag authorization
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::InvalidEndpoint`] for an empty endpoint.
    pub fn new(client: Arc<dyn HttpClient>, endpoint: impl Into<String>) -> Result<Self> {
        Self::build(client, endpoint.into(), false)
    }

    /// Client that submits tag slugs with every request
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::InvalidEndpoint`] for an empty endpoint.
    pub fn with_tags(client: Arc<dyn HttpClient>, endpoint: impl Into<String>) -> Result<Self> {
        Self::build(client, endpoint.into(), true)
    }

    fn build(client: Arc<dyn HttpClient>, endpoint: String, with_tags: bool) -> Result<Self> {
        if endpoint.is_empty() {
            return Err(AuthzError::InvalidEndpoint);
        }
        Ok(Self {
            client,
            endpoint,
            with_tags,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn tags_enabled(&self) -> bool {
        self.with_tags
    }

    /// Validate `request`, add the common permissions and ask the service
    ///
    /// # Errors
    ///
    /// - validation errors of
    ///   [`AuthorizationRequest::check_required_variables`]
    /// - [`AuthzError::NoPermissionsSet`] for an empty context
    /// - [`AuthzError::InvalidCtxVarType`] for a context variable without a
    ///   wire form
    /// - [`AuthzError::ServiceResponse`] for a non-200 answer
    pub async fn make_authorization_call(
        &self,
        mut request: AuthorizationRequest,
    ) -> Result<AuthorizationResponse> {
        request.prepare()?;

        let outbound = OutboundAuthorizationRequest::from_request(&request, self.with_tags);
        let path = if self.with_tags {
            AUTHORIZE_WITH_TAGS_PATH
        } else {
            AUTHORIZE_PATH
        };
        let response = self
            .post(path, &outbound, Some(&request.request_id))
            .await?;

        let mut authorization: AuthorizationResponse = serde_json::from_slice(response.body())?;
        let request_id = response
            .headers()
            .get(OPC_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map_or_else(|| request.request_id.clone(), str::to_string);
        authorization.complete(request, request_id);

        debug!(
            request_id = %authorization.context.request_id,
            granted = authorization.granted_permissions().len(),
            "Authorization call completed"
        );
        Ok(authorization)
    }

    /// Authorize two or more requests together
    ///
    /// # Errors
    ///
    /// - [`AuthzError::AssociationInsufficientRequests`] for fewer than two
    ///   requests, before anything is sent
    /// - the validation errors of
    ///   [`make_authorization_call`](Self::make_authorization_call) for each
    ///   request
    /// - [`AuthzError::UnexpectedAssociationResponseLength`] when the answer
    ///   does not hold one response per request
    pub async fn make_association_authorization_call(
        &self,
        mut association: AssociationAuthorizationRequest,
    ) -> Result<AssociationAuthorizationResponse> {
        if association.requests.len() < 2 {
            return Err(AuthzError::AssociationInsufficientRequests);
        }
        for request in &mut association.requests {
            request.prepare()?;
        }

        let outbound = OutboundAssociationAuthorizationRequest::from(&association);
        let response = self.post(ASSOCIATE_PATH, &outbound, None).await?;

        let mut result: AssociationAuthorizationResponse = serde_json::from_slice(response.body())?;
        if result.responses.len() != association.requests.len() {
            warn!(
                expected = association.requests.len(),
                received = result.responses.len(),
                "Association response length mismatch"
            );
            return Err(AuthzError::UnexpectedAssociationResponseLength);
        }

        for (response, request) in result.responses.iter_mut().zip(association.requests) {
            let request_id = request.request_id.clone();
            response.complete(request, request_id);
        }

        debug!(result = ?result.association_result, "Association call completed");
        Ok(result)
    }

    /// Whether every requested permission was granted
    ///
    /// # Errors
    ///
    /// See [`make_authorization_call`](Self::make_authorization_call).
    pub async fn all(
        &self,
        request: AuthorizationRequest,
    ) -> Result<(bool, AuthorizationResponse)> {
        let response = self.filtered_call(request).await?;
        Ok((response.all(), response))
    }

    /// Whether at least one requested permission was granted
    ///
    /// # Errors
    ///
    /// See [`make_authorization_call`](Self::make_authorization_call).
    pub async fn any(
        &self,
        request: AuthorizationRequest,
    ) -> Result<(bool, AuthorizationResponse)> {
        let response = self.filtered_call(request).await?;
        Ok((response.any(), response))
    }

    /// Requested permissions that were granted
    ///
    /// # Errors
    ///
    /// See [`make_authorization_call`](Self::make_authorization_call).
    pub async fn filter(
        &self,
        request: AuthorizationRequest,
    ) -> Result<(Vec<String>, AuthorizationResponse)> {
        let response = self.filtered_call(request).await?;
        Ok((response.context.permissions.clone(), response))
    }

    async fn filtered_call(&self, request: AuthorizationRequest) -> Result<AuthorizationResponse> {
        let mut response = self.make_authorization_call(request).await?;
        response.context.permissions = response.filter();
        Ok(response)
    }

    async fn post<T: Serialize>(
        &self,
        path: &str,
        body: &T,
        request_id: Option<&str>,
    ) -> Result<Response<Bytes>> {
        let body = serde_json::to_vec(body)?;
        let url = format!("{}/{path}", self.endpoint);

        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(&url)
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(id) = request_id.filter(|id| !id.is_empty()) {
            let value = HeaderValue::from_str(id)
                .map_err(|err| AuthzError::InvalidRequest(err.to_string()))?;
            builder = builder.header(OPC_REQUEST_ID, value);
        }
        let request = builder.body(Bytes::from(body))?;

        let response = self.client.execute(request).await?;
        if response.status() != StatusCode::OK {
            warn!(url = %url, status = %response.status(), "Authorization request failed");
            return Err(ServiceResponseError::from_response(url, &response).into());
        }
        Ok(response)
    }
}

impl fmt::Debug for AuthorizationClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizationClient")
            .field("endpoint", &self.endpoint)
            .field("with_tags", &self.with_tags)
            .finish_non_exhaustive()
    }
}
