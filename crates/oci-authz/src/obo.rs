//! On-behalf-of and delegation tokens
//!
//! A service that received a signed request can ask the identity service for
//! a token that lets it call other services as the original caller. The
//! request carries the caller's signed headers, recovered from the header
//! claims of its [`Principal`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderValue, Method, Request, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{AuthzError, OPC_REQUEST_ID, Result, ServiceResponseError};
use crate::jwt::claims::CLAIM_OBO_TOKEN;
use crate::jwt::{HEADER_CLAIM_ISSUER, HEADER_CLAIM_PREFIX};
use crate::principal::Principal;
use crate::signer::HttpClient;
use crate::sts::TokenResponse;

/// Default token lifetime in seconds (6 hours)
pub const DEFAULT_TOKEN_EXPIRATION: u64 = 21_600;

pub const OBO_PATH: &str = "obo";

/// Kind of derived token requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OboRequestType {
    Obo,
    Delegation,
}

impl OboRequestType {
    pub fn as_str(self) -> &'static str {
        match self {
            OboRequestType::Obo => "OBO",
            OboRequestType::Delegation => "DELEGATION",
        }
    }
}

impl fmt::Display for OboRequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OboRequestType {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "OBO" => Ok(OboRequestType::Obo),
            "DELEGATION" => Ok(OboRequestType::Delegation),
            _ => Err(AuthzError::InvalidRequestType),
        }
    }
}

/// Body of the `/obo` request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnBehalfOfRequest {
    pub request_headers: BTreeMap<String, Vec<String>>,
    pub target_service_names: Vec<String>,
    pub delegate_groups: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub obo_token: String,
    pub request_type: OboRequestType,
    /// Lifetime in seconds
    pub expiration: u64,
}

/// Signed request headers recorded on `principal`, keyed by header name
pub fn request_headers(principal: &Principal) -> BTreeMap<String, Vec<String>> {
    principal
        .claims()
        .to_vec()
        .into_iter()
        .filter(|claim| claim.issuer == HEADER_CLAIM_ISSUER)
        .map(|claim| {
            let name = claim.key.replacen(HEADER_CLAIM_PREFIX, "", 1);
            (name, vec![claim.value])
        })
        .collect()
}

/// Obtain an on-behalf-of token for `request_principal`
///
/// `client` must sign as a principal allowed to request OBO tokens,
/// typically a service. When the request was itself made with an OBO token,
/// `delegate` is the principal that presented it and `request_principal`
/// must carry the `obo_tk` claim.
///
/// # Errors
///
/// - [`AuthzError::InvalidEndpoint`] for an empty endpoint
/// - [`AuthzError::NoTargetServiceNames`] without target services
/// - [`AuthzError::InvalidRequestPrincipal`] when a delegate is given but
///   the request principal has no `obo_tk` claim
/// - [`AuthzError::ServiceResponse`] for a non-200 answer
pub async fn get_obo_token(
    client: &dyn HttpClient,
    endpoint: &str,
    request_principal: &Principal,
    delegate: Option<&Principal>,
    request_id: &str,
    expiration_secs: u64,
    target_service_names: &[String],
) -> Result<String> {
    token_request(
        client,
        endpoint,
        request_principal,
        delegate,
        request_id,
        expiration_secs,
        target_service_names,
        &[],
        OboRequestType::Obo,
    )
    .await
}

/// Obtain a delegation token usable only by `delegate_groups`
///
/// # Errors
///
/// The errors of [`get_obo_token`], plus
/// [`AuthzError::InvalidDelegateGroups`] for an empty group list.
#[allow(clippy::too_many_arguments)]
pub async fn get_delegation_token(
    client: &dyn HttpClient,
    endpoint: &str,
    request_principal: &Principal,
    delegate: Option<&Principal>,
    request_id: &str,
    expiration: Duration,
    target_service_names: &[String],
    delegate_groups: &[String],
) -> Result<String> {
    if delegate_groups.is_empty() {
        return Err(AuthzError::InvalidDelegateGroups);
    }
    token_request(
        client,
        endpoint,
        request_principal,
        delegate,
        request_id,
        expiration.as_secs(),
        target_service_names,
        delegate_groups,
        OboRequestType::Delegation,
    )
    .await
}

#[allow(clippy::too_many_arguments)]
async fn token_request(
    client: &dyn HttpClient,
    endpoint: &str,
    request_principal: &Principal,
    delegate: Option<&Principal>,
    request_id: &str,
    expiration: u64,
    target_service_names: &[String],
    delegate_groups: &[String],
    request_type: OboRequestType,
) -> Result<String> {
    if endpoint.is_empty() {
        return Err(AuthzError::InvalidEndpoint);
    }
    if target_service_names.is_empty() {
        return Err(AuthzError::NoTargetServiceNames);
    }

    let (caller, obo_token) = match delegate {
        Some(delegate) => {
            let obo_token = request_principal.claims().get_string(CLAIM_OBO_TOKEN);
            if obo_token.is_empty() {
                return Err(AuthzError::InvalidRequestPrincipal);
            }
            (delegate, obo_token.to_string())
        }
        None => (request_principal, String::new()),
    };

    let body = OnBehalfOfRequest {
        request_headers: request_headers(caller),
        target_service_names: target_service_names.to_vec(),
        delegate_groups: delegate_groups.to_vec(),
        obo_token,
        request_type,
        expiration,
    };

    let url = format!("{endpoint}/{OBO_PATH}");
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(&url)
        .header(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if !request_id.is_empty() {
        let value = HeaderValue::from_str(request_id)
            .map_err(|err| AuthzError::InvalidRequest(err.to_string()))?;
        builder = builder.header(OPC_REQUEST_ID, value);
    }
    let request = builder.body(Bytes::from(serde_json::to_vec(&body)?))?;

    debug!(url = %url, request_type = %request_type, "Requesting derived token");
    let response = client.execute(request).await?;
    if response.status() != StatusCode::OK {
        warn!(url = %url, status = %response.status(), "Derived token request failed");
        return Err(ServiceResponseError::from_response(url, &response).into());
    }

    let result: TokenResponse = serde_json::from_slice(response.body())?;
    Ok(result.token)
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use http::Response;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};

    use super::*;
    use crate::jwt::Claim;

    struct Recorder {
        status: StatusCode,
        body: &'static str,
        sent: Mutex<Vec<Request<Bytes>>>,
    }

    impl Recorder {
        fn ok() -> Self {
            Self::answering(StatusCode::OK, r#"{"token":"test-token"}"#)
        }

        fn answering(status: StatusCode, body: &'static str) -> Self {
            Self {
                status,
                body,
                sent: Mutex::new(Vec::new()),
            }
        }

        fn sent_body(&self) -> Value {
            serde_json::from_slice(self.sent.lock()[0].body()).unwrap()
        }
    }

    #[async_trait]
    impl HttpClient for Recorder {
        async fn execute(&self, request: Request<Bytes>) -> Result<Response<Bytes>> {
            self.sent.lock().push(request);
            Ok(Response::builder()
                .status(self.status)
                .body(Bytes::from_static(self.body.as_bytes()))
                .unwrap())
        }
    }

    fn caller() -> Principal {
        let mut principal = Principal::new("ocid1.user.oc1..u", "ocid1.tenancy.oc1..t");
        principal.add_claim(Claim::new(HEADER_CLAIM_ISSUER, "h_date", "Thu, 05 Jan 2014 21:31:40 GMT"));
        principal.add_claim(Claim::new(HEADER_CLAIM_ISSUER, "h_host", "objectstorage.test"));
        principal.add_claim(Claim::new("authService", "ptype", "user"));
        principal
    }

    fn targets() -> Vec<String> {
        vec!["SVC".to_string()]
    }

    #[test]
    fn test_request_headers_from_claims() {
        assert_eq!(
            request_headers(&caller()),
            BTreeMap::from([
                ("date".to_string(), vec!["Thu, 05 Jan 2014 21:31:40 GMT".to_string()]),
                ("host".to_string(), vec!["objectstorage.test".to_string()]),
            ])
        );
        assert!(request_headers(&Principal::default()).is_empty());
    }

    #[test]
    fn test_request_type_names() {
        assert_eq!("OBO".parse::<OboRequestType>().unwrap(), OboRequestType::Obo);
        assert_eq!(
            "DELEGATION".parse::<OboRequestType>().unwrap(),
            OboRequestType::Delegation
        );
        assert!(matches!(
            "IMPERSONATE".parse::<OboRequestType>(),
            Err(AuthzError::InvalidRequestType)
        ));
    }

    #[tokio::test]
    async fn test_obo_token() {
        let client = Recorder::ok();
        let token = get_obo_token(
            &client,
            "http://localhost/v1",
            &caller(),
            None,
            "arequestid",
            DEFAULT_TOKEN_EXPIRATION,
            &targets(),
        )
        .await
        .unwrap();

        assert_eq!(token, "test-token");
        let sent = client.sent.lock()[0].clone();
        assert_eq!(sent.uri(), "http://localhost/v1/obo");
        assert_eq!(sent.headers()[OPC_REQUEST_ID], "arequestid");
        assert_eq!(
            client.sent_body(),
            json!({
                "requestHeaders": {
                    "date": ["Thu, 05 Jan 2014 21:31:40 GMT"],
                    "host": ["objectstorage.test"]
                },
                "targetServiceNames": ["SVC"],
                "delegateGroups": [],
                "requestType": "OBO",
                "expiration": 21600
            })
        );
    }

    #[tokio::test]
    async fn test_obo_token_validation() {
        let client = Recorder::ok();
        assert!(matches!(
            get_obo_token(&client, "", &caller(), None, "", 60, &targets()).await,
            Err(AuthzError::InvalidEndpoint)
        ));
        assert!(matches!(
            get_obo_token(&client, "http://localhost/v1", &caller(), None, "", 60, &[]).await,
            Err(AuthzError::NoTargetServiceNames)
        ));
        assert!(matches!(
            get_obo_token(
                &client,
                "http://localhost/v1",
                &caller(),
                Some(&caller()),
                "",
                60,
                &targets()
            )
            .await,
            Err(AuthzError::InvalidRequestPrincipal)
        ));
        assert!(client.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_delegate_forwards_obo_token() {
        let client = Recorder::ok();
        let mut requester = caller();
        requester.add_claim(Claim::new("authService", CLAIM_OBO_TOKEN, "upstream-obo"));
        let mut delegate = Principal::new("ocid1.svc.oc1..d", "ocid1.tenancy.oc1..t");
        delegate.add_claim(Claim::new(HEADER_CLAIM_ISSUER, "h_x-date", "now"));

        get_obo_token(
            &client,
            "http://localhost/v1",
            &requester,
            Some(&delegate),
            "",
            60,
            &targets(),
        )
        .await
        .unwrap();

        let body = client.sent_body();
        assert_eq!(body["oboToken"], "upstream-obo");
        assert_eq!(body["requestHeaders"], json!({ "x-date": ["now"] }));
        assert!(client.sent.lock()[0].headers().get(OPC_REQUEST_ID).is_none());
    }

    #[tokio::test]
    async fn test_delegation_token() {
        let client = Recorder::ok();
        let groups = vec!["ocid1.group.oc1..g".to_string()];

        assert!(matches!(
            get_delegation_token(
                &client,
                "http://localhost/v1",
                &caller(),
                None,
                "",
                Duration::from_secs(3600),
                &targets(),
                &[]
            )
            .await,
            Err(AuthzError::InvalidDelegateGroups)
        ));

        let token = get_delegation_token(
            &client,
            "http://localhost/v1",
            &caller(),
            None,
            "",
            Duration::from_secs(3600),
            &targets(),
            &groups,
        )
        .await
        .unwrap();
        assert_eq!(token, "test-token");

        let body = client.sent_body();
        assert_eq!(body["requestType"], "DELEGATION");
        assert_eq!(body["delegateGroups"], json!(["ocid1.group.oc1..g"]));
        assert_eq!(body["expiration"], 3600);
    }

    #[tokio::test]
    async fn test_service_errors() {
        let client = Recorder::answering(StatusCode::FORBIDDEN, "{}");
        assert!(matches!(
            get_obo_token(&client, "http://localhost/v1", &caller(), None, "", 60, &targets()).await,
            Err(AuthzError::ServiceResponse(_))
        ));

        let client = Recorder::answering(StatusCode::OK, r#"{test: "test""#);
        assert!(matches!(
            get_obo_token(&client, "http://localhost/v1", &caller(), None, "", 60, &targets()).await,
            Err(AuthzError::Json(_))
        ));
    }
}
