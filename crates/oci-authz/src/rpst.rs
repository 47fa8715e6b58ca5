//! Resource principal session tokens
//!
//! A resource principal session token is obtained in two steps. An RPT is
//! signed with the current service principal session key, then exchanged at
//! the identity service together with the session token itself.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderValue, Method, Request, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, ServiceResponseError};
use crate::rpt::{ResourcePrincipalTokenClaims, ResourcePrincipalTokenProvider};
use crate::signer::{AlgorithmSupplier, HttpClient, KeyIdSupplier};
use crate::sts::{StsKeySupplier, TokenResponse};

/// Body of the RPST request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcePrincipalSessionTokenRequest {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_principal_token: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_principal_session_token: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub session_public_key: String,
}

/// Exchanges RPTs for resource principal session tokens
pub struct ResourcePrincipalSessionTokenProvider {
    endpoint: String,
    sts: Arc<StsKeySupplier>,
    client: Arc<dyn HttpClient>,
    signing_algorithm: String,
    rpt: ResourcePrincipalTokenProvider,
}

impl ResourcePrincipalSessionTokenProvider {
    /// Provider posting to `endpoint` through `client`
    ///
    /// RPTs are signed with the session key of `sts` using the JWS algorithm
    /// `signing_algorithm` looked up in `algorithms`. `client` should sign as
    /// the service principal.
    pub fn new(
        endpoint: impl Into<String>,
        sts: Arc<StsKeySupplier>,
        algorithms: Arc<dyn AlgorithmSupplier>,
        client: Arc<dyn HttpClient>,
        signing_algorithm: impl Into<String>,
    ) -> Self {
        let rpt = ResourcePrincipalTokenProvider::new(sts.clone(), algorithms);
        Self {
            endpoint: endpoint.into(),
            sts,
            client,
            signing_algorithm: signing_algorithm.into(),
            rpt,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Build and sign an RPT for `claims` and exchange it for an RPST
    ///
    /// # Errors
    ///
    /// Returns STS refresh errors, RPT claim and signing errors,
    /// [`AuthzError::ServiceResponse`](crate::AuthzError::ServiceResponse)
    /// for a non-200 answer and [`AuthzError::Json`](crate::AuthzError::Json)
    /// for an unreadable one.
    pub async fn get_rpst(&self, claims: &ResourcePrincipalTokenClaims) -> Result<String> {
        let spst = self.sts.key_id().await?;
        let rpt = self
            .rpt
            .generate_rpt(&spst, &self.signing_algorithm, claims)
            .await?;

        let body = ResourcePrincipalSessionTokenRequest {
            resource_principal_token: rpt,
            service_principal_session_token: spst,
            session_public_key: claims.public_key.clone(),
        };
        let request = Request::builder()
            .method(Method::POST)
            .uri(&self.endpoint)
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .body(Bytes::from(serde_json::to_vec(&body)?))?;

        debug!(url = %self.endpoint, resource = %claims.resource_id, "Requesting RPST");
        let response = self.client.execute(request).await?;
        if response.status() != StatusCode::OK {
            warn!(url = %self.endpoint, status = %response.status(), "RPST request failed");
            return Err(ServiceResponseError::from_response(self.endpoint.clone(), &response).into());
        }

        let result: TokenResponse = serde_json::from_slice(response.body())?;
        Ok(result.token)
    }
}

impl fmt::Debug for ResourcePrincipalSessionTokenProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourcePrincipalSessionTokenProvider")
            .field("endpoint", &self.endpoint)
            .field("signing_algorithm", &self.signing_algorithm)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use async_trait::async_trait;
    use http::Response;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use rsa::pkcs1::{EncodeRsaPrivateKey, LineEnding};
    use serde_json::Value;

    use super::*;
    use crate::error::AuthzError;
    use crate::rpt::RPT_FIXED_KEY_ID;
    use crate::signer::key::test_keys;
    use crate::signer::{Algorithms, JWT_ALG_RS256};
    use crate::sts::test_support::FakeIdentity;
    use crate::x509::X509CertificateSupplier;
    use crate::x509::test_support::certificate_pem;

    const RPST_ENDPOINT: &str = "https://auth.test/v1/resourcePrincipalSessionToken";

    struct RpstService {
        status: StatusCode,
        sent: Mutex<Vec<Request<Bytes>>>,
    }

    impl RpstService {
        fn new(status: StatusCode) -> Arc<Self> {
            Arc::new(Self {
                status,
                sent: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl HttpClient for RpstService {
        async fn execute(&self, request: Request<Bytes>) -> Result<Response<Bytes>> {
            self.sent.lock().push(request);
            Ok(Response::builder()
                .status(self.status)
                .body(Bytes::from_static(br#"{"token":"rpst-token"}"#))
                .unwrap())
        }
    }

    fn sts(identity: &Arc<FakeIdentity>) -> Arc<StsKeySupplier> {
        let pem = certificate_pem();
        let key = test_keys::private_key().to_pkcs1_pem(LineEnding::LF).unwrap();
        let no_intermediates: [&[u8]; 0] = [];
        let certificates = X509CertificateSupplier::from_pem(
            "ocid1.tenancy.test",
            pem.as_bytes(),
            no_intermediates,
            key.as_bytes(),
            None,
        )
        .unwrap();
        Arc::new(
            StsKeySupplier::new(Arc::new(certificates), identity.clone(), "https://auth.test/v1")
                .unwrap()
                .with_validation_transport(identity.clone()),
        )
    }

    fn claims() -> ResourcePrincipalTokenClaims {
        ResourcePrincipalTokenClaims {
            issuer: "functions".into(),
            token_type: "res".into(),
            resource_type: "fnfunc".into(),
            tenant_id: "ocid1.tenancy.oc1..t".into(),
            compartment_id: "ocid1.compartment.oc1..c".into(),
            resource_id: "ocid1.fnfunc.oc1..r".into(),
            resource_tag: "tag".into(),
            public_key: "cnBzdC1zZXNzaW9uLWtleQ".into(),
            ..ResourcePrincipalTokenClaims::default()
        }
    }

    fn provider(sts: &Arc<StsKeySupplier>, service: &Arc<RpstService>) -> ResourcePrincipalSessionTokenProvider {
        ResourcePrincipalSessionTokenProvider::new(
            RPST_ENDPOINT,
            sts.clone(),
            Arc::new(Algorithms::jwt()),
            service.clone(),
            JWT_ALG_RS256,
        )
    }

    #[tokio::test]
    async fn test_get_rpst() {
        let identity = FakeIdentity::new(test_keys::other_private_key(), test_keys::other_private_key());
        let sts = sts(&identity);
        let service = RpstService::new(StatusCode::OK);

        let token = provider(&sts, &service).get_rpst(&claims()).await.unwrap();
        assert_eq!(token, "rpst-token");
        assert_eq!(identity.issued.load(Ordering::SeqCst), 1);

        let sent = service.sent.lock().pop().unwrap();
        assert_eq!(sent.method(), Method::POST);
        assert_eq!(sent.uri(), RPST_ENDPOINT);
        let body: Value = serde_json::from_slice(sent.body()).unwrap();
        let spst = sts.key_id().await.unwrap();
        assert_eq!(body["servicePrincipalSessionToken"], spst.as_str());
        assert_eq!(body["sessionPublicKey"], "cnBzdC1zZXNzaW9uLWtleQ");

        let rpt = body["resourcePrincipalToken"].as_str().unwrap();
        let verifier = ResourcePrincipalTokenProvider::new(sts.clone(), Arc::new(Algorithms::jwt()));
        let token = verifier.parse_rpt(rpt, &spst).await.unwrap();
        assert_eq!(token.header.key_id, RPT_FIXED_KEY_ID);
        assert_eq!(token.claims.get_string("sub"), "ocid1.fnfunc.oc1..r");
    }

    #[tokio::test]
    async fn test_get_rpst_errors() {
        let identity = FakeIdentity::new(test_keys::other_private_key(), test_keys::other_private_key());
        let sts = sts(&identity);

        let service = RpstService::new(StatusCode::UNAUTHORIZED);
        let err = provider(&sts, &service).get_rpst(&claims()).await.unwrap_err();
        let AuthzError::ServiceResponse(err) = err else {
            panic!("expected service error, got {err:?}");
        };
        assert_eq!(err.url.as_deref(), Some(RPST_ENDPOINT));

        let service = RpstService::new(StatusCode::OK);
        let invalid = ResourcePrincipalTokenClaims {
            resource_tag: String::new(),
            ..claims()
        };
        assert!(matches!(
            provider(&sts, &service).get_rpst(&invalid).await,
            Err(AuthzError::InvalidClaimResourceTag)
        ));
        assert!(service.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_get_rpst_sts_failure() {
        let identity = FakeIdentity::new(test_keys::other_private_key(), test_keys::other_private_key());
        identity.status.store(500, Ordering::SeqCst);
        let service = RpstService::new(StatusCode::OK);

        assert!(matches!(
            provider(&sts(&identity), &service).get_rpst(&claims()).await,
            Err(AuthzError::ServiceResponse(_))
        ));
        assert!(service.sent.lock().is_empty());
    }
}
