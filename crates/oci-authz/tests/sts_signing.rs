//! Signing with STS tokens minted by a mock identity service
//!
//! Covers the rotation path: a token close to expiry is replaced while a
//! request is being signed, and the request goes out under the new key id.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use bytes::Bytes;
use common::{MockIdentityService, StsIssuer, certificates, transport};
use http::{Method, Request, StatusCode};
use oci_authz::signer::{ClientOptions, RsaPssSha256, extract_signature_fields};
use oci_authz::{HttpClient, KeyIdSupplier, RequestSigner, SigningClient, StsKeySupplier};
use pretty_assertions::assert_eq;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

async fn identity_with_sts(issuer: &StsIssuer) -> MockIdentityService {
    let identity = MockIdentityService::start().await;
    identity.mock_sts(issuer).await;
    Mock::given(method("GET"))
        .and(path("/x"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&identity.server)
        .await;
    identity
}

fn sts(identity: &MockIdentityService) -> Arc<StsKeySupplier> {
    Arc::new(StsKeySupplier::new(certificates(), transport(), &identity.endpoint).unwrap())
}

fn get(identity: &MockIdentityService) -> Request<Bytes> {
    Request::builder()
        .method(Method::GET)
        .uri(format!("{}/x", identity.server.uri()))
        .body(Bytes::new())
        .unwrap()
}

#[tokio::test]
async fn test_expiring_token_rotates_during_signing() {
    let issuer = StsIssuer::new();
    issuer.first_lifetime_secs.store(60, Ordering::SeqCst);
    let identity = identity_with_sts(&issuer).await;
    let sts = sts(&identity);

    let first = sts.key_id().await.unwrap();
    assert!(first.starts_with("ST$"));
    assert_eq!(issuer.issued(), 1);
    assert!(!sts.is_security_token_valid().await);

    let signer = RequestSigner::new(sts.clone(), Arc::new(RsaPssSha256::new()));
    let client = SigningClient::with_transport(
        transport(),
        signer,
        first.clone(),
        &ClientOptions::default(),
    );

    let response = client.execute(get(&identity)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(issuer.issued(), 2);

    let second = sts.key_id().await.unwrap();
    assert_ne!(second, first);
    assert_eq!(client.key_id(), second);

    let sent = identity.requests_to("/x").await;
    assert_eq!(sent.len(), 1);
    let fields = extract_signature_fields(&sent[0].headers).unwrap();
    assert_eq!(fields.key_id, second);
    assert_eq!(fields.algorithm, "rsa-pss-sha256");
    assert_eq!(fields.headers, vec!["date", "(request-target)"]);
}

#[tokio::test]
async fn test_key_id_supplier_client() {
    let issuer = StsIssuer::new();
    let identity = identity_with_sts(&issuer).await;
    let sts = sts(&identity);

    let client = SigningClient::from_key_id_supplier(
        transport(),
        sts.clone(),
        Arc::new(RsaPssSha256::new()),
        &ClientOptions::default(),
    );
    client.execute(get(&identity)).await.unwrap();
    client.execute(get(&identity)).await.unwrap();

    assert_eq!(issuer.issued(), 1);
    assert!(sts.is_security_token_valid().await);
    assert_eq!(client.key_id(), sts.key_id().await.unwrap());

    let sent = identity.requests_to("/x").await;
    assert_eq!(sent.len(), 2);
    for request in &sent {
        let fields = extract_signature_fields(&request.headers).unwrap();
        assert_eq!(fields.key_id, client.key_id());
    }
}

#[tokio::test]
async fn test_sts_failure_is_reported() {
    let identity = MockIdentityService::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/x509"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&identity.server)
        .await;

    let err = sts(&identity).key_id().await.unwrap_err();
    let oci_authz::AuthzError::ServiceResponse(err) = err else {
        panic!("expected service error, got {err:?}");
    };
    assert_eq!(err.status, Some(StatusCode::UNAUTHORIZED));
}
