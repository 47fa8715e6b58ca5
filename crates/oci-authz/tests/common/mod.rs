//! Common test utilities for integration tests
//!
//! A wiremock identity service serving the token, key, authorization and
//! derived-token endpoints, plus RSA keys and certificates for the clients
//! under test.

#![allow(dead_code)]

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock, Once};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use oci_authz::jwt::{Jwk, encode_part};
use oci_authz::signer::{Algorithm, DEFAULT_TIMEOUT, HttpClient, RsaSha256};
use oci_authz::x509::X509CertificateSupplier;
use oci_authz::{Key, ReqwestClient};
use rand::rngs::OsRng;
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

pub const TENANT: &str = "ocid1.tenancy.oc1..test";
pub const ISSUER_KEY_ID: &str = "asw1";

static ISSUER_KEY: LazyLock<Arc<RsaPrivateKey>> = LazyLock::new(new_key);
static SERVICE_KEY: LazyLock<Arc<RsaPrivateKey>> = LazyLock::new(new_key);
static TRACING: Once = Once::new();

/// Route crate logs to the test output, filtered by `RUST_LOG`
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

fn new_key() -> Arc<RsaPrivateKey> {
    Arc::new(RsaPrivateKey::new(&mut OsRng, 2048).expect("RSA key generation failed"))
}

/// Key the mock identity service signs STS tokens with
pub fn issuer_key() -> Arc<RsaPrivateKey> {
    Arc::clone(&ISSUER_KEY)
}

/// Long-term key of the service under test
pub fn service_key() -> Arc<RsaPrivateKey> {
    Arc::clone(&SERVICE_KEY)
}

pub fn public_pem(key: &RsaPrivateKey) -> String {
    key.to_public_key()
        .to_public_key_pem(LineEnding::LF)
        .expect("PEM encoding failed")
}

/// Unsigned transport for talking to the mock server
pub fn transport() -> Arc<dyn HttpClient> {
    Arc::new(ReqwestClient::new(DEFAULT_TIMEOUT).expect("transport"))
}

/// Certificate supplier for the service identity
pub fn certificates() -> Arc<X509CertificateSupplier> {
    let cert = rcgen::generate_simple_self_signed(vec!["service.test".to_string()])
        .expect("certificate generation failed")
        .cert
        .pem();
    let key = service_key()
        .to_pkcs1_pem(LineEnding::LF)
        .expect("PEM encoding failed");
    let no_intermediates: [&[u8]; 0] = [];
    Arc::new(
        X509CertificateSupplier::from_pem(TENANT, cert.as_bytes(), no_intermediates, key.as_bytes(), None)
            .expect("certificate supplier"),
    )
}

/// Sign `claims` as an RS256 JWT with `key`
pub fn sign_token(key_id: &str, claims: &Value, key: &Arc<RsaPrivateKey>) -> String {
    let header = json!({ "kid": key_id, "alg": "RS256" });
    let input = format!(
        "{}.{}",
        encode_part(header.to_string()),
        encode_part(claims.to_string())
    );
    let signature = RsaSha256::jws()
        .sign(input.as_bytes(), &Key::Private(Arc::clone(key)))
        .expect("signing failed");
    format!("{input}.{}", encode_part(signature))
}

/// Issues STS tokens bound to the session key of each `/x509` request
///
/// The first token lives `first_lifetime_secs`, later ones an hour.
#[derive(Clone)]
pub struct StsIssuer {
    pub issued: Arc<AtomicUsize>,
    pub first_lifetime_secs: Arc<AtomicI64>,
}

impl StsIssuer {
    pub fn new() -> Self {
        Self {
            issued: Arc::new(AtomicUsize::new(0)),
            first_lifetime_secs: Arc::new(AtomicI64::new(3600)),
        }
    }

    pub fn issued(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }
}

impl Default for StsIssuer {
    fn default() -> Self {
        Self::new()
    }
}

impl Respond for StsIssuer {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).expect("x509 body");
        let der = STANDARD
            .decode(body["publicKey"].as_str().expect("publicKey"))
            .expect("publicKey base64");
        let session = RsaPublicKey::from_public_key_der(&der).expect("publicKey DER");

        let serial = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let lifetime = if serial == 1 {
            self.first_lifetime_secs.load(Ordering::SeqCst)
        } else {
            3600
        };
        let now = Utc::now().timestamp();
        let claims = json!({
            "iss": "authService",
            "sub": "ocid1.service.test",
            "tenant": TENANT,
            "ptype": "service",
            "jti": format!("sts-{serial}"),
            "nbf": now - 5,
            "exp": now + lifetime,
            "jwk": serde_json::to_string(&Jwk::from_public_key("session", &session)).expect("jwk"),
        });
        ResponseTemplate::new(200)
            .set_body_json(json!({ "token": sign_token(ISSUER_KEY_ID, &claims, &issuer_key()) }))
    }
}

/// Mock identity service
pub struct MockIdentityService {
    pub server: MockServer,
    pub endpoint: String,
}

impl MockIdentityService {
    pub async fn start() -> Self {
        init_tracing();
        let server = MockServer::start().await;
        let endpoint = format!("{}/v1", server.uri());
        Self { server, endpoint }
    }

    /// Serve STS tokens at `/v1/x509` and the issuer key at `/v1/keys/asw1`
    pub async fn mock_sts(&self, issuer: &StsIssuer) {
        Mock::given(method("POST"))
            .and(path("/v1/x509"))
            .respond_with(issuer.clone())
            .mount(&self.server)
            .await;
        self.mock_key("/v1/keys/asw1", &public_pem(&issuer_key())).await;
    }

    /// Serve a PEM public key at `key_path`
    pub async fn mock_key(&self, key_path: &str, pem: &str) {
        Mock::given(method("GET"))
            .and(path(key_path))
            .respond_with(ResponseTemplate::new(200).set_body_string(pem))
            .mount(&self.server)
            .await;
    }

    /// Echo an authorization request granting only `granted`
    pub async fn mock_authorize(&self, granted: &[&str], request_id: Option<&str>) {
        let context: Vec<Value> = granted.iter().map(|p| json!([{ "p": p }])).collect();
        let mut response = ResponseTemplate::new(200).set_body_json(json!({
            "authorizationRequest": { "context": context }
        }));
        if let Some(id) = request_id {
            response = response.insert_header("opc-request-id", id);
        }
        Mock::given(method("POST"))
            .and(path("/v1/authorization/authorizerequest"))
            .respond_with(response)
            .mount(&self.server)
            .await;
    }

    /// Answer a fixed `{token}` body at `token_path`
    pub async fn mock_token(&self, token_path: &str, token: &str) {
        Mock::given(method("POST"))
            .and(path(token_path))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "token": token })))
            .mount(&self.server)
            .await;
    }

    /// Requests received at `request_path`
    pub async fn requests_to(&self, request_path: &str) -> Vec<Request> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|request| request.url.path() == request_path)
            .collect()
    }
}
