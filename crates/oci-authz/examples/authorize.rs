//! # Authorization Check - Minimal Example
//!
//! Signs an authorization request with an API key and prints the granted
//! permissions.
//!
//! ## Quick Start
//!
//! ```bash
//! export OCI_AUTHZ_CONFIG=config.json     # {"endpoint": "https://auth.region.example.com/v1"}
//! export OCI_AUTHZ_KEY=key.pem            # PKCS#8 private key
//! export OCI_AUTHZ_KEY_ID=tenancy/user/fingerprint
//! cargo run -p oci-authz --example authorize -- BUCKET_READ BUCKET_INSPECT
//! ```

use std::sync::Arc;

use oci_authz::signer::{RsaPssSha256, StaticKeySupplier};
use oci_authz::{
    ActionKind, AuthorizationRequest, AuthzVariable, IdentityConfig, Principal, RequestSigner,
    SigningClient,
};
use rsa::RsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_writer(std::io::stdout)
        .init();

    let config = IdentityConfig::from_json(&std::fs::read_to_string(std::env::var(
        "OCI_AUTHZ_CONFIG",
    )?)?)?;
    let key = RsaPrivateKey::from_pkcs8_pem(&std::fs::read_to_string(std::env::var(
        "OCI_AUTHZ_KEY",
    )?)?)?;
    let key_id = std::env::var("OCI_AUTHZ_KEY_ID")?;

    let signer = RequestSigner::new(
        Arc::new(StaticKeySupplier::new(Arc::new(key), key_id.clone())),
        Arc::new(RsaPssSha256::new()),
    );
    let client = SigningClient::with_transport(
        Arc::new(config.transport()?),
        signer,
        key_id,
        &config.client_options(),
    );
    let authz = config.authorization_client(Arc::new(client))?;

    let mut request = AuthorizationRequest::new(
        "example-request",
        "GetBucket",
        "ocid1.compartment.oc1..example",
        "objectstorage",
        Some(Principal::new("ocid1.user.oc1..example", "ocid1.tenancy.oc1..example")),
        None,
        "us-phoenix-1",
        "PHX-AD-1",
    )?;
    request.set_action_kind(ActionKind::Read);
    for permission in std::env::args().skip(1) {
        request.set_permission_variables(
            &permission,
            vec![AuthzVariable::string("target.bucket.name", "logs")],
        );
    }

    let (granted, response) = authz.filter(request).await?;
    println!("request id: {}", response.context.request_id);
    for permission in granted {
        println!("granted: {permission}");
    }
    Ok(())
}
