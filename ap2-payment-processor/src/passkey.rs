//! Resolves the registered owner and public key behind a WebAuthn assertion
//! by asking the Credential Provider, the service that actually enrolled the
//! passkey (§4.7, §4.9 step 5). Mirrors `ap2_envelope::did::DidResolver`:
//! chain validation must never trust an identity or key the presentation
//! asserts about itself, only one looked up against the party that owns the
//! canonical record.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64;
use base64::Engine;
use serde::Deserialize;

use crate::error::{Error, Result};
use ap2_crypto::webauthn::WebAuthnAssertion;

/// The registered passkey owner and public key a WebAuthn assertion actually
/// verified against, as reported by the service that enrolled it.
pub struct RegisteredWebAuthnIdentity {
    pub user_id: String,
    pub public_key_cose: Vec<u8>,
}

#[async_trait]
pub trait PasskeyVerifier: Send + Sync {
    async fn verify(
        &self,
        credential_id: &str,
        assertion: &WebAuthnAssertion,
        expected_challenge: &[u8],
        rp_id: &str,
        allowed_origins: &[String],
    ) -> Result<RegisteredWebAuthnIdentity>;
}

#[derive(Deserialize)]
struct VerifyAttestationResponse {
    verified: bool,
    user_id: String,
    public_key_cose: String,
}

/// Calls the Credential Provider's `POST /verify/attestation`, the same
/// canonical path that looks the credential up by id, verifies it against
/// the registered COSE key and counter, and advances that counter.
pub struct CredentialProviderPasskeyVerifier {
    client: reqwest::Client,
    base_url: String,
}

impl CredentialProviderPasskeyVerifier {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }
}

#[async_trait]
impl PasskeyVerifier for CredentialProviderPasskeyVerifier {
    async fn verify(
        &self,
        credential_id: &str,
        assertion: &WebAuthnAssertion,
        expected_challenge: &[u8],
        _rp_id: &str,
        _allowed_origins: &[String],
    ) -> Result<RegisteredWebAuthnIdentity> {
        let url = format!("{}/verify/attestation", self.base_url);
        let body = serde_json::json!({
            "credential_id": credential_id,
            "client_data_json": B64.encode(&assertion.client_data_json),
            "authenticator_data": B64.encode(&assertion.authenticator_data),
            "signature": B64.encode(&assertion.signature),
            "challenge": B64.encode(expected_challenge),
        });

        let response = self.client.post(&url).json(&body).send().await?.error_for_status()?;
        let parsed: VerifyAttestationResponse = response.json().await?;
        if !parsed.verified {
            return Err(Error::Validation(ap2_model::Error::UserAuthInvalid(
                "credential provider rejected the assertion".into(),
            )));
        }
        let public_key_cose = hex::decode(&parsed.public_key_cose).map_err(|e| {
            Error::Validation(ap2_model::Error::SchemaInvalid(format!(
                "credential provider returned malformed public_key_cose: {e}"
            )))
        })?;

        Ok(RegisteredWebAuthnIdentity { user_id: parsed.user_id, public_key_cose })
    }
}
