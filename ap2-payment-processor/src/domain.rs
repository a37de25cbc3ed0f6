//! The chain-validation algorithm and authorize/capture/receipt pipeline
//! (§4.9): the hardest single component in this core.

use crate::error::{Error, Result};
use crate::passkey::PasskeyVerifier;
use crate::storage::{self, Storage};
use ap2_envelope::did::DidResolver;
use ap2_model::auth::{self, IssuerJwtPayload};
use ap2_model::mandate::{CartMandate, IntentMandate, PaymentMandate};
use ap2_model::payment_request::PaymentCurrencyAmount;
use ap2_model::validation;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64;
use base64::Engine;
use chrono::Utc;
use ciborium::value::Value as CborValue;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The A2A payload of an inbound `ap2.mandates.PaymentMandate` message.
/// `intent_mandate` is not named explicitly by the wire format but is
/// accepted when present so the amount-ceiling and merchant allow-list
/// checks in steps 4b/6 have something to check against; when absent those
/// two checks are skipped, matching the "(when present)"/"(when declared)"
/// qualifiers in the algorithm.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainValidationRequest {
    pub payment_mandate: PaymentMandate,
    pub cart_mandate: CartMandate,
    /// Form B's out-of-band WebAuthn assertion (§4.4): Form B's compact
    /// string has no room for it inline, so it rides alongside as this part.
    #[serde(default)]
    pub attestation: Option<Value>,
    #[serde(default)]
    pub intent_mandate: Option<IntentMandate>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentResult {
    pub transaction_id: String,
    pub status: String,
    pub receipt_url: String,
    pub amount: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_name: Option<String>,
}

/// Everything `process_payment_mandate` needs that outlives a single request.
pub struct ProcessorContext<'a> {
    pub self_did: &'a str,
    pub resolver: &'a dyn DidResolver,
    pub jti_ledger: &'a ap2_store::NonceLedger,
    /// Resolves a WebAuthn assertion's registered owner and key against the
    /// Credential Provider's canonical passkey store, rather than trusting
    /// anything the presentation asserts about itself.
    pub passkey_verifier: &'a dyn PasskeyVerifier,
    pub rp_id: &'a str,
    pub allowed_origins: &'a [String],
    pub storage: &'a Storage,
    pub credential_provider_client: &'a reqwest::Client,
    pub credential_provider_url: &'a str,
    pub public_base_url: &'a str,
}

/// Decode the unsigned `<header>.<payload>` issuer-JWT carrier. Mirrors the
/// private helper in `ap2_model::auth` since that crate does not expose it.
fn decode_issuer_jwt(issuer_jwt: &str) -> Result<IssuerJwtPayload> {
    let (_header, payload) = issuer_jwt
        .split_once('.')
        .ok_or_else(|| Error::Validation(ap2_model::Error::SchemaInvalid("malformed issuer_jwt".into())))?;
    let bytes = B64
        .decode(payload)
        .map_err(|e| Error::Validation(ap2_model::Error::SchemaInvalid(format!("bad issuer_jwt encoding: {e}"))))?;
    serde_json::from_slice(&bytes).map_err(Error::Json)
}

/// Bridge a `cnf.jwk` (JSON Web Key, EC P-256) into the COSE_Key byte shape
/// `webauthn_verify`/`decode_cose_ec2_key` already know how to consume,
/// rather than maintaining a second, JWK-flavoured verification path.
fn jwk_to_cose_ec2(jwk: &Value) -> Result<Vec<u8>> {
    let x_b64 = jwk
        .get("x")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Validation(ap2_model::Error::SchemaInvalid("cnf.jwk missing x".into())))?;
    let y_b64 = jwk
        .get("y")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Validation(ap2_model::Error::SchemaInvalid("cnf.jwk missing y".into())))?;
    let x = B64
        .decode(x_b64)
        .map_err(|e| Error::Validation(ap2_model::Error::SchemaInvalid(format!("bad jwk.x: {e}"))))?;
    let y = B64
        .decode(y_b64)
        .map_err(|e| Error::Validation(ap2_model::Error::SchemaInvalid(format!("bad jwk.y: {e}"))))?;
    if x.len() != 32 || y.len() != 32 {
        return Err(Error::Validation(ap2_model::Error::SchemaInvalid(
            "cnf.jwk coordinates must be 32 bytes".into(),
        )));
    }

    let map = CborValue::Map(vec![
        (CborValue::Integer(1.into()), CborValue::Integer(2.into())),
        (CborValue::Integer((-1).into()), CborValue::Integer(1.into())),
        (CborValue::Integer((-2).into()), CborValue::Bytes(x)),
        (CborValue::Integer((-3).into()), CborValue::Bytes(y)),
    ]);
    let mut out = Vec::new();
    ciborium::ser::into_writer(&map, &mut out)
        .map_err(|e| Error::Validation(ap2_model::Error::SchemaInvalid(format!("cbor encode failed: {e}"))))?;
    Ok(out)
}

/// Extract the payment-method token the Shopping Agent embedded in
/// `payment_response.details.token` (the model has no dedicated
/// `payment_method` field; method-specific data rides in that free-form
/// `details` object by design).
fn extract_payment_method_token(request: &ChainValidationRequest) -> Result<String> {
    request
        .payment_mandate
        .payment_mandate_contents
        .payment_response
        .details
        .get("token")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            Error::Validation(ap2_model::Error::SchemaInvalid(
                "payment_response.details.token is required".into(),
            ))
        })
}

struct VerifiedChain {
    payer_id: String,
}

/// Steps 1-6 of the algorithm: everything that can be decided without an
/// outbound call.
async fn verify_chain(ctx: &ProcessorContext<'_>, request: &ChainValidationRequest) -> Result<VerifiedChain> {
    let cart_contents = &request.cart_mandate.contents;
    let payment_contents = &request.payment_mandate.payment_mandate_contents;

    // Step 1: schema.
    let merchant_authorization = request.cart_mandate.merchant_authorization.as_deref().ok_or_else(|| {
        Error::Validation(ap2_model::Error::SchemaInvalid("cart_mandate.merchant_authorization is required".into()))
    })?;
    let user_authorization_raw = request.payment_mandate.user_authorization.as_deref().ok_or_else(|| {
        Error::Validation(ap2_model::Error::SchemaInvalid("payment_mandate.user_authorization is required".into()))
    })?;

    // Step 2: reference integrity.
    validation::check_reference_integrity(&request.cart_mandate, &request.payment_mandate)?;

    // Step 3: expiry.
    validation::check_cart_not_expired(&request.cart_mandate)?;
    if let Some(intent) = &request.intent_mandate {
        validation::check_intent_not_expired(intent)?;
    }

    // Step 4: merchant_authorization.
    let unverified = ap2_crypto::jws::parse_compact(merchant_authorization)?;
    let kid = unverified
        .header
        .get("kid")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Validation(ap2_model::Error::SchemaInvalid("merchant_authorization missing kid".into())))?
        .to_string();
    let merchant_did = kid.split_once('#').map(|(did, _)| did).unwrap_or(&kid).to_string();

    if let Some(intent) = &request.intent_mandate {
        validation::check_merchant_allowed(&merchant_did, intent)?;
    }

    let public_key_hex = ctx.resolver.resolve_public_key(&kid).await?;
    let expected_cart_hash = auth::cart_hash(cart_contents)?;
    let merchant_payload = auth::verify_merchant_authorization(merchant_authorization, &expected_cart_hash, ctx.self_did, |_kid| {
        Ok(public_key_hex.clone())
    })?;

    if !ctx.jti_ledger.check_and_record(&merchant_payload.jti) {
        return Err(Error::ReplayedAuthorization);
    }

    // Step 5: user_authorization.
    let out_of_band_assertion = request
        .attestation
        .as_ref()
        .map(|v| serde_json::from_value::<auth::WebAuthnAssertionWire>(v.clone()))
        .transpose()
        .map_err(|e| Error::Validation(ap2_model::Error::SchemaInvalid(format!("malformed attestation: {e}"))))?;
    let vp = auth::parse_user_authorization(user_authorization_raw, out_of_band_assertion.as_ref())?;
    let issuer_payload = decode_issuer_jwt(&vp.issuer_jwt)?;
    let cnf_jwk = issuer_payload
        .cnf
        .get("jwk")
        .ok_or_else(|| Error::Validation(ap2_model::Error::SchemaInvalid("issuer_jwt.cnf.jwk is required".into())))?;
    let holder_binding_key = jwk_to_cose_ec2(cnf_jwk)?;

    let expected_challenge = auth::kb_jwt_nonce(&vp)?;
    let assertion = vp.webauthn_assertion.to_assertion()?;
    let registered = ctx
        .passkey_verifier
        .verify(
            &vp.webauthn_assertion.raw_id,
            &assertion,
            &expected_challenge,
            ctx.rp_id,
            ctx.allowed_origins,
        )
        .await?;

    // `issuer_jwt`/`cnf.jwk` are unsigned by design (§4.4): they can only
    // confirm that whoever holds the key that signed this assertion also
    // produced this presentation. The Credential Provider's registered
    // passkey, not this self-asserted claim, is the trust anchor for who is
    // actually authorizing the payment. Compare decoded EC points rather
    // than raw CBOR bytes, since two COSE_Key encodings of the same point
    // need not be byte-identical (map key order, optional `alg` label).
    let holder_binding_point = ap2_crypto::cose::decode_cose_ec2_key(&holder_binding_key)?.sec1_point;
    let registered_point = ap2_crypto::cose::decode_cose_ec2_key(&registered.public_key_cose)?.sec1_point;
    if holder_binding_point != registered_point {
        return Err(Error::Validation(ap2_model::Error::UserAuthInvalid(
            "issuer_jwt.cnf.jwk does not match the registered passkey".into(),
        )));
    }
    if issuer_payload.sub != registered.user_id {
        return Err(Error::Validation(ap2_model::Error::UserAuthInvalid(
            "issuer_jwt.sub does not match the registered passkey owner".into(),
        )));
    }

    let expected_payment_hash = auth::payment_hash(payment_contents)?;
    auth::verify_transaction_data_binding(&vp, &expected_cart_hash, &expected_payment_hash)?;

    // Step 6: amount ceiling / merchant allow-list, defence-in-depth with 4b.
    if let Some(intent) = &request.intent_mandate {
        validation::check_amount_within_intent(&request.cart_mandate, intent)?;
        validation::check_merchant_allowed(&merchant_did, intent)?;
    }

    Ok(VerifiedChain {
        payer_id: registered.user_id,
    })
}

#[derive(Deserialize)]
struct CredentialVerifyResponse {
    verified: bool,
}

async fn verify_credential_with_provider(ctx: &ProcessorContext<'_>, token: &str, payer_id: &str) -> Result<()> {
    let url = format!("{}/credentials/verify", ctx.credential_provider_url);
    let body = serde_json::json!({ "token": token, "payer_id": payer_id });
    let response = ctx
        .credential_provider_client
        .post(&url)
        .json(&body)
        .send()
        .await?
        .error_for_status()?;
    let parsed: CredentialVerifyResponse = response.json().await?;
    if !parsed.verified {
        return Err(Error::CredentialInvalid);
    }
    Ok(())
}

/// Fire-and-forget-with-retry POST of the receipt to the Credential
/// Provider; idempotent on `transaction_id`, so a lost response does not
/// need to roll anything back (§4.9 step 9, §7 retry policy).
async fn send_receipt(ctx: &ProcessorContext<'_>, transaction_id: &str, payer_id: &str, receipt_url: &str, amount: &PaymentCurrencyAmount) {
    let url = format!("{}/receipts", ctx.credential_provider_url);
    let body = serde_json::json!({
        "transaction_id": transaction_id,
        "payer_id": payer_id,
        "receipt_url": receipt_url,
        "amount": amount.value,
        "timestamp": Utc::now().to_rfc3339(),
    });

    for attempt in 0..3 {
        match ctx.credential_provider_client.post(&url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => return,
            Ok(resp) => {
                tracing::warn!(status = %resp.status(), "receipt POST rejected by credential provider");
            }
            Err(e) => {
                tracing::warn!(error = %e, "receipt POST failed");
            }
        }
        if attempt < 2 {
            tokio::time::sleep(std::time::Duration::from_millis(200 * (attempt + 1) as u64)).await;
        }
    }
    tracing::error!(transaction_id, "receipt POST to credential provider exhausted retries");
}

/// Run the full §4.9 pipeline for an inbound `PaymentMandate` and return the
/// `ap2.responses.PaymentResult` payload. Steps 1-7 perform no durable write;
/// steps 8-9 happen inside a single transactional unit with no partial state
/// surviving a downstream failure.
pub async fn process_payment_mandate(ctx: &ProcessorContext<'_>, request: ChainValidationRequest) -> Result<PaymentResult> {
    let verified = verify_chain(ctx, &request).await?;

    let credential_token = extract_payment_method_token(&request)?;
    verify_credential_with_provider(ctx, &credential_token, &verified.payer_id).await?;

    let amount = request
        .payment_mandate
        .payment_mandate_contents
        .payment_details_total
        .amount
        .clone();
    let transaction_id = format!("txn_{}", &Uuid::new_v4().simple().to_string()[..12]);
    let receipt_url = format!("{}/receipts/{transaction_id}.pdf", ctx.public_base_url);

    ctx.storage
        .authorize_and_capture(storage::Transaction {
            transaction_id: transaction_id.clone(),
            payment_mandate_id: request.payment_mandate.payment_mandate_contents.payment_mandate_id.clone(),
            payer_id: verified.payer_id.clone(),
            merchant_agent: request.payment_mandate.payment_mandate_contents.merchant_agent.clone(),
            status: "captured".to_string(),
            currency: amount.currency.clone(),
            amount: amount.value.clone(),
            receipt_url: Some(receipt_url.clone()),
        })
        .await?;

    send_receipt(ctx, &transaction_id, &verified.payer_id, &receipt_url, &amount).await;

    Ok(PaymentResult {
        transaction_id,
        status: "captured".to_string(),
        receipt_url,
        amount: amount.value,
        product_name: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::passkey::{PasskeyVerifier, RegisteredWebAuthnIdentity};
    use ap2_crypto::keys::{Algorithm, KeyPair};
    use ap2_crypto::webauthn::{webauthn_verify, WebAuthnAssertion};
    use ap2_envelope::did::StaticDidResolver;
    use ap2_model::auth::build_user_authorization;
    use ap2_model::did::DidDocument;
    use ap2_model::mandate::{CartContents, PaymentMandateContents};
    use ap2_model::payment_request::{PaymentCurrencyAmount, PaymentDetailsInit, PaymentItem, PaymentRequest, PaymentResponse};
    use async_trait::async_trait;
    use ecdsa::signature::Signer;
    use p256::ecdsa::{Signature as P256Signature, SigningKey as P256SigningKey};
    use std::sync::atomic::{AtomicU32, Ordering};

    const RP_ID: &str = "merchant.example";
    const ORIGIN: &str = "https://shop.example";
    const MERCHANT_DID: &str = "did:ap2:merchant:acme";
    const PROCESSOR_DID: &str = "did:ap2:processor:core";
    const USER_DID: &str = "did:ap2:user:alice";

    /// Stands in for the Credential Provider's `/verify/attestation` in
    /// tests: verifies the assertion against a registered key and counter
    /// the same way the real endpoint does, rather than trusting the
    /// presentation's own claims about either.
    struct StaticPasskeyVerifier {
        user_id: String,
        public_key_cose: Vec<u8>,
        counter: AtomicU32,
    }

    impl StaticPasskeyVerifier {
        fn new(user_id: &str, public_key_cose: Vec<u8>) -> Self {
            Self {
                user_id: user_id.to_string(),
                public_key_cose,
                counter: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl PasskeyVerifier for StaticPasskeyVerifier {
        async fn verify(
            &self,
            _credential_id: &str,
            assertion: &WebAuthnAssertion,
            expected_challenge: &[u8],
            rp_id: &str,
            allowed_origins: &[String],
        ) -> Result<RegisteredWebAuthnIdentity> {
            let stored_counter = self.counter.load(Ordering::SeqCst);
            let new_counter = webauthn_verify(assertion, expected_challenge, &self.public_key_cose, stored_counter, rp_id, allowed_origins)
                .map_err(|e| Error::Validation(ap2_model::Error::UserAuthInvalid(e.to_string())))?;
            self.counter.store(new_counter, Ordering::SeqCst);
            Ok(RegisteredWebAuthnIdentity {
                user_id: self.user_id.clone(),
                public_key_cose: self.public_key_cose.clone(),
            })
        }
    }

    fn cart_contents() -> CartContents {
        CartContents {
            id: "cart_1".into(),
            user_cart_confirmation_required: true,
            payment_request: PaymentRequest {
                method_data: vec![],
                details: PaymentDetailsInit {
                    id: "details_1".into(),
                    display_items: vec![],
                    shipping_options: None,
                    total: PaymentItem {
                        label: "Total".into(),
                        amount: PaymentCurrencyAmount { currency: "JPY".into(), value: "8068".into() },
                        sku: None,
                        quantity: None,
                        pending: None,
                        refund_period: None,
                    },
                    modifiers: None,
                },
                options: None,
                shipping_address: None,
            },
            cart_expiry: "2999-01-01T00:00:00Z".into(),
            merchant_name: "Acme Shoes".into(),
        }
    }

    fn payment_contents(cart: &CartContents) -> PaymentMandateContents {
        PaymentMandateContents {
            payment_mandate_id: "pm_1".into(),
            payment_details_id: cart.payment_request.details.id.clone(),
            payment_details_total: cart.payment_request.details.total.clone(),
            payment_response: PaymentResponse {
                method_name: "https://ap2.example/pay".into(),
                details: serde_json::json!({ "token": "tok_live_123" }),
                shipping_address: None,
                shipping_option: None,
                payer_name: None,
                payer_email: None,
            },
            merchant_agent: "did:ap2:merchant-agent:acme".into(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    fn p256_signing_key(kp: &KeyPair) -> P256SigningKey {
        match kp {
            KeyPair::EcdsaP256 { signing, .. } => signing.as_ref().clone(),
            _ => unreachable!("test fixture always generates EcdsaP256"),
        }
    }

    fn cnf_jwk_for(kp: &KeyPair) -> Value {
        let bytes = kp.public_key_bytes();
        serde_json::json!({
            "kty": "EC",
            "crv": "P-256",
            "x": B64.encode(&bytes[1..33]),
            "y": B64.encode(&bytes[33..65]),
        })
    }

    fn sign_webauthn_assertion(signing: &P256SigningKey, challenge: &[u8], counter: u32) -> WebAuthnAssertion {
        let client_data = serde_json::json!({
            "type": "webauthn.get",
            "challenge": B64.encode(challenge),
            "origin": ORIGIN,
        });
        let client_data_json = serde_json::to_vec(&client_data).unwrap();

        let mut authenticator_data = Vec::new();
        authenticator_data.extend_from_slice(&ap2_crypto::canonical::sha256_bytes(RP_ID.as_bytes()));
        authenticator_data.push(0b0000_0101); // user present + user verified
        authenticator_data.extend_from_slice(&counter.to_be_bytes());

        let client_data_hash = ap2_crypto::canonical::sha256_bytes(&client_data_json);
        let mut signed = authenticator_data.clone();
        signed.extend_from_slice(&client_data_hash);
        let signature: P256Signature = signing.sign(&signed);

        WebAuthnAssertion {
            client_data_json,
            authenticator_data,
            signature: signature.to_der().as_bytes().to_vec(),
        }
    }

    /// Build a fully-valid `ChainValidationRequest` plus the keying material
    /// needed to drive `verify_chain` against it, mirroring the two-key
    /// (merchant signs the cart, user authorizes the payment) shape of §4.9.
    fn valid_request(counter: u32) -> (ChainValidationRequest, KeyPair, KeyPair, StaticDidResolver) {
        let merchant_key = KeyPair::generate(Algorithm::EcdsaP256);
        let user_key = KeyPair::generate(Algorithm::EcdsaP256);
        let cart = cart_contents();
        let payment = payment_contents(&cart);

        let merchant_authorization =
            auth::build_merchant_authorization(&cart, MERCHANT_DID, PROCESSOR_DID, &merchant_key).unwrap();

        let challenge = b"test-challenge-bytes-0001";
        let nonce_b64 = B64.encode(challenge);
        let user_signing = p256_signing_key(&user_key);
        let assertion = sign_webauthn_assertion(&user_signing, challenge, counter);

        let user_authorization = build_user_authorization(
            USER_DID,
            cnf_jwk_for(&user_key),
            PROCESSOR_DID,
            &nonce_b64,
            &cart,
            &payment,
            "assertion-1",
            &assertion,
        )
        .unwrap();

        let request = ChainValidationRequest {
            payment_mandate: PaymentMandate {
                payment_mandate_contents: payment,
                user_authorization: Some(user_authorization),
            },
            cart_mandate: CartMandate {
                contents: cart,
                merchant_authorization: Some(merchant_authorization),
            },
            attestation: None,
            intent_mandate: None,
        };

        let merchant_doc = DidDocument::single_key(MERCHANT_DID, &merchant_key);
        let resolver = StaticDidResolver::new().with_document(merchant_doc);

        (request, merchant_key, user_key, resolver)
    }

    fn verifier_for(user_key: &KeyPair) -> StaticPasskeyVerifier {
        StaticPasskeyVerifier::new(USER_DID, jwk_to_cose_ec2(&cnf_jwk_for(user_key)).unwrap())
    }

    async fn test_storage() -> (Storage, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path().join("test.db").to_str().unwrap()).await.unwrap();
        (storage, dir)
    }

    #[tokio::test]
    async fn verify_chain_accepts_a_valid_request() {
        let (request, _merchant_key, user_key, resolver) = valid_request(1);
        let jti_ledger = ap2_store::NonceLedger::new();
        let verifier = verifier_for(&user_key);
        let client = reqwest::Client::new();
        let allowed_origins = vec![ORIGIN.to_string()];
        let (storage, _dir) = test_storage().await;
        let ctx = ProcessorContext {
            self_did: PROCESSOR_DID,
            resolver: &resolver,
            jti_ledger: &jti_ledger,
            passkey_verifier: &verifier,
            rp_id: RP_ID,
            allowed_origins: &allowed_origins,
            storage: &storage,
            credential_provider_client: &client,
            credential_provider_url: "http://127.0.0.1:0",
            public_base_url: "http://127.0.0.1:0",
        };

        let verified = verify_chain(&ctx, &request).await.unwrap();
        assert_eq!(verified.payer_id, USER_DID);
    }

    #[tokio::test]
    async fn verify_chain_rejects_a_cart_total_that_no_longer_matches_the_payment_total() {
        let (mut request, _merchant_key, user_key, resolver) = valid_request(1);
        request.cart_mandate.contents.payment_request.details.total.amount.value = "1".into();

        let jti_ledger = ap2_store::NonceLedger::new();
        let verifier = verifier_for(&user_key);
        let client = reqwest::Client::new();
        let allowed_origins = vec![ORIGIN.to_string()];
        let (storage, _dir) = test_storage().await;
        let ctx = ProcessorContext {
            self_did: PROCESSOR_DID,
            resolver: &resolver,
            jti_ledger: &jti_ledger,
            passkey_verifier: &verifier,
            rp_id: RP_ID,
            allowed_origins: &allowed_origins,
            storage: &storage,
            credential_provider_client: &client,
            credential_provider_url: "http://127.0.0.1:0",
            public_base_url: "http://127.0.0.1:0",
        };

        let result = verify_chain(&ctx, &request).await;
        assert!(matches!(result, Err(Error::Validation(ap2_model::Error::ReferenceMismatch(_)))));
    }

    #[tokio::test]
    async fn verify_chain_rejects_a_cart_hash_mismatch_after_signing() {
        let (mut request, _merchant_key, user_key, resolver) = valid_request(1);
        // Mutate both totals together so reference integrity still passes but
        // the cart no longer hashes to what the merchant actually signed.
        request.cart_mandate.contents.payment_request.details.total.amount.value = "1".into();
        request.payment_mandate.payment_mandate_contents.payment_details_total.amount.value = "1".into();

        let jti_ledger = ap2_store::NonceLedger::new();
        let verifier = verifier_for(&user_key);
        let client = reqwest::Client::new();
        let allowed_origins = vec![ORIGIN.to_string()];
        let (storage, _dir) = test_storage().await;
        let ctx = ProcessorContext {
            self_did: PROCESSOR_DID,
            resolver: &resolver,
            jti_ledger: &jti_ledger,
            passkey_verifier: &verifier,
            rp_id: RP_ID,
            allowed_origins: &allowed_origins,
            storage: &storage,
            credential_provider_client: &client,
            credential_provider_url: "http://127.0.0.1:0",
            public_base_url: "http://127.0.0.1:0",
        };

        let result = verify_chain(&ctx, &request).await;
        assert!(matches!(result, Err(Error::Validation(ap2_model::Error::CartTampered))));
    }

    #[tokio::test]
    async fn verify_chain_rejects_a_replayed_merchant_authorization() {
        let (request, _merchant_key, user_key, resolver) = valid_request(1);
        let jti_ledger = ap2_store::NonceLedger::new();
        let verifier = verifier_for(&user_key);
        let client = reqwest::Client::new();
        let allowed_origins = vec![ORIGIN.to_string()];
        let (storage, _dir) = test_storage().await;

        let ctx = ProcessorContext {
            self_did: PROCESSOR_DID,
            resolver: &resolver,
            jti_ledger: &jti_ledger,
            passkey_verifier: &verifier,
            rp_id: RP_ID,
            allowed_origins: &allowed_origins,
            storage: &storage,
            credential_provider_client: &client,
            credential_provider_url: "http://127.0.0.1:0",
            public_base_url: "http://127.0.0.1:0",
        };

        verify_chain(&ctx, &request).await.unwrap();
        let replayed = verify_chain(&ctx, &request).await;
        assert!(matches!(replayed, Err(Error::ReplayedAuthorization)));
    }

    #[tokio::test]
    async fn verify_chain_rejects_a_webauthn_counter_regression() {
        let jti_ledger = ap2_store::NonceLedger::new();
        let client = reqwest::Client::new();
        let allowed_origins = vec![ORIGIN.to_string()];
        let (storage, _dir) = test_storage().await;

        let (request_high, _k1, user_key, resolver_high) = valid_request(42);
        let verifier = verifier_for(&user_key);
        let ctx_high = ProcessorContext {
            self_did: PROCESSOR_DID,
            resolver: &resolver_high,
            jti_ledger: &jti_ledger,
            passkey_verifier: &verifier,
            rp_id: RP_ID,
            allowed_origins: &allowed_origins,
            storage: &storage,
            credential_provider_client: &client,
            credential_provider_url: "http://127.0.0.1:0",
            public_base_url: "http://127.0.0.1:0",
        };
        verify_chain(&ctx_high, &request_high).await.unwrap();

        // Reuse the same registered passkey (and its now-advanced counter)
        // for a second assertion carrying a lower counter value.
        let challenge = b"test-challenge-bytes-0001";
        let nonce_b64 = B64.encode(challenge);
        let cart = cart_contents();
        let payment = payment_contents(&cart);
        let assertion = sign_webauthn_assertion(&p256_signing_key(&user_key), challenge, 17);
        let user_authorization = build_user_authorization(
            USER_DID,
            cnf_jwk_for(&user_key),
            PROCESSOR_DID,
            &nonce_b64,
            &cart,
            &payment,
            "assertion-1",
            &assertion,
        )
        .unwrap();
        let merchant_key = KeyPair::generate(Algorithm::EcdsaP256);
        let merchant_authorization =
            auth::build_merchant_authorization(&cart, MERCHANT_DID, PROCESSOR_DID, &merchant_key).unwrap();
        let request_low = ChainValidationRequest {
            payment_mandate: PaymentMandate {
                payment_mandate_contents: payment,
                user_authorization: Some(user_authorization),
            },
            cart_mandate: CartMandate {
                contents: cart,
                merchant_authorization: Some(merchant_authorization),
            },
            attestation: None,
            intent_mandate: None,
        };
        let merchant_doc = DidDocument::single_key(MERCHANT_DID, &merchant_key);
        let resolver_low = StaticDidResolver::new().with_document(merchant_doc);
        let ctx_low = ProcessorContext {
            self_did: PROCESSOR_DID,
            resolver: &resolver_low,
            jti_ledger: &jti_ledger,
            passkey_verifier: &verifier,
            rp_id: RP_ID,
            allowed_origins: &allowed_origins,
            storage: &storage,
            credential_provider_client: &client,
            credential_provider_url: "http://127.0.0.1:0",
            public_base_url: "http://127.0.0.1:0",
        };
        let result = verify_chain(&ctx_low, &request_low).await;
        assert!(matches!(result, Err(Error::Validation(ap2_model::Error::UserAuthInvalid(_)))));
    }

    #[tokio::test]
    async fn verify_chain_rejects_cart_total_exceeding_the_declared_intent_ceiling() {
        let (mut request, _merchant_key, user_key, resolver) = valid_request(1);
        request.intent_mandate = Some(IntentMandate {
            id: "intent_1".into(),
            natural_language_description: "red high-top basketball shoes".into(),
            intent_expiry: "2999-01-01T00:00:00Z".into(),
            user_cart_confirmation_required: true,
            merchants: None,
            skus: None,
            requires_refundability: None,
            max_amount: Some(PaymentCurrencyAmount { currency: "JPY".into(), value: "5000".into() }),
        });

        let jti_ledger = ap2_store::NonceLedger::new();
        let verifier = verifier_for(&user_key);
        let client = reqwest::Client::new();
        let allowed_origins = vec![ORIGIN.to_string()];
        let (storage, _dir) = test_storage().await;
        let ctx = ProcessorContext {
            self_did: PROCESSOR_DID,
            resolver: &resolver,
            jti_ledger: &jti_ledger,
            passkey_verifier: &verifier,
            rp_id: RP_ID,
            allowed_origins: &allowed_origins,
            storage: &storage,
            credential_provider_client: &client,
            credential_provider_url: "http://127.0.0.1:0",
            public_base_url: "http://127.0.0.1:0",
        };

        let result = verify_chain(&ctx, &request).await;
        assert!(matches!(result, Err(Error::Validation(ap2_model::Error::AmountExceedsIntent))));
    }

    #[tokio::test]
    async fn verify_chain_rejects_a_forged_cnf_jwk_not_matching_the_registered_passkey() {
        let (request, _merchant_key, _user_key, resolver) = valid_request(1);
        // An attacker-controlled key stands in for the registered passkey:
        // the presentation's own `cnf.jwk` can never be trusted as the sole
        // anchor for whose payment this authorizes.
        let forged_key = KeyPair::generate(Algorithm::EcdsaP256);
        let verifier = verifier_for(&forged_key);
        let jti_ledger = ap2_store::NonceLedger::new();
        let client = reqwest::Client::new();
        let allowed_origins = vec![ORIGIN.to_string()];
        let (storage, _dir) = test_storage().await;
        let ctx = ProcessorContext {
            self_did: PROCESSOR_DID,
            resolver: &resolver,
            jti_ledger: &jti_ledger,
            passkey_verifier: &verifier,
            rp_id: RP_ID,
            allowed_origins: &allowed_origins,
            storage: &storage,
            credential_provider_client: &client,
            credential_provider_url: "http://127.0.0.1:0",
            public_base_url: "http://127.0.0.1:0",
        };

        let result = verify_chain(&ctx, &request).await;
        assert!(matches!(result, Err(Error::Validation(ap2_model::Error::UserAuthInvalid(_)))));
    }

    #[test]
    fn jwk_to_cose_round_trips_through_cose_decoder() {
        let key = KeyPair::generate(Algorithm::EcdsaP256);
        let jwk = cnf_jwk_for(&key);
        let cose_bytes = jwk_to_cose_ec2(&jwk).unwrap();
        let decoded = ap2_crypto::cose::decode_cose_ec2_key(&cose_bytes).unwrap();
        assert_eq!(decoded.sec1_point, key.public_key_bytes());
    }

    #[test]
    fn extract_payment_method_token_reads_details_token() {
        let cart = cart_contents();
        let payment = payment_contents(&cart);
        let request = ChainValidationRequest {
            payment_mandate: PaymentMandate { payment_mandate_contents: payment, user_authorization: None },
            cart_mandate: CartMandate { contents: cart, merchant_authorization: None },
            attestation: None,
            intent_mandate: None,
        };
        assert_eq!(extract_payment_method_token(&request).unwrap(), "tok_live_123");
    }
}
