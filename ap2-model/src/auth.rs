//! Mandate authorization artefacts (§4.4): `merchant_authorization` and
//! `user_authorization`.

use crate::error::{Error, Result};
use crate::mandate::{CartContents, PaymentMandateContents};
use ap2_crypto::canonical::canonical_hash_hex;
use ap2_crypto::jws;
use ap2_crypto::keys::KeyPair;
use ap2_crypto::webauthn::WebAuthnAssertion;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64;
use base64::Engine;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Compute `cart_hash = SHA-256(canonical_json(cart_contents))`.
pub fn cart_hash(contents: &CartContents) -> Result<String> {
    Ok(canonical_hash_hex(contents)?)
}

/// Compute `payment_hash = SHA-256(canonical_json(payment_mandate_contents))`.
pub fn payment_hash(contents: &PaymentMandateContents) -> Result<String> {
    Ok(canonical_hash_hex(contents)?)
}

/// Decoded payload of a `merchant_authorization` JWS.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerchantAuthorizationPayload {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
    pub cart_hash: String,
}

/// Build `merchant_authorization` for `contents`, signed by the merchant's key.
///
/// Per §4.4: header `{alg: "ES256", kid: "<merchant_did>#key-1", typ: "JWT"}`,
/// payload `{iss, sub, aud, iat, exp (10 min), jti, cart_hash}`.
pub fn build_merchant_authorization(
    contents: &CartContents,
    merchant_did: &str,
    payment_processor_did: &str,
    merchant_key: &KeyPair,
) -> Result<String> {
    let header = json!({
        "alg": "ES256",
        "kid": format!("{merchant_did}#key-1"),
        "typ": "JWT",
    });
    let now = Utc::now();
    let payload = MerchantAuthorizationPayload {
        iss: merchant_did.to_string(),
        sub: merchant_did.to_string(),
        aud: payment_processor_did.to_string(),
        iat: now.timestamp(),
        exp: (now + Duration::minutes(10)).timestamp(),
        jti: uuid::Uuid::new_v4().to_string(),
        cart_hash: cart_hash(contents)?,
    };
    Ok(jws::sign_compact(&header, &payload, merchant_key)?)
}

/// Verify a `merchant_authorization` JWS against the expected `cart_hash` and
/// a DID-resolver callback, returning the decoded payload on success.
///
/// Performs §4.9 step 4 a–e in full: algorithm/typ check, signature
/// verification via `resolve`, `aud`/`iat`/`exp` checks, and the `cart_hash`
/// equality check (`CartTampered` on mismatch).
pub fn verify_merchant_authorization<F>(
    token: &str,
    expected_cart_hash: &str,
    expected_aud: &str,
    resolve: F,
) -> Result<MerchantAuthorizationPayload>
where
    F: FnOnce(&str) -> ap2_crypto::Result<String>,
{
    let payload: MerchantAuthorizationPayload =
        jws::verify_compact(token, "ES256", |kid| resolve(kid))?;

    let now = Utc::now().timestamp();
    if payload.aud != expected_aud {
        return Err(Error::SchemaInvalid(format!(
            "merchant_authorization aud mismatch: expected {expected_aud}, got {}",
            payload.aud
        )));
    }
    if payload.iat > now || now >= payload.exp {
        return Err(Error::MandateExpired(
            "merchant_authorization is not currently valid".into(),
        ));
    }
    if payload.cart_hash != expected_cart_hash {
        return Err(Error::CartTampered);
    }
    Ok(payload)
}

/// The two unsigned JWT-shaped carriers inside `user_authorization`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuerJwtPayload {
    pub iss: String,
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    pub cnf: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KbJwtPayload {
    pub aud: String,
    pub nonce: String,
    pub iat: i64,
    pub sd_hash: String,
    /// Exactly `[cart_hash, payment_hash]`, order-independent at verification time.
    pub transaction_data: Vec<String>,
}

/// The fully-assembled `user_authorization` Verifiable Presentation (§4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAuthorization {
    pub issuer_jwt: String,
    pub kb_jwt: String,
    pub webauthn_assertion: WebAuthnAssertionWire,
    pub cart_hash: String,
    pub payment_hash: String,
}

/// Wire-serialisable mirror of `ap2_crypto::webauthn::WebAuthnAssertion`
/// (base64url-encoded byte fields, as they travel over JSON).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebAuthnAssertionWire {
    pub raw_id: String,
    pub client_data_json: String,
    pub authenticator_data: String,
    pub signature: String,
    #[serde(rename = "type")]
    pub ty: String,
    pub attestation_type: String,
}

impl WebAuthnAssertionWire {
    pub fn to_assertion(&self) -> Result<WebAuthnAssertion> {
        Ok(WebAuthnAssertion {
            client_data_json: B64
                .decode(&self.client_data_json)
                .map_err(|e| Error::SchemaInvalid(e.to_string()))?,
            authenticator_data: B64
                .decode(&self.authenticator_data)
                .map_err(|e| Error::SchemaInvalid(e.to_string()))?,
            signature: B64
                .decode(&self.signature)
                .map_err(|e| Error::SchemaInvalid(e.to_string()))?,
        })
    }

    pub fn from_assertion(raw_id: &str, assertion: &WebAuthnAssertion) -> Self {
        Self {
            raw_id: raw_id.to_string(),
            client_data_json: B64.encode(&assertion.client_data_json),
            authenticator_data: B64.encode(&assertion.authenticator_data),
            signature: B64.encode(&assertion.signature),
            ty: "public-key".to_string(),
            attestation_type: "passkey".to_string(),
        }
    }
}

/// Build a `user_authorization` Form A (JSON object, base64url-encoded),
/// per §4.4. The issuer-JWT and KB-JWT are unsigned carriers in this core —
/// WebAuthn is the real cryptographic proof.
pub fn build_user_authorization(
    user_did: &str,
    user_cnf_jwk: serde_json::Value,
    payment_processor_did: &str,
    nonce: &str,
    cart_contents: &CartContents,
    payment_mandate_contents: &PaymentMandateContents,
    assertion_raw_id: &str,
    assertion: &WebAuthnAssertion,
) -> Result<String> {
    let now = Utc::now();
    let issuer_header = json!({"alg": "ES256", "typ": "vc+sd-jwt"});
    let issuer_payload = IssuerJwtPayload {
        iss: user_did.to_string(),
        sub: user_did.to_string(),
        iat: now.timestamp(),
        exp: (now + Duration::hours(1)).timestamp(),
        cnf: json!({"jwk": user_cnf_jwk}),
    };
    let issuer_jwt = unsigned_compact(&issuer_header, &issuer_payload)?;

    let cart_hash_value = cart_hash(cart_contents)?;
    let payment_hash_value = payment_hash(payment_mandate_contents)?;

    let kb_header = json!({"alg": "ES256", "typ": "kb+jwt"});
    let kb_payload = KbJwtPayload {
        aud: payment_processor_did.to_string(),
        nonce: nonce.to_string(),
        iat: now.timestamp(),
        sd_hash: jws::sd_hash(&issuer_jwt),
        transaction_data: vec![cart_hash_value.clone(), payment_hash_value.clone()],
    };
    let kb_jwt = unsigned_compact(&kb_header, &kb_payload)?;

    let vp = UserAuthorization {
        issuer_jwt,
        kb_jwt,
        webauthn_assertion: WebAuthnAssertionWire::from_assertion(assertion_raw_id, assertion),
        cart_hash: cart_hash_value,
        payment_hash: payment_hash_value,
    };
    let json_bytes = serde_json::to_vec(&vp)?;
    Ok(B64.encode(json_bytes))
}

/// An unsigned `<header>.<payload>` pair (no signature segment), as used for
/// the historical core's issuer-JWT and KB-JWT carriers.
fn unsigned_compact<H: Serialize, P: Serialize>(header: &H, payload: &P) -> Result<String> {
    let h = B64.encode(serde_json::to_vec(header)?);
    let p = B64.encode(serde_json::to_vec(payload)?);
    Ok(format!("{h}.{p}"))
}

fn parse_unsigned_compact<P: for<'de> Deserialize<'de>>(pair: &str) -> Result<P> {
    let (_h, p) = pair
        .split_once('.')
        .ok_or_else(|| Error::SchemaInvalid("malformed unsigned JWT pair".into()))?;
    let bytes = B64
        .decode(p)
        .map_err(|e| Error::SchemaInvalid(e.to_string()))?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Parse a `user_authorization` string in either Form A (base64url JSON
/// object) or Form B (`~`-separated SD-JWT compact form) per §4.4. The
/// Payment Processor MUST accept both.
///
/// Form B's compact string has no room for the `webauthn_assertion` field
/// Form A carries inline, so it must ride alongside the message out-of-band
/// (the A2A `PaymentMandate` payload's optional `attestation` part); callers
/// pass that in as `out_of_band_assertion`.
pub fn parse_user_authorization(raw: &str, out_of_band_assertion: Option<&WebAuthnAssertionWire>) -> Result<UserAuthorization> {
    if raw.contains('~') {
        let segments: Vec<&str> = raw.split('~').filter(|s| !s.is_empty()).collect();
        let [issuer_jwt, kb_jwt] = segments.as_slice() else {
            return Err(Error::SchemaInvalid(format!(
                "Form B user_authorization must have exactly 2 non-empty `~`-separated segments, got {}",
                segments.len()
            )));
        };
        let kb_payload: KbJwtPayload = parse_unsigned_compact(kb_jwt)?;
        let (cart_hash, payment_hash) = match kb_payload.transaction_data.as_slice() {
            [cart, payment] => (cart.clone(), payment.clone()),
            other => {
                return Err(Error::SchemaInvalid(format!(
                    "kb_jwt.transaction_data must carry exactly [cart_hash, payment_hash], got {} entries",
                    other.len()
                )))
            }
        };
        let webauthn_assertion = out_of_band_assertion.cloned().ok_or_else(|| {
            Error::SchemaInvalid(
                "Form B user_authorization requires an out-of-band webauthn_assertion (the \
                 PaymentMandate message's `attestation` part)"
                    .into(),
            )
        })?;

        return Ok(UserAuthorization {
            issuer_jwt: issuer_jwt.to_string(),
            kb_jwt: kb_jwt.to_string(),
            webauthn_assertion,
            cart_hash,
            payment_hash,
        });
    }

    let bytes = B64
        .decode(raw)
        .map_err(|e| Error::SchemaInvalid(format!("not valid base64url: {e}")))?;
    let vp: UserAuthorization = serde_json::from_slice(&bytes)
        .map_err(|e| Error::SchemaInvalid(format!("not a valid Form A object: {e}")))?;
    Ok(vp)
}

/// Validate the two transaction-data hashes appear in a parsed
/// `user_authorization`'s KB-JWT, order-independent (§4.9 step 5d).
pub fn verify_transaction_data_binding(
    vp: &UserAuthorization,
    expected_cart_hash: &str,
    expected_payment_hash: &str,
) -> Result<()> {
    let kb_payload: KbJwtPayload = parse_unsigned_compact(&vp.kb_jwt)?;
    let has = |h: &str| kb_payload.transaction_data.iter().any(|x| x == h);
    if !has(expected_cart_hash) || !has(expected_payment_hash) {
        return Err(Error::UserAuthInvalid(
            "transaction_data does not bind both cart_hash and payment_hash".into(),
        ));
    }
    Ok(())
}

/// The KB-JWT's `nonce` field, used as the WebAuthn `expected_challenge`
/// unless the implementation captured a dedicated challenge (§4.9 step 5c).
pub fn kb_jwt_nonce(vp: &UserAuthorization) -> Result<Vec<u8>> {
    let kb_payload: KbJwtPayload = parse_unsigned_compact(&vp.kb_jwt)?;
    B64.decode(kb_payload.nonce)
        .map_err(|e| Error::SchemaInvalid(format!("bad KB-JWT nonce encoding: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payment_request::*;
    use ap2_crypto::keys::Algorithm;

    fn sample_cart() -> CartContents {
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
                        amount: PaymentCurrencyAmount {
                            currency: "JPY".into(),
                            value: "8068".into(),
                        },
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

    #[test]
    fn merchant_authorization_round_trips() {
        let key = ap2_crypto::keys::KeyPair::generate(Algorithm::EcdsaP256);
        let cart = sample_cart();
        let token = build_merchant_authorization(
            &cart,
            "did:ap2:merchant:acme",
            "did:ap2:processor:main",
            &key,
        )
        .unwrap();

        let expected_hash = cart_hash(&cart).unwrap();
        let public_key_hex = hex::encode(key.public_key_bytes());
        let payload = verify_merchant_authorization(&token, &expected_hash, "did:ap2:processor:main", |_kid| {
            Ok(public_key_hex.clone())
        })
        .unwrap();
        assert_eq!(payload.cart_hash, expected_hash);
    }

    #[test]
    fn tampered_cart_is_detected() {
        let key = ap2_crypto::keys::KeyPair::generate(Algorithm::EcdsaP256);
        let cart = sample_cart();
        let token = build_merchant_authorization(
            &cart,
            "did:ap2:merchant:acme",
            "did:ap2:processor:main",
            &key,
        )
        .unwrap();

        let mut tampered = cart.clone();
        tampered.payment_request.details.total.amount.value = "1000".into();
        let tampered_hash = cart_hash(&tampered).unwrap();

        let public_key_hex = hex::encode(key.public_key_bytes());
        let result = verify_merchant_authorization(&token, &tampered_hash, "did:ap2:processor:main", |_kid| {
            Ok(public_key_hex.clone())
        });
        assert!(matches!(result, Err(Error::CartTampered)));
    }

    fn sample_assertion_wire() -> WebAuthnAssertionWire {
        WebAuthnAssertionWire {
            raw_id: "assertion-1".into(),
            client_data_json: B64.encode(b"client-data"),
            authenticator_data: B64.encode(b"authenticator-data"),
            signature: B64.encode(b"signature"),
            ty: "public-key".into(),
            attestation_type: "passkey".into(),
        }
    }

    fn build_form_b(cart_hash: &str, payment_hash: &str) -> String {
        let issuer_header = json!({"alg": "ES256", "typ": "vc+sd-jwt"});
        let issuer_payload = IssuerJwtPayload {
            iss: "did:ap2:user:alice".into(),
            sub: "did:ap2:user:alice".into(),
            iat: 0,
            exp: 9_999_999_999,
            cnf: json!({"jwk": {"kty": "EC"}}),
        };
        let issuer_jwt = unsigned_compact(&issuer_header, &issuer_payload).unwrap();

        let kb_header = json!({"alg": "ES256", "typ": "kb+jwt"});
        let kb_payload = KbJwtPayload {
            aud: "did:ap2:processor:main".into(),
            nonce: "nonce-1".into(),
            iat: 0,
            sd_hash: jws::sd_hash(&issuer_jwt),
            transaction_data: vec![cart_hash.to_string(), payment_hash.to_string()],
        };
        let kb_jwt = unsigned_compact(&kb_header, &kb_payload).unwrap();

        format!("{issuer_jwt}~{kb_jwt}~")
    }

    #[test]
    fn form_b_parses_into_the_same_shape_as_form_a() {
        let raw = build_form_b("cart-hash-1", "payment-hash-1");
        let assertion = sample_assertion_wire();

        let vp = parse_user_authorization(&raw, Some(&assertion)).unwrap();
        assert_eq!(vp.cart_hash, "cart-hash-1");
        assert_eq!(vp.payment_hash, "payment-hash-1");
        assert_eq!(vp.webauthn_assertion.raw_id, "assertion-1");
    }

    #[test]
    fn form_b_without_an_out_of_band_assertion_is_rejected() {
        let raw = build_form_b("cart-hash-1", "payment-hash-1");
        let result = parse_user_authorization(&raw, None);
        assert!(matches!(result, Err(Error::SchemaInvalid(_))));
    }

    #[test]
    fn form_a_still_parses_with_no_out_of_band_assertion() {
        let vp = UserAuthorization {
            issuer_jwt: "header.payload".into(),
            kb_jwt: "header.payload".into(),
            webauthn_assertion: sample_assertion_wire(),
            cart_hash: "cart-hash-1".into(),
            payment_hash: "payment-hash-1".into(),
        };
        let raw = B64.encode(serde_json::to_vec(&vp).unwrap());

        let parsed = parse_user_authorization(&raw, None).unwrap();
        assert_eq!(parsed.webauthn_assertion.raw_id, "assertion-1");
        assert_eq!(parsed.cart_hash, "cart-hash-1");
    }
}
