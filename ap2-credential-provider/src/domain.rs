//! Domain logic for the Credential Provider's endpoints (§4.7).

use crate::error::{Error, Result};
use crate::storage::{PasskeyCredential, PaymentMethod, Storage};
use ap2_crypto::cose::decode_cose_ec2_key;
use ap2_crypto::webauthn::{webauthn_verify, WebAuthnAssertion};
use ap2_store::{
    ChallengeRecord, ChallengeStore, CredentialTokenRecord, CredentialTokenStore, PaymentMethodTokenRecord,
    PaymentMethodTokenStore, StepUpSessionRecord, StepUpSessionStore,
};
use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64;
use base64::Engine;
use chrono::{Duration, Utc};
use rand::RngCore;
use uuid::Uuid;

fn random_url_safe(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::rngs::OsRng.fill_bytes(&mut buf);
    B64.encode(buf)
}

/// Register a passkey, extracting its COSE public key from the WebAuthn
/// attestation object. This core's `attestation_object` is the bare COSE_Key
/// CBOR map rather than the full WebAuthn attestation structure (parsing
/// `fmt`/`attStmt` is out of scope), matching the simplification already
/// taken by `ap2_crypto::cose`.
pub async fn register_passkey(
    storage: &Storage,
    user_id: String,
    credential_id: String,
    attestation_object_b64u: &str,
    transports: Vec<String>,
) -> Result<()> {
    let cose_bytes = B64
        .decode(attestation_object_b64u)
        .map_err(|_| Error::WebAuthn(ap2_crypto::Error::WebAuthnInvalid("malformed attestation_object".into())))?;
    decode_cose_ec2_key(&cose_bytes)?;

    storage
        .register_passkey(PasskeyCredential {
            credential_id,
            user_id,
            public_key_cose: cose_bytes,
            sign_count: 0,
            transports,
        })
        .await
}

pub struct PaymentMethodSummary {
    pub id: String,
    pub method_type: String,
    pub brand: String,
    pub last4: String,
    pub requires_step_up: bool,
}

pub async fn list_payment_methods(storage: &Storage, user_id: &str) -> Result<Vec<PaymentMethodSummary>> {
    let methods = storage.list_payment_methods(user_id).await?;
    Ok(methods
        .into_iter()
        .map(|m| PaymentMethodSummary {
            id: m.id,
            method_type: m.method_type,
            brand: m.brand,
            last4: m.last4,
            requires_step_up: m.requires_step_up,
        })
        .collect())
}

pub struct TokenizeResult {
    pub token: String,
    pub expires_at: chrono::DateTime<Utc>,
}

pub async fn tokenize_payment_method(
    storage: &Storage,
    pm_tokens: &PaymentMethodTokenStore,
    user_id: &str,
    payment_method_id: &str,
) -> Result<TokenizeResult> {
    let method = storage
        .find_payment_method(payment_method_id)
        .await?
        .ok_or(Error::UnknownPaymentMethod)?;
    if method.user_id != user_id {
        return Err(Error::UserMismatch);
    }

    let token = format!("tok_{}_{}", &Uuid::new_v4().simple().to_string()[..8], random_url_safe(24));
    let expires_at = Utc::now() + Duration::minutes(15);
    pm_tokens.issue(
        token.clone(),
        PaymentMethodTokenRecord {
            user_id: user_id.to_string(),
            payment_method_id: payment_method_id.to_string(),
            network: "core-network".to_string(),
        },
    );

    Ok(TokenizeResult { token, expires_at })
}

pub struct StepUpSession {
    pub session_id: String,
    pub expires_at: chrono::DateTime<Utc>,
}

pub fn initiate_step_up(
    sessions: &StepUpSessionStore,
    challenges: &ChallengeStore,
    user_id: &str,
    payment_mandate_id: &str,
    rp_id: &str,
) -> StepUpSession {
    let session_id = format!("session_{}", Uuid::new_v4().simple());
    let challenge_id = format!("chal_{}", Uuid::new_v4().simple());
    challenges.issue(
        challenge_id.clone(),
        ChallengeRecord {
            challenge_b64url: random_url_safe(32),
            user_id: user_id.to_string(),
            rp_id: rp_id.to_string(),
        },
    );
    sessions.create(
        session_id.clone(),
        StepUpSessionRecord {
            user_id: user_id.to_string(),
            payment_mandate_id: payment_mandate_id.to_string(),
            challenge_id,
            completed: false,
        },
    );
    StepUpSession {
        session_id,
        expires_at: Utc::now() + Duration::minutes(10),
    }
}

pub struct StepUpCompletion {
    pub status: &'static str,
    pub token: String,
}

pub fn complete_step_up(sessions: &StepUpSessionStore, credential_tokens: &CredentialTokenStore, session_id: &str) -> Result<StepUpCompletion> {
    let record = sessions.mark_completed(session_id).ok_or(Error::UnknownSession)?;
    let token = format!("cred_tok_{}", Uuid::new_v4().simple());
    credential_tokens.issue(
        token.clone(),
        CredentialTokenRecord {
            user_id: record.user_id,
            payment_method_id: None,
            step_up_completed: true,
        },
    );
    Ok(StepUpCompletion { status: "completed", token })
}

pub struct StepUpVerification {
    pub verified: bool,
    pub payment_method_id: Option<String>,
    pub token: Option<String>,
}

pub fn verify_step_up(sessions: &StepUpSessionStore, credential_tokens: &CredentialTokenStore, session_id: &str) -> Result<StepUpVerification> {
    let record = sessions.get(session_id).ok_or(Error::UnknownSession)?;
    if !record.completed {
        return Ok(StepUpVerification {
            verified: false,
            payment_method_id: None,
            token: None,
        });
    }
    let token = format!("cred_tok_{}", Uuid::new_v4().simple());
    credential_tokens.issue(
        token.clone(),
        CredentialTokenRecord {
            user_id: record.user_id,
            payment_method_id: None,
            step_up_completed: true,
        },
    );
    Ok(StepUpVerification {
        verified: true,
        payment_method_id: None,
        token: Some(token),
    })
}

pub struct AttestationVerification {
    pub verified: bool,
    pub token: String,
    /// The registered passkey owner, resolved from storage rather than any
    /// claim the caller supplied. Other services cross-checking a WebAuthn
    /// assertion (the Payment Processor's `user_authorization` step) use this
    /// as the authoritative identity instead of trusting a self-asserted one.
    pub user_id: String,
    /// The registered COSE public key the assertion was actually verified
    /// against, so a caller can confirm an out-of-band holder-binding key
    /// matches the enrolled credential rather than substituting for it.
    pub public_key_cose: Vec<u8>,
}

/// `POST /verify/attestation` (§4.7): verify a WebAuthn assertion against a
/// registered passkey, advance its signature counter, and mint a credential
/// token on success.
pub async fn verify_attestation(
    storage: &Storage,
    credential_tokens: &CredentialTokenStore,
    credential_id: &str,
    assertion: &WebAuthnAssertion,
    expected_challenge: &[u8],
    rp_id: &str,
    allowed_origins: &[String],
) -> Result<AttestationVerification> {
    let passkey = storage.find_passkey(credential_id).await?.ok_or_else(|| {
        Error::WebAuthn(ap2_crypto::Error::WebAuthnInvalid("unknown credential_id".into()))
    })?;

    let new_counter = webauthn_verify(
        assertion,
        expected_challenge,
        &passkey.public_key_cose,
        passkey.sign_count,
        rp_id,
        allowed_origins,
    )?;
    storage.advance_sign_count(credential_id, new_counter).await?;

    let user_id = passkey.user_id.clone();
    let public_key_cose = passkey.public_key_cose.clone();

    let token = format!("cred_tok_{}", Uuid::new_v4().simple());
    credential_tokens.issue(
        token.clone(),
        CredentialTokenRecord {
            user_id: passkey.user_id,
            payment_method_id: None,
            step_up_completed: false,
        },
    );

    Ok(AttestationVerification {
        verified: true,
        token,
        user_id,
        public_key_cose,
    })
}

pub struct CredentialInfo {
    pub payment_method_id: Option<String>,
    pub holder_name: Option<String>,
    pub method_type: Option<String>,
    pub brand: Option<String>,
    pub last4: Option<String>,
}

/// `POST /credentials/verify` (§4.7): never returns the token or PAN.
pub async fn verify_credential(
    storage: &Storage,
    credential_tokens: &CredentialTokenStore,
    token: &str,
    payer_id: &str,
) -> Result<(bool, CredentialInfo)> {
    let record = match credential_tokens.lookup(token) {
        Some(r) if r.user_id == payer_id => r,
        _ => {
            return Ok((
                false,
                CredentialInfo {
                    payment_method_id: None,
                    holder_name: None,
                    method_type: None,
                    brand: None,
                    last4: None,
                },
            ))
        }
    };

    let method = match &record.payment_method_id {
        Some(id) => storage.find_payment_method(id).await?,
        None => None,
    };

    Ok((
        true,
        CredentialInfo {
            payment_method_id: method.as_ref().map(|m| m.id.clone()),
            holder_name: method.as_ref().map(|m| m.holder_name.clone()),
            method_type: method.as_ref().map(|m| m.method_type.clone()),
            brand: method.as_ref().map(|m| m.brand.clone()),
            last4: method.as_ref().map(|m| m.last4.clone()),
        },
    ))
}

pub async fn record_receipt(storage: &Storage, transaction_id: &str, payer_id: &str, receipt_url: &str, amount: &str, timestamp: &str) -> Result<()> {
    storage.record_receipt(transaction_id, payer_id, receipt_url, amount, timestamp).await
}

#[allow(dead_code)]
pub async fn seed_demo_catalogue(storage: &Storage) -> Result<()> {
    storage
        .seed_payment_method(PaymentMethod {
            id: "pm_visa_4242".into(),
            user_id: "did:ap2:user:alice".into(),
            method_type: "card".into(),
            brand: "visa".into(),
            last4: "4242".into(),
            holder_name: "Alice Example".into(),
            requires_step_up: false,
        })
        .await?;
    storage
        .seed_payment_method(PaymentMethod {
            id: "pm_amex_1001".into(),
            user_id: "did:ap2:user:alice".into(),
            method_type: "card".into(),
            brand: "amex".into(),
            last4: "1001".into(),
            holder_name: "Alice Example".into(),
            requires_step_up: true,
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ciborium::value::Value as CborValue;

    fn cose_bytes() -> Vec<u8> {
        let map = CborValue::Map(vec![
            (CborValue::Integer(1.into()), CborValue::Integer(2.into())),
            (CborValue::Integer((-1).into()), CborValue::Integer(1.into())),
            (CborValue::Integer((-2).into()), CborValue::Bytes(vec![0x11; 32])),
            (CborValue::Integer((-3).into()), CborValue::Bytes(vec![0x22; 32])),
        ]);
        let mut out = Vec::new();
        ciborium::ser::into_writer(&map, &mut out).unwrap();
        out
    }

    #[tokio::test]
    async fn register_and_tokenize_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path().join("test.db").to_str().unwrap()).await.unwrap();
        seed_demo_catalogue(&storage).await.unwrap();

        register_passkey(
            &storage,
            "did:ap2:user:alice".into(),
            "cred_1".into(),
            &B64.encode(cose_bytes()),
            vec!["internal".into()],
        )
        .await
        .unwrap();

        let methods = list_payment_methods(&storage, "did:ap2:user:alice").await.unwrap();
        assert_eq!(methods.len(), 2);

        let pm_tokens = PaymentMethodTokenStore::new();
        let result = tokenize_payment_method(&storage, &pm_tokens, "did:ap2:user:alice", "pm_visa_4242")
            .await
            .unwrap();
        assert!(result.token.starts_with("tok_"));
        assert!(pm_tokens.lookup(&result.token).is_some());
    }

    #[tokio::test]
    async fn tokenize_rejects_user_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path().join("test.db").to_str().unwrap()).await.unwrap();
        seed_demo_catalogue(&storage).await.unwrap();
        let pm_tokens = PaymentMethodTokenStore::new();

        let result = tokenize_payment_method(&storage, &pm_tokens, "did:ap2:user:mallory", "pm_visa_4242").await;
        assert!(matches!(result, Err(Error::UserMismatch)));
    }

    #[test]
    fn step_up_requires_completion_before_verifying() {
        let sessions = StepUpSessionStore::new();
        let challenges = ChallengeStore::new();
        let tokens = CredentialTokenStore::new();
        let session = initiate_step_up(&sessions, &challenges, "did:ap2:user:alice", "pm_1", "shop.example");

        let before = verify_step_up(&sessions, &tokens, &session.session_id).unwrap();
        assert!(!before.verified);

        complete_step_up(&sessions, &tokens, &session.session_id).unwrap();
        let after = verify_step_up(&sessions, &tokens, &session.session_id).unwrap();
        assert!(after.verified);
    }

    #[tokio::test]
    async fn verify_credential_rejects_wrong_payer() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path().join("test.db").to_str().unwrap()).await.unwrap();
        let tokens = CredentialTokenStore::new();
        tokens.issue(
            "cred_tok_1".into(),
            CredentialTokenRecord {
                user_id: "did:ap2:user:alice".into(),
                payment_method_id: None,
                step_up_completed: false,
            },
        );

        let (verified, _) = verify_credential(&storage, &tokens, "cred_tok_1", "did:ap2:user:mallory").await.unwrap();
        assert!(!verified);

        let (verified, _) = verify_credential(&storage, &tokens, "cred_tok_1", "did:ap2:user:alice").await.unwrap();
        assert!(verified);
    }
}
