//! Concurrency-safe bounded TTL stores shared by the AP2 service binaries.
//!
//! Every table in §3 that exists only to reject a duplicate or expired
//! artefact — the nonce ledger, WebAuthn challenges, payment-method tokens,
//! step-up sessions, credential tokens — is a thin, named wrapper over the single
//! [`TtlMap`] primitive. Keeping them as distinct types (rather than passing
//! a bare `TtlMap<String, _>` around services) means a handler can't
//! accidentally query the wrong table by passing the right key to the wrong
//! map.

mod ttl_map;

pub use ttl_map::TtlMap;

use std::time::Duration;

/// Default nonce replay window (§4.2): an envelope's `nonce` is remembered
/// for this long after first being seen, matching the `issued_at` skew
/// tolerance so a message can never expire out of the ledger while still
/// inside its acceptance window.
pub const NONCE_TTL: Duration = Duration::from_secs(300);

/// Default lifetime of an issued WebAuthn challenge.
pub const CHALLENGE_TTL: Duration = Duration::from_secs(60);

/// Default lifetime of a tokenized payment method reference.
pub const PM_TOKEN_TTL: Duration = Duration::from_secs(900);

/// Default lifetime of a step-up session awaiting a second factor.
pub const STEP_UP_TTL: Duration = Duration::from_secs(600);

/// Default lifetime of a credential token minted by `/verify/attestation` or
/// `/step-up/.../complete` (§4.7).
pub const CREDENTIAL_TOKEN_TTL: Duration = Duration::from_secs(600);

/// Replay defense for A2A envelope `nonce` values (§4.2, §4.3, §8).
///
/// `check_and_record` is the atomic critical section the design calls out:
/// it is never correct to query "have I seen this nonce" and then write
/// "now I have" as two separate steps, because two concurrent deliveries of
/// the same envelope would both observe "not seen" and both proceed.
#[derive(Default)]
pub struct NonceLedger {
    seen: TtlMap<String, ()>,
}

impl NonceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if `nonce` was fresh and is now recorded, `false` if
    /// it had already been recorded and is still within its TTL window.
    pub fn check_and_record(&self, nonce: &str) -> bool {
        self.seen.check_and_insert(nonce.to_string(), (), NONCE_TTL)
    }

    pub fn sweep(&self) {
        self.seen.sweep();
    }
}

/// A single outstanding WebAuthn challenge, tracked by a server-chosen
/// challenge id so the relying party can find the record the assertion
/// claims to answer (§4.7, GLOSSARY "Challenge").
#[derive(Debug, Clone)]
pub struct ChallengeRecord {
    pub challenge_b64url: String,
    pub user_id: String,
    pub rp_id: String,
}

#[derive(Default)]
pub struct ChallengeStore {
    inner: TtlMap<String, ChallengeRecord>,
}

impl ChallengeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh challenge id. Collisions are not retried: the id is
    /// generated by the caller (128 bits of randomness) and is vanishingly
    /// unlikely to already be outstanding.
    pub fn issue(&self, challenge_id: String, record: ChallengeRecord) {
        self.inner.insert(challenge_id, record, CHALLENGE_TTL);
    }

    /// Consume a challenge: it can only be redeemed once, so a successful
    /// lookup removes it.
    pub fn redeem(&self, challenge_id: &str) -> Option<ChallengeRecord> {
        self.inner.remove(&challenge_id.to_string())
    }

    pub fn sweep(&self) {
        self.inner.sweep();
    }
}

/// A tokenized payment-method reference minted by the Credential Provider
/// and later redeemed by the Payment Processor through the Payment Network
/// (§4.7, §4.8, §4.9).
#[derive(Debug, Clone)]
pub struct PaymentMethodTokenRecord {
    pub user_id: String,
    pub payment_method_id: String,
    pub network: String,
}

#[derive(Default)]
pub struct PaymentMethodTokenStore {
    inner: TtlMap<String, PaymentMethodTokenRecord>,
}

impl PaymentMethodTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&self, token: String, record: PaymentMethodTokenRecord) {
        self.inner.insert(token, record, PM_TOKEN_TTL);
    }

    pub fn lookup(&self, token: &str) -> Option<PaymentMethodTokenRecord> {
        self.inner.get(&token.to_string())
    }

    pub fn sweep(&self) {
        self.inner.sweep();
    }
}

/// A step-up session awaiting completion of a second-factor WebAuthn
/// ceremony before a high-risk payment is allowed to proceed (§4.7, §9).
#[derive(Debug, Clone)]
pub struct StepUpSessionRecord {
    pub user_id: String,
    pub payment_mandate_id: String,
    pub challenge_id: String,
    pub completed: bool,
}

#[derive(Default)]
pub struct StepUpSessionStore {
    inner: TtlMap<String, StepUpSessionRecord>,
}

impl StepUpSessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, session_id: String, record: StepUpSessionRecord) {
        self.inner.insert(session_id, record, STEP_UP_TTL);
    }

    pub fn get(&self, session_id: &str) -> Option<StepUpSessionRecord> {
        self.inner.get(&session_id.to_string())
    }

    pub fn mark_completed(&self, session_id: &str) -> Option<StepUpSessionRecord> {
        let mut record = self.inner.get(&session_id.to_string())?;
        record.completed = true;
        self.inner.insert(session_id.to_string(), record.clone(), STEP_UP_TTL);
        Some(record)
    }

    pub fn sweep(&self) {
        self.inner.sweep();
    }
}

/// A credential token the Credential Provider mints after a successful
/// WebAuthn verification or a completed step-up ceremony, later redeemed by
/// `/credentials/verify` (§4.7).
#[derive(Debug, Clone)]
pub struct CredentialTokenRecord {
    pub user_id: String,
    pub payment_method_id: Option<String>,
    pub step_up_completed: bool,
}

#[derive(Default)]
pub struct CredentialTokenStore {
    inner: TtlMap<String, CredentialTokenRecord>,
}

impl CredentialTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&self, token: String, record: CredentialTokenRecord) {
        self.inner.insert(token, record, CREDENTIAL_TOKEN_TTL);
    }

    pub fn lookup(&self, token: &str) -> Option<CredentialTokenRecord> {
        self.inner.get(&token.to_string())
    }

    pub fn sweep(&self) {
        self.inner.sweep();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_token_round_trips() {
        let store = CredentialTokenStore::new();
        store.issue(
            "cred_tok_1".into(),
            CredentialTokenRecord {
                user_id: "user_1".into(),
                payment_method_id: Some("pm_visa".into()),
                step_up_completed: false,
            },
        );
        let record = store.lookup("cred_tok_1").unwrap();
        assert_eq!(record.user_id, "user_1");
        assert!(!record.step_up_completed);
    }

    #[test]
    fn nonce_ledger_rejects_replay() {
        let ledger = NonceLedger::new();
        assert!(ledger.check_and_record("abc"));
        assert!(!ledger.check_and_record("abc"));
        assert!(ledger.check_and_record("def"));
    }

    #[test]
    fn challenge_is_single_use() {
        let store = ChallengeStore::new();
        store.issue(
            "chal_1".into(),
            ChallengeRecord {
                challenge_b64url: "Zm9v".into(),
                user_id: "user_1".into(),
                rp_id: "shop.example".into(),
            },
        );
        assert!(store.redeem("chal_1").is_some());
        assert!(store.redeem("chal_1").is_none());
    }

    #[test]
    fn step_up_session_tracks_completion() {
        let store = StepUpSessionStore::new();
        store.create(
            "session_1".into(),
            StepUpSessionRecord {
                user_id: "user_1".into(),
                payment_mandate_id: "pm_1".into(),
                challenge_id: "chal_1".into(),
                completed: false,
            },
        );
        assert!(!store.get("session_1").unwrap().completed);
        let updated = store.mark_completed("session_1").unwrap();
        assert!(updated.completed);
        assert!(store.get("session_1").unwrap().completed);
    }
}
