//! Domain logic for `/network/tokenize` and `/network/verify-token` (§4.8).

use crate::error::{Error, Result};
use crate::storage::{AgentTokenRecord, Storage};
use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64;
use base64::Engine;
use chrono::{Duration, Utc};
use rand::RngCore;
use uuid::Uuid;

/// `pm_token` is always `"tok_" + uuid[:8] + "_" + random_url_safe(24)`
/// (§4.7). Reject anything that doesn't have that three-part shape.
fn validate_pm_token_format(pm_token: &str) -> Result<()> {
    let mut parts = pm_token.splitn(3, '_');
    let (prefix, id, random) = (parts.next(), parts.next(), parts.next());
    match (prefix, id, random) {
        (Some("tok"), Some(id), Some(random)) if id.len() == 8 && !random.is_empty() => Ok(()),
        _ => Err(Error::MalformedToken),
    }
}

fn random_url_safe(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::rngs::OsRng.fill_bytes(&mut buf);
    B64.encode(buf)
}

pub struct TokenizeRequest {
    pub pm_token: String,
    pub payment_mandate_id: String,
    pub payer_id: String,
    pub amount: String,
}

pub struct TokenizeResponse {
    pub agent_token: String,
    pub expires_at: chrono::DateTime<Utc>,
    pub network_name: String,
    pub token_type: &'static str,
}

/// Mint an `agent_token` for a tokenize request (§4.8 step 1).
pub async fn tokenize(storage: &Storage, network_name: &str, request: TokenizeRequest) -> Result<TokenizeResponse> {
    validate_pm_token_format(&request.pm_token)?;

    let agent_token = format!(
        "agent_tok_{}_{}_{}",
        network_name,
        &Uuid::new_v4().simple().to_string()[..8],
        random_url_safe(24)
    );
    let expires_at = Utc::now() + Duration::hours(1);

    storage
        .insert_agent_token(AgentTokenRecord {
            agent_token: agent_token.clone(),
            pm_token: request.pm_token,
            payment_mandate_id: request.payment_mandate_id,
            payer_id: request.payer_id,
            amount: request.amount,
            network_name: network_name.to_string(),
            attestation_verified: true,
            expires_at,
        })
        .await?;

    Ok(TokenizeResponse {
        agent_token,
        expires_at,
        network_name: network_name.to_string(),
        token_type: "agent_token",
    })
}

/// `POST /network/verify-token` (§4.8 step 2): binary verified/invalid.
pub async fn verify_token(storage: &Storage, agent_token: &str) -> Result<bool> {
    storage.verify_agent_token(agent_token).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_pm_token() {
        assert!(validate_pm_token_format("not-a-token").is_err());
        assert!(validate_pm_token_format("tok_short").is_err());
        assert!(validate_pm_token_format("tok_12345678_").is_err());
        assert!(validate_pm_token_format("tok_12345678_abcDEF123").is_ok());
    }

    #[tokio::test]
    async fn tokenize_mints_and_verifies() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path().join("test.db").to_str().unwrap()).await.unwrap();

        let response = tokenize(
            &storage,
            "core-network",
            TokenizeRequest {
                pm_token: "tok_abcd1234_randomsuffix".into(),
                payment_mandate_id: "pm_1".into(),
                payer_id: "did:ap2:user:alice".into(),
                amount: "8068".into(),
            },
        )
        .await
        .unwrap();

        assert!(response.agent_token.starts_with("agent_tok_core-network_"));
        assert!(verify_token(&storage, &response.agent_token).await.unwrap());
        assert!(!verify_token(&storage, "agent_tok_unknown").await.unwrap());
    }

    #[tokio::test]
    async fn tokenize_rejects_malformed_pm_token() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path().join("test.db").to_str().unwrap()).await.unwrap();

        let result = tokenize(
            &storage,
            "core-network",
            TokenizeRequest {
                pm_token: "garbage".into(),
                payment_mandate_id: "pm_1".into(),
                payer_id: "did:ap2:user:alice".into(),
                amount: "8068".into(),
            },
        )
        .await;
        assert!(matches!(result, Err(Error::MalformedToken)));
    }
}
