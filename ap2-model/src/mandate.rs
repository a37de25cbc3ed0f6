//! The three chained mandates (§3): IntentMandate → CartMandate → PaymentMandate.

use crate::payment_request::{PaymentItem, PaymentRequest, PaymentResponse};
use ap2_crypto::webauthn::WebAuthnAssertion;
use serde::{Deserialize, Serialize};

/// Declaration of purchase intent (conceptually signed by the user).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentMandate {
    /// Envelope metadata: a stable id for this intent, tracked separately
    /// from the natural-language body so it can be referenced by id from
    /// later mandates without re-embedding the whole struct.
    pub id: String,

    pub natural_language_description: String,

    /// ISO-8601 expiry; the intent is dead once this passes.
    pub intent_expiry: String,

    #[serde(default = "default_true")]
    pub user_cart_confirmation_required: bool,

    /// Allow-list of merchant DIDs, if the user constrained the search.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchants: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skus: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_refundability: Option<bool>,

    /// The maximum total the eventual CartMandate may charge, enforced at
    /// PaymentMandate validation time. `None` means unconstrained.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_amount: Option<crate::payment_request::PaymentCurrencyAmount>,
}

fn default_true() -> bool {
    true
}

/// The body a merchant signs over: what is in the cart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartContents {
    pub id: String,
    pub user_cart_confirmation_required: bool,
    pub payment_request: PaymentRequest,
    pub cart_expiry: String,
    pub merchant_name: String,
}

/// A signed (or not-yet-signed) cart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartMandate {
    pub contents: CartContents,
    /// Compact ES256 JWS over `cart_hash`, base64url string form. Empty
    /// until the Merchant signs it via `POST /sign/cart`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant_authorization: Option<String>,
}

/// The body of a payment mandate, prior to the user's authorization artefact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentMandateContents {
    pub payment_mandate_id: String,
    /// Must equal `CartMandate.contents.payment_request.details.id`.
    pub payment_details_id: String,
    pub payment_details_total: PaymentItem,
    pub payment_response: PaymentResponse,
    /// DID of the Merchant Agent relaying this mandate.
    pub merchant_agent: String,
    pub timestamp: String,
}

/// A payment mandate together with the user's authorization artefact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentMandate {
    pub payment_mandate_contents: PaymentMandateContents,
    /// base64url-encoded SD-JWT-VC-shaped Verifiable Presentation (Form A)
    /// or `~`-separated compact SD-JWT (Form B). See `crate::auth`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_authorization: Option<String>,
}

/// The WebAuthn assertion captured at IntentMandate confirmation time, kept
/// alongside the mandate by the Shopping Agent's orchestration state (not
/// part of the wire-serialised IntentMandate itself).
#[derive(Debug, Clone)]
pub struct IntentConfirmation {
    pub intent: IntentMandate,
    pub assertion: WebAuthnAssertion,
}
