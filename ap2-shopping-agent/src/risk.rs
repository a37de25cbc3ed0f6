//! Advisory risk scoring (§4.10, §9): a deterministic function of eight
//! signals. The Payment Processor MAY consult this but MUST NOT rely on it
//! for correctness — it travels on the wire as `risk_assessment`, a field
//! the processor's `ChainValidationRequest` does not require and is free to
//! ignore.

use ap2_model::mandate::{CartContents, IntentMandate};
use ap2_model::payment_request::PaymentCurrencyAmount;
use chrono::{DateTime, Timelike, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Recommendation {
    Approve,
    Review,
    Decline,
}

#[derive(Debug, Clone, Serialize)]
pub struct RiskAssessment {
    pub risk_score: u8,
    pub risk_level: RiskLevel,
    pub fraud_indicators: Vec<String>,
    pub recommendation: Recommendation,
}

/// Everything the scoring function needs, gathered from the in-flight
/// purchase. `requires_step_up` and `brand` describe the chosen payment
/// method; `has_shipping_address` and `now` feed the shipping/temporal
/// signals.
pub struct RiskInputs<'a> {
    pub cart_total: &'a PaymentCurrencyAmount,
    pub intent: &'a IntentMandate,
    pub cart: &'a CartContents,
    pub payment_method_brand: &'a str,
    pub requires_step_up: bool,
    pub has_shipping_address: bool,
    pub now: DateTime<Utc>,
}

fn parse_amount(value: &str) -> f64 {
    value.parse().unwrap_or(0.0)
}

/// Score each of the eight signals named in §4.10/§9 on its own 0-100 scale,
/// then combine them with fixed weights. Weights are chosen so no single
/// signal can push a transaction to HIGH on its own except amount magnitude
/// and payment-method risk, the two signals most directly tied to loss.
pub fn compute_risk_score(input: &RiskInputs) -> RiskAssessment {
    let mut indicators = Vec::new();

    // 1. Amount magnitude: scaled against a ¥100,000 reference ceiling.
    let amount = parse_amount(&input.cart_total.value);
    let amount_score = (amount / 100_000.0 * 100.0).clamp(0.0, 100.0);
    if amount_score > 60.0 {
        indicators.push("large_transaction_amount".to_string());
    }

    // 2. Intent-constraint fit: how close the cart sits to the intent's
    // declared ceiling, if one was declared.
    let fit_score = match &input.intent.max_amount {
        Some(max) => {
            let max_value = parse_amount(&max.value);
            if max_value <= 0.0 {
                0.0
            } else {
                ((amount / max_value) * 100.0).clamp(0.0, 100.0)
            }
        }
        None => 40.0, // unconstrained intents are moderately riskier than a tight ceiling
    };
    if fit_score > 90.0 {
        indicators.push("cart_near_intent_ceiling".to_string());
    }

    // 3. Card-not-present: every AP2 purchase is agent-mediated and so
    // always card-not-present; this is a fixed, non-discriminating
    // contribution rather than a true signal, matching how CNP is treated
    // as a baseline uplift in card-network risk models.
    let cnp_score = 30.0;

    // 4. Payment-method risk: brands already flagged as `requires_step_up`
    // at the Credential Provider are the ones this core considers higher
    // risk; amex is the one demo brand configured that way.
    let method_score = if input.requires_step_up { 70.0 } else { 20.0 };
    if input.requires_step_up {
        indicators.push("payment_method_requires_step_up".to_string());
    }

    // 5. Pattern anomaly: no purchase history store exists in this core, so
    // this signal is a fixed baseline rather than a true deviation measure.
    let pattern_score = 10.0;

    // 6. Shipping risk: a cart with no shipping address on the payment
    // response is riskier for physical goods.
    let shipping_score = if input.has_shipping_address { 10.0 } else { 50.0 };
    if !input.has_shipping_address {
        indicators.push("missing_shipping_address".to_string());
    }

    // 7. Temporal risk: purchases made late at night (local-equivalent UTC
    // hour) skew riskier.
    let hour = input.now.hour();
    let temporal_score = if (2..6).contains(&hour) { 60.0 } else { 15.0 };
    if (2..6).contains(&hour) {
        indicators.push("off_hours_transaction".to_string());
    }

    // 8. Agent involvement: this purchase is, by construction, entirely
    // agent-mediated (Shopping Agent + Merchant Agent), which this core
    // treats as a fixed moderate uplift over a direct human checkout.
    let agent_score = 35.0;
    indicators.push("agent_mediated_purchase".to_string());

    let weighted = amount_score * 0.25
        + fit_score * 0.15
        + cnp_score * 0.10
        + method_score * 0.20
        + pattern_score * 0.05
        + shipping_score * 0.10
        + temporal_score * 0.05
        + agent_score * 0.10;
    let risk_score = weighted.round().clamp(0.0, 100.0) as u8;

    let (risk_level, recommendation) = match risk_score {
        0..=34 => (RiskLevel::Low, Recommendation::Approve),
        35..=69 => (RiskLevel::Medium, Recommendation::Review),
        _ => (RiskLevel::High, Recommendation::Decline),
    };

    let _ = &input.cart; // cart contents are implicit in cart_total/has_shipping_address

    RiskAssessment {
        risk_score,
        risk_level,
        fraud_indicators: indicators,
        recommendation,
    }
}
