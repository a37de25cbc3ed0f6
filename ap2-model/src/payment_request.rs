//! W3C Payment Request sub-types (§3), carried inside `CartContents` and
//! echoed back inside `PaymentMandateContents.payment_response`.

use serde::{Deserialize, Serialize};

/// An ISO-4217 currency amount expressed in major units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentCurrencyAmount {
    /// ISO-4217 currency code, e.g. `"JPY"`.
    pub currency: String,
    /// Decimal value in major units, carried as a string so canonical-JSON
    /// hashing and equality checks never round-trip through a float.
    pub value: String,
}

/// A single line item on a cart or payment total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentItem {
    /// Human-readable label, e.g. `"Subtotal"` or `"Sales tax"`.
    pub label: String,
    /// The item's amount.
    pub amount: PaymentCurrencyAmount,
    /// Merchant SKU this line item fulfils from inventory. `None` for
    /// non-product lines (tax, shipping, discounts).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
    /// Quantity of `sku` this line item reserves. Defaults to 1 when `sku`
    /// is set and this is omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u32>,
    /// Whether the amount is still being finalised (e.g. shipping not yet priced).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<bool>,
    /// Refund window in seconds. A non-product item (tax, shipping) has `0`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refund_period: Option<i64>,
}

/// A shipping option offered by the merchant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentShippingOption {
    pub id: String,
    pub label: String,
    pub amount: PaymentCurrencyAmount,
    #[serde(default)]
    pub selected: bool,
}

/// Supported payment method data (opaque beyond its identifying `supported_methods`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentMethodData {
    pub supported_methods: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// The body of a `PaymentRequest`: what is being purchased.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentDetailsInit {
    /// Opaque id correlating this `details` block with the eventual
    /// `PaymentMandateContents.payment_details_id`.
    pub id: String,
    pub display_items: Vec<PaymentItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shipping_options: Option<Vec<PaymentShippingOption>>,
    pub total: PaymentItem,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modifiers: Option<serde_json::Value>,
}

/// Options that shape what the payment sheet collects (shipping address etc).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaymentOptions {
    #[serde(default)]
    pub request_shipping: bool,
    #[serde(default)]
    pub request_payer_name: bool,
    #[serde(default)]
    pub request_payer_email: bool,
}

/// W3C Contact Picker-shaped shipping address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactAddress {
    pub recipient: String,
    /// Ordered sequence of address lines.
    pub address_line: Vec<String>,
    pub city: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    pub postal_code: String,
    pub country: String,
}

/// The method, payment-sheet response produced by the user's payment handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentResponse {
    pub method_name: String,
    pub details: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shipping_address: Option<ContactAddress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shipping_option: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer_email: Option<String>,
}

/// A full W3C `PaymentRequest`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub method_data: Vec<PaymentMethodData>,
    pub details: PaymentDetailsInit,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<PaymentOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shipping_address: Option<ContactAddress>,
}
