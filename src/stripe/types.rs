// Minimal Stripe DTOs and helper types
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StripePreconditionError {
    #[error("currency must be USD")]
    NonUsdCurrency,
    #[error("amount must be non-negative cents")]
    InvalidAmount,
}

// Helper to enforce USD & cents preconditions at the API boundary.
pub fn ensure_usd_cents(amount_cents: i64, currency: &str) -> Result<(), StripePreconditionError> {
    require_usd_currency(currency)?;
    require_non_negative_cents(amount_cents)?;
    Ok(())
}

pub fn require_usd_currency(currency: &str) -> Result<(), StripePreconditionError> {
    if !currency.eq_ignore_ascii_case("USD") {
        return Err(StripePreconditionError::NonUsdCurrency);
    }
    Ok(())
}

pub fn require_non_negative_cents(amount_cents: i64) -> Result<(), StripePreconditionError> {
    if amount_cents < 0 {
        return Err(StripePreconditionError::InvalidAmount);
    }
    Ok(())
}

/// Envelope of every Stripe list endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct List<T> {
    pub data: Vec<T>,
    #[serde(default)]
    pub has_more: bool,
}

// Request structs (subset) matching Stripe API forms

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreatePaymentIntentRequest {
    pub amount: i64,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture_method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirm: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<std::collections::HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub automatic_payment_methods_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub automatic_payment_methods_allow_redirects: Option<String>,
}

impl CreatePaymentIntentRequest {
    /// Flatten into Stripe's bracketed form encoding.
    pub fn to_form(&self) -> Vec<(String, String)> {
        let mut form: Vec<(String, String)> = Vec::new();
        form.push(("amount".into(), self.amount.to_string()));
        form.push(("currency".into(), self.currency.to_ascii_lowercase()));
        if let Some(c) = &self.customer {
            form.push(("customer".into(), c.clone()));
        }
        if let Some(pm) = &self.payment_method {
            form.push(("payment_method".into(), pm.clone()));
        }
        if let Some(d) = &self.description {
            form.push(("description".into(), d.clone()));
        }
        if let Some(cm) = &self.capture_method {
            form.push(("capture_method".into(), cm.clone()));
        }
        if let Some(confirm) = self.confirm {
            form.push(("confirm".into(), confirm.to_string()));
        }
        if let Some(meta) = &self.metadata {
            let mut keys: Vec<&String> = meta.keys().collect();
            keys.sort();
            for k in keys {
                form.push((format!("metadata[{}]", k), meta[k].clone()));
            }
        }
        if let Some(enabled) = self.automatic_payment_methods_enabled {
            form.push(("automatic_payment_methods[enabled]".into(), enabled.to_string()));
        }
        if let Some(allow_redirects) = &self.automatic_payment_methods_allow_redirects {
            form.push((
                "automatic_payment_methods[allow_redirects]".into(),
                allow_redirects.clone(),
            ));
        }
        form
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRefundRequest {
    pub payment_intent: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

// Response shapes

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletedCustomer {
    pub id: String,
    #[serde(default)]
    pub deleted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupIntent {
    pub id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BillingDetails {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Card {
    pub brand: String,
    pub last4: String,
    #[serde(default)]
    pub exp_month: Option<u32>,
    #[serde(default)]
    pub exp_year: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub id: String,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub billing_details: BillingDetails,
    #[serde(default)]
    pub card: Option<Card>,
}

/// `last_payment_error` on a PaymentIntent; `payment_method` arrives expanded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastPaymentError {
    #[serde(rename = "type", default)]
    pub type_: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub decline_code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub payment_method: Option<PaymentMethod>,
}

// PaymentIntent is echoed back to HTTP clients, so unknown fields are kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub status: String,
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub amount_capturable: i64,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub last_payment_error: Option<LastPaymentError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Refund {
    pub id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_intent: Option<String>,
}

/// One settlement ledger movement (`/v1/balance_transactions`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceTransaction {
    pub id: String,
    pub amount: i64,
    pub fee: i64,
    pub net: i64,
    pub created: i64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(rename = "type", default)]
    pub type_: Option<String>,
}
