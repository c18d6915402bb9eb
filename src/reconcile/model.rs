// Report inputs (as the engine sees the remote collections) and outputs.

use serde::{Deserialize, Serialize};

use super::Chronological;

/// One settlement ledger movement, amounts in minor units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub id: String,
    pub created_at: i64,
    pub gross_amount: i64,
    pub fee: i64,
    pub net: i64,
}

/// A stored payment credential (a card).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCredential {
    pub id: String,
    pub last4: Option<String>,
    pub brand: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
}

/// Why the latest charge of an attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptError {
    pub decline_code: Option<String>,
    /// The credential that was charged; Stripe may omit it.
    pub credential: Option<StoredCredential>,
}

/// One attempt to charge an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentAttempt {
    pub id: String,
    pub account_id: Option<String>,
    pub created_at: i64,
    pub description: Option<String>,
    pub last_error: Option<AttemptError>,
}

impl Chronological for LedgerEntry {
    fn cursor(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> i64 {
        self.created_at
    }
}

impl Chronological for PaymentAttempt {
    fn cursor(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> i64 {
        self.created_at
    }
}

/// Totals over one trailing window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub payment_total: i64,
    pub fee_total: i64,
    pub net_total: i64,
}

impl AggregateResult {
    /// Fold one ledger entry in. Negative movements (refunds, disputes,
    /// adjustments) are ignored rather than subtracted.
    pub fn add(&mut self, entry: &LedgerEntry) {
        if entry.gross_amount < 0 {
            return;
        }
        self.payment_total = self.payment_total.saturating_add(entry.gross_amount);
        self.fee_total = self.fee_total.saturating_add(entry.fee);
        self.net_total = self.net_total.saturating_add(entry.net);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerSummary {
    pub id: String,
    pub email: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptSummary {
    pub created: i64,
    pub description: Option<String>,
    pub status: String,
    /// Decline code reported for the failure.
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialSummary {
    pub last4: Option<String>,
    pub brand: Option<String>,
}

/// A customer whose latest payment failed on the card still on file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedAccountRecord {
    pub customer: CustomerSummary,
    pub payment_intent: AttemptSummary,
    pub payment_method: CredentialSummary,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ledger(id: &str, gross: i64, fee: i64, net: i64) -> LedgerEntry {
        LedgerEntry { id: id.into(), created_at: 0, gross_amount: gross, fee, net }
    }

    #[test]
    fn test_totals_saturate_instead_of_overflowing() {
        let mut totals = AggregateResult::default();
        totals.add(&ledger("txn_1", i64::MAX, i64::MAX, i64::MAX));
        totals.add(&ledger("txn_2", 10, 1, 9));
        assert_eq!(totals.payment_total, i64::MAX);
        assert_eq!(totals.fee_total, i64::MAX);
        assert_eq!(totals.net_total, i64::MAX);
    }

    #[test]
    fn test_record_wire_shape() {
        let record = FailedAccountRecord {
            customer: CustomerSummary {
                id: "cus_1".into(),
                email: Some("ada@example.com".into()),
                name: Some("Ada".into()),
            },
            payment_intent: AttemptSummary {
                created: 1_700_000_000,
                description: Some("Lesson on Feb 25th".into()),
                status: "failed".into(),
                error: Some("insufficient_funds".into()),
            },
            payment_method: CredentialSummary {
                last4: Some("9995".into()),
                brand: Some("visa".into()),
            },
        };

        assert_eq!(
            serde_json::to_value(&record).unwrap(),
            json!({
                "customer": {"id": "cus_1", "email": "ada@example.com", "name": "Ada"},
                "payment_intent": {
                    "created": 1_700_000_000,
                    "description": "Lesson on Feb 25th",
                    "status": "failed",
                    "error": "insufficient_funds"
                },
                "payment_method": {"last4": "9995", "brand": "visa"}
            })
        );
    }

    #[test]
    fn test_totals_wire_shape() {
        let totals = AggregateResult { payment_total: 3000, fee_total: 90, net_total: 2910 };
        assert_eq!(
            serde_json::to_value(totals).unwrap(),
            json!({"payment_total": 3000, "fee_total": 90, "net_total": 2910})
        );
    }
}
