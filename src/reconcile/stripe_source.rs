// Stripe list endpoints as report sources.
//
// Stripe returns `balance_transactions`, `payment_intents` and customer
// payment methods newest first, which is what `PageSource` requires.

use async_trait::async_trait;

use super::model::{AttemptError, LedgerEntry, PaymentAttempt, StoredCredential};
use super::{CredentialLookup, Page, PageSource};
use crate::stripe::errors::StripeApiError;
use crate::stripe::rest::StripeRestClient;
use crate::stripe::types::{BalanceTransaction, List, PaymentIntent, PaymentMethod};

/// `/v1/balance_transactions` as ledger entries.
pub struct BalanceTransactionSource<'a> {
    rest: &'a StripeRestClient,
    page_size: u32,
}

impl<'a> BalanceTransactionSource<'a> {
    pub fn new(rest: &'a StripeRestClient, page_size: u32) -> Self {
        Self { rest, page_size }
    }
}

#[async_trait]
impl PageSource<LedgerEntry> for BalanceTransactionSource<'_> {
    async fn fetch_page(&self, cursor: Option<&str>) -> Result<Page<LedgerEntry>, StripeApiError> {
        let list = self.rest.list_balance_transactions(self.page_size, cursor).await?;
        Ok(into_page(list, LedgerEntry::from))
    }
}

/// `/v1/payment_intents`, optionally scoped to one customer.
pub struct PaymentIntentSource<'a> {
    rest: &'a StripeRestClient,
    page_size: u32,
    customer: Option<String>,
}

impl<'a> PaymentIntentSource<'a> {
    pub fn new(rest: &'a StripeRestClient, page_size: u32) -> Self {
        Self { rest, page_size, customer: None }
    }

    pub fn for_customer(mut self, customer_id: impl Into<String>) -> Self {
        self.customer = Some(customer_id.into());
        self
    }
}

#[async_trait]
impl PageSource<PaymentIntent> for PaymentIntentSource<'_> {
    async fn fetch_page(&self, cursor: Option<&str>) -> Result<Page<PaymentIntent>, StripeApiError> {
        let list = self
            .rest
            .list_payment_intents(self.customer.as_deref(), self.page_size, cursor)
            .await?;
        Ok(into_page(list, |intent| intent))
    }
}

#[async_trait]
impl PageSource<PaymentAttempt> for PaymentIntentSource<'_> {
    async fn fetch_page(&self, cursor: Option<&str>) -> Result<Page<PaymentAttempt>, StripeApiError> {
        let page: Page<PaymentIntent> = PageSource::<PaymentIntent>::fetch_page(self, cursor).await?;
        Ok(Page {
            items: page.items.into_iter().map(PaymentAttempt::from).collect(),
            has_more: page.has_more,
        })
    }
}

/// `/v1/customers/{id}/payment_methods?limit=1`.
pub struct LatestPaymentMethod<'a> {
    rest: &'a StripeRestClient,
}

impl<'a> LatestPaymentMethod<'a> {
    pub fn new(rest: &'a StripeRestClient) -> Self {
        Self { rest }
    }
}

#[async_trait]
impl CredentialLookup for LatestPaymentMethod<'_> {
    async fn latest_credential(&self, account_id: &str) -> Result<Option<StoredCredential>, StripeApiError> {
        Ok(self.rest.latest_payment_method(account_id).await?.map(StoredCredential::from))
    }
}

impl super::Chronological for PaymentIntent {
    fn cursor(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> i64 {
        self.created
    }
}

fn into_page<S, T>(list: List<S>, f: impl FnMut(S) -> T) -> Page<T> {
    Page { items: list.data.into_iter().map(f).collect(), has_more: list.has_more }
}

impl From<BalanceTransaction> for LedgerEntry {
    fn from(txn: BalanceTransaction) -> Self {
        Self {
            id: txn.id,
            created_at: txn.created,
            gross_amount: txn.amount,
            fee: txn.fee,
            net: txn.net,
        }
    }
}

impl From<PaymentMethod> for StoredCredential {
    fn from(pm: PaymentMethod) -> Self {
        let (last4, brand) = match pm.card {
            Some(card) => (Some(card.last4), Some(card.brand)),
            None => (None, None),
        };
        Self {
            id: pm.id,
            last4,
            brand,
            name: pm.billing_details.name,
            email: pm.billing_details.email,
        }
    }
}

impl From<PaymentIntent> for PaymentAttempt {
    fn from(intent: PaymentIntent) -> Self {
        Self {
            id: intent.id,
            account_id: intent.customer,
            created_at: intent.created,
            description: intent.description,
            last_error: intent.last_payment_error.map(|err| AttemptError {
                decline_code: err.decline_code,
                credential: err.payment_method.map(StoredCredential::from),
            }),
        }
    }
}
