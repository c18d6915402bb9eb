// In-memory sources for engine tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use super::model::{AttemptError, LedgerEntry, PaymentAttempt, StoredCredential};
use super::{CredentialLookup, Page, PageSource};
use crate::stripe::errors::StripeApiError;

/// Serves pre-built pages in order, ignoring the cursor value but
/// recording it.
pub struct FakePages<T> {
    pages: Vec<Vec<T>>,
    has_more: Option<Vec<bool>>,
    fail_at: Option<usize>,
    cursors: Mutex<Vec<Option<String>>>,
}

impl<T: Clone> FakePages<T> {
    pub fn new(pages: Vec<Vec<T>>) -> Self {
        Self { pages, has_more: None, fail_at: None, cursors: Mutex::new(Vec::new()) }
    }

    /// Override the `has_more` flag reported with each page.
    pub fn with_has_more(mut self, flags: Vec<bool>) -> Self {
        self.has_more = Some(flags);
        self
    }

    /// Fail the fetch with this (zero based) call index.
    pub fn failing_at(mut self, call: usize) -> Self {
        self.fail_at = Some(call);
        self
    }

    pub fn calls(&self) -> usize {
        self.cursors.lock().unwrap().len()
    }

    pub fn cursors(&self) -> Vec<Option<String>> {
        self.cursors.lock().unwrap().clone()
    }
}

#[async_trait]
impl<T: Clone + Send + Sync> PageSource<T> for FakePages<T> {
    async fn fetch_page(&self, cursor: Option<&str>) -> Result<Page<T>, StripeApiError> {
        let call = {
            let mut cursors = self.cursors.lock().unwrap();
            cursors.push(cursor.map(String::from));
            cursors.len() - 1
        };
        if self.fail_at == Some(call) {
            return Err(StripeApiError::Transient("status=503 body=upstream unavailable".into()));
        }
        let items = self.pages.get(call).cloned().unwrap_or_default();
        let has_more = match &self.has_more {
            Some(flags) => flags.get(call).copied().unwrap_or(false),
            None => call + 1 < self.pages.len(),
        };
        Ok(Page { items, has_more })
    }
}

/// Latest credential per account, with optional per-account latency.
#[derive(Default)]
pub struct FakeCredentials {
    latest: HashMap<String, StoredCredential>,
    delays: HashMap<String, Duration>,
    failing: Option<String>,
    lookups: Mutex<Vec<String>>,
}

impl FakeCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, account_id: &str, credential: StoredCredential) -> Self {
        self.latest.insert(account_id.to_string(), credential);
        self
    }

    pub fn delayed(mut self, account_id: &str, delay: Duration) -> Self {
        self.delays.insert(account_id.to_string(), delay);
        self
    }

    pub fn failing_for(mut self, account_id: &str) -> Self {
        self.failing = Some(account_id.to_string());
        self
    }

    pub fn lookups(&self) -> Vec<String> {
        self.lookups.lock().unwrap().clone()
    }
}

#[async_trait]
impl CredentialLookup for FakeCredentials {
    async fn latest_credential(&self, account_id: &str) -> Result<Option<StoredCredential>, StripeApiError> {
        self.lookups.lock().unwrap().push(account_id.to_string());
        if let Some(delay) = self.delays.get(account_id) {
            tokio::time::sleep(*delay).await;
        }
        if self.failing.as_deref() == Some(account_id) {
            return Err(StripeApiError::Http("connection reset".into()));
        }
        Ok(self.latest.get(account_id).cloned())
    }
}

pub fn entry(id: &str, created_at: i64, gross_amount: i64, fee: i64, net: i64) -> LedgerEntry {
    LedgerEntry { id: id.to_string(), created_at, gross_amount, fee, net }
}

pub fn credential(id: &str) -> StoredCredential {
    StoredCredential {
        id: id.to_string(),
        last4: Some("4242".into()),
        brand: Some("visa".into()),
        name: Some(format!("holder of {id}")),
        email: Some(format!("{id}@example.com")),
    }
}

pub fn failed_attempt(id: &str, account_id: &str, created_at: i64, credential_id: Option<&str>) -> PaymentAttempt {
    PaymentAttempt {
        id: id.to_string(),
        account_id: Some(account_id.to_string()),
        created_at,
        description: Some(format!("lesson {id}")),
        last_error: Some(AttemptError {
            decline_code: Some("insufficient_funds".into()),
            credential: credential_id.map(credential),
        }),
    }
}

pub fn succeeded_attempt(id: &str, account_id: &str, created_at: i64) -> PaymentAttempt {
    PaymentAttempt {
        id: id.to_string(),
        account_id: Some(account_id.to_string()),
        created_at,
        description: Some(format!("lesson {id}")),
        last_error: None,
    }
}
