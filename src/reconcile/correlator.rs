// Failed payment attempts whose customer has not replaced the failing card.

use futures::stream::{self, StreamExt, TryStreamExt};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use super::model::{
    AttemptError, AttemptSummary, CredentialSummary, CustomerSummary, FailedAccountRecord,
    PaymentAttempt, StoredCredential,
};
use super::walker::CollectionWalker;
use super::{unix_now, window_cutoff, CredentialLookup, PageSource, ReconcileError};

pub const DEFAULT_LOOKUP_CONCURRENCY: usize = 4;

/// A failed attempt waiting for its credential lookup.
struct Candidate {
    attempt_id: String,
    account_id: String,
    created_at: i64,
    description: Option<String>,
    error: AttemptError,
}

pub struct FailedAttemptCorrelator<'a, A: ?Sized, C: ?Sized> {
    attempts: &'a A,
    credentials: &'a C,
    concurrency: usize,
}

impl<'a, A, C> FailedAttemptCorrelator<'a, A, C>
where
    A: PageSource<PaymentAttempt> + ?Sized,
    C: CredentialLookup + ?Sized,
{
    pub fn new(attempts: &'a A, credentials: &'a C) -> Self {
        Self { attempts, credentials, concurrency: DEFAULT_LOOKUP_CONCURRENCY }
    }

    /// Maximum number of credential lookups in flight; 1 means sequential.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Stale failures among attempts in the `window` ending now.
    pub async fn find_stale_failures(&self, window: Duration) -> Result<Vec<FailedAccountRecord>, ReconcileError> {
        self.find_stale_failures_at(window, unix_now()?).await
    }

    /// Stale failures among attempts in the `window` ending at `now`,
    /// newest attempt first. A customer appears once per qualifying attempt.
    #[instrument(skip(self), fields(window_secs = window.as_secs(), concurrency = self.concurrency))]
    pub async fn find_stale_failures_at(
        &self,
        window: Duration,
        now: i64,
    ) -> Result<Vec<FailedAccountRecord>, ReconcileError> {
        let cutoff = window_cutoff(now, window)?;
        let mut walker = CollectionWalker::new(self.attempts, cutoff);
        let mut candidates = Vec::new();
        let mut visited = 0usize;

        while let Some(attempt) = walker.next().await? {
            visited += 1;
            let Some(error) = attempt.last_error else {
                continue;
            };
            let Some(account_id) = attempt.account_id else {
                debug!(attempt_id = %attempt.id, "failed attempt has no customer; skipping");
                continue;
            };
            candidates.push(Candidate {
                attempt_id: attempt.id,
                account_id,
                created_at: attempt.created_at,
                description: attempt.description,
                error,
            });
        }

        let failed = candidates.len();

        // `buffered` yields in input order regardless of completion order.
        let records: Vec<Option<FailedAccountRecord>> = stream::iter(candidates)
            .map(|candidate| async move {
                let stored = self.credentials.latest_credential(&candidate.account_id).await?;
                Ok::<_, ReconcileError>(correlate(candidate, stored))
            })
            .buffered(self.concurrency)
            .try_collect()
            .await?;
        let records: Vec<FailedAccountRecord> = records.into_iter().flatten().collect();

        info!(
            cutoff = cutoff,
            visited = visited,
            failed = failed,
            stale = records.len(),
            pages = walker.pages_fetched(),
            "correlated failed payment attempts"
        );
        Ok(records)
    }
}

/// Whether the account is still on the credential that failed.
///
/// An account with nothing on file is stale. When the failure carries no
/// credential reference there is nothing to compare against, so it is
/// treated as stale too.
pub fn is_stale(failed: Option<&StoredCredential>, stored: Option<&StoredCredential>) -> bool {
    match (failed, stored) {
        (_, None) => true,
        (None, Some(_)) => true,
        (Some(failed), Some(stored)) => failed.id == stored.id,
    }
}

fn correlate(candidate: Candidate, stored: Option<StoredCredential>) -> Option<FailedAccountRecord> {
    if !is_stale(candidate.error.credential.as_ref(), stored.as_ref()) {
        debug!(
            attempt_id = %candidate.attempt_id,
            account_id = %candidate.account_id,
            "customer already replaced the failing payment method"
        );
        return None;
    }

    // Prefer the card that failed; fall back to what is on file.
    let shown = match candidate.error.credential {
        Some(failed) => Some(failed),
        None => {
            warn!(
                attempt_id = %candidate.attempt_id,
                account_id = %candidate.account_id,
                has_stored = stored.is_some(),
                "failed attempt has no payment method reference; reporting as stale"
            );
            stored
        }
    };
    let (email, name, last4, brand) = match shown {
        Some(c) => (c.email, c.name, c.last4, c.brand),
        None => (None, None, None, None),
    };

    Some(FailedAccountRecord {
        customer: CustomerSummary { id: candidate.account_id, email, name },
        payment_intent: AttemptSummary {
            created: candidate.created_at,
            description: candidate.description,
            status: "failed".to_string(),
            error: candidate.error.decline_code,
        },
        payment_method: CredentialSummary { last4, brand },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::fakes::{credential, failed_attempt, succeeded_attempt, FakeCredentials, FakePages};

    const HOUR: i64 = 3600;
    const NOW: i64 = 1_700_000_000;
    const WINDOW: Duration = Duration::from_secs(36 * 3600);

    async fn run(
        attempts: &FakePages<PaymentAttempt>,
        credentials: &FakeCredentials,
    ) -> Result<Vec<FailedAccountRecord>, ReconcileError> {
        FailedAttemptCorrelator::new(attempts, credentials)
            .find_stale_failures_at(WINDOW, NOW)
            .await
    }

    #[tokio::test]
    async fn test_same_card_on_file_is_reported() {
        let attempts = FakePages::new(vec![vec![failed_attempt("pi_1", "cus_1", NOW - HOUR, Some("cred_A"))]]);
        let credentials = FakeCredentials::new().with("cus_1", credential("cred_A"));

        let records = run(&attempts, &credentials).await.unwrap();

        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.customer.id, "cus_1");
        assert_eq!(record.customer.email.as_deref(), Some("cred_A@example.com"));
        assert_eq!(record.payment_intent.status, "failed");
        assert_eq!(record.payment_intent.error.as_deref(), Some("insufficient_funds"));
        assert_eq!(record.payment_intent.created, NOW - HOUR);
        assert_eq!(record.payment_method.last4.as_deref(), Some("4242"));
    }

    #[tokio::test]
    async fn test_replaced_card_is_excluded() {
        let attempts = FakePages::new(vec![vec![failed_attempt("pi_1", "cus_1", NOW - HOUR, Some("cred_A"))]]);
        let credentials = FakeCredentials::new().with("cus_1", credential("cred_B"));

        assert!(run(&attempts, &credentials).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_no_card_on_file_is_reported() {
        let attempts = FakePages::new(vec![vec![failed_attempt("pi_1", "cus_1", NOW - HOUR, Some("cred_A"))]]);
        let credentials = FakeCredentials::new();

        let records = run(&attempts, &credentials).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].payment_method.brand.as_deref(), Some("visa"));
    }

    #[tokio::test]
    async fn test_missing_credential_reference_uses_card_on_file() {
        let attempts = FakePages::new(vec![vec![failed_attempt("pi_1", "cus_1", NOW - HOUR, None)]]);
        let credentials = FakeCredentials::new().with("cus_1", credential("cred_B"));

        let records = run(&attempts, &credentials).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].customer.email.as_deref(), Some("cred_B@example.com"));
    }

    #[tokio::test]
    async fn test_only_failed_attempts_in_window_are_looked_up() {
        let attempts = FakePages::new(vec![
            vec![
                succeeded_attempt("pi_5", "cus_5", NOW - HOUR),
                failed_attempt("pi_4", "cus_4", NOW - 2 * HOUR, Some("cred_4")),
            ],
            vec![
                failed_attempt("pi_3", "cus_3", NOW - 3 * HOUR, Some("cred_3")),
                failed_attempt("pi_2", "cus_2", NOW - 40 * HOUR, Some("cred_2")),
            ],
            vec![failed_attempt("pi_1", "cus_1", NOW - 50 * HOUR, Some("cred_1"))],
        ]);
        let credentials = FakeCredentials::new()
            .with("cus_4", credential("cred_4"))
            .with("cus_3", credential("cred_3"));

        let records = run(&attempts, &credentials).await.unwrap();

        let ids: Vec<&str> = records.iter().map(|r| r.customer.id.as_str()).collect();
        assert_eq!(ids, vec!["cus_4", "cus_3"]);
        assert_eq!(credentials.lookups(), vec!["cus_4".to_string(), "cus_3".to_string()]);
        assert_eq!(attempts.calls(), 2);
    }

    #[tokio::test]
    async fn test_order_follows_attempts_not_lookup_completion() {
        let attempts = FakePages::new(vec![vec![
            failed_attempt("pi_3", "cus_slow", NOW - HOUR, Some("cred_s")),
            failed_attempt("pi_2", "cus_fast", NOW - 2 * HOUR, Some("cred_f")),
            failed_attempt("pi_1", "cus_slow", NOW - 3 * HOUR, Some("cred_s")),
        ]]);
        let credentials = FakeCredentials::new()
            .with("cus_slow", credential("cred_s"))
            .with("cus_fast", credential("cred_f"))
            .delayed("cus_slow", Duration::from_millis(50));

        let records = FailedAttemptCorrelator::new(&attempts, &credentials)
            .with_concurrency(3)
            .find_stale_failures_at(WINDOW, NOW)
            .await
            .unwrap();

        let created: Vec<i64> = records.iter().map(|r| r.payment_intent.created).collect();
        assert_eq!(created, vec![NOW - HOUR, NOW - 2 * HOUR, NOW - 3 * HOUR]);
        // Not deduplicated per customer.
        assert_eq!(records.iter().filter(|r| r.customer.id == "cus_slow").count(), 2);
    }

    #[tokio::test]
    async fn test_lookup_failure_fails_whole_run() {
        let attempts = FakePages::new(vec![vec![
            failed_attempt("pi_2", "cus_2", NOW - HOUR, Some("cred_2")),
            failed_attempt("pi_1", "cus_1", NOW - 2 * HOUR, Some("cred_1")),
        ]]);
        let credentials = FakeCredentials::new()
            .with("cus_2", credential("cred_2"))
            .failing_for("cus_1");

        let result = run(&attempts, &credentials).await;
        assert!(matches!(result, Err(ReconcileError::Remote(_))));
    }

    #[tokio::test]
    async fn test_empty_attempts() {
        let attempts = FakePages::<PaymentAttempt>::new(vec![vec![]]);
        let credentials = FakeCredentials::new();
        assert!(run(&attempts, &credentials).await.unwrap().is_empty());
        assert!(credentials.lookups().is_empty());
    }

    #[test]
    fn test_default_concurrency_matches_settings() {
        let attempts = FakePages::<PaymentAttempt>::new(vec![]);
        let credentials = FakeCredentials::new();
        let correlator = FailedAttemptCorrelator::new(&attempts, &credentials);
        assert_eq!(
            correlator.concurrency,
            crate::settings::ReportSettings::default().credential_lookup_concurrency
        );
        assert_eq!(correlator.with_concurrency(0).concurrency, 1);
    }

    #[test]
    fn test_is_stale_rule() {
        let a = credential("cred_A");
        let b = credential("cred_B");
        assert!(is_stale(Some(&a), Some(&a)));
        assert!(!is_stale(Some(&a), Some(&b)));
        assert!(is_stale(Some(&a), None));
        assert!(is_stale(None, Some(&b)));
        assert!(is_stale(None, None));
    }
}
