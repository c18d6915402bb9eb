//! Trailing-window reports over Stripe's newest-first list endpoints.
//!
//! Both reports are reducers over a [`walker::CollectionWalker`]:
//!
//! * [`aggregator::WindowAggregator`] sums the settlement ledger.
//! * [`correlator::FailedAttemptCorrelator`] finds failed payment attempts
//!   whose customer still has the failing card on file.
//!
//! Remote collections are reached through [`PageSource`] and
//! [`CredentialLookup`], so the engine itself never talks HTTP.

pub mod aggregator;
pub mod correlator;
pub mod model;
pub mod stripe_source;
pub mod walker;

#[cfg(test)]
pub(crate) mod fakes;

use async_trait::async_trait;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

use crate::stripe::errors::StripeApiError;
use self::model::StoredCredential;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Remote(#[from] StripeApiError),
    /// The source broke its newest-first contract; totals would be wrong.
    #[error("collection out of order: {id} created at {created} follows an item created at {previous}")]
    OutOfOrder { id: String, created: i64, previous: i64 },
    #[error("report window must be positive")]
    InvalidWindow,
    #[error("system clock error: {0}")]
    Clock(String),
}

/// One page of a cursor-paginated collection.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub has_more: bool,
}

/// Items that can be walked newest-first by cursor.
pub trait Chronological {
    /// Opaque id, used as the cursor for the following page.
    fn cursor(&self) -> &str;
    /// Creation time in epoch seconds.
    fn created_at(&self) -> i64;
}

/// A remote collection returned newest-first.
///
/// Contract: within a page and across consecutive pages `created_at` never
/// increases. Passing `Some(cursor)` returns the items strictly after
/// (older than) the item with that id.
#[async_trait]
pub trait PageSource<T>: Send + Sync {
    async fn fetch_page(&self, cursor: Option<&str>) -> Result<Page<T>, StripeApiError>;
}

/// Looks up the credential most recently attached to an account.
#[async_trait]
pub trait CredentialLookup: Send + Sync {
    async fn latest_credential(&self, account_id: &str) -> Result<Option<StoredCredential>, StripeApiError>;
}

/// Epoch seconds at which a window of `window` ending at `now` opens.
pub fn window_cutoff(now: i64, window: Duration) -> Result<i64, ReconcileError> {
    if window.is_zero() {
        return Err(ReconcileError::InvalidWindow);
    }
    let secs = i64::try_from(window.as_secs()).map_err(|_| ReconcileError::InvalidWindow)?;
    Ok(now.saturating_sub(secs))
}

pub fn unix_now() -> Result<i64, ReconcileError> {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| ReconcileError::Clock(e.to_string()))?
        .as_secs();
    i64::try_from(secs).map_err(|e| ReconcileError::Clock(e.to_string()))
}
