// Trailing-window ledger totals.

use std::time::Duration;
use tracing::{info, instrument};

use super::model::{AggregateResult, LedgerEntry};
use super::walker::CollectionWalker;
use super::{unix_now, window_cutoff, PageSource, ReconcileError};

pub struct WindowAggregator<'a, S: ?Sized> {
    ledger: &'a S,
}

impl<'a, S> WindowAggregator<'a, S>
where
    S: PageSource<LedgerEntry> + ?Sized,
{
    pub fn new(ledger: &'a S) -> Self {
        Self { ledger }
    }

    /// Totals over the `window` ending now.
    pub async fn compute_window_totals(&self, window: Duration) -> Result<AggregateResult, ReconcileError> {
        self.compute_window_totals_at(window, unix_now()?).await
    }

    /// Totals over the `window` ending at `now` (epoch seconds).
    #[instrument(skip(self), fields(window_secs = window.as_secs()))]
    pub async fn compute_window_totals_at(
        &self,
        window: Duration,
        now: i64,
    ) -> Result<AggregateResult, ReconcileError> {
        let cutoff = window_cutoff(now, window)?;
        let mut walker = CollectionWalker::new(self.ledger, cutoff);
        let mut totals = AggregateResult::default();
        let mut visited = 0usize;

        while let Some(entry) = walker.next().await? {
            totals.add(&entry);
            visited += 1;
        }

        info!(
            cutoff = cutoff,
            visited = visited,
            pages = walker.pages_fetched(),
            payment_total = totals.payment_total,
            fee_total = totals.fee_total,
            net_total = totals.net_total,
            "computed window totals"
        );
        Ok(totals)
    }
}
