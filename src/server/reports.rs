// Trailing-window reports over the Stripe account.

use axum::{extract::State, Json};

use super::{ApiError, AppState};
use crate::reconcile::aggregator::WindowAggregator;
use crate::reconcile::correlator::FailedAttemptCorrelator;
use crate::reconcile::model::{AggregateResult, FailedAccountRecord};
use crate::reconcile::stripe_source::{BalanceTransactionSource, LatestPaymentMethod, PaymentIntentSource};

// GET /calculate-lesson-total
pub async fn calculate_lesson_total(State(state): State<AppState>) -> Result<Json<AggregateResult>, ApiError> {
    let ledger = BalanceTransactionSource::new(state.stripe.rest(), state.stripe.list_page_size());
    let totals = WindowAggregator::new(&ledger)
        .compute_window_totals(state.reports.window)
        .await?;
    Ok(Json(totals))
}

// GET /find-customers-with-failed-payments
pub async fn find_customers_with_failed_payments(
    State(state): State<AppState>,
) -> Result<Json<Vec<FailedAccountRecord>>, ApiError> {
    let attempts = PaymentIntentSource::new(state.stripe.rest(), state.stripe.list_page_size());
    let cards = LatestPaymentMethod::new(state.stripe.rest());
    let records = FailedAttemptCorrelator::new(&attempts, &cards)
        .with_concurrency(state.reports.credential_lookup_concurrency)
        .find_stale_failures(state.reports.window)
        .await?;
    Ok(Json(records))
}
