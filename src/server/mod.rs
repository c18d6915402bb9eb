// HTTP surface: lesson payment pass-throughs and the trailing-window reports

mod lessons;
mod reports;

use anyhow::Result;
use axum::{
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::net::SocketAddr;
use thiserror::Error;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::reconcile::ReconcileError;
use crate::settings::{Config, ReportSettings};
use crate::stripe::errors::{to_http_status, StripeApiError};
use crate::stripe::StripeProvider;

#[derive(Clone)]
pub struct AppState {
    pub stripe: StripeProvider,
    pub reports: ReportSettings,
}

impl AppState {
    pub fn try_new(cfg: &Config) -> Result<Self> {
        let stripe = StripeProvider::new(cfg.stripe.clone())?;
        Ok(Self { stripe, reports: cfg.reports.clone() })
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Stripe(#[from] StripeApiError),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
    #[error("{message}")]
    BadRequest { code: &'static str, message: String },
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Stripe(e) => to_http_status(e),
            ApiError::Reconcile(ReconcileError::Remote(e)) => to_http_status(e),
            ApiError::Reconcile(ReconcileError::OutOfOrder { .. }) => StatusCode::BAD_GATEWAY,
            ApiError::Reconcile(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        }
    }

    fn code(&self) -> Option<&str> {
        match self {
            ApiError::Stripe(e) | ApiError::Reconcile(ReconcileError::Remote(e)) => e.code(),
            ApiError::Reconcile(ReconcileError::OutOfOrder { .. }) => Some("collection_out_of_order"),
            ApiError::Reconcile(_) => Some("internal"),
            ApiError::BadRequest { code, .. } => Some(*code),
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Stripe(e) | ApiError::Reconcile(ReconcileError::Remote(e)) => e.user_message(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "request failed");
        } else {
            warn!(status = status.as_u16(), error = %self, "request rejected");
        }
        let body = json!({
            "error": {
                "code": self.code(),
                "message": self.message(),
            }
        });
        (status, Json(body)).into_response()
    }
}

/// `Idempotency-Key` forwarded from the caller, if any.
pub(crate) fn idempotency_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get("idempotency-key")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

pub fn router(state: AppState, cors_allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/config", get(lessons::get_config))
        .route("/lessons", post(lessons::create_lesson_signup))
        .route("/payment-method", get(lessons::get_payment_method))
        .route("/customer", get(lessons::get_customer_card))
        .route("/schedule-lesson", post(lessons::schedule_lesson))
        .route("/complete-lesson-payment", post(lessons::complete_lesson_payment))
        .route("/refund-lesson", post(lessons::refund_lesson))
        .route("/remove_payment_method/:customer_id", post(lessons::remove_payment_method))
        .route("/account-update/:customer_id", post(lessons::update_account))
        .route("/delete-account/:customer_id", post(lessons::delete_account))
        .route("/calculate-lesson-total", get(reports::calculate_lesson_total))
        .route(
            "/find-customers-with-failed-payments",
            get(reports::find_customers_with_failed_payments),
        )
        .layer(cors_layer(cors_allowed_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(origin = %o, error = %e, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(parsed))
}

pub async fn run_server(cfg: &Config, state: AppState) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", cfg.bind_address, cfg.server_port).parse()?;
    let app = router(state, &cfg.cors_allowed_origins);

    info!(addr = %addr, "Starting lessons HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
    }
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
