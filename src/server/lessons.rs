// Lesson sign-up, payment and account endpoints. Each is a thin pass-through
// to one or two Stripe calls.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Deserializer};
use serde_json::json;
use std::collections::HashMap;
use tracing::{info, instrument};

use super::{idempotency_key, ApiError, AppState};
use crate::reconcile::stripe_source::PaymentIntentSource;
use crate::reconcile::walker::CollectionWalker;
use crate::stripe::types::{CreatePaymentIntentRequest, CreateRefundRequest, Customer, PaymentIntent};

const LESSON_CURRENCY: &str = "usd";
const REFUND_REASON: &str = "requested_by_customer";

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub name: String,
    pub first_lesson: String,
}

#[derive(Debug, Deserialize)]
pub struct PmQuery {
    pub pm: String,
}

#[derive(Debug, Deserialize)]
pub struct ScheduleLessonRequest {
    pub customer_id: String,
    #[serde(deserialize_with = "cents")]
    pub amount: i64,
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct PaymentIntentAmountRequest {
    pub payment_intent_id: String,
    #[serde(default, deserialize_with = "optional_cents")]
    pub amount: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct AccountUpdateRequest {
    pub name: String,
    pub email: String,
}

// Clients send amounts either as JSON numbers or as numeric strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum CentsField {
    Number(i64),
    Text(String),
}

impl CentsField {
    fn into_cents<E: serde::de::Error>(self) -> Result<i64, E> {
        match self {
            CentsField::Number(n) => Ok(n),
            CentsField::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| E::custom(format!("amount must be an integer number of cents, got {s:?}"))),
        }
    }
}

fn cents<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    CentsField::deserialize(d)?.into_cents()
}

fn optional_cents<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    Option::<CentsField>::deserialize(d)?
        .map(CentsField::into_cents)
        .transpose()
}

fn existing_customer(customer: &Customer) -> serde_json::Value {
    json!({
        "customer_id": customer.id,
        "customer_email": customer.email,
        "customer_name": customer.name,
    })
}

pub async fn get_config(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "key": state.stripe.publishable_key() }))
}

// POST /lessons
#[instrument(skip(state, req), fields(email = %req.email))]
pub async fn create_lesson_signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> Result<Response, ApiError> {
    let rest = state.stripe.rest();

    if let Some(customer) = rest.find_customer_by_email(&req.email).await? {
        info!(customer_id = %customer.id, "sign-up for existing customer rejected");
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "Customer already exists",
                "existing_customer": existing_customer(&customer),
            })),
        )
            .into_response());
    }

    let metadata = HashMap::from([("first_lesson".to_string(), req.first_lesson)]);
    let customer = rest.create_customer(&req.name, &req.email, &metadata).await?;
    let setup_intent = rest.create_setup_intent(&customer.id).await?;

    info!(customer_id = %customer.id, "created lesson customer");
    Ok(Json(json!({
        "customer_id": customer.id,
        "client_secret": setup_intent.client_secret,
    }))
    .into_response())
}

// GET /payment-method?pm=
pub async fn get_payment_method(
    State(state): State<AppState>,
    Query(query): Query<PmQuery>,
) -> Result<Response, ApiError> {
    let pm = state.stripe.rest().retrieve_payment_method(&query.pm).await?;
    Ok(Json(json!({ "last4": pm.card.map(|c| c.last4) })).into_response())
}

// GET /customer?pm=<customer id>
pub async fn get_customer_card(
    State(state): State<AppState>,
    Query(query): Query<PmQuery>,
) -> Result<Response, ApiError> {
    let Some(pm) = state.stripe.rest().latest_payment_method(&query.pm).await? else {
        return Ok((StatusCode::BAD_REQUEST, Json(json!({}))).into_response());
    };
    let card = pm.card.as_ref();
    Ok(Json(json!({
        "customer": {
            "name": pm.billing_details.name,
            "email": pm.billing_details.email,
        },
        "card": {
            "exp_month": card.and_then(|c| c.exp_month),
            "exp_year": card.and_then(|c| c.exp_year),
            "last4": card.map(|c| c.last4.clone()),
        }
    }))
    .into_response())
}

// POST /schedule-lesson
// Authorizes (does not capture) a lesson payment against the latest card.
#[instrument(skip(state, headers, req), fields(customer_id = %req.customer_id, amount = req.amount))]
pub async fn schedule_lesson(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ScheduleLessonRequest>,
) -> Result<Response, ApiError> {
    let rest = state.stripe.rest();
    let Some(pm) = rest.latest_payment_method(&req.customer_id).await? else {
        return Err(ApiError::BadRequest {
            code: "no_payment_method",
            message: format!("no payment methods found for {}", req.customer_id),
        });
    };

    let request = CreatePaymentIntentRequest {
        amount: req.amount,
        currency: LESSON_CURRENCY.to_string(),
        customer: Some(req.customer_id),
        payment_method: Some(pm.id),
        description: Some(req.description),
        capture_method: Some("manual".to_string()),
        confirm: Some(true),
        metadata: Some(HashMap::from([("type".to_string(), "lessons-payment".to_string())])),
        automatic_payment_methods_enabled: Some(true),
        automatic_payment_methods_allow_redirects: Some("never".to_string()),
    };
    let intent = rest
        .create_payment_intent(&request, idempotency_key(&headers).as_deref())
        .await?;

    info!(payment_intent_id = %intent.id, status = %intent.status, "lesson payment authorized");
    Ok(Json(json!({ "payment": intent })).into_response())
}

// POST /complete-lesson-payment
#[instrument(skip(state, headers, req), fields(payment_intent_id = %req.payment_intent_id))]
pub async fn complete_lesson_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<PaymentIntentAmountRequest>,
) -> Result<Response, ApiError> {
    let intent = state
        .stripe
        .rest()
        .capture_payment_intent(&req.payment_intent_id, req.amount, idempotency_key(&headers).as_deref())
        .await?;
    Ok(Json(json!({ "payment": intent })).into_response())
}

// POST /refund-lesson
#[instrument(skip(state, headers, req), fields(payment_intent_id = %req.payment_intent_id))]
pub async fn refund_lesson(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<PaymentIntentAmountRequest>,
) -> Result<Response, ApiError> {
    let request = CreateRefundRequest {
        payment_intent: req.payment_intent_id,
        amount: req.amount,
        reason: Some(REFUND_REASON.to_string()),
    };
    let refund = state
        .stripe
        .rest()
        .create_refund(&request, idempotency_key(&headers).as_deref())
        .await?;
    Ok(Json(json!({ "refund": refund.id })).into_response())
}

// POST /remove_payment_method/{customer_id}
pub async fn remove_payment_method(
    State(state): State<AppState>,
    Path(customer_id): Path<String>,
) -> Result<Response, ApiError> {
    let rest = state.stripe.rest();
    let Some(pm) = rest.latest_payment_method(&customer_id).await? else {
        return Ok((StatusCode::BAD_REQUEST, Json(json!({}))).into_response());
    };
    rest.detach_payment_method(&pm.id).await?;
    info!(customer_id = %customer_id, payment_method_id = %pm.id, "detached payment method");
    Ok(Json(json!({})).into_response())
}

// POST /account-update/{customer_id}
#[instrument(skip(state, req), fields(customer_id = %customer_id))]
pub async fn update_account(
    State(state): State<AppState>,
    Path(customer_id): Path<String>,
    Json(req): Json<AccountUpdateRequest>,
) -> Result<Response, ApiError> {
    let rest = state.stripe.rest();

    if let Some(other) = rest.find_customer_by_email(&req.email).await? {
        if other.id != customer_id {
            return Ok((
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": "Customer email already exists!",
                    "existing_customer": existing_customer(&other),
                })),
            )
                .into_response());
        }
    }

    let updated = rest.update_customer(&customer_id, &req.name, &req.email).await?;
    let setup_intent = rest.create_setup_intent(&customer_id).await?;
    Ok(Json(json!({
        "id": updated.id,
        "client_secret": setup_intent.client_secret,
    }))
    .into_response())
}

// POST /delete-account/{customer_id}
// Refuses while any of the customer's payments is still authorized but uncaptured.
#[instrument(skip(state), fields(customer_id = %customer_id))]
pub async fn delete_account(
    State(state): State<AppState>,
    Path(customer_id): Path<String>,
) -> Result<Response, ApiError> {
    let rest = state.stripe.rest();
    let source = PaymentIntentSource::new(rest, state.stripe.list_page_size()).for_customer(customer_id.clone());
    let mut walker: CollectionWalker<'_, _, PaymentIntent> = CollectionWalker::unbounded(&source);

    let mut uncaptured = Vec::new();
    while let Some(intent) = walker.next().await? {
        if intent.amount_capturable > 0 {
            uncaptured.push(intent.id);
        }
    }
    if !uncaptured.is_empty() {
        info!(count = uncaptured.len(), "customer has uncaptured payments; not deleting");
        return Ok((StatusCode::BAD_REQUEST, Json(json!({ "uncaptured_payments": uncaptured }))).into_response());
    }

    let deleted = rest.delete_customer(&customer_id).await?;
    info!(deleted = deleted.deleted, "deleted customer");
    Ok(Json(json!({ "deleted": deleted.deleted })).into_response())
}
