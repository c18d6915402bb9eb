// Stripe-specific error types and their HTTP mappings

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StripeErrorType {
    ApiConnectionError,
    ApiError,
    AuthenticationError,
    CardError,
    IdempotencyError,
    InvalidRequestError,
    RateLimitError,
    ValidationError,
    Unknown,
}

impl From<&str> for StripeErrorType {
    fn from(s: &str) -> Self {
        match s {
            "api_connection_error" => StripeErrorType::ApiConnectionError,
            "api_error" => StripeErrorType::ApiError,
            "authentication_error" => StripeErrorType::AuthenticationError,
            "card_error" => StripeErrorType::CardError,
            "idempotency_error" => StripeErrorType::IdempotencyError,
            "invalid_request_error" => StripeErrorType::InvalidRequestError,
            "rate_limit_error" => StripeErrorType::RateLimitError,
            "validation_error" => StripeErrorType::ValidationError,
            _ => StripeErrorType::Unknown,
        }
    }
}

// Stripe REST error envelope: { error: { type, code, decline_code, message, param } }
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StripeErrorEnvelope {
    pub error: StripeErrorDetails,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StripeErrorDetails {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decline_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,
}

impl StripeErrorEnvelope {
    pub fn to_api_error_with_status(self, status: Option<u16>) -> StripeApiError {
        StripeApiError::Stripe {
            type_: StripeErrorType::from(self.error.type_.as_str()),
            message: self.error.message,
            code: self.error.code,
            decline_code: self.error.decline_code,
            param: self.error.param,
            status,
        }
    }
}

#[derive(Debug, Error)]
pub enum StripeApiError {
    #[error("http error: {0}")]
    Http(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("stripe error: {type_:?} message={message:?} code={code:?} param={param:?}")]
    Stripe {
        type_: StripeErrorType,
        message: Option<String>,
        code: Option<String>,
        decline_code: Option<String>,
        param: Option<String>,
        status: Option<u16>,
    },
    #[error("precondition failed: {0}")]
    Precondition(&'static str),
    #[error("transient error: {0}")]
    Transient(String),
}

impl StripeApiError {
    /// Short machine-readable code surfaced to HTTP clients.
    pub fn code(&self) -> Option<&str> {
        match self {
            StripeApiError::Stripe { code, .. } => code.as_deref(),
            StripeApiError::Http(_) => Some("stripe_unreachable"),
            StripeApiError::Decode(_) => Some("stripe_decode"),
            StripeApiError::Precondition(_) => Some("precondition_failed"),
            StripeApiError::Transient(_) => Some("stripe_transient"),
        }
    }

    /// Human readable message, preferring the one Stripe supplied.
    pub fn user_message(&self) -> String {
        match self {
            StripeApiError::Stripe { message: Some(m), .. } => m.clone(),
            StripeApiError::Precondition(msg) => msg.to_string(),
            other => other.to_string(),
        }
    }
}

// Centralized mapper from StripeApiError -> HTTP status.
// Errors Stripe attributes to the request (4xx envelopes, preconditions) are the
// caller's problem and become 400; anything else is an upstream failure.
pub fn to_http_status(e: &StripeApiError) -> StatusCode {
    match e {
        StripeApiError::Http(_) | StripeApiError::Transient(_) => StatusCode::BAD_GATEWAY,
        StripeApiError::Decode(_) => StatusCode::BAD_GATEWAY,
        StripeApiError::Stripe { type_, status, .. } => match type_ {
            StripeErrorType::CardError
            | StripeErrorType::InvalidRequestError
            | StripeErrorType::IdempotencyError
            | StripeErrorType::ValidationError => StatusCode::BAD_REQUEST,
            StripeErrorType::RateLimitError => StatusCode::TOO_MANY_REQUESTS,
            StripeErrorType::AuthenticationError => StatusCode::BAD_GATEWAY,
            StripeErrorType::ApiConnectionError | StripeErrorType::ApiError => {
                StatusCode::BAD_GATEWAY
            }
            StripeErrorType::Unknown => match status {
                Some(s) if (400..500).contains(s) => StatusCode::BAD_REQUEST,
                _ => StatusCode::BAD_GATEWAY,
            },
        },
        StripeApiError::Precondition(_) => StatusCode::BAD_REQUEST,
    }
}

// Helper indicating whether an error is likely transient (api_error or 5xx)
pub fn is_transient(http_status: Option<u16>, type_: Option<&StripeErrorType>) -> bool {
    if let Some(s) = http_status {
        if (500..600).contains(&s) {
            return true;
        }
    }
    if let Some(t) = type_ {
        matches!(
            t,
            StripeErrorType::ApiConnectionError
                | StripeErrorType::ApiError
                | StripeErrorType::RateLimitError
        )
    } else {
        false
    }
}
