// Stripe REST client
// Form-encoded requests, bearer auth, idempotency header propagation and
// jittered retries for transient failures.

use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::future::Future;
use rand::{Rng, SeedableRng};
use rand::rngs::SmallRng;
use tracing::{instrument, info, warn};

use crate::stripe::errors::{StripeApiError, StripeErrorEnvelope, StripeErrorType, is_transient};
use crate::stripe::types::{
    ensure_usd_cents,
    BalanceTransaction, CreatePaymentIntentRequest, CreateRefundRequest, Customer,
    DeletedCustomer, List, PaymentIntent, PaymentMethod, Refund, SetupIntent,
};

pub const STRIPE_API_BASE: &str = "https://api.stripe.com";

type Params = Vec<(String, String)>;

#[derive(Clone)]
pub struct StripeRestClient {
    pub(crate) http: Client,
    pub(crate) api_key: String,
    pub(crate) api_base: String,
    pub(crate) account_id: Option<String>,
    pub(crate) stripe_version: Option<String>,
    pub(crate) max_retries: u32,
    pub(crate) base_delay_ms: u64,
    pub(crate) max_delay_ms: u64,
}

impl StripeRestClient {
    pub fn new(http: Client, api_key: String) -> Self {
        Self {
            http,
            api_key,
            api_base: STRIPE_API_BASE.to_string(),
            account_id: None,
            stripe_version: None,
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 2_000,
        }
    }

    pub fn with_base_url(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_account(mut self, acct: impl Into<Option<String>>) -> Self {
        self.account_id = acct.into();
        self
    }

    pub fn with_version(mut self, ver: impl Into<Option<String>>) -> Self {
        self.stripe_version = ver.into();
        self
    }

    pub fn with_retry(mut self, max_retries: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.base_delay_ms = base_delay_ms.max(1);
        self.max_delay_ms = if max_delay_ms == 0 { self.base_delay_ms } else { max_delay_ms };
        if self.max_delay_ms < self.base_delay_ms {
            self.max_delay_ms = self.base_delay_ms;
        }
        self
    }

    fn apply_common_headers(&self, req: reqwest::RequestBuilder, idempotency_key: Option<&str>) -> reqwest::RequestBuilder {
        let mut req = req.bearer_auth(&self.api_key);
        if let Some(k) = idempotency_key {
            req = req.header("Idempotency-Key", k);
        }
        if let Some(v) = &self.stripe_version {
            if !v.is_empty() {
                req = req.header("Stripe-Version", v);
            }
        }
        if let Some(acct) = &self.account_id {
            if !acct.is_empty() {
                req = req.header("Stripe-Account", acct);
            }
        }
        req
    }

    fn map_error(status: StatusCode, body: &str) -> StripeApiError {
        if let Ok(env) = serde_json::from_str::<StripeErrorEnvelope>(body) {
            env.to_api_error_with_status(Some(status.as_u16()))
        } else if status.is_server_error() {
            StripeApiError::Transient(format!("status={} body={}", status.as_u16(), body))
        } else {
            // No envelope (proxy or gateway answer). `Http` stays reserved for transport failures.
            let type_ = if status == StatusCode::TOO_MANY_REQUESTS {
                StripeErrorType::RateLimitError
            } else {
                StripeErrorType::Unknown
            };
            StripeApiError::Stripe {
                type_,
                message: Some(format!("status={} body={}", status.as_u16(), body)),
                code: None,
                decline_code: None,
                param: None,
                status: Some(status.as_u16()),
            }
        }
    }

    async fn with_retries<F, Fut, T>(
        &self,
        desc: &str,
        max_retries: u32,
        base_delay_ms: u64,
        max_delay_ms: u64,
        mut op: F,
    ) -> Result<T, StripeApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StripeApiError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    let (http_status, err_type) = match &e {
                        StripeApiError::Stripe { status, type_, .. } => (*status, Some(type_)),
                        StripeApiError::Http(_) => (Some(503), None),
                        StripeApiError::Transient(_) => (Some(503), None),
                        _ => (None, None),
                    };
                    let retryable = is_transient(http_status, err_type);
                    if !retryable || attempt >= max_retries {
                        return Err(e);
                    }

                    // Exponential backoff with full jitter
                    let exp = base_delay_ms.saturating_mul(1u64 << attempt.min(20));
                    let cap = exp.min(max_delay_ms.max(base_delay_ms));
                    let mut rng = SmallRng::from_entropy();
                    let delay_ms = if cap > base_delay_ms {
                        rng.gen_range(base_delay_ms..=cap)
                    } else {
                        base_delay_ms
                    };

                    warn!(
                        target: "stripe",
                        desc = %desc,
                        attempt = attempt + 1,
                        max_retries = max_retries,
                        http_status = ?http_status,
                        error_type = ?err_type,
                        next_delay_ms = delay_ms,
                        "retrying transient Stripe error"
                    );

                    tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Issue one request and decode the JSON body into `T`.
    ///
    /// Reads always retry. Writes only retry when an idempotency key is
    /// attached, so a replayed POST can never create a second object.
    async fn send<T: DeserializeOwned>(
        &self,
        desc: &str,
        method: Method,
        path: &str,
        query: &[(String, String)],
        form: Option<&[(String, String)]>,
        idempotency_key: Option<&str>,
    ) -> Result<T, StripeApiError> {
        let max_retries = if method == Method::GET || idempotency_key.is_some() {
            self.max_retries
        } else {
            0
        };
        let url = format!("{}{}", self.api_base, path);

        info!(
            target: "stripe",
            method = %method,
            path = %path,
            idempotency_key = idempotency_key.unwrap_or(""),
            "stripe request"
        );

        let req_builder = || {
            let mut req = self.http.request(method.clone(), url.as_str());
            if !query.is_empty() {
                req = req.query(query);
            }
            if let Some(form) = form {
                req = req.form(form);
            }
            let req = self.apply_common_headers(req, idempotency_key);
            async move {
                let resp = req.send().await.map_err(|e| StripeApiError::Http(e.to_string()))?;
                let status = resp.status();
                let text = resp.text().await.map_err(|e| StripeApiError::Decode(e.to_string()))?;
                if status.is_success() {
                    serde_json::from_str::<T>(&text).map_err(|e| StripeApiError::Decode(e.to_string()))
                } else {
                    Err(Self::map_error(status, &text))
                }
            }
        };
        self.with_retries(desc, max_retries, self.base_delay_ms, self.max_delay_ms, req_builder)
            .await
    }

    // GET /v1/balance_transactions
    // Newest first; `starting_after` is the id of the last entry already seen.
    #[instrument(skip(self), fields(method="GET", path="/v1/balance_transactions"))]
    pub async fn list_balance_transactions(
        &self,
        limit: u32,
        starting_after: Option<&str>,
    ) -> Result<List<BalanceTransaction>, StripeApiError> {
        let query = page_query(limit, starting_after, &[]);
        self.send("list_balance_transactions", Method::GET, "/v1/balance_transactions", &query, None, None)
            .await
    }

    // GET /v1/payment_intents
    #[instrument(skip(self), fields(method="GET", path="/v1/payment_intents"))]
    pub async fn list_payment_intents(
        &self,
        customer: Option<&str>,
        limit: u32,
        starting_after: Option<&str>,
    ) -> Result<List<PaymentIntent>, StripeApiError> {
        let extra: Vec<(&str, &str)> = customer.map(|c| vec![("customer", c)]).unwrap_or_default();
        let query = page_query(limit, starting_after, &extra);
        self.send("list_payment_intents", Method::GET, "/v1/payment_intents", &query, None, None)
            .await
    }

    // GET /v1/customers/{id}/payment_methods
    #[instrument(skip(self), fields(method="GET", path="/v1/customers/{id}/payment_methods", customer_id=%customer_id))]
    pub async fn list_customer_payment_methods(
        &self,
        customer_id: &str,
        limit: u32,
    ) -> Result<List<PaymentMethod>, StripeApiError> {
        let path = format!("/v1/customers/{}/payment_methods", customer_id);
        let query = page_query(limit, None, &[]);
        self.send("list_customer_payment_methods", Method::GET, &path, &query, None, None)
            .await
    }

    /// Most recently attached payment method of a customer, if any.
    pub async fn latest_payment_method(&self, customer_id: &str) -> Result<Option<PaymentMethod>, StripeApiError> {
        let mut list = self.list_customer_payment_methods(customer_id, 1).await?;
        Ok(if list.data.is_empty() { None } else { Some(list.data.swap_remove(0)) })
    }

    // GET /v1/customers?email=
    #[instrument(skip(self, email), fields(method="GET", path="/v1/customers"))]
    pub async fn find_customer_by_email(&self, email: &str) -> Result<Option<Customer>, StripeApiError> {
        let query = page_query(1, None, &[("email", email)]);
        let mut list: List<Customer> = self
            .send("find_customer_by_email", Method::GET, "/v1/customers", &query, None, None)
            .await?;
        Ok(if list.data.is_empty() { None } else { Some(list.data.swap_remove(0)) })
    }

    // POST /v1/customers
    #[instrument(skip(self, name, email, metadata), fields(method="POST", path="/v1/customers"))]
    pub async fn create_customer(
        &self,
        name: &str,
        email: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<Customer, StripeApiError> {
        let mut form: Params = vec![
            ("name".into(), name.to_string()),
            ("email".into(), email.to_string()),
        ];
        for (k, v) in metadata {
            form.push((format!("metadata[{}]", k), v.clone()));
        }
        self.send("create_customer", Method::POST, "/v1/customers", &[], Some(form.as_slice()), None)
            .await
    }

    // POST /v1/customers/{id}
    #[instrument(skip(self, name, email), fields(method="POST", path="/v1/customers/{id}", customer_id=%customer_id))]
    pub async fn update_customer(&self, customer_id: &str, name: &str, email: &str) -> Result<Customer, StripeApiError> {
        let path = format!("/v1/customers/{}", customer_id);
        let form: Params = vec![
            ("name".into(), name.to_string()),
            ("email".into(), email.to_string()),
        ];
        self.send("update_customer", Method::POST, &path, &[], Some(form.as_slice()), None).await
    }

    // DELETE /v1/customers/{id}
    #[instrument(skip(self), fields(method="DELETE", path="/v1/customers/{id}", customer_id=%customer_id))]
    pub async fn delete_customer(&self, customer_id: &str) -> Result<DeletedCustomer, StripeApiError> {
        let path = format!("/v1/customers/{}", customer_id);
        self.send("delete_customer", Method::DELETE, &path, &[], None, None).await
    }

    // POST /v1/setup_intents (card only)
    #[instrument(skip(self), fields(method="POST", path="/v1/setup_intents", customer_id=%customer_id))]
    pub async fn create_setup_intent(&self, customer_id: &str) -> Result<SetupIntent, StripeApiError> {
        let form: Params = vec![
            ("customer".into(), customer_id.to_string()),
            ("payment_method_types[]".into(), "card".to_string()),
        ];
        self.send("create_setup_intent", Method::POST, "/v1/setup_intents", &[], Some(form.as_slice()), None)
            .await
    }

    // GET /v1/payment_methods/{id}
    #[instrument(skip(self), fields(method="GET", path="/v1/payment_methods/{id}", payment_method_id=%payment_method_id))]
    pub async fn retrieve_payment_method(&self, payment_method_id: &str) -> Result<PaymentMethod, StripeApiError> {
        let path = format!("/v1/payment_methods/{}", payment_method_id);
        self.send("retrieve_payment_method", Method::GET, &path, &[], None, None).await
    }

    // POST /v1/payment_methods/{id}/detach
    #[instrument(skip(self), fields(method="POST", path="/v1/payment_methods/{id}/detach", payment_method_id=%payment_method_id))]
    pub async fn detach_payment_method(&self, payment_method_id: &str) -> Result<PaymentMethod, StripeApiError> {
        let path = format!("/v1/payment_methods/{}/detach", payment_method_id);
        self.send("detach_payment_method", Method::POST, &path, &[], Some(&[][..]), None).await
    }

    // POST /v1/payment_intents
    // Enforce USD & cents
    #[instrument(skip(self, request), fields(method="POST", path="/v1/payment_intents", idempotency_key=?idempotency_key))]
    pub async fn create_payment_intent(
        &self,
        request: &CreatePaymentIntentRequest,
        idempotency_key: Option<&str>,
    ) -> Result<PaymentIntent, StripeApiError> {
        ensure_usd_cents(request.amount, &request.currency)
            .map_err(|_| StripeApiError::Precondition("USD currency and non-negative cents required"))?;

        info!(
            target: "stripe",
            amount_cents = request.amount,
            currency = %request.currency,
            customer = request.customer.as_deref().unwrap_or(""),
            "creating payment intent"
        );

        let form = request.to_form();
        self.send("create_payment_intent", Method::POST, "/v1/payment_intents", &[], Some(form.as_slice()), idempotency_key)
            .await
    }

    // POST /v1/payment_intents/{id}/capture
    #[instrument(skip(self), fields(method="POST", path="/v1/payment_intents/{id}/capture", intent_id=%intent_id))]
    pub async fn capture_payment_intent(
        &self,
        intent_id: &str,
        amount_to_capture: Option<i64>,
        idempotency_key: Option<&str>,
    ) -> Result<PaymentIntent, StripeApiError> {
        let path = format!("/v1/payment_intents/{}/capture", intent_id);
        let mut form: Params = Vec::new();
        if let Some(amount) = amount_to_capture {
            if amount < 0 {
                return Err(StripeApiError::Precondition("capture amount must be non-negative cents"));
            }
            form.push(("amount_to_capture".into(), amount.to_string()));
        }
        self.send("capture_payment_intent", Method::POST, &path, &[], Some(form.as_slice()), idempotency_key)
            .await
    }

    // POST /v1/refunds
    #[instrument(skip(self, request), fields(method="POST", path="/v1/refunds", payment_intent=%request.payment_intent))]
    pub async fn create_refund(
        &self,
        request: &CreateRefundRequest,
        idempotency_key: Option<&str>,
    ) -> Result<Refund, StripeApiError> {
        let mut form: Params = vec![("payment_intent".into(), request.payment_intent.clone())];
        if let Some(amount) = request.amount {
            if amount < 0 {
                return Err(StripeApiError::Precondition("refund amount must be non-negative cents"));
            }
            form.push(("amount".into(), amount.to_string()));
        }
        if let Some(reason) = &request.reason {
            form.push(("reason".into(), reason.clone()));
        }
        self.send("create_refund", Method::POST, "/v1/refunds", &[], Some(form.as_slice()), idempotency_key)
            .await
    }
}

fn page_query(limit: u32, starting_after: Option<&str>, extra: &[(&str, &str)]) -> Params {
    let mut query: Params = vec![("limit".into(), limit.clamp(1, 100).to_string())];
    if let Some(cursor) = starting_after {
        query.push(("starting_after".into(), cursor.to_string()));
    }
    for (k, v) in extra {
        query.push((k.to_string(), v.to_string()));
    }
    query
}
