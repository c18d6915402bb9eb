// Stripe provider module

pub mod rest;
pub mod types;
pub mod errors;

use reqwest::Client;
use crate::settings::StripeSettings;
use self::errors::StripeApiError;

#[derive(Clone)]
pub struct StripeProvider {
    pub(crate) cfg: StripeSettings,
    pub(crate) rest: self::rest::StripeRestClient,
}

impl StripeProvider {
    // Build reqwest client with rustls and timeout from cfg, store cfg clone.
    pub fn new(cfg: StripeSettings) -> Result<Self, StripeApiError> {
        let timeout = std::time::Duration::from_millis(if cfg.timeout_ms > 0 { cfg.timeout_ms } else { 15_000 });
        let http = Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .build()
            .map_err(|e| StripeApiError::Http(e.to_string()))?;

        let rest = self::rest::StripeRestClient::new(http, cfg.api_key.clone())
            .with_base_url(cfg.api_base.clone())
            .with_account(if cfg.account_id.is_empty() { None } else { Some(cfg.account_id.clone()) })
            .with_version(if cfg.stripe_version.is_empty() { None } else { Some(cfg.stripe_version.clone()) })
            .with_retry(cfg.max_retries, cfg.retry_base_delay_ms, cfg.retry_max_delay_ms);

        Ok(Self { cfg, rest })
    }

    pub fn rest(&self) -> &self::rest::StripeRestClient {
        &self.rest
    }

    pub fn publishable_key(&self) -> &str {
        &self.cfg.publishable_key
    }

    /// Page size used when walking list endpoints.
    pub fn list_page_size(&self) -> u32 {
        self.cfg.list_page_size.clamp(1, 100)
    }
}
