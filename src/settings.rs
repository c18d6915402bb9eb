use figment::{
    providers::{Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::stripe::rest::STRIPE_API_BASE;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct StripeSettings {
    pub api_key: String,
    #[serde(default)]
    pub publishable_key: String,
    #[serde(default)]
    pub account_id: String,
    #[serde(default)]
    pub stripe_version: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_stripe_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    #[serde(default = "default_list_page_size")]
    pub list_page_size: u32,
}

impl Default for StripeSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            publishable_key: String::new(),
            account_id: String::new(),
            stripe_version: String::new(),
            api_base: default_api_base(),
            timeout_ms: default_stripe_timeout_ms(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            list_page_size: default_list_page_size(),
        }
    }
}

/// Knobs for the ledger totals and failed-payment reports.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ReportSettings {
    /// Trailing window both reports look back over.
    #[serde(default = "default_report_window", with = "humantime_serde")]
    pub window: Duration,
    /// Upper bound on concurrent per-customer payment method lookups.
    #[serde(default = "default_credential_lookup_concurrency")]
    pub credential_lookup_concurrency: usize,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            window: default_report_window(),
            credential_lookup_concurrency: default_credential_lookup_concurrency(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub stripe: StripeSettings,
    #[serde(default)]
    pub reports: ReportSettings,
    pub bind_address: String,
    pub server_port: u16,
    /// Allowed CORS origins; empty allows any origin.
    #[serde(default)]
    pub cors_allowed_origins: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            stripe: StripeSettings::default(),
            reports: ReportSettings::default(),
            bind_address: "0.0.0.0".to_string(),
            server_port: 4242,
            cors_allowed_origins: Vec::new(),
        }
    }
}

impl Config {
    /// Load from .env, config.toml (if present) and environment variables.
    /// Environment variables override file values.
    /// Supported env keys: STRIPE_SECRET_KEY (or STRIPE_API_KEY), STRIPE_PUBLISHABLE_KEY,
    /// STRIPE_ACCOUNT_ID, STRIPE_VERSION, STRIPE_API_BASE, STRIPE_TIMEOUT_MS,
    /// STRIPE_MAX_RETRIES, STRIPE_LIST_PAGE_SIZE, BIND_ADDRESS, SERVER_PORT,
    /// REPORT_WINDOW, CREDENTIAL_LOOKUP_CONCURRENCY, CORS_ALLOWED_ORIGINS
    pub fn load() -> Self {
        // 0) A local .env only seeds variables that are not already set
        dotenvy::dotenv().ok();

        // 1) Start with defaults + config.toml only if it exists
        let base: Config = Default::default();
        let mut fig = Figment::from(Serialized::defaults(base));
        if std::path::Path::new("config.toml").exists() {
            fig = fig.merge(Toml::file("config.toml"));
        }
        let mut cfg: Config = match fig.extract() {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::warn!(error = %e, "invalid config.toml; falling back to defaults");
                Config::default()
            }
        };

        // 2) Overlay environment variables explicitly
        cfg.apply_env(|key| std::env::var(key).ok());
        cfg
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("STRIPE_SECRET_KEY").or_else(|| var("STRIPE_API_KEY")) {
            self.stripe.api_key = v;
        }
        if let Some(v) = var("STRIPE_PUBLISHABLE_KEY") {
            self.stripe.publishable_key = v;
        }
        if let Some(v) = var("STRIPE_ACCOUNT_ID") {
            self.stripe.account_id = v;
        }
        if let Some(v) = var("STRIPE_VERSION") {
            self.stripe.stripe_version = v;
        }
        if let Some(v) = var("STRIPE_API_BASE") {
            self.stripe.api_base = v;
        }
        if let Some(v) = var("STRIPE_TIMEOUT_MS") {
            self.stripe.timeout_ms = v.parse().unwrap_or(self.stripe.timeout_ms);
        }
        if let Some(v) = var("STRIPE_MAX_RETRIES") {
            self.stripe.max_retries = v.parse().unwrap_or(self.stripe.max_retries);
        }
        if let Some(v) = var("STRIPE_LIST_PAGE_SIZE") {
            self.stripe.list_page_size = v.parse().unwrap_or(self.stripe.list_page_size);
        }
        if let Some(v) = var("BIND_ADDRESS") {
            self.bind_address = v;
        }
        if let Some(v) = var("SERVER_PORT") {
            self.server_port = v.parse().unwrap_or(self.server_port);
        }
        if let Some(v) = var("REPORT_WINDOW") {
            self.reports.window = parse_duration_env(&v, self.reports.window);
        }
        if let Some(v) = var("CREDENTIAL_LOOKUP_CONCURRENCY") {
            self.reports.credential_lookup_concurrency =
                v.parse().unwrap_or(self.reports.credential_lookup_concurrency);
        }
        if let Some(v) = var("CORS_ALLOWED_ORIGINS") {
            self.cors_allowed_origins = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
    }
}

fn parse_duration_env(value: &str, current: Duration) -> Duration {
    humantime::parse_duration(value).unwrap_or(current)
}

fn default_api_base() -> String {
    STRIPE_API_BASE.to_string()
}

fn default_stripe_timeout_ms() -> u64 {
    15_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    100
}

fn default_retry_max_delay_ms() -> u64 {
    2_000
}

fn default_list_page_size() -> u32 {
    100
}

fn default_report_window() -> Duration {
    Duration::from_secs(36 * 3600) // 36 hours
}

fn default_credential_lookup_concurrency() -> usize {
    crate::reconcile::correlator::DEFAULT_LOOKUP_CONCURRENCY
}
