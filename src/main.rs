mod reconcile;
mod server;
mod settings;
mod stripe;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    // Load configuration from .env, config.toml and environment
    let cfg = settings::Config::load();

    // Validate Stripe configuration
    if cfg.stripe.api_key.is_empty() {
        tracing::error!("STRIPE_SECRET_KEY not set; exiting");
        return Ok(());
    }
    if cfg.reports.window.is_zero() {
        tracing::error!("REPORT_WINDOW must be greater than zero; exiting");
        return Ok(());
    }
    tracing::info!(
        window = %humantime::format_duration(cfg.reports.window),
        page_size = cfg.stripe.list_page_size,
        "Starting Stripe lessons service"
    );

    let state = server::AppState::try_new(&cfg)?;
    server::run_server(&cfg, state).await
}
