//! Application entry point.

use std::env;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use secrecy::SecretString;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use lending_ledger::api::{WebhookVerifier, create_router};
use lending_ledger::app::AppState;
use lending_ledger::domain::{CacheInvalidator, PaymentGateway, PaymentProvider};
use lending_ledger::infra::{
    FlutterwaveClient, NoopCacheInvalidator, PaystackClient, PostgresConfig, PostgresStore,
};

/// Application configuration
struct Config {
    database_url: String,
    host: String,
    port: u16,
    /// Gateway used for outbound calls (disbursements, checkout sessions).
    /// Webhooks from both providers are always accepted.
    payment_provider: PaymentProvider,
    paystack_secret_key: Option<SecretString>,
    flutterwave_secret_key: Option<SecretString>,
    /// Override gateway base URLs (used in tests against a local stub)
    paystack_api_url: Option<String>,
    flutterwave_api_url: Option<String>,
    /// Accept unsigned webhook deliveries when no secret is configured.
    /// Development convenience only; defaults to off.
    webhook_allow_unsigned: bool,
    /// Mark loans DISBURSED from the synchronous transfer response instead
    /// of waiting for the webhook confirmation.
    optimistic_disbursement: bool,
}

impl Config {
    fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL not set")?;
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let payment_provider = match env::var("PAYMENT_PROVIDER") {
            Ok(value) => PaymentProvider::from_str(&value)
                .map_err(|e| anyhow::anyhow!("Invalid PAYMENT_PROVIDER: {e}"))?,
            Err(_) => PaymentProvider::Paystack,
        };

        let paystack_secret_key = env::var("PAYSTACK_SECRET_KEY")
            .ok()
            .filter(|s| !s.is_empty())
            .map(SecretString::from);
        let flutterwave_secret_key = env::var("FLUTTERWAVE_SECRET_KEY")
            .ok()
            .filter(|s| !s.is_empty())
            .map(SecretString::from);

        let paystack_api_url = env::var("PAYSTACK_API_URL").ok().filter(|u| !u.is_empty());
        let flutterwave_api_url = env::var("FLUTTERWAVE_API_URL")
            .ok()
            .filter(|u| !u.is_empty());

        let webhook_allow_unsigned = env::var("WEBHOOK_ALLOW_UNSIGNED")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let optimistic_disbursement = env::var("OPTIMISTIC_DISBURSEMENT")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(true);

        Ok(Self {
            database_url,
            host,
            port,
            payment_provider,
            paystack_secret_key,
            flutterwave_secret_key,
            paystack_api_url,
            flutterwave_api_url,
            webhook_allow_unsigned,
            optimistic_disbursement,
        })
    }

    fn gateway_secret(&self) -> Result<SecretString> {
        let (secret, var) = match self.payment_provider {
            PaymentProvider::Paystack => (&self.paystack_secret_key, "PAYSTACK_SECRET_KEY"),
            PaymentProvider::Flutterwave => {
                (&self.flutterwave_secret_key, "FLUTTERWAVE_SECRET_KEY")
            }
        };
        secret.clone().ok_or_else(|| {
            anyhow::anyhow!(
                "{var} is not set but PAYMENT_PROVIDER is {}",
                self.payment_provider
            )
        })
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug,sqlx=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing();

    info!("🏦 Lending Ledger v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;

    info!("📦 Initializing infrastructure...");

    let store = PostgresStore::new(&config.database_url, PostgresConfig::default()).await?;
    store.run_migrations().await?;
    info!("   ✓ Database connected and migrations applied");

    let store = Arc::new(store);
    let loans = Arc::clone(&store) as Arc<dyn lending_ledger::domain::LoanRepository>;
    let repayments = Arc::clone(&store) as Arc<dyn lending_ledger::domain::RepaymentRepository>;

    let gateway: Arc<dyn PaymentGateway> = match config.payment_provider {
        PaymentProvider::Paystack => Arc::new(PaystackClient::new(
            config.gateway_secret()?,
            config.paystack_api_url.clone(),
        )),
        PaymentProvider::Flutterwave => Arc::new(FlutterwaveClient::new(
            config.gateway_secret()?,
            config.flutterwave_api_url.clone(),
        )),
    };
    info!(
        "   ✓ Payment gateway client created ({})",
        config.payment_provider
    );

    let cache: Arc<dyn CacheInvalidator> = Arc::new(NoopCacheInvalidator);

    let verifier = Arc::new(WebhookVerifier::new(
        config.paystack_secret_key.clone(),
        config.flutterwave_secret_key.clone(),
        config.webhook_allow_unsigned,
    ));
    if config.paystack_secret_key.is_some() {
        info!("   ✓ Paystack webhook signature verification enabled");
    } else if config.webhook_allow_unsigned {
        warn!("   ⚠ Paystack webhook secret not configured (unsigned deliveries accepted)");
    } else {
        info!("   ○ Paystack webhook secret not configured (deliveries rejected)");
    }
    if config.flutterwave_secret_key.is_some() {
        info!("   ✓ Flutterwave webhook signature verification enabled");
    } else if config.webhook_allow_unsigned {
        warn!("   ⚠ Flutterwave webhook secret not configured (unsigned deliveries accepted)");
    } else {
        info!("   ○ Flutterwave webhook secret not configured (deliveries rejected)");
    }

    if config.optimistic_disbursement {
        info!("   ✓ Optimistic disbursement enabled (sync transfer response marks DISBURSED)");
    } else {
        info!("   ○ Optimistic disbursement disabled (webhook confirmation required)");
    }

    let app_state = Arc::new(AppState::new(
        loans,
        repayments,
        gateway,
        cache,
        verifier,
        config.optimistic_disbursement,
    ));

    let router = create_router(app_state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("🚀 Server starting on http://{}", addr);
    info!("📖 Swagger UI available at http://{}/swagger-ui", addr);
    info!("📄 OpenAPI spec at http://{}/api-docs/openapi.json", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}
