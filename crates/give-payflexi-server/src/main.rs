//! give-payflexi HTTP Server
//!
//! Axum-based server hosting the PayFlexi donation checkout: form
//! submission, the donor return URL and the signed webhook.

mod handlers;
mod state;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use give_payflexi::{
    GatewayDescriptor, MemoryDonationStore, PayflexiClient, PayflexiConfig, ReconciliationEngine,
    RedirectDispatcher, WebhookListener,
};

use crate::handlers::{
    create_donation, health_check, list_gateways, payflexi_callback, payflexi_webhook,
};
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    let config = PayflexiConfig::from_env()?;
    tracing::info!(?config, "Loaded PayFlexi settings");

    let state = build_state(config)?;
    let app = app(state);

    // Start server
    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("🚀 give-payflexi server running on http://{}", addr);
    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("");
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health                    - Health check");
    tracing::info!("  GET  /api/gateways              - Payment methods");
    tracing::info!("  POST /api/donations             - Start PayFlexi checkout");
    tracing::info!("  GET  /?payflexi-give-api=verify - Donor return URL");
    tracing::info!("  POST /webhook/payflexi          - PayFlexi webhook");
    tracing::info!("");

    axum::serve(listener, app).await?;

    Ok(())
}

/// Wire the engine and webhook listener. Missing keys leave payments disabled.
fn build_state(config: PayflexiConfig) -> anyhow::Result<AppState> {
    let redirects = Arc::new(RedirectDispatcher::new(&config)?);
    let descriptor = Arc::new(GatewayDescriptor::from_config(&config));

    let (engine, webhooks) = match PayflexiClient::new(&config) {
        Ok(client) => {
            tracing::info!("✓ PayFlexi configured ({} mode)", config.mode);
            let secret_key = client.credentials().secret_key().to_string();
            let engine = Arc::new(ReconciliationEngine::new(
                Arc::new(MemoryDonationStore::new()),
                Arc::new(client),
                &config,
            ));
            let webhooks = Arc::new(WebhookListener::new(Arc::clone(&engine), secret_key));
            (Some(engine), Some(webhooks))
        }
        Err(e) => {
            tracing::warn!("⚠ PayFlexi not configured - donations disabled: {}", e);
            tracing::warn!(
                "  Set PAYFLEXI_{}_PUBLIC_KEY and PAYFLEXI_{}_SECRET_KEY in .env",
                config.mode.as_str().to_uppercase(),
                config.mode.as_str().to_uppercase(),
            );
            (None, None)
        }
    };

    Ok(AppState {
        config: Arc::new(config),
        engine,
        webhooks,
        redirects,
        descriptor,
    })
}

fn app(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health & info
        .route("/health", get(health_check))
        .route("/api/gateways", get(list_gateways))
        // Checkout
        .route("/api/donations", post(create_donation))
        .route("/", get(payflexi_callback))
        // Webhooks
        .route("/webhook/payflexi", post(payflexi_webhook))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
