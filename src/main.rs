//! Peptide storefront checkout service

use anyhow::Result;
use chrono::Utc;
use peptide_checkout::{
    api::{self, AppState},
    checkout::CheckoutService,
    config::Config,
    events::EventPublisher,
    payment::HttpPaymentGateway,
    store::{PgStore, Store},
    webhook::WebhookHandler,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())).with(tracing_subscriber::fmt::layer()).init();

    let config = Config::from_env()?;
    let db = PgPoolOptions::new().max_connections(config.max_connections).connect(&config.database_url).await?;
    sqlx::migrate!("./migrations").run(&db).await?;

    let nats = match &config.nats_url {
        Some(url) => match async_nats::connect(url.as_str()).await {
            Ok(client) => Some(client),
            Err(e) => { tracing::warn!(error = %e, "NATS unavailable, domain events will not be published"); None }
        },
        None => None,
    };
    let publisher = EventPublisher::new(nats);

    let store: Arc<dyn Store> = Arc::new(PgStore::new(db));
    let gateway = Arc::new(HttpPaymentGateway::new(&config.payment));
    let checkout = Arc::new(CheckoutService::new(store.clone(), gateway, publisher.clone(), config.shipping.clone(), config.reservation_ttl));
    let webhooks = Arc::new(WebhookHandler::new(
        store.clone(), publisher.clone(), config.payment.webhook_secret.clone(),
        config.payment.webhook_tolerance_secs, config.webhook_stale_after,
    ));

    tokio::spawn(sweep_reservations(store.clone(), publisher, config.reservation_sweep_interval));

    let app = api::router(AppState { store, checkout, webhooks });
    tracing::info!("peptide-checkout listening on 0.0.0.0:{}", config.port);
    axum::serve(tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?, app).await?;
    Ok(())
}

/// Fails pending orders whose stock holds ran out before payment.
async fn sweep_reservations(store: Arc<dyn Store>, publisher: EventPublisher, every: std::time::Duration) {
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        match store.release_expired_reservations(Utc::now()).await {
            Ok(orders) if orders.is_empty() => {}
            Ok(orders) => {
                tracing::info!(count = orders.len(), "released expired reservations");
                for mut order in orders { publisher.publish_all(order.take_events()).await; }
            }
            Err(e) => tracing::error!(error = %e, "reservation sweep failed"),
        }
    }
}
