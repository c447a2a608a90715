//! FreshMall - Self-hosted Storefront Backend

use std::sync::Arc;

use anyhow::Result;
use freshmall::api::{self, AppState};
use freshmall::payment::GatewayClient;
use freshmall::settings::Settings;
use freshmall::sms::SmsClient;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env()?;

    let db = PgPoolOptions::new().max_connections(10).connect(&settings.database_url).await?;
    sqlx::migrate!("./migrations").run(&db).await?;

    let nats = match &settings.nats_url {
        Some(url) => async_nats::connect(url).await.ok(),
        None => None,
    };

    let gateway = Arc::new(GatewayClient::from_pem_files(
        settings.payment.gateway_config(),
        &settings.payment.merchant_key_path,
        &settings.payment.gateway_key_path,
    )?);
    let sms = settings.sms.as_ref().map(|s| SmsClient::new(&s.api_key));

    let state = AppState { db, nats, gateway, sms, frontend_url: settings.frontend_url.clone() };
    let app = api::router(state);

    tracing::info!("🚀 freshmall listening on 0.0.0.0:{}", settings.port);
    axum::serve(tokio::net::TcpListener::bind(format!("0.0.0.0:{}", settings.port)).await?, app).await?;
    Ok(())
}
