use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use turnstile_api::{app, worker, AppState};
use turnstile_api::middleware::JwtAuthenticator;
use turnstile_core::repository::TicketStore;
use turnstile_order::{PurchaseRules, SvgCodeEncoder};
use turnstile_store::app_config::{Config, StorageBackend};
use turnstile_store::{DbClient, MemoryStore, PgTicketStore, RedisClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "turnstile_api=debug,tower_http=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Turnstile API on port {}", config.server.port);

    // Storage
    let store: Arc<dyn TicketStore> = match config.storage.backend {
        StorageBackend::Postgres => {
            let db = DbClient::new(&config.database)
                .await
                .context("Failed to connect to Postgres")?;
            db.migrate().await.context("Failed to run migrations")?;
            Arc::new(PgTicketStore::new(db.pool.clone()))
        }
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; data is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    let encoder = Arc::new(SvgCodeEncoder::new(&config.codes.output_dir, &config.codes.public_prefix));
    let authenticator = Arc::new(JwtAuthenticator::new(&config.auth.jwt_secret));
    let rules = PurchaseRules {
        max_tickets_per_order: config.business_rules.max_tickets_per_order,
        timeout: std::time::Duration::from_millis(config.business_rules.purchase_timeout_ms),
        default_payment_method: config.business_rules.default_payment_method.clone(),
    };

    let mut app_state = AppState::new(store, encoder, authenticator, rules);

    // Redis Connection (optional)
    if let Some(url) = &config.redis.url {
        let redis = RedisClient::new(url).context("Invalid Redis URL")?;
        app_state = app_state.with_rate_limit(Arc::new(redis), config.redis.rate_limit_per_minute);
    }

    tokio::spawn(worker::start_code_regeneration_worker(
        app_state.dispatcher.clone(),
        std::time::Duration::from_secs(config.codes.regeneration_interval_seconds.max(1)),
        config.codes.batch_size,
    ));

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}
