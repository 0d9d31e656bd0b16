use actix_web::{web, App, HttpServer};
use anyhow::Context;
use pothole_rewards_service::{
    clock::{Clock, SystemClock},
    config::Config,
    db::{
        self, CounterStore, LedgerStore, MemoryCounterStore, MemoryStore, PgStore,
        RedisCounterStore, ReportStore,
    },
    handlers::{self, AppState, Backends},
    services::{AirtimeClient, StubContentValidator},
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .with_level(true)
            .init();
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    tracing::info!("Starting Pothole Rewards Service...");

    // Load configuration
    let config = Config::from_env().context("failed to load configuration")?;
    tracing::info!(
        service = %config.service_name,
        environment = %config.environment,
        http_port = %config.http_port,
        "Configuration loaded"
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // Reports and ledger share one store
    let (reports, ledger): (Arc<dyn ReportStore>, Arc<dyn LedgerStore>) =
        match config.database_url.as_deref() {
            Some(url) => {
                let pool = db::postgres::create_pool(&config, url)
                    .await
                    .context("failed to create database pool")?;
                tracing::info!("Database pool initialized");

                let store = Arc::new(PgStore::new(Arc::new(pool)));
                tracing::info!("Running database migrations...");
                store.migrate().await.map_err(|e| {
                    tracing::error!("Migration failed: {}", e);
                    e
                })?;
                tracing::info!("Migrations completed successfully");
                (
                    store.clone() as Arc<dyn ReportStore>,
                    store as Arc<dyn LedgerStore>,
                )
            }
            None => {
                tracing::warn!("DATABASE_URL not set; using in-memory storage");
                let store = Arc::new(MemoryStore::new());
                (
                    store.clone() as Arc<dyn ReportStore>,
                    store as Arc<dyn LedgerStore>,
                )
            }
        };

    let counters: Arc<dyn CounterStore> = match config.redis_url.as_deref() {
        Some(url) => {
            let store = RedisCounterStore::connect(url)
                .await
                .context("failed to connect to Redis")?;
            tracing::info!("Redis rate-limit store connected");
            Arc::new(store)
        }
        None => {
            tracing::warn!("REDIS_URL not set; rate limits are per process");
            Arc::new(MemoryCounterStore::new(clock.clone()))
        }
    };

    if config.content.ai_bypass {
        tracing::warn!("AI_BYPASS enabled; every image is accepted as a pothole");
    }
    if config.payout.api_key.is_empty() {
        tracing::warn!("PAYOUT_API_KEY not set; airtime settlements will fail");
    }

    let state = AppState::new(
        &config,
        Backends {
            reports,
            ledger,
            counters,
            validator: Arc::new(StubContentValidator::new(config.content.ai_bypass)),
            payout: Arc::new(AirtimeClient::new(config.payout.clone())?),
            clock,
        },
    );

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    tracing::info!("Pothole Rewards Service listening on {}", bind_addr);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .app_data(web::JsonConfig::default().limit(10 * 1024 * 1024))
            .configure(handlers::register_routes)
    })
    .bind(&bind_addr)
    .with_context(|| format!("failed to bind {}", bind_addr))?
    .run()
    .await?;

    tracing::info!("Pothole Rewards Service stopped");
    Ok(())
}
