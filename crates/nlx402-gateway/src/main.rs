use std::sync::Arc;

use actix_governor::{Governor, GovernorConfigBuilder};
use actix_web::{middleware::Logger, web, App, HttpServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nlx402::cleanup::{start_cleanup, CLEANUP_INTERVAL};
use nlx402::{SolanaRpcClient, SqliteStore};
use nlx402_gateway::{config::GatewayConfig, metrics::register_metrics, state::AppState};

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = match GatewayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    let port = config.port;
    let allowed_origins = config.allowed_origins.clone();
    let rate_limit_rpm = config.rate_limit_rpm;
    let retention = config.protocol().retention;

    tracing::info!("Starting nlx402-gateway on port {}", port);
    tracing::info!("Recipient: {}", config.recipient);
    tracing::info!("Ledger RPC: {}", config.ledger_rpc_url);
    tracing::info!("Upstream RPC: {}", config.upstream_rpc_url);
    tracing::info!(
        "Commitment: {} (timeout {}s)",
        config.commitment,
        config.finality_timeout.as_secs()
    );

    // Initialize storage
    let store = match SqliteStore::open(&config.db_path) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::error!("Failed to open database at {}: {}", config.db_path, e);
            std::process::exit(1);
        }
    };
    tracing::info!("Database initialized at: {}", config.db_path);

    let ledger = match SolanaRpcClient::new(config.ledger_rpc_url.clone()) {
        Ok(ledger) => ledger,
        Err(e) => {
            tracing::error!("Failed to create ledger client: {}", e);
            std::process::exit(1);
        }
    };

    // Register Prometheus metrics
    register_metrics();

    // Purge expired quotes and tokens in the background
    let _cleanup = start_cleanup(store.clone(), CLEANUP_INTERVAL, retention.as_secs());

    // Create shared state
    let state = match AppState::new(config, store, ledger) {
        Ok(state) => state,
        Err(e) => {
            tracing::error!("Failed to build application state: {}", e);
            std::process::exit(1);
        }
    };
    let state_data = web::Data::new(state);

    // Configure rate limiter
    let governor_conf = match GovernorConfigBuilder::default()
        .requests_per_minute(rate_limit_rpm as u64)
        .finish()
    {
        Some(conf) => conf,
        None => {
            tracing::error!("RATE_LIMIT_RPM must be greater than zero");
            std::process::exit(1);
        }
    };

    // Start HTTP server
    HttpServer::new(move || {
        let cors = nlx402_gateway::cors::build_cors(&allowed_origins);

        App::new()
            .app_data(state_data.clone())
            .wrap(Logger::default())
            .wrap(cors)
            .wrap(Governor::new(&governor_conf))
            .configure(nlx402_gateway::configure::<SolanaRpcClient>)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
