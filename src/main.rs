use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;

use botdesk::api::{self, AppState};
use botdesk::bot_manager::{BotManager, ManagerSettings};
use botdesk::config::Config;
use botdesk::exchange::BinanceExchangeFactory;
use botdesk::store::BotStore;
use botdesk::time_sync::SystemClock;

fn init_tracing(config: &Config) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().or_else(|_| {
        tracing_subscriber::EnvFilter::try_new(&config.logging.level)
            .context("logging.level is not a valid filter")
    })?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .json();
    match &config.logging.file {
        Some(path) => {
            let log_file = std::fs::File::create(path)
                .with_context(|| format!("failed to create log file {}", path))?;
            builder.with_writer(log_file).init();
        }
        None => builder.with_writer(std::io::stdout).init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/default.toml".to_string());
    let config = match Config::load_from_path(Path::new(&config_path)) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {:#}", e);
            std::process::exit(1);
        }
    };
    init_tracing(&config)?;
    if !config.binance.has_fallback_credentials() {
        tracing::warn!("BINANCE_API_KEY/BINANCE_API_SECRET not set; bots must carry their own credentials");
    }

    tracing::info!(
        rest_url = %config.binance.rest_base_url,
        testnet_url = %config.binance.testnet_rest_base_url,
        db = %config.storage.path,
        delete_policy = ?config.storage.delete_policy,
        "Starting botdesk"
    );

    let store = Arc::new(BotStore::open(Path::new(&config.storage.path))?);
    let exchanges = Arc::new(BinanceExchangeFactory::new(
        config.binance.clone(),
        config.time_sync.clone(),
        Arc::new(SystemClock),
    )?);
    let manager = Arc::new(BotManager::new(
        store,
        exchanges.clone(),
        ManagerSettings::from_config(&config),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let [mainnet_sync, testnet_sync] = exchanges.time_syncs();
    for (name, sync) in [("mainnet", &mainnet_sync), ("testnet", &testnet_sync)] {
        if !sync.sync().await {
            tracing::warn!(endpoint = name, "Initial time sync failed, using local clock fallback");
        }
    }
    let mut tasks = vec![
        mainnet_sync.clone().spawn_refresh(shutdown_rx.clone()),
        testnet_sync.clone().spawn_refresh(shutdown_rx.clone()),
        manager.clone().spawn_poller(
            Duration::from_secs(config.executor.poll_interval_secs),
            shutdown_rx.clone(),
        ),
    ];

    let state = AppState {
        manager,
        time_syncs: vec![
            ("mainnet".to_string(), mainnet_sync),
            ("testnet".to_string(), testnet_sync),
        ],
    };
    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind_addr))?;
    tracing::info!(addr = %config.server.bind_addr, "HTTP API listening");

    let mut server_shutdown = shutdown_rx.clone();
    tasks.push(tokio::spawn(async move {
        let served = axum::serve(listener, api::router(state))
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.wait_for(|stop| *stop).await;
            })
            .await;
        if let Err(e) = served {
            tracing::error!(error = %e, "HTTP server failed");
        }
    }));

    tokio::signal::ctrl_c().await.ok();
    tracing::info!("Shutdown requested");
    let _ = shutdown_tx.send(true);
    for task in tasks {
        if let Err(e) = task.await {
            tracing::error!(error = %e, "Background task panicked");
        }
    }
    tracing::info!("botdesk stopped");
    Ok(())
}
