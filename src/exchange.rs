//! Exchange seam used by the executor. Bots never talk to Binance directly;
//! they ask an [`ExchangeFactory`] for a client bound to their account.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::binance::rest::{BinanceRestClient, BinanceTimeSource};
use crate::config::{effective_recv_window, BinanceConfig, TimeSyncConfig};
use crate::error::AppError;
use crate::model::bot::AccountConfig;
use crate::model::candle::Candle;
use crate::model::order::{OrderFill, OrderSide};
use crate::time_sync::{Clock, TimeSync};

#[async_trait]
pub trait Exchange: Send + Sync {
    /// Closed candles, oldest first.
    async fn klines(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Candle>>;
    async fn latest_price(&self, symbol: &str) -> Result<f64>;
    async fn free_balance(&self, asset: &str) -> Result<f64>;
    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
        client_order_id: &str,
    ) -> Result<OrderFill>;
}

pub trait ExchangeFactory: Send + Sync {
    fn for_account(&self, account: &AccountConfig) -> Result<Arc<dyn Exchange>>;
}

pub struct BinanceExchangeFactory {
    config: BinanceConfig,
    http: reqwest::Client,
    mainnet_sync: Arc<TimeSync>,
    testnet_sync: Arc<TimeSync>,
    /// Keyed by endpoint and both credentials, so a rotated secret gets a
    /// fresh client.
    clients: Mutex<HashMap<(bool, String, String), Arc<BinanceRestClient>>>,
}

impl BinanceExchangeFactory {
    pub fn new(
        config: BinanceConfig,
        time_sync_config: TimeSyncConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .context("failed to build HTTP client")?;
        let make_sync = |base_url: &str| {
            Arc::new(TimeSync::new(
                Arc::new(BinanceTimeSource::new(http.clone(), base_url)),
                clock.clone(),
                time_sync_config.clone(),
            ))
        };
        let mainnet_sync = make_sync(&config.rest_base_url);
        let testnet_sync = make_sync(&config.testnet_rest_base_url);
        Ok(Self {
            config,
            http,
            mainnet_sync,
            testnet_sync,
            clients: Mutex::new(HashMap::new()),
        })
    }

    /// One synchroniser per endpoint, for the refresh tasks.
    pub fn time_syncs(&self) -> [Arc<TimeSync>; 2] {
        [self.mainnet_sync.clone(), self.testnet_sync.clone()]
    }

    pub fn time_sync(&self, testnet: bool) -> &Arc<TimeSync> {
        if testnet {
            &self.testnet_sync
        } else {
            &self.mainnet_sync
        }
    }
}

impl ExchangeFactory for BinanceExchangeFactory {
    fn for_account(&self, account: &AccountConfig) -> Result<Arc<dyn Exchange>> {
        // Per-bot credentials first, process-wide env credentials as fallback.
        let (api_key, api_secret) = if account.api_key.is_empty() {
            (&self.config.api_key, &self.config.api_secret)
        } else {
            (&account.api_key, &account.api_secret)
        };
        if api_key.is_empty() || api_secret.is_empty() {
            return Err(AppError::Config("no Binance API credentials for bot".to_string()).into());
        }

        let key = (account.testnet, api_key.clone(), api_secret.clone());
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone() as Arc<dyn Exchange>);
        }
        let client = Arc::new(BinanceRestClient::new(
            self.http.clone(),
            self.config.base_url(account.testnet),
            api_key,
            api_secret,
            effective_recv_window(self.config.recv_window),
            self.time_sync(account.testnet).clone(),
        ));
        clients.insert(key, client.clone());
        Ok(client as Arc<dyn Exchange>)
    }
}
