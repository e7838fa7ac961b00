#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{Notify, Semaphore};

use botdesk::bot_manager::{BotManager, ManagerSettings};
use botdesk::error::AppError;
use botdesk::exchange::{Exchange, ExchangeFactory};
use botdesk::model::bot::{AccountConfig, BotConfig, RiskConfig};
use botdesk::model::candle::Candle;
use botdesk::model::order::{OrderFill, OrderSide, OrderStatus};
use botdesk::store::{BotStore, DeletePolicy};
use botdesk::strategy::StrategyConfig;

pub const HOUR_MS: u64 = 3_600_000;

#[derive(Debug, Clone, PartialEq)]
pub struct PlacedOrder {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: f64,
    pub client_order_id: String,
}

/// Scripted exchange: candles, price and balances are set by the test, orders
/// fill in full at the current price and are recorded.
pub struct FakeExchange {
    candles: Mutex<Vec<Candle>>,
    price: Mutex<f64>,
    balances: Mutex<HashMap<String, f64>>,
    orders: Mutex<Vec<PlacedOrder>>,
    next_order_id: AtomicU64,
    fail_klines: AtomicBool,
    klines_gate: Mutex<Option<Arc<Semaphore>>>,
    /// Signalled every time `klines` is entered.
    pub klines_entered: Notify,
}

impl FakeExchange {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            candles: Mutex::new(Vec::new()),
            price: Mutex::new(100.0),
            balances: Mutex::new(HashMap::new()),
            orders: Mutex::new(Vec::new()),
            next_order_id: AtomicU64::new(1),
            fail_klines: AtomicBool::new(false),
            klines_gate: Mutex::new(None),
            klines_entered: Notify::new(),
        })
    }

    pub fn set_candles(&self, candles: Vec<Candle>) {
        *self.candles.lock().unwrap() = candles;
    }

    pub fn set_price(&self, price: f64) {
        *self.price.lock().unwrap() = price;
    }

    pub fn set_balance(&self, asset: &str, free: f64) {
        self.balances.lock().unwrap().insert(asset.to_string(), free);
    }

    pub fn fail_klines(&self, fail: bool) {
        self.fail_klines.store(fail, Ordering::SeqCst);
    }

    /// Block every `klines` call until the returned semaphore gets a permit.
    pub fn hold_klines(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.klines_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn orders(&self) -> Vec<PlacedOrder> {
        self.orders.lock().unwrap().clone()
    }
}

#[async_trait]
impl Exchange for FakeExchange {
    async fn klines(&self, _symbol: &str, _interval: &str, limit: usize) -> Result<Vec<Candle>> {
        self.klines_entered.notify_one();
        let gate = self.klines_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await?.forget();
        }
        if self.fail_klines.load(Ordering::SeqCst) {
            return Err(AppError::BinanceApi {
                code: -1003,
                msg: "Too many requests".to_string(),
            }
            .into());
        }
        let candles = self.candles.lock().unwrap().clone();
        let skip = candles.len().saturating_sub(limit);
        Ok(candles[skip..].to_vec())
    }

    async fn latest_price(&self, _symbol: &str) -> Result<f64> {
        Ok(*self.price.lock().unwrap())
    }

    async fn free_balance(&self, asset: &str) -> Result<f64> {
        Ok(self.balances.lock().unwrap().get(asset).copied().unwrap_or(0.0))
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
        client_order_id: &str,
    ) -> Result<OrderFill> {
        self.orders.lock().unwrap().push(PlacedOrder {
            symbol: symbol.to_string(),
            side,
            quantity,
            client_order_id: client_order_id.to_string(),
        });
        Ok(OrderFill {
            order_id: self.next_order_id.fetch_add(1, Ordering::SeqCst),
            status: OrderStatus::Filled,
            executed_qty: quantity,
            avg_price: *self.price.lock().unwrap(),
        })
    }
}

pub struct FakeFactory {
    pub exchange: Arc<FakeExchange>,
}

impl ExchangeFactory for FakeFactory {
    fn for_account(&self, _account: &AccountConfig) -> Result<Arc<dyn Exchange>> {
        Ok(self.exchange.clone() as Arc<dyn Exchange>)
    }
}

pub fn manager_with(exchange: Arc<FakeExchange>, delete_policy: DeletePolicy) -> Arc<BotManager> {
    let store = Arc::new(BotStore::open_in_memory().expect("in-memory store"));
    Arc::new(BotManager::new(
        store,
        Arc::new(FakeFactory { exchange }),
        ManagerSettings {
            delete_policy,
            ..ManagerSettings::default()
        },
    ))
}

pub fn candle(i: u64, close: f64) -> Candle {
    Candle {
        open_time: i * HOUR_MS,
        open: close,
        high: close + 0.5,
        low: close - 0.5,
        close,
        volume: 10.0,
        close_time: (i + 1) * HOUR_MS - 1,
    }
}

pub fn candles_from_closes(closes: &[f64]) -> Vec<Candle> {
    closes
        .iter()
        .enumerate()
        .map(|(i, c)| candle(i as u64, *c))
        .collect()
}

/// `n` closes falling by one per candle from `start`. RSI reads 0.
pub fn falling(n: usize, start: f64) -> Vec<Candle> {
    let closes: Vec<f64> = (0..n).map(|i| start - i as f64).collect();
    candles_from_closes(&closes)
}

/// `n` closes rising by one per candle from `start`. RSI reads 100.
pub fn rising(n: usize, start: f64) -> Vec<Candle> {
    let closes: Vec<f64> = (0..n).map(|i| start + i as f64).collect();
    candles_from_closes(&closes)
}

pub fn rsi_strategy() -> StrategyConfig {
    StrategyConfig::Rsi {
        period: 14,
        oversold: 30.0,
        overbought: 70.0,
    }
}

pub fn bot_config(strategy: StrategyConfig) -> BotConfig {
    BotConfig {
        symbol: "BTCUSDT".to_string(),
        timeframe: "1h".to_string(),
        strategy,
        risk: RiskConfig {
            position_size_pct: 10.0,
            initial_capital: 1_000.0,
            stop_loss_pct: None,
            take_profit_pct: None,
        },
        account: AccountConfig {
            api_key: "test-key".to_string(),
            api_secret: "test-secret".to_string(),
            testnet: true,
        },
    }
}

pub fn app_error(err: &anyhow::Error) -> Option<&AppError> {
    err.chain().find_map(|c| c.downcast_ref::<AppError>())
}
