//! Bot lifecycle and trade execution.
//!
//! Every bot has two async locks. The execution lock keeps at most one
//! evaluation in flight per bot; a second caller is told the bot is busy
//! instead of queueing. The lifecycle lock serialises every read-modify-write
//! of the bot row: start, stop, reset, delete, and the executor's
//! "still running? submit, record" section. Because `stop` takes the same
//! lock, once it returns no order can be placed for that bot until it is
//! started again.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use serde::Serialize;
use tokio::sync::{watch, MutexGuard};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;

use crate::config::Config;
use crate::error::AppError;
use crate::exchange::{Exchange, ExchangeFactory};
use crate::indicator::{self, IndicatorSnapshot};
use crate::model::bot::{Bot, BotConfig, BotStatus, RiskConfig};
use crate::model::order::{truncate_quantity, OrderFill, OrderSide};
use crate::model::signal::Signal;
use crate::model::trade::{ExitReason, Trade};
use crate::stats::compute_bot_stats;
use crate::store::{BotStore, DeletePolicy};
use crate::strategy::{self, Decision, PositionAction};

#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub candle_limit: usize,
    pub persist_retries: u32,
    pub delete_policy: DeletePolicy,
    /// Used when a bot is created without a timeframe.
    pub default_timeframe: String,
}

impl ManagerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            candle_limit: config.executor.candle_limit,
            persist_retries: config.executor.persist_retries,
            delete_policy: config.storage.delete_policy,
            default_timeframe: config.binance.kline_interval.clone(),
        }
    }
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            candle_limit: 200,
            persist_retries: 3,
            delete_policy: DeletePolicy::Reject,
            default_timeframe: "1h".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    /// Nothing evaluated: the bot is not running or already being evaluated.
    Skipped { reason: String },
    /// Evaluated with no order to place.
    Held { decision: Decision },
    /// An open trade stays open this round.
    Holding { trade_id: String, price: f64 },
    Opened { decision: Decision, trade: Trade },
    Closed { reason: ExitReason, trade: Trade },
    /// The bot stopped between the decision and order submission.
    Aborted { reason: String },
}

#[derive(Default)]
struct BotLocks {
    lifecycle: tokio::sync::Mutex<()>,
    execution: tokio::sync::Mutex<()>,
}

/// Proof that the caller holds a bot's lifecycle lock.
type LifecycleGuard<'a> = MutexGuard<'a, ()>;

/// Entry size before balance clamping:
/// `initial_capital * position_size_pct / 100 / price`.
pub fn position_size(risk: &RiskConfig, price: f64) -> f64 {
    if !(price.is_finite() && price > 0.0) {
        return 0.0;
    }
    risk.initial_capital * risk.position_size_pct / 100.0 / price
}

/// Largest quantity the account can fund. Buys spend the quote asset, sells
/// spend the base asset.
pub fn affordable_quantity(side: OrderSide, price: f64, free_base: f64, free_quote: f64) -> f64 {
    match side {
        OrderSide::Buy if price > 0.0 => free_quote.max(0.0) / price,
        OrderSide::Buy => 0.0,
        OrderSide::Sell => free_base.max(0.0),
    }
}

pub struct BotManager {
    store: Arc<BotStore>,
    exchanges: Arc<dyn ExchangeFactory>,
    settings: ManagerSettings,
    locks: Mutex<HashMap<String, Arc<BotLocks>>>,
}

impl BotManager {
    pub fn new(
        store: Arc<BotStore>,
        exchanges: Arc<dyn ExchangeFactory>,
        settings: ManagerSettings,
    ) -> Self {
        Self {
            store,
            exchanges,
            settings,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<BotStore> {
        &self.store
    }

    /// Locks for a stored bot. Unknown ids never get an entry, so the map is
    /// bounded by the number of bots.
    fn locks_for(&self, bot_id: &str) -> Result<Arc<BotLocks>, AppError> {
        self.store.require_bot(bot_id)?;
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(locks.entry(bot_id.to_string()).or_default().clone())
    }

    /// Run a storage write, retrying storage failures. The store stays the
    /// source of truth, so callers only report state once this succeeds.
    async fn persist<T>(
        &self,
        what: &str,
        mut op: impl FnMut() -> Result<T, AppError>,
    ) -> Result<T, AppError> {
        let mut attempt = 0;
        loop {
            match op() {
                Ok(v) => return Ok(v),
                Err(AppError::Storage(e)) if attempt < self.settings.persist_retries => {
                    attempt += 1;
                    tracing::warn!(what, attempt, error = %e, "Storage write failed, retrying");
                    tokio::time::sleep(Duration::from_millis(50 * u64::from(attempt))).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn create_bot(&self, name: &str, mut config: BotConfig) -> Result<Bot> {
        if name.trim().is_empty() {
            return Err(AppError::InvalidConfig("bot name must not be empty".to_string()).into());
        }
        if config.timeframe.trim().is_empty() {
            config.timeframe = self.settings.default_timeframe.clone();
        }
        config.validate()?;

        let bot = Bot::new(name.trim(), config);
        self.persist("insert bot", || self.store.insert_bot(&bot))
            .await?;
        tracing::info!(
            bot_id = %bot.id,
            symbol = %bot.config.symbol,
            strategy = bot.config.strategy.kind(),
            "Bot created"
        );
        Ok(self.store.require_bot(&bot.id)?)
    }

    pub fn get(&self, bot_id: &str) -> Result<Bot> {
        Ok(self.store.require_bot(bot_id)?)
    }

    pub fn list(&self) -> Result<Vec<Bot>> {
        Ok(self.store.list_bots()?)
    }

    pub fn trades(&self, bot_id: &str) -> Result<Vec<Trade>> {
        self.store.require_bot(bot_id)?;
        Ok(self.store.trades_for_bot(bot_id)?)
    }

    /// Idempotent: starting a running bot changes nothing and returns it as
    /// stored.
    pub async fn start(&self, bot_id: &str) -> Result<Bot> {
        let locks = self.locks_for(bot_id)?;
        let _life = locks.lifecycle.lock().await;

        let mut bot = self.store.require_bot(bot_id)?;
        if bot.status == BotStatus::Running {
            tracing::info!(bot_id, "Start ignored, bot already running");
            return Ok(bot);
        }
        let next = bot.status.transition(BotStatus::Running)?;
        bot.config.validate()?;

        let now = Utc::now();
        bot.status = next;
        bot.last_error = None;
        bot.last_run_at = Some(now);
        bot.updated_at = now;
        self.persist("start bot", || self.store.update_bot(&bot))
            .await?;
        tracing::info!(bot_id, "Bot started");
        Ok(self.store.require_bot(bot_id)?)
    }

    /// Stopping a bot that is not running is a no-op. Waits for an in-flight
    /// order submission to finish; after it returns no new order is placed.
    pub async fn stop(&self, bot_id: &str) -> Result<Bot> {
        let locks = self.locks_for(bot_id)?;
        let _life = locks.lifecycle.lock().await;

        let mut bot = self.store.require_bot(bot_id)?;
        if bot.status != BotStatus::Running {
            tracing::info!(bot_id, status = %bot.status, "Stop ignored, bot not running");
            return Ok(bot);
        }
        bot.status = bot.status.transition(BotStatus::Stopped)?;
        bot.updated_at = Utc::now();
        self.persist("stop bot", || self.store.update_bot(&bot))
            .await?;
        tracing::info!(bot_id, "Bot stopped");
        Ok(self.store.require_bot(bot_id)?)
    }

    /// The only way out of `error`.
    pub async fn reset(&self, bot_id: &str) -> Result<Bot> {
        let locks = self.locks_for(bot_id)?;
        let _life = locks.lifecycle.lock().await;

        let mut bot = self.store.require_bot(bot_id)?;
        bot.status = bot.status.transition(BotStatus::Idle)?;
        bot.last_error = None;
        bot.updated_at = Utc::now();
        self.persist("reset bot", || self.store.update_bot(&bot))
            .await?;
        tracing::info!(bot_id, "Bot reset to idle");
        Ok(self.store.require_bot(bot_id)?)
    }

    /// Delete under the configured policy. Running bots must be stopped first.
    pub async fn delete(&self, bot_id: &str) -> Result<u64> {
        let locks = self.locks_for(bot_id)?;
        let removed = {
            let _life = locks.lifecycle.lock().await;
            let bot = self.store.require_bot(bot_id)?;
            if bot.status == BotStatus::Running {
                return Err(AppError::BotRunning(bot_id.to_string()).into());
            }
            let policy = self.settings.delete_policy;
            self.persist("delete bot", || self.store.delete_bot(bot_id, policy))
                .await?
        };
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(bot_id);
        tracing::info!(bot_id, trades_removed = removed, "Bot deleted");
        Ok(removed)
    }

    /// Indicator history over the most recent `limit` closed candles.
    pub async fn indicators(&self, bot_id: &str, limit: usize) -> Result<Vec<IndicatorSnapshot>> {
        let bot = self.store.require_bot(bot_id)?;
        bot.config.validate()?;
        let exchange = self.exchanges.for_account(&bot.config.account)?;
        let params = bot.config.strategy.indicator_params();
        let fetch = limit.max(1) + params.warmup_len();
        let candles = exchange
            .klines(&bot.config.symbol, &bot.config.timeframe, fetch)
            .await
            .context("failed to fetch candles")?;
        let snapshots = indicator::compute(&candles, &params)?;
        let skip = snapshots.len().saturating_sub(limit);
        Ok(snapshots.into_iter().skip(skip).collect())
    }

    /// One evaluation of a running bot. Concurrent calls for the same bot do
    /// not queue: the loser returns `Skipped`. Any failure moves the bot to
    /// `error` with `last_error` set before the error is returned.
    pub async fn execute_once(&self, bot_id: &str) -> Result<ExecutionOutcome> {
        let locks = self.locks_for(bot_id)?;
        let Ok(_exec) = locks.execution.try_lock() else {
            tracing::debug!(bot_id, "Evaluation already in flight, skipping");
            return Ok(ExecutionOutcome::Skipped {
                reason: "evaluation already in flight".to_string(),
            });
        };

        let bot = self.store.require_bot(bot_id)?;
        if bot.status != BotStatus::Running {
            return Ok(ExecutionOutcome::Skipped {
                reason: format!("bot is {}", bot.status),
            });
        }

        match self.evaluate(&bot, &locks).await {
            Ok(outcome) => {
                tracing::info!(bot_id, outcome = outcome_label(&outcome), "Evaluation finished");
                Ok(outcome)
            }
            Err(e) => {
                tracing::error!(bot_id, error = %format!("{:#}", e), "Evaluation failed");
                if let Err(mark_err) = self.mark_error(bot_id, &e, &locks).await {
                    tracing::error!(bot_id, error = %mark_err, "Failed to record bot error");
                }
                Err(e)
            }
        }
    }

    async fn mark_error(&self, bot_id: &str, err: &anyhow::Error, locks: &BotLocks) -> Result<()> {
        let _life = locks.lifecycle.lock().await;
        let mut bot = self.store.require_bot(bot_id)?;
        if bot.status.can_transition_to(BotStatus::Error) {
            bot.status = BotStatus::Error;
        }
        bot.last_error = Some(format!("{:#}", err));
        bot.updated_at = Utc::now();
        self.persist("mark bot error", || self.store.update_bot(&bot))
            .await?;
        Ok(())
    }

    async fn evaluate(&self, bot: &Bot, locks: &BotLocks) -> Result<ExecutionOutcome> {
        let cfg = &bot.config;
        cfg.validate()?;
        let exchange = self.exchanges.for_account(&cfg.account)?;
        let open = self.store.open_trade_for_bot(&bot.id)?;

        let price = exchange
            .latest_price(&cfg.symbol)
            .await
            .context("failed to fetch latest price")?;
        let protective = open.as_ref().and_then(|t| t.exit_trigger(price));

        // A protective exit does not need a fresh decision.
        let decision = match protective {
            Some(_) => None,
            None => Some(self.decide(bot, exchange.as_ref()).await?),
        };
        let signal = decision.as_ref().map_or(Signal::Hold, |d| d.signal);
        let action = strategy::plan(open.as_ref().map(|t| t.side), protective, signal);

        match (open, action) {
            (Some(trade), PositionAction::Close(reason)) => {
                self.close_position(bot, trade, reason, price, exchange.as_ref(), locks)
                    .await
            }
            (None, PositionAction::Open(side)) => {
                let decision = decision.unwrap_or_else(|| Decision::hold("no decision"));
                self.open_position(bot, decision, side, price, exchange.as_ref(), locks)
                    .await
            }
            (Some(trade), _) => {
                self.touch(bot, locks).await?;
                Ok(ExecutionOutcome::Holding {
                    trade_id: trade.id,
                    price,
                })
            }
            (None, _) => {
                self.touch(bot, locks).await?;
                Ok(ExecutionOutcome::Held {
                    decision: decision.unwrap_or_else(|| Decision::hold("no decision")),
                })
            }
        }
    }

    async fn decide(&self, bot: &Bot, exchange: &dyn Exchange) -> Result<Decision> {
        let cfg = &bot.config;
        let params = cfg.strategy.indicator_params();
        let limit = self.settings.candle_limit.max(params.warmup_len() + 1);
        let candles = exchange
            .klines(&cfg.symbol, &cfg.timeframe, limit)
            .await
            .context("failed to fetch candles")?;
        let snapshots = indicator::compute(&candles, &params)?;
        let decision = strategy::decide(&snapshots, &cfg.strategy);
        tracing::debug!(
            bot_id = %bot.id,
            signal = %decision.signal,
            reason = %decision.reason,
            "Strategy decision"
        );
        Ok(decision)
    }

    async fn open_position(
        &self,
        bot: &Bot,
        decision: Decision,
        side: OrderSide,
        price: f64,
        exchange: &dyn Exchange,
        locks: &BotLocks,
    ) -> Result<ExecutionOutcome> {
        let cfg = &bot.config;
        let desired = position_size(&cfg.risk, price);
        let quantity = self
            .clamp_to_balance(bot, exchange, side, desired, price)
            .await?;
        if quantity <= 0.0 {
            tracing::warn!(bot_id = %bot.id, side = %side, "No balance for entry, skipping order");
            self.touch(bot, locks).await?;
            return Ok(ExecutionOutcome::Held {
                decision: Decision::hold(format!("{} signal but no balance to trade", side)),
            });
        }

        let life = locks.lifecycle.lock().await;
        let Some(fill) = self
            .submit_if_running(&life, bot, exchange, side, quantity)
            .await?
        else {
            return Ok(ExecutionOutcome::Aborted {
                reason: "bot stopped before order submission".to_string(),
            });
        };

        let trade = Trade::open(
            &bot.id,
            &cfg.symbol,
            side,
            fill.executed_qty,
            fill.avg_price,
            cfg.risk.stop_loss_pct,
            cfg.risk.take_profit_pct,
        );
        self.persist("insert trade", || self.store.insert_trade(&trade))
            .await
            .with_context(|| format!("order {} filled but trade was not recorded", fill.order_id))?;
        tracing::info!(
            bot_id = %bot.id,
            trade_id = %trade.id,
            side = %side,
            quantity = trade.quantity,
            entry_price = trade.entry_price,
            "Trade opened"
        );
        self.refresh_bot(&life, &bot.id).await?;
        Ok(ExecutionOutcome::Opened { decision, trade })
    }

    async fn close_position(
        &self,
        bot: &Bot,
        mut trade: Trade,
        reason: ExitReason,
        price: f64,
        exchange: &dyn Exchange,
        locks: &BotLocks,
    ) -> Result<ExecutionOutcome> {
        let side = trade.side.opposite();
        let quantity = self
            .clamp_to_balance(bot, exchange, side, trade.quantity, price)
            .await?;
        if quantity <= 0.0 {
            return Err(anyhow!(
                "cannot close trade {}: no balance for {} {}",
                trade.id,
                side,
                trade.symbol
            ));
        }

        let life = locks.lifecycle.lock().await;
        let Some(fill) = self
            .submit_if_running(&life, bot, exchange, side, quantity)
            .await?
        else {
            return Ok(ExecutionOutcome::Aborted {
                reason: "bot stopped before exit order submission".to_string(),
            });
        };

        trade.close_at(fill.avg_price);
        self.persist("close trade", || self.store.close_trade(&trade))
            .await
            .with_context(|| format!("exit order {} filled but trade was not updated", fill.order_id))?;
        tracing::info!(
            bot_id = %bot.id,
            trade_id = %trade.id,
            reason = ?reason,
            exit_price = fill.avg_price,
            profit = trade.profit.unwrap_or(0.0),
            "Trade closed"
        );
        self.refresh_bot(&life, &bot.id).await?;
        Ok(ExecutionOutcome::Closed { reason, trade })
    }

    async fn clamp_to_balance(
        &self,
        bot: &Bot,
        exchange: &dyn Exchange,
        side: OrderSide,
        desired: f64,
        price: f64,
    ) -> Result<f64> {
        let (base, quote) = bot
            .config
            .assets()
            .ok_or_else(|| AppError::InvalidConfig(format!("symbol {}", bot.config.symbol)))?;
        let available = match side {
            OrderSide::Buy => {
                let free_quote = exchange
                    .free_balance(quote)
                    .await
                    .context("failed to fetch balance")?;
                affordable_quantity(side, price, 0.0, free_quote)
            }
            OrderSide::Sell => {
                let free_base = exchange
                    .free_balance(base)
                    .await
                    .context("failed to fetch balance")?;
                affordable_quantity(side, price, free_base, 0.0)
            }
        };
        let quantity = if desired > available {
            tracing::warn!(
                bot_id = %bot.id,
                side = %side,
                desired,
                available,
                "Order size clamped to available balance"
            );
            available
        } else {
            desired
        };
        Ok(truncate_quantity(quantity))
    }

    /// Re-read the persisted status under the lifecycle lock and only submit
    /// while it is still `running`. `None` means the order was dropped.
    async fn submit_if_running(
        &self,
        _life: &LifecycleGuard<'_>,
        bot: &Bot,
        exchange: &dyn Exchange,
        side: OrderSide,
        quantity: f64,
    ) -> Result<Option<OrderFill>> {
        let current = self.store.require_bot(&bot.id)?;
        if current.status != BotStatus::Running {
            tracing::info!(
                bot_id = %bot.id,
                status = %current.status,
                "Bot no longer running, dropping order"
            );
            return Ok(None);
        }

        let client_order_id = format!(
            "bd-{}-{}",
            bot.id.chars().take(8).collect::<String>(),
            &uuid::Uuid::new_v4().simple().to_string()[..12]
        );
        let fill = exchange
            .place_market_order(&bot.config.symbol, side, quantity, &client_order_id)
            .await
            .with_context(|| format!("{} order for {} failed", side, bot.config.symbol))?;
        if !fill.status.has_fills() || fill.executed_qty <= 0.0 {
            return Err(anyhow!(
                "order {} not filled (status {})",
                fill.order_id,
                fill.status
            ));
        }
        Ok(Some(fill))
    }

    /// Recompute stats and stamp `last_run_at`. Caller holds the lifecycle
    /// lock so the status column is not clobbered.
    async fn refresh_bot(&self, _life: &LifecycleGuard<'_>, bot_id: &str) -> Result<Bot> {
        let trades = self.store.trades_for_bot(bot_id)?;
        let mut bot = self.store.require_bot(bot_id)?;
        compute_bot_stats(&trades).apply_to(&mut bot);
        let now = Utc::now();
        bot.last_run_at = Some(now);
        bot.updated_at = now;
        self.persist("refresh bot", || self.store.update_bot(&bot))
            .await?;
        Ok(bot)
    }

    async fn touch(&self, bot: &Bot, locks: &BotLocks) -> Result<()> {
        let life = locks.lifecycle.lock().await;
        self.refresh_bot(&life, &bot.id).await?;
        Ok(())
    }

    /// Evaluate every running bot each `period` until `shutdown` flips.
    pub fn spawn_poller(
        self: Arc<Self>,
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => Arc::clone(&self).poll_running().await,
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!("Bot poller stopped");
        })
    }

    async fn poll_running(self: Arc<Self>) {
        let running = match self.store.list_by_status(BotStatus::Running) {
            Ok(bots) => bots,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list running bots");
                return;
            }
        };
        let mut tasks = JoinSet::new();
        for bot in running {
            let manager = Arc::clone(&self);
            tasks.spawn(async move {
                // Errors are already logged and recorded on the bot.
                let _ = manager.execute_once(&bot.id).await;
            });
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Bot evaluation task panicked");
            }
        }
    }
}

fn outcome_label(outcome: &ExecutionOutcome) -> &'static str {
    match outcome {
        ExecutionOutcome::Skipped { .. } => "skipped",
        ExecutionOutcome::Held { .. } => "held",
        ExecutionOutcome::Holding { .. } => "holding",
        ExecutionOutcome::Opened { .. } => "opened",
        ExecutionOutcome::Closed { .. } => "closed",
        ExecutionOutcome::Aborted { .. } => "aborted",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::bot::AccountConfig;
    use crate::strategy::StrategyConfig;

    struct NoExchange;

    impl ExchangeFactory for NoExchange {
        fn for_account(&self, _account: &AccountConfig) -> Result<Arc<dyn Exchange>> {
            Err(anyhow!("no exchange configured"))
        }
    }

    fn manager() -> BotManager {
        let store = BotStore::open_in_memory().expect("store");
        BotManager::new(Arc::new(store), Arc::new(NoExchange), ManagerSettings::default())
    }

    fn stored_bot(manager: &BotManager) -> Bot {
        let config = BotConfig {
            symbol: "BTCUSDT".to_string(),
            timeframe: "1h".to_string(),
            strategy: StrategyConfig::Rsi {
                period: 14,
                oversold: 30.0,
                overbought: 70.0,
            },
            risk: risk(10.0, 1_000.0),
            account: AccountConfig::default(),
        };
        let bot = Bot::new("persist", config);
        manager.store.insert_bot(&bot).expect("insert");
        bot
    }

    fn storage_failure() -> AppError {
        AppError::Storage(rusqlite::Error::InvalidQuery)
    }

    fn risk(pct: f64, capital: f64) -> RiskConfig {
        RiskConfig {
            position_size_pct: pct,
            initial_capital: capital,
            stop_loss_pct: None,
            take_profit_pct: None,
        }
    }

    #[test]
    fn position_size_uses_capital_share() {
        let qty = position_size(&risk(10.0, 1_000.0), 50.0);
        assert!((qty - 2.0).abs() < 1e-12);
        assert_eq!(position_size(&risk(10.0, 1_000.0), 0.0), 0.0);
    }

    #[test]
    fn affordable_quantity_uses_the_spent_asset() {
        assert!((affordable_quantity(OrderSide::Buy, 50.0, 9.0, 100.0) - 2.0).abs() < 1e-12);
        assert!((affordable_quantity(OrderSide::Sell, 50.0, 0.3, 100.0) - 0.3).abs() < 1e-12);
        assert_eq!(affordable_quantity(OrderSide::Sell, 50.0, -1.0, 100.0), 0.0);
    }

    #[tokio::test]
    async fn persist_retries_storage_failures_until_the_write_lands() {
        let manager = manager();
        let bot = stored_bot(&manager);
        let mut running = bot.clone();
        running.status = BotStatus::Running;

        let mut attempts = 0;
        manager
            .persist("start bot", || {
                attempts += 1;
                if attempts <= 3 {
                    Err(storage_failure())
                } else {
                    manager.store.update_bot(&running)
                }
            })
            .await
            .expect("fourth attempt succeeds");
        assert_eq!(attempts, 4);
        assert_eq!(
            manager.store.require_bot(&bot.id).expect("bot").status,
            BotStatus::Running
        );
    }

    #[tokio::test]
    async fn persist_gives_up_after_configured_retries() {
        let manager = manager();
        let bot = stored_bot(&manager);

        let mut attempts = 0;
        let err = manager
            .persist("start bot", || -> Result<(), AppError> {
                attempts += 1;
                Err(storage_failure())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Storage(_)));
        assert_eq!(attempts, 1 + manager.settings.persist_retries);
        assert_eq!(
            manager.store.require_bot(&bot.id).expect("bot").status,
            BotStatus::Idle
        );
    }

    #[tokio::test]
    async fn persist_does_not_retry_non_storage_errors() {
        let manager = manager();
        let mut attempts = 0;
        let err = manager
            .persist("insert bot", || -> Result<(), AppError> {
                attempts += 1;
                Err(AppError::Corrupt("bad row".to_string()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Corrupt(_)));
        assert_eq!(attempts, 1);
    }

    #[tokio::test]
    async fn unknown_ids_leave_no_lock_entries() {
        let manager = manager();
        for i in 0..100 {
            let id = format!("missing-{}", i);
            assert!(manager.start(&id).await.is_err());
            assert!(manager.stop(&id).await.is_err());
            assert!(manager.reset(&id).await.is_err());
            assert!(manager.delete(&id).await.is_err());
            assert!(manager.execute_once(&id).await.is_err());
        }
        assert!(manager.locks.lock().expect("locks").is_empty());

        let bot = stored_bot(&manager);
        manager.start(&bot.id).await.expect("start");
        assert_eq!(manager.locks.lock().expect("locks").len(), 1);
    }
}
