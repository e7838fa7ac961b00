//! Candle replay through the same decision path as live bots.
//!
//! Indicators are computed once over the whole series. At candle `i` the
//! strategy only sees `snapshots[..=i]`, and [`strategy::plan`] turns the
//! result into an action exactly as the live executor does. Fills happen at
//! the candle close.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bot_manager::position_size;
use crate::error::AppError;
use crate::indicator;
use crate::model::bot::RiskConfig;
use crate::model::candle::Candle;
use crate::model::order::truncate_quantity;
use crate::model::signal::Signal;
use crate::model::trade::Trade;
use crate::stats::compute_bot_stats;
use crate::strategy::{self, PositionAction, StrategyConfig};

const BACKTEST_BOT_ID: &str = "backtest";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub symbol: String,
    pub strategy: StrategyConfig,
    pub risk: RiskConfig,
    /// Fraction of notional charged per side, e.g. `0.001` for 0.1%.
    #[serde(default)]
    pub fee_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EquityPoint {
    pub time: u64,
    pub equity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BacktestReport {
    pub trades: Vec<Trade>,
    pub initial_capital: f64,
    pub final_capital: f64,
    pub total_return_pct: f64,
    pub win_rate_pct: f64,
    pub max_drawdown_pct: f64,
    /// Mean over standard deviation of per-candle equity returns.
    pub sharpe_ratio: f64,
    pub total_fees: f64,
    pub equity_curve: Vec<EquityPoint>,
}

fn candle_time(ms: u64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms as i64).unwrap_or_default()
}

struct Book {
    cash: f64,
    fees: f64,
    fee_rate: f64,
    open: Option<Trade>,
    closed: Vec<Trade>,
}

impl Book {
    fn equity_at(&self, price: f64) -> f64 {
        self.cash + self.open.as_ref().map_or(0.0, |t| t.pnl_at(price))
    }

    fn enter(&mut self, trade: Trade) {
        let fee = trade.quantity * trade.entry_price * self.fee_rate;
        self.cash -= fee;
        self.fees += fee;
        self.open = Some(trade);
    }

    fn exit(&mut self, price: f64, time_ms: u64) {
        let Some(mut trade) = self.open.take() else {
            return;
        };
        let fee = trade.quantity * price * self.fee_rate;
        trade.close_at(price);
        trade.close_time = Some(candle_time(time_ms));
        self.cash += trade.profit.unwrap_or(0.0) - fee;
        self.fees += fee;
        self.closed.push(trade);
    }
}

pub fn run_backtest(candles: &[Candle], config: &BacktestConfig) -> Result<BacktestReport, AppError> {
    config.strategy.validate()?;
    let risk = &config.risk;
    if !(risk.initial_capital.is_finite() && risk.initial_capital > 0.0) {
        return Err(AppError::InvalidConfig(format!(
            "initial_capital must be positive, got {}",
            risk.initial_capital
        )));
    }
    if !(0.0..1.0).contains(&config.fee_rate) {
        return Err(AppError::InvalidConfig(format!(
            "fee_rate must be in [0, 1), got {}",
            config.fee_rate
        )));
    }
    let Some(last) = candles.last() else {
        return Err(AppError::InvalidConfig("no candles to backtest".to_string()));
    };

    let snapshots = indicator::compute(candles, &config.strategy.indicator_params())?;
    let mut book = Book {
        cash: risk.initial_capital,
        fees: 0.0,
        fee_rate: config.fee_rate,
        open: None,
        closed: Vec::new(),
    };
    let mut equity_curve = Vec::with_capacity(candles.len());

    for (i, candle) in candles.iter().enumerate() {
        let price = candle.close;
        let protective = book.open.as_ref().and_then(|t| t.exit_trigger(price));
        let signal = match protective {
            Some(_) => Signal::Hold,
            None => strategy::decide(&snapshots[..=i], &config.strategy).signal,
        };

        match strategy::plan(book.open.as_ref().map(|t| t.side), protective, signal) {
            PositionAction::Close(_) => book.exit(price, candle.close_time),
            PositionAction::Open(side) => {
                // Size from current equity so losses shrink later entries.
                let sizing = RiskConfig {
                    initial_capital: book.equity_at(price).max(0.0),
                    ..risk.clone()
                };
                let quantity = truncate_quantity(position_size(&sizing, price));
                if quantity > 0.0 {
                    let mut trade = Trade::open(
                        BACKTEST_BOT_ID,
                        &config.symbol,
                        side,
                        quantity,
                        price,
                        risk.stop_loss_pct,
                        risk.take_profit_pct,
                    );
                    trade.open_time = candle_time(candle.close_time);
                    book.enter(trade);
                }
            }
            PositionAction::Stay => {}
        }

        equity_curve.push(EquityPoint {
            time: candle.open_time,
            equity: book.equity_at(price),
        });
    }

    if book.open.is_some() {
        tracing::debug!(symbol = %config.symbol, "Closing open backtest position at last candle");
        book.exit(last.close, last.close_time);
        if let Some(point) = equity_curve.last_mut() {
            point.equity = book.cash;
        }
    }

    let stats = compute_bot_stats(&book.closed);
    let final_capital = book.cash;
    tracing::debug!(
        symbol = %config.symbol,
        trades = book.closed.len(),
        final_capital,
        "Backtest finished"
    );
    Ok(BacktestReport {
        initial_capital: risk.initial_capital,
        final_capital,
        total_return_pct: (final_capital - risk.initial_capital) / risk.initial_capital * 100.0,
        win_rate_pct: stats.win_rate_percent(),
        max_drawdown_pct: max_drawdown_pct(risk.initial_capital, &equity_curve),
        sharpe_ratio: sharpe_ratio(risk.initial_capital, &equity_curve),
        total_fees: book.fees,
        trades: book.closed,
        equity_curve,
    })
}

/// Largest peak-to-trough fall, in percent of the peak.
pub fn max_drawdown_pct(initial: f64, curve: &[EquityPoint]) -> f64 {
    let mut peak = initial;
    let mut worst = 0.0_f64;
    for point in curve {
        peak = peak.max(point.equity);
        if peak > 0.0 {
            worst = worst.max((peak - point.equity) / peak * 100.0);
        }
    }
    worst
}

fn sharpe_ratio(initial: f64, curve: &[EquityPoint]) -> f64 {
    let mut prev = initial;
    let mut returns = Vec::with_capacity(curve.len());
    for point in curve {
        if prev > 0.0 {
            returns.push((point.equity - prev) / prev);
        }
        prev = point.equity;
    }
    if returns.len() < 2 {
        return 0.0;
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();
    if std_dev <= f64::EPSILON {
        0.0
    } else {
        mean / std_dev
    }
}
