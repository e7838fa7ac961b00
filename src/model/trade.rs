use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::order::OrderSide;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    Open,
    Closed,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Open => "open",
            TradeStatus::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(TradeStatus::Open),
            "closed" => Some(TradeStatus::Closed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub bot_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: f64,
    pub entry_price: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub status: TradeStatus,
    pub open_time: DateTime<Utc>,
    pub exit_price: Option<f64>,
    pub close_time: Option<DateTime<Utc>>,
    pub profit: Option<f64>,
}

/// Why an open trade was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    /// The strategy signalled the opposite side.
    Signal,
    /// Backtest ran out of candles.
    EndOfData,
}

impl Trade {
    pub fn open(
        bot_id: &str,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
        entry_price: f64,
        stop_loss_pct: Option<f64>,
        take_profit_pct: Option<f64>,
    ) -> Self {
        let (stop_loss, take_profit) =
            protective_levels(side, entry_price, stop_loss_pct, take_profit_pct);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            bot_id: bot_id.to_string(),
            symbol: symbol.to_string(),
            side,
            quantity,
            entry_price,
            stop_loss,
            take_profit,
            status: TradeStatus::Open,
            open_time: Utc::now(),
            exit_price: None,
            close_time: None,
            profit: None,
        }
    }

    /// Profit if the trade were closed at `price`.
    pub fn pnl_at(&self, price: f64) -> f64 {
        match self.side {
            OrderSide::Buy => (price - self.entry_price) * self.quantity,
            OrderSide::Sell => (self.entry_price - price) * self.quantity,
        }
    }

    /// Mark the trade closed at `price`.
    pub fn close_at(&mut self, price: f64) {
        self.profit = Some(self.pnl_at(price));
        self.exit_price = Some(price);
        self.close_time = Some(Utc::now());
        self.status = TradeStatus::Closed;
    }

    /// Check the protective levels against the current price. Stop-loss wins
    /// if both would trigger.
    pub fn exit_trigger(&self, price: f64) -> Option<ExitReason> {
        match self.side {
            OrderSide::Buy => {
                if self.stop_loss.is_some_and(|sl| price <= sl) {
                    Some(ExitReason::StopLoss)
                } else if self.take_profit.is_some_and(|tp| price >= tp) {
                    Some(ExitReason::TakeProfit)
                } else {
                    None
                }
            }
            OrderSide::Sell => {
                if self.stop_loss.is_some_and(|sl| price >= sl) {
                    Some(ExitReason::StopLoss)
                } else if self.take_profit.is_some_and(|tp| price <= tp) {
                    Some(ExitReason::TakeProfit)
                } else {
                    None
                }
            }
        }
    }
}

/// Stop-loss and take-profit prices for an entry, from percentage distances.
pub fn protective_levels(
    side: OrderSide,
    entry_price: f64,
    stop_loss_pct: Option<f64>,
    take_profit_pct: Option<f64>,
) -> (Option<f64>, Option<f64>) {
    let sign = match side {
        OrderSide::Buy => 1.0,
        OrderSide::Sell => -1.0,
    };
    let stop_loss = stop_loss_pct.map(|pct| entry_price * (1.0 - sign * pct / 100.0));
    let take_profit = take_profit_pct.map(|pct| entry_price * (1.0 + sign * pct / 100.0));
    (stop_loss, take_profit)
}
