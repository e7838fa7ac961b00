use serde::Serialize;

use crate::model::bot::Bot;
use crate::model::trade::{Trade, TradeStatus};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct BotStats {
    /// Every trade the bot opened, closed or not.
    pub total_trades: u64,
    pub wins: u32,
    pub losses: u32,
    pub total_profit: f64,
}

impl BotStats {
    pub fn closed(&self) -> u32 {
        self.wins + self.losses
    }

    pub fn win_rate_percent(&self) -> f64 {
        let total = self.closed();
        if total == 0 {
            0.0
        } else {
            (self.wins as f64 / total as f64) * 100.0
        }
    }

    pub fn apply_to(&self, bot: &mut Bot) {
        bot.total_trades = self.total_trades;
        bot.total_profit = self.total_profit;
        bot.win_rate = self.win_rate_percent();
    }
}

/// Recompute a bot's aggregates from its full trade list. Only closed trades
/// count toward profit and win rate; a break-even close counts as a loss.
pub fn compute_bot_stats(trades: &[Trade]) -> BotStats {
    let mut stats = BotStats {
        total_trades: trades.len() as u64,
        ..BotStats::default()
    };
    for trade in trades.iter().filter(|t| t.status == TradeStatus::Closed) {
        let profit = trade.profit.unwrap_or(0.0);
        stats.total_profit += profit;
        if profit > 0.0 {
            stats.wins += 1;
        } else {
            stats.losses += 1;
        }
    }
    stats
}
