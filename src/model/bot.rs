use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::parse_interval_ms;
use crate::error::AppError;
use crate::strategy::StrategyConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BotStatus {
    Idle,
    Running,
    Stopped,
    Error,
}

impl BotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BotStatus::Idle => "idle",
            BotStatus::Running => "running",
            BotStatus::Stopped => "stopped",
            BotStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(BotStatus::Idle),
            "running" => Some(BotStatus::Running),
            "stopped" => Some(BotStatus::Stopped),
            "error" => Some(BotStatus::Error),
            _ => None,
        }
    }

    /// The complete transition table. Anything not listed is illegal.
    pub fn can_transition_to(self, to: BotStatus) -> bool {
        matches!(
            (self, to),
            (BotStatus::Idle, BotStatus::Running)
                | (BotStatus::Stopped, BotStatus::Running)
                | (BotStatus::Running, BotStatus::Stopped)
                | (BotStatus::Running, BotStatus::Error)
                | (BotStatus::Error, BotStatus::Idle)
        )
    }

    pub fn transition(self, to: BotStatus) -> Result<BotStatus, AppError> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(AppError::InvalidTransition { from: self, to })
        }
    }
}

impl fmt::Display for BotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Share of `initial_capital` committed per entry, in percent.
    pub position_size_pct: f64,
    pub initial_capital: f64,
    #[serde(default)]
    pub stop_loss_pct: Option<f64>,
    #[serde(default)]
    pub take_profit_pct: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
    #[serde(default)]
    pub testnet: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotConfig {
    pub symbol: String,
    pub timeframe: String,
    pub strategy: StrategyConfig,
    pub risk: RiskConfig,
    #[serde(default)]
    pub account: AccountConfig,
}

const QUOTE_ASSETS: [&str; 7] = ["USDT", "USDC", "BUSD", "FDUSD", "BTC", "ETH", "BNB"];

/// Split a spot symbol such as `BTCUSDT` into `("BTC", "USDT")`.
pub fn split_symbol_assets(symbol: &str) -> Option<(&str, &str)> {
    for quote in QUOTE_ASSETS {
        if let Some(base) = symbol.strip_suffix(quote) {
            if !base.is_empty() {
                return Some((base, quote));
            }
        }
    }
    None
}

impl BotConfig {
    /// Reject configurations that can never trade. Called before any
    /// exchange call so a bad config fails fast.
    pub fn validate(&self) -> Result<(), AppError> {
        let symbol = self.symbol.trim();
        if symbol.is_empty()
            || symbol != self.symbol
            || !symbol
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        {
            return Err(AppError::InvalidConfig(format!(
                "malformed symbol '{}': expected uppercase pair like BTCUSDT",
                self.symbol
            )));
        }
        if split_symbol_assets(symbol).is_none() {
            return Err(AppError::InvalidConfig(format!(
                "symbol '{}' has no supported quote asset",
                self.symbol
            )));
        }
        parse_interval_ms(&self.timeframe)
            .map_err(|e| AppError::InvalidConfig(format!("timeframe: {:#}", e)))?;
        self.strategy.validate()?;

        let risk = &self.risk;
        if !(risk.position_size_pct > 0.0 && risk.position_size_pct <= 100.0) {
            return Err(AppError::InvalidConfig(format!(
                "position_size_pct must be in (0, 100], got {}",
                risk.position_size_pct
            )));
        }
        if !(risk.initial_capital.is_finite() && risk.initial_capital > 0.0) {
            return Err(AppError::InvalidConfig(format!(
                "initial_capital must be positive, got {}",
                risk.initial_capital
            )));
        }
        for (name, value) in [
            ("stop_loss_pct", risk.stop_loss_pct),
            ("take_profit_pct", risk.take_profit_pct),
        ] {
            if let Some(v) = value {
                if !(v > 0.0 && v < 100.0) {
                    return Err(AppError::InvalidConfig(format!(
                        "{} must be in (0, 100), got {}",
                        name, v
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn assets(&self) -> Option<(&str, &str)> {
        split_symbol_assets(&self.symbol)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bot {
    pub id: String,
    pub name: String,
    pub status: BotStatus,
    pub config: BotConfig,
    pub total_trades: u64,
    pub total_profit: f64,
    pub win_rate: f64,
    pub last_error: Option<String>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Bot {
    pub fn new(name: &str, config: BotConfig) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            status: BotStatus::Idle,
            config,
            total_trades: 0,
            total_profit: 0.0,
            win_rate: 0.0,
            last_error: None,
            last_run_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Copy safe to hand to API callers: the account secret is masked.
    pub fn redacted(&self) -> Self {
        let mut out = self.clone();
        if !out.config.account.api_secret.is_empty() {
            out.config.account.api_secret = "***".to_string();
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_table_is_exhaustive() {
        use BotStatus::*;
        let all = [Idle, Running, Stopped, Error];
        let allowed = [
            (Idle, Running),
            (Stopped, Running),
            (Running, Stopped),
            (Running, Error),
            (Error, Idle),
        ];
        for from in all {
            for to in all {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{} -> {}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn status_strings_round_trip() {
        for s in [
            BotStatus::Idle,
            BotStatus::Running,
            BotStatus::Stopped,
            BotStatus::Error,
        ] {
            assert_eq!(BotStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(BotStatus::parse("paused"), None);
    }

    #[test]
    fn split_symbol_prefers_listed_quotes() {
        assert_eq!(split_symbol_assets("BTCUSDT"), Some(("BTC", "USDT")));
        assert_eq!(split_symbol_assets("ETHBTC"), Some(("ETH", "BTC")));
        assert_eq!(split_symbol_assets("USDT"), None);
    }
}
