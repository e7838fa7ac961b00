//! Signal decision shared by live execution and backtesting.
//!
//! Both paths call [`decide`] on the snapshots produced by
//! [`crate::indicator::compute`], so a strategy can never behave differently
//! in a backtest than it does live.

pub mod bollinger;
pub mod ichimoku;
pub mod ma_crossover;
pub mod rsi;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::indicator::ichimoku::IchimokuParams;
use crate::indicator::{IndicatorParams, IndicatorSnapshot};
use crate::model::order::OrderSide;
use crate::model::signal::Signal;
use crate::model::trade::ExitReason;

pub use self::ichimoku::IchimokuScore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StrategyConfig {
    MaCrossover {
        fast_period: usize,
        slow_period: usize,
    },
    Rsi {
        period: usize,
        oversold: f64,
        overbought: f64,
    },
    Ichimoku {
        #[serde(default = "default_tenkan")]
        tenkan_period: usize,
        #[serde(default = "default_kijun")]
        kijun_period: usize,
        #[serde(default = "default_senkou_b")]
        senkou_b_period: usize,
    },
    BollingerBands {
        period: usize,
        std_dev: f64,
    },
}

fn default_tenkan() -> usize {
    IchimokuParams::default().tenkan_period
}

fn default_kijun() -> usize {
    IchimokuParams::default().kijun_period
}

fn default_senkou_b() -> usize {
    IchimokuParams::default().senkou_b_period
}

impl StrategyConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            StrategyConfig::MaCrossover { .. } => "ma_crossover",
            StrategyConfig::Rsi { .. } => "rsi",
            StrategyConfig::Ichimoku { .. } => "ichimoku",
            StrategyConfig::BollingerBands { .. } => "bollinger_bands",
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        let invalid = |msg: String| Err(AppError::InvalidConfig(msg));
        match *self {
            StrategyConfig::MaCrossover {
                fast_period,
                slow_period,
            } => {
                if fast_period == 0 || fast_period >= slow_period {
                    return invalid(format!(
                        "ma_crossover needs 0 < fast_period < slow_period, got {}/{}",
                        fast_period, slow_period
                    ));
                }
            }
            StrategyConfig::Rsi {
                period,
                oversold,
                overbought,
            } => {
                if period < 2 {
                    return invalid(format!("rsi period must be >= 2, got {}", period));
                }
                let in_range = |v: f64| v > 0.0 && v < 100.0;
                if !in_range(oversold) || !in_range(overbought) || oversold >= overbought {
                    return invalid(format!(
                        "rsi thresholds need 0 < oversold < overbought < 100, got {}/{}",
                        oversold, overbought
                    ));
                }
            }
            StrategyConfig::Ichimoku {
                tenkan_period,
                kijun_period,
                senkou_b_period,
            } => {
                if tenkan_period == 0 || kijun_period == 0 || senkou_b_period == 0 {
                    return invalid("ichimoku periods must all be > 0".to_string());
                }
            }
            StrategyConfig::BollingerBands { period, std_dev } => {
                if period < 2 || !(std_dev.is_finite() && std_dev > 0.0) {
                    return invalid(format!(
                        "bollinger needs period >= 2 and std_dev > 0, got {}/{}",
                        period, std_dev
                    ));
                }
            }
        }
        self.indicator_params().validate()
    }

    /// Indicator families this strategy reads.
    pub fn indicator_params(&self) -> IndicatorParams {
        match *self {
            StrategyConfig::MaCrossover {
                fast_period,
                slow_period,
            } => IndicatorParams {
                ma: Some((fast_period, slow_period)),
                ..IndicatorParams::default()
            },
            StrategyConfig::Rsi { period, .. } => IndicatorParams {
                rsi_period: Some(period),
                ..IndicatorParams::default()
            },
            StrategyConfig::Ichimoku {
                tenkan_period,
                kijun_period,
                senkou_b_period,
            } => IndicatorParams {
                ichimoku: Some(IchimokuParams {
                    tenkan_period,
                    kijun_period,
                    senkou_b_period,
                }),
                ..IndicatorParams::default()
            },
            StrategyConfig::BollingerBands { period, std_dev } => IndicatorParams {
                bollinger: Some((period, std_dev)),
                ..IndicatorParams::default()
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    pub signal: Signal,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<IchimokuScore>,
}

impl Decision {
    pub fn hold(reason: impl Into<String>) -> Self {
        Self {
            signal: Signal::Hold,
            reason: reason.into(),
            score: None,
        }
    }

    pub(crate) fn new(signal: Signal, reason: impl Into<String>) -> Self {
        Self {
            signal,
            reason: reason.into(),
            score: None,
        }
    }
}

/// Map the latest snapshot (plus the one before it, for crossovers) to an
/// action. Missing indicator values always yield `Hold`.
pub fn decide(snapshots: &[IndicatorSnapshot], config: &StrategyConfig) -> Decision {
    let Some(current) = snapshots.last() else {
        return Decision::hold("no indicator data");
    };
    let previous = snapshots.len().checked_sub(2).map(|i| &snapshots[i]);

    match *config {
        StrategyConfig::MaCrossover { .. } => ma_crossover::decide(previous, current),
        StrategyConfig::Rsi {
            oversold,
            overbought,
            ..
        } => rsi::decide(current, oversold, overbought),
        StrategyConfig::Ichimoku { .. } => ichimoku::decide(current),
        StrategyConfig::BollingerBands { .. } => bollinger::decide(current),
    }
}

/// What to do with the book after a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionAction {
    Stay,
    Open(OrderSide),
    Close(ExitReason),
}

/// Combine the open position (if any), its protective exit and the latest
/// signal. Protective exits win; an opposite signal closes without
/// reversing; a flat book opens on any non-hold signal.
pub fn plan(
    open_side: Option<OrderSide>,
    protective_exit: Option<ExitReason>,
    signal: Signal,
) -> PositionAction {
    match (open_side, protective_exit, signal.side()) {
        (Some(_), Some(reason), _) => PositionAction::Close(reason),
        (Some(held), None, Some(side)) if side != held => PositionAction::Close(ExitReason::Signal),
        (Some(_), None, _) => PositionAction::Stay,
        (None, _, Some(side)) => PositionAction::Open(side),
        (None, _, None) => PositionAction::Stay,
    }
}
