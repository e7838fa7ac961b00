//! Indicator calculation over an ordered candle series.
//!
//! [`compute`] is pure: it recomputes every requested indicator from the full
//! window on each call and returns exactly one [`IndicatorSnapshot`] per input
//! candle. Indices without enough history carry `None` in the affected fields.

pub mod bollinger;
pub mod ichimoku;
pub mod rsi;
pub mod sma;

use serde::Serialize;

use crate::error::AppError;
use crate::model::candle::{validate_series, Candle};

use self::bollinger::bollinger_series;
use self::ichimoku::{ichimoku_series, IchimokuParams};
use self::rsi::rsi_series;
use self::sma::sma_series;

/// Longest lookback any indicator may use. Binance serves at most 1000
/// klines per request, so a longer window could never warm up.
pub const MAX_PERIOD: usize = 1000;

/// Which indicator families to compute. Families left as `None` produce
/// `None` fields in every snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IndicatorParams {
    pub ma: Option<(usize, usize)>,
    pub rsi_period: Option<usize>,
    pub ichimoku: Option<IchimokuParams>,
    pub bollinger: Option<(usize, f64)>,
}

impl IndicatorParams {
    /// Candles needed before every requested field is populated at the last
    /// index.
    pub fn warmup_len(&self) -> usize {
        let mut need = 1;
        if let Some((fast, slow)) = self.ma {
            // Crossover detection compares against the previous index too.
            need = need.max(fast.max(slow).saturating_add(1));
        }
        if let Some(period) = self.rsi_period {
            need = need.max(period.saturating_add(1));
        }
        if let Some(p) = self.ichimoku {
            let widest = p.senkou_b_period.max(p.tenkan_period).max(p.kijun_period);
            need = need.max(p.kijun_period.saturating_add(widest));
        }
        if let Some((period, _)) = self.bollinger {
            need = need.max(period);
        }
        need
    }

    pub fn validate(&self) -> Result<(), AppError> {
        let mut periods = Vec::new();
        if let Some((fast, slow)) = self.ma {
            periods.extend([("ma.fast", fast), ("ma.slow", slow)]);
        }
        if let Some(period) = self.rsi_period {
            periods.push(("rsi.period", period));
        }
        if let Some(p) = self.ichimoku {
            periods.extend([
                ("ichimoku.tenkan", p.tenkan_period),
                ("ichimoku.kijun", p.kijun_period),
                ("ichimoku.senkou_b", p.senkou_b_period),
            ]);
        }
        if let Some((period, std_dev)) = self.bollinger {
            periods.push(("bollinger.period", period));
            if !(std_dev.is_finite() && std_dev > 0.0) {
                return Err(AppError::InvalidConfig(format!(
                    "bollinger.std_dev must be positive, got {}",
                    std_dev
                )));
            }
        }
        match periods
            .into_iter()
            .find(|(_, p)| *p == 0 || *p > MAX_PERIOD)
        {
            Some((name, p)) => Err(AppError::InvalidConfig(format!(
                "{} must be in 1..={}, got {}",
                name, MAX_PERIOD, p
            ))),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndicatorSnapshot {
    /// Open time of the candle this snapshot belongs to, in ms.
    pub time: u64,
    pub close: f64,
    pub sma_fast: Option<f64>,
    pub sma_slow: Option<f64>,
    pub rsi: Option<f64>,
    pub tenkan: Option<f64>,
    pub kijun: Option<f64>,
    pub senkou_a: Option<f64>,
    pub senkou_b: Option<f64>,
    pub bb_upper: Option<f64>,
    pub bb_middle: Option<f64>,
    pub bb_lower: Option<f64>,
}

pub fn compute(
    candles: &[Candle],
    params: &IndicatorParams,
) -> Result<Vec<IndicatorSnapshot>, AppError> {
    validate_series(candles)?;
    params.validate()?;

    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let mut out: Vec<IndicatorSnapshot> = candles
        .iter()
        .map(|c| IndicatorSnapshot {
            time: c.open_time,
            close: c.close,
            ..IndicatorSnapshot::default()
        })
        .collect();

    if let Some((fast, slow)) = params.ma {
        let fast = sma_series(&closes, fast);
        let slow = sma_series(&closes, slow);
        for (i, snap) in out.iter_mut().enumerate() {
            snap.sma_fast = fast[i];
            snap.sma_slow = slow[i];
        }
    }

    if let Some(period) = params.rsi_period {
        for (snap, value) in out.iter_mut().zip(rsi_series(&closes, period)) {
            snap.rsi = value;
        }
    }

    if let Some(p) = params.ichimoku {
        for (snap, point) in out.iter_mut().zip(ichimoku_series(candles, &p)) {
            snap.tenkan = point.tenkan;
            snap.kijun = point.kijun;
            snap.senkou_a = point.senkou_a;
            snap.senkou_b = point.senkou_b;
        }
    }

    if let Some((period, std_dev)) = params.bollinger {
        for (snap, band) in out
            .iter_mut()
            .zip(bollinger_series(&closes, period, std_dev))
        {
            snap.bb_upper = band.map(|b| b.upper);
            snap.bb_middle = band.map(|b| b.middle);
            snap.bb_lower = band.map(|b| b.lower);
        }
    }

    Ok(out)
}
