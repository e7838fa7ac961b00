use serde::{Deserialize, Serialize};

use crate::model::candle::Candle;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IchimokuParams {
    pub tenkan_period: usize,
    pub kijun_period: usize,
    pub senkou_b_period: usize,
}

impl Default for IchimokuParams {
    fn default() -> Self {
        Self {
            tenkan_period: 9,
            kijun_period: 26,
            senkou_b_period: 52,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IchimokuPoint {
    pub tenkan: Option<f64>,
    pub kijun: Option<f64>,
    /// Cloud boundary at this index, built from data ending `kijun_period`
    /// candles earlier.
    pub senkou_a: Option<f64>,
    pub senkou_b: Option<f64>,
}

/// Midpoint of the highest high and lowest low over the `period` candles
/// ending at `end` (inclusive). `None` when the window does not fit.
fn channel_mid(candles: &[Candle], end: usize, period: usize) -> Option<f64> {
    if period == 0 || end >= candles.len() || end + 1 < period {
        return None;
    }
    let window = &candles[end + 1 - period..=end];
    let high = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
    let low = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);
    Some((high + low) / 2.0)
}

pub fn ichimoku_series(candles: &[Candle], params: &IchimokuParams) -> Vec<IchimokuPoint> {
    let shift = params.kijun_period;
    let tenkan: Vec<Option<f64>> = (0..candles.len())
        .map(|i| channel_mid(candles, i, params.tenkan_period))
        .collect();
    let kijun: Vec<Option<f64>> = (0..candles.len())
        .map(|i| channel_mid(candles, i, params.kijun_period))
        .collect();

    (0..candles.len())
        .map(|i| {
            let source = i.checked_sub(shift);
            let senkou_a = source.and_then(|j| match (tenkan[j], kijun[j]) {
                (Some(t), Some(k)) => Some((t + k) / 2.0),
                _ => None,
            });
            let senkou_b = source.and_then(|j| channel_mid(candles, j, params.senkou_b_period));
            IchimokuPoint {
                tenkan: tenkan[i],
                kijun: kijun[i],
                senkou_a,
                senkou_b,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(i: u64, high: f64, low: f64) -> Candle {
        Candle {
            open_time: i * 60_000,
            open: low,
            high,
            low,
            close: (high + low) / 2.0,
            volume: 1.0,
            close_time: i * 60_000 + 59_999,
        }
    }

    #[test]
    fn channel_mid_uses_inclusive_window() {
        let candles = vec![candle(0, 10.0, 8.0), candle(1, 14.0, 9.0), candle(2, 12.0, 6.0)];
        assert_eq!(channel_mid(&candles, 1, 3), None);
        assert!((channel_mid(&candles, 2, 3).unwrap() - 10.0).abs() < f64::EPSILON);
        assert!((channel_mid(&candles, 2, 1).unwrap() - 9.0).abs() < f64::EPSILON);
    }
}
