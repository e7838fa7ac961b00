use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: u64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub close_time: u64,
}

/// Check that a series is strictly ascending by open time (which also rules
/// out duplicate timestamps) and carries finite prices.
pub fn validate_series(candles: &[Candle]) -> Result<(), AppError> {
    for (i, c) in candles.iter().enumerate() {
        if !(c.open.is_finite() && c.high.is_finite() && c.low.is_finite() && c.close.is_finite())
        {
            return Err(AppError::InvalidConfig(format!(
                "candle {} at {} has non-finite prices",
                i, c.open_time
            )));
        }
        if i > 0 && candles[i - 1].open_time >= c.open_time {
            return Err(AppError::InvalidConfig(format!(
                "candles must be strictly ascending: index {} ({}) follows {}",
                i,
                c.open_time,
                candles[i - 1].open_time
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(open_time: u64, close: f64) -> Candle {
        Candle {
            open_time,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 1.0,
            close_time: open_time + 59_999,
        }
    }

    #[test]
    fn ascending_series_is_valid() {
        let series = vec![candle(0, 1.0), candle(60_000, 2.0), candle(120_000, 3.0)];
        assert!(validate_series(&series).is_ok());
        assert!(validate_series(&[]).is_ok());
    }

    #[test]
    fn duplicate_or_descending_timestamps_are_rejected() {
        let dup = vec![candle(0, 1.0), candle(0, 2.0)];
        assert!(validate_series(&dup).is_err());

        let desc = vec![candle(120_000, 1.0), candle(60_000, 2.0)];
        assert!(validate_series(&desc).is_err());
    }

    #[test]
    fn nan_price_is_rejected() {
        let mut c = candle(0, 1.0);
        c.close = f64::NAN;
        assert!(validate_series(&[c]).is_err());
    }
}
