use serde::Serialize;

use super::Decision;
use crate::indicator::IndicatorSnapshot;
use crate::model::signal::Signal;

/// Price relative to the cloud is worth two points; the Tenkan/Kijun cross
/// and the cloud colour are worth one each.
const CLOUD_POSITION_POINTS: u8 = 2;
const TK_CROSS_POINTS: u8 = 1;
const CLOUD_COLOR_POINTS: u8 = 1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IchimokuScore {
    pub bullish: u8,
    pub bearish: u8,
}

impl IchimokuScore {
    pub fn signal(&self) -> Signal {
        if self.bullish > self.bearish {
            Signal::Buy
        } else if self.bearish > self.bullish {
            Signal::Sell
        } else {
            Signal::Hold
        }
    }
}

pub fn score(price: f64, tenkan: f64, kijun: f64, senkou_a: f64, senkou_b: f64) -> IchimokuScore {
    let mut s = IchimokuScore::default();

    let cloud_top = senkou_a.max(senkou_b);
    let cloud_bottom = senkou_a.min(senkou_b);
    if price > cloud_top {
        s.bullish += CLOUD_POSITION_POINTS;
    } else if price < cloud_bottom {
        s.bearish += CLOUD_POSITION_POINTS;
    }

    if tenkan > kijun {
        s.bullish += TK_CROSS_POINTS;
    } else if tenkan < kijun {
        s.bearish += TK_CROSS_POINTS;
    }

    if senkou_a > senkou_b {
        s.bullish += CLOUD_COLOR_POINTS;
    } else if senkou_a < senkou_b {
        s.bearish += CLOUD_COLOR_POINTS;
    }

    s
}

pub fn decide(current: &IndicatorSnapshot) -> Decision {
    let (Some(tenkan), Some(kijun), Some(senkou_a), Some(senkou_b)) = (
        current.tenkan,
        current.kijun,
        current.senkou_a,
        current.senkou_b,
    ) else {
        return Decision::hold("ichimoku lines not ready");
    };

    let s = score(current.close, tenkan, kijun, senkou_a, senkou_b);
    Decision {
        signal: s.signal(),
        reason: format!("ichimoku bullish={} bearish={}", s.bullish, s.bearish),
        score: Some(s),
    }
}
