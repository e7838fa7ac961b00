use super::Decision;
use crate::indicator::IndicatorSnapshot;
use crate::model::signal::Signal;

/// Golden cross buys, death cross sells. Needs both averages on the current
/// and the previous candle.
pub fn decide(previous: Option<&IndicatorSnapshot>, current: &IndicatorSnapshot) -> Decision {
    let Some(previous) = previous else {
        return Decision::hold("moving averages need two candles");
    };
    let (Some(f), Some(s), Some(pf), Some(ps)) = (
        current.sma_fast,
        current.sma_slow,
        previous.sma_fast,
        previous.sma_slow,
    ) else {
        return Decision::hold("moving averages not ready");
    };

    if pf <= ps && f > s {
        Decision::new(Signal::Buy, format!("golden cross fast {:.4} > slow {:.4}", f, s))
    } else if pf >= ps && f < s {
        Decision::new(Signal::Sell, format!("death cross fast {:.4} < slow {:.4}", f, s))
    } else {
        Decision::hold("no crossover")
    }
}
