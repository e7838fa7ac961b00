use super::Decision;
use crate::indicator::IndicatorSnapshot;
use crate::model::signal::Signal;

pub fn decide(current: &IndicatorSnapshot, oversold: f64, overbought: f64) -> Decision {
    let Some(rsi) = current.rsi else {
        return Decision::hold("rsi not ready");
    };

    if rsi <= oversold {
        Decision::new(
            Signal::Buy,
            format!("rsi {:.2} <= oversold {:.2}", rsi, oversold),
        )
    } else if rsi >= overbought {
        Decision::new(
            Signal::Sell,
            format!("rsi {:.2} >= overbought {:.2}", rsi, overbought),
        )
    } else {
        Decision::hold(format!("rsi {:.2} neutral", rsi))
    }
}
