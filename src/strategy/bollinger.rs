use super::Decision;
use crate::indicator::IndicatorSnapshot;
use crate::model::signal::Signal;

pub fn decide(current: &IndicatorSnapshot) -> Decision {
    let (Some(upper), Some(lower)) = (current.bb_upper, current.bb_lower) else {
        return Decision::hold("bollinger bands not ready");
    };
    if upper - lower <= f64::EPSILON {
        return Decision::hold("bollinger bands collapsed");
    }

    if current.close <= lower {
        Decision::new(
            Signal::Buy,
            format!("close {:.4} at/below lower band {:.4}", current.close, lower),
        )
    } else if current.close >= upper {
        Decision::new(
            Signal::Sell,
            format!("close {:.4} at/above upper band {:.4}", current.close, upper),
        )
    } else {
        Decision::hold("inside bands")
    }
}
