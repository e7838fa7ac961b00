use botdesk::indicator::IndicatorSnapshot;
use botdesk::model::signal::Signal;
use botdesk::strategy::ichimoku::score;
use botdesk::strategy::{decide, StrategyConfig};

fn rsi_cfg() -> StrategyConfig {
    StrategyConfig::Rsi {
        period: 14,
        oversold: 30.0,
        overbought: 70.0,
    }
}

fn ichimoku_cfg() -> StrategyConfig {
    StrategyConfig::Ichimoku {
        tenkan_period: 9,
        kijun_period: 26,
        senkou_b_period: 52,
    }
}

fn with_rsi(rsi: Option<f64>) -> IndicatorSnapshot {
    IndicatorSnapshot {
        close: 100.0,
        rsi,
        ..IndicatorSnapshot::default()
    }
}

fn with_ma(fast: f64, slow: f64) -> IndicatorSnapshot {
    IndicatorSnapshot {
        sma_fast: Some(fast),
        sma_slow: Some(slow),
        ..IndicatorSnapshot::default()
    }
}

fn cloud(price: f64, tenkan: f64, kijun: f64, senkou_a: f64, senkou_b: f64) -> IndicatorSnapshot {
    IndicatorSnapshot {
        close: price,
        tenkan: Some(tenkan),
        kijun: Some(kijun),
        senkou_a: Some(senkou_a),
        senkou_b: Some(senkou_b),
        ..IndicatorSnapshot::default()
    }
}

#[test]
fn rsi_thresholds_are_inclusive() {
    let cfg = rsi_cfg();
    assert_eq!(decide(&[with_rsi(Some(30.0))], &cfg).signal, Signal::Buy);
    assert_eq!(decide(&[with_rsi(Some(12.3))], &cfg).signal, Signal::Buy);
    assert_eq!(decide(&[with_rsi(Some(70.0))], &cfg).signal, Signal::Sell);
    assert_eq!(decide(&[with_rsi(Some(50.0))], &cfg).signal, Signal::Hold);
}

#[test]
fn missing_rsi_holds() {
    let d = decide(&[with_rsi(None)], &rsi_cfg());
    assert_eq!(d.signal, Signal::Hold);
    assert!(d.reason.contains("not ready"));
}

#[test]
fn ma_crossover_needs_a_cross() {
    let cfg = StrategyConfig::MaCrossover {
        fast_period: 5,
        slow_period: 20,
    };
    assert_eq!(
        decide(&[with_ma(9.0, 10.0), with_ma(11.0, 10.0)], &cfg).signal,
        Signal::Buy
    );
    assert_eq!(
        decide(&[with_ma(11.0, 10.0), with_ma(9.0, 10.0)], &cfg).signal,
        Signal::Sell
    );
    // Already above: no new cross.
    assert_eq!(
        decide(&[with_ma(11.0, 10.0), with_ma(12.0, 10.0)], &cfg).signal,
        Signal::Hold
    );
    // A single snapshot cannot show a cross.
    assert_eq!(decide(&[with_ma(11.0, 10.0)], &cfg).signal, Signal::Hold);
}

#[test]
fn bollinger_trades_band_touches() {
    let cfg = StrategyConfig::BollingerBands {
        period: 20,
        std_dev: 2.0,
    };
    let band = |close: f64| IndicatorSnapshot {
        close,
        bb_upper: Some(110.0),
        bb_middle: Some(100.0),
        bb_lower: Some(90.0),
        ..IndicatorSnapshot::default()
    };
    assert_eq!(decide(&[band(89.0)], &cfg).signal, Signal::Buy);
    assert_eq!(decide(&[band(110.0)], &cfg).signal, Signal::Sell);
    assert_eq!(decide(&[band(100.0)], &cfg).signal, Signal::Hold);
}

#[test]
fn ichimoku_below_cloud_with_bearish_colour_sells() {
    let s = score(111_087.99, 111_254.99, 111_252.02, 111_253.51, 111_523.80);
    assert_eq!(s.bullish, 1);
    assert_eq!(s.bearish, 3);
    assert_eq!(s.signal(), Signal::Sell);

    let d = decide(
        &[cloud(111_087.99, 111_254.99, 111_252.02, 111_253.51, 111_523.80)],
        &ichimoku_cfg(),
    );
    assert_eq!(d.signal, Signal::Sell);
    let recorded = d.score.expect("score recorded");
    assert_eq!((recorded.bullish, recorded.bearish), (1, 3));
}

#[test]
fn ichimoku_above_cloud_buys() {
    let s = score(120.0, 112.0, 110.0, 108.0, 105.0);
    assert_eq!((s.bullish, s.bearish), (4, 0));
    assert_eq!(s.signal(), Signal::Buy);
}

#[test]
fn ichimoku_tie_holds() {
    // Inside the cloud: tenkan above kijun (+1 bull), red cloud (+1 bear).
    let s = score(106.0, 107.0, 105.0, 104.0, 108.0);
    assert_eq!((s.bullish, s.bearish), (1, 1));
    assert_eq!(s.signal(), Signal::Hold);

    // Flat lines score nothing.
    let flat = score(100.0, 100.0, 100.0, 100.0, 100.0);
    assert_eq!((flat.bullish, flat.bearish), (0, 0));
}

#[test]
fn ichimoku_missing_lines_hold() {
    let mut snap = cloud(100.0, 101.0, 99.0, 98.0, 97.0);
    snap.senkou_b = None;
    assert_eq!(decide(&[snap], &ichimoku_cfg()).signal, Signal::Hold);
}

#[test]
fn ichimoku_periods_default_when_omitted() {
    let cfg: StrategyConfig = serde_json::from_str(r#"{"type":"ichimoku"}"#).expect("parse");
    assert_eq!(cfg, ichimoku_cfg());
    assert_eq!(cfg.kind(), "ichimoku");
}

#[test]
fn validation_rejects_unusable_parameters() {
    let bad = [
        StrategyConfig::MaCrossover {
            fast_period: 20,
            slow_period: 5,
        },
        StrategyConfig::Rsi {
            period: 1,
            oversold: 30.0,
            overbought: 70.0,
        },
        StrategyConfig::Rsi {
            period: 14,
            oversold: 0.0,
            overbought: 70.0,
        },
        StrategyConfig::Ichimoku {
            tenkan_period: 0,
            kijun_period: 26,
            senkou_b_period: 52,
        },
        StrategyConfig::BollingerBands {
            period: 20,
            std_dev: 0.0,
        },
        StrategyConfig::BollingerBands {
            period: 1_001,
            std_dev: 2.0,
        },
        StrategyConfig::Ichimoku {
            tenkan_period: 9,
            kijun_period: 26,
            senkou_b_period: usize::MAX,
        },
    ];
    for cfg in bad {
        assert!(cfg.validate().is_err(), "{:?} should be invalid", cfg);
    }
    assert!(rsi_cfg().validate().is_ok());
    assert!(ichimoku_cfg().validate().is_ok());
}
