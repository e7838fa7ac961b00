mod common;

use botdesk::error::AppError;
use botdesk::indicator::ichimoku::IchimokuParams;
use botdesk::indicator::rsi::{rsi_series, Rsi};
use botdesk::indicator::{compute, IndicatorParams, MAX_PERIOD};

use common::{candle, candles_from_closes, rising};

fn approx(actual: Option<f64>, expected: f64) {
    let v = actual.unwrap_or_else(|| panic!("expected {}, got None", expected));
    assert!((v - expected).abs() < 1e-9, "expected {}, got {}", expected, v);
}

#[test]
fn rsi_short_series_has_no_value() {
    let closes = [10.0, 11.0, 12.0, 11.5, 12.5];
    assert!(rsi_series(&closes, 14).iter().all(Option::is_none));
    assert!(rsi_series(&closes, 5).iter().all(Option::is_none));
}

#[test]
fn rsi_without_losses_is_100() {
    let closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
    let series = rsi_series(&closes, 14);
    assert!(series[13].is_none());
    approx(series[14], 100.0);
    approx(series[19], 100.0);
}

#[test]
fn rsi_without_gains_is_0() {
    let closes: Vec<f64> = (0..20).map(|i| 100.0 - i as f64).collect();
    approx(*rsi_series(&closes, 14).last().unwrap(), 0.0);
}

#[test]
fn rsi_uses_wilder_smoothing_after_seed() {
    let mut rsi = Rsi::new(2);
    assert_eq!(rsi.push(10.0), None);
    assert_eq!(rsi.push(11.0), None);
    // Seed: avg gain 0.5, avg loss 0.5.
    approx(rsi.push(10.0), 50.0);
    // avg gain (0.5 + 2) / 2 = 1.25, avg loss 0.5 / 2 = 0.25, rs = 5.
    approx(rsi.push(12.0), 100.0 - 100.0 / 6.0);
}

#[test]
fn moving_averages_fill_after_their_periods() {
    let snaps = compute(
        &candles_from_closes(&[1.0, 2.0, 3.0, 4.0, 5.0]),
        &IndicatorParams {
            ma: Some((2, 4)),
            ..IndicatorParams::default()
        },
    )
    .expect("compute");
    assert_eq!(snaps.len(), 5);
    assert!(snaps[0].sma_fast.is_none());
    approx(snaps[1].sma_fast, 1.5);
    assert!(snaps[2].sma_slow.is_none());
    approx(snaps[3].sma_slow, 2.5);
    approx(snaps[4].sma_fast, 4.5);
    assert!(snaps.iter().all(|s| s.rsi.is_none() && s.tenkan.is_none()));
}

#[test]
fn ichimoku_cloud_is_projected_by_kijun_period() {
    // high = close + 0.5 and low = close - 0.5, so every channel midpoint is
    // the midpoint of the window's highest and lowest close.
    let candles = candles_from_closes(&[10.0, 12.0, 11.0, 15.0, 14.0, 18.0, 17.0, 20.0]);
    let params = IchimokuParams {
        tenkan_period: 2,
        kijun_period: 3,
        senkou_b_period: 4,
    };
    let snaps = compute(
        &candles,
        &IndicatorParams {
            ichimoku: Some(params),
            ..IndicatorParams::default()
        },
    )
    .expect("compute");

    assert!(snaps[0].tenkan.is_none());
    approx(snaps[1].tenkan, 11.0);
    assert!(snaps[1].kijun.is_none());
    approx(snaps[2].kijun, 11.0);

    // Cloud values at index i come from index i - 3.
    assert!(snaps[4].senkou_a.is_none());
    approx(snaps[5].senkou_a, (11.5 + 11.0) / 2.0);
    assert!(snaps[5].senkou_b.is_none());
    approx(snaps[6].senkou_a, 13.0);
    approx(snaps[6].senkou_b, 12.5);
    approx(snaps[7].senkou_b, (15.0 + 11.0) / 2.0);
}

#[test]
fn snapshots_carry_candle_time_and_close() {
    let candles = rising(3, 50.0);
    let snaps = compute(&candles, &IndicatorParams::default()).expect("compute");
    for (snap, c) in snaps.iter().zip(&candles) {
        assert_eq!(snap.time, c.open_time);
        assert_eq!(snap.close, c.close);
    }
}

#[test]
fn unordered_candles_are_rejected() {
    let candles = vec![candle(2, 10.0), candle(1, 11.0)];
    let err = compute(&candles, &IndicatorParams::default()).unwrap_err();
    assert!(matches!(err, AppError::InvalidConfig(_)));

    let duplicate = vec![candle(1, 10.0), candle(1, 11.0)];
    assert!(compute(&duplicate, &IndicatorParams::default()).is_err());
}

#[test]
fn zero_period_is_rejected() {
    let err = compute(
        &rising(5, 1.0),
        &IndicatorParams {
            rsi_period: Some(0),
            ..IndicatorParams::default()
        },
    )
    .unwrap_err();
    assert!(matches!(err, AppError::InvalidConfig(_)));
}

#[test]
fn oversized_periods_are_rejected_before_allocating() {
    let err = compute(
        &rising(5, 1.0),
        &IndicatorParams {
            ma: Some((1, usize::MAX / 4)),
            ..IndicatorParams::default()
        },
    )
    .unwrap_err();
    assert!(matches!(err, AppError::InvalidConfig(_)));

    let huge = IndicatorParams {
        ichimoku: Some(IchimokuParams {
            tenkan_period: 9,
            kijun_period: usize::MAX,
            senkou_b_period: usize::MAX,
        }),
        ..IndicatorParams::default()
    };
    assert!(compute(&rising(5, 1.0), &huge).is_err());
    assert_eq!(huge.warmup_len(), usize::MAX);

    let widest = IndicatorParams {
        rsi_period: Some(MAX_PERIOD),
        ..IndicatorParams::default()
    };
    assert!(compute(&rising(5, 1.0), &widest).is_ok());
}

#[test]
fn warmup_covers_the_projected_cloud() {
    let params = IndicatorParams {
        ichimoku: Some(IchimokuParams::default()),
        ..IndicatorParams::default()
    };
    let need = params.warmup_len();
    assert_eq!(need, 26 + 52);

    let closes: Vec<f64> = (0..need).map(|i| 100.0 + (i % 7) as f64).collect();
    let snaps = compute(&candles_from_closes(&closes), &params).expect("compute");
    let last = snaps.last().unwrap();
    assert!(last.senkou_a.is_some() && last.senkou_b.is_some());
    let short = compute(&candles_from_closes(&closes[..need - 1]), &params).expect("compute");
    assert!(short.last().unwrap().senkou_b.is_none());
}
