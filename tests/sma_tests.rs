use botdesk::indicator::sma::{sma_series, Sma};

fn approx(actual: Option<f64>, expected: f64) {
    let v = actual.unwrap_or_else(|| panic!("expected {}, got None", expected));
    assert!((v - expected).abs() < 1e-9, "expected {}, got {}", expected, v);
}

#[test]
fn window_fills_then_slides_over_closes() {
    let mut sma = Sma::new(3);
    assert_eq!(sma.push(101.0), None);
    assert_eq!(sma.push(102.0), None);
    assert!(!sma.is_ready());
    assert_eq!(sma.std_dev(), None);

    approx(sma.push(103.0), 102.0);
    approx(sma.std_dev(), (2.0_f64 / 3.0).sqrt());

    // Oldest close drops out as the ring wraps.
    approx(sma.push(110.0), 105.0);
    approx(sma.push(96.0), 103.0);
    approx(sma.value(), 103.0);
    // Window [103, 110, 96]: deviations 0, 7, -7.
    approx(sma.std_dev(), (98.0_f64 / 3.0).sqrt());
}

#[test]
fn one_period_tracks_the_last_close() {
    let mut sma = Sma::new(1);
    approx(sma.push(42.0), 42.0);
    approx(sma.push(99.0), 99.0);
    approx(sma.std_dev(), 0.0);
}

#[test]
fn flat_market_has_zero_deviation() {
    let mut sma = Sma::new(4);
    for _ in 0..6 {
        sma.push(250.5);
    }
    approx(sma.value(), 250.5);
    approx(sma.std_dev(), 0.0);
}

#[test]
fn series_matches_streaming_pushes() {
    let closes = [10.0, 20.0, 30.0, 40.0, 50.0, 60.0];
    let series = sma_series(&closes, 3);
    assert_eq!(series.len(), closes.len());
    assert!(series[0].is_none() && series[1].is_none());

    let mut sma = Sma::new(3);
    for (close, from_series) in closes.iter().zip(&series) {
        assert_eq!(sma.push(*close), *from_series);
    }
    approx(series[5], 50.0);
}

#[test]
fn long_runs_do_not_drift_from_a_naive_mean() {
    let mut sma = Sma::new(20);
    let mut window: Vec<f64> = Vec::new();

    for i in 0..5_000u64 {
        // Sawtooth price path around 30k.
        let close = 30_000.0 + (i % 97) as f64 * 1.25 - (i % 13) as f64 * 3.5;
        sma.push(close);
        window.push(close);
        if window.len() > 20 {
            window.remove(0);
        }

        if let Some(mean) = sma.value() {
            let naive = window.iter().sum::<f64>() / window.len() as f64;
            assert!(
                (mean - naive).abs() < 1e-6,
                "drift at i={}: ring={} naive={}",
                i,
                mean,
                naive
            );
        }
    }
}
