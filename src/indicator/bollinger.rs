use super::sma::Sma;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BollingerBand {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

/// Bollinger bands (SMA +/- `std_dev` population deviations), index aligned.
pub fn bollinger_series(closes: &[f64], period: usize, std_dev: f64) -> Vec<Option<BollingerBand>> {
    let mut sma = Sma::new(period);
    closes
        .iter()
        .map(|c| {
            let middle = sma.push(*c)?;
            let dev = sma.std_dev()? * std_dev;
            Some(BollingerBand {
                upper: middle + dev,
                middle,
                lower: middle - dev,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bands_widen_with_dispersion() {
        let out = bollinger_series(&[1.0, 3.0, 1.0, 3.0], 2, 2.0);
        assert_eq!(out[0], None);
        let band = out[1].unwrap();
        assert!((band.middle - 2.0).abs() < 1e-12);
        assert!((band.upper - 4.0).abs() < 1e-12);
        assert!((band.lower - 0.0).abs() < 1e-12);
    }
}
