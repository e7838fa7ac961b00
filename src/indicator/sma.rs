/// Simple Moving Average using a ring buffer for O(1) push.
#[derive(Debug, Clone)]
pub struct Sma {
    period: usize,
    buffer: Vec<f64>,
    head: usize,
    count: usize,
    sum: f64,
}

impl Sma {
    pub fn new(period: usize) -> Self {
        assert!(period > 0, "SMA period must be > 0");
        Self {
            period,
            buffer: vec![0.0; period],
            head: 0,
            count: 0,
            sum: 0.0,
        }
    }

    /// Push a new value, return the current SMA if enough data.
    pub fn push(&mut self, value: f64) -> Option<f64> {
        if self.count >= self.period {
            self.sum -= self.buffer[self.head];
        }
        self.buffer[self.head] = value;
        self.sum += value;
        self.head = (self.head + 1) % self.period;
        if self.count < self.period {
            self.count += 1;
        }
        self.value()
    }

    pub fn value(&self) -> Option<f64> {
        if self.is_ready() {
            Some(self.sum / self.period as f64)
        } else {
            None
        }
    }

    /// Population standard deviation of the current window.
    pub fn std_dev(&self) -> Option<f64> {
        let mean = self.value()?;
        let variance = self
            .buffer
            .iter()
            .map(|v| (v - mean).powi(2))
            .sum::<f64>()
            / self.period as f64;
        Some(variance.sqrt())
    }

    pub fn is_ready(&self) -> bool {
        self.count >= self.period
    }
}

/// SMA aligned to the input: index `i` is `None` until `period` values exist.
pub fn sma_series(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut sma = Sma::new(period);
    values.iter().map(|v| sma.push(*v)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn std_dev_of_constant_window_is_zero() {
        let mut sma = Sma::new(3);
        assert_eq!(sma.std_dev(), None);
        for _ in 0..3 {
            sma.push(5.0);
        }
        assert!(sma.std_dev().unwrap().abs() < f64::EPSILON);
    }

    #[test]
    fn std_dev_tracks_the_ring_window() {
        let mut sma = Sma::new(2);
        sma.push(100.0);
        sma.push(1.0);
        sma.push(3.0); // window [3, 1]
        assert!((sma.std_dev().unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn series_is_index_aligned() {
        let out = sma_series(&[1.0, 2.0, 3.0, 4.0], 3);
        assert_eq!(out.len(), 4);
        assert_eq!(out[0], None);
        assert_eq!(out[1], None);
        assert!((out[2].unwrap() - 2.0).abs() < f64::EPSILON);
        assert!((out[3].unwrap() - 3.0).abs() < f64::EPSILON);
    }
}
