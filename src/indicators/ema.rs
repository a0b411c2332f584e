/// Streaming exponential moving average.
///
/// The first sample seeds the average; every later sample moves it by
/// `alpha = 2 / (length + 1)` of the distance to the new value.
#[derive(Debug, Clone)]
pub struct Ema {
    length: usize,
    alpha: f64,
    value: Option<f64>,
    count: usize,
}

impl Ema {
    pub fn new(length: usize) -> Self {
        let length = length.max(1);
        Self {
            length,
            alpha: 2.0 / (length as f64 + 1.0),
            value: None,
            count: 0,
        }
    }

    pub fn update(&mut self, x: f64) -> f64 {
        let next = match self.value {
            None => x,
            Some(v) => v + (x - v) * self.alpha,
        };
        self.value = Some(next);
        self.count += 1;
        next
    }

    /// Current value, even before the warm-up length is reached.
    pub fn value(&self) -> Option<f64> {
        self.value
    }

    /// True once `length` samples have been observed.
    pub fn is_ready(&self) -> bool {
        self.count >= self.length
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ema_seeds_with_first_value() {
        let mut ema = Ema::new(9);
        assert_eq!(ema.value(), None);
        assert_eq!(ema.update(100.0), 100.0);
    }

    #[test]
    fn test_ema_nine_moves_one_fifth() {
        let mut ema = Ema::new(9);
        ema.update(100.0);
        let v = ema.update(120.0);
        assert!((v - 104.0).abs() < 1e-9);
    }

    #[test]
    fn test_ema_ready_after_length_samples() {
        let mut ema = Ema::new(3);
        ema.update(1.0);
        ema.update(2.0);
        assert!(!ema.is_ready());
        ema.update(3.0);
        assert!(ema.is_ready());
    }

    #[test]
    fn test_ema_constant_series_is_flat() {
        let mut ema = Ema::new(21);
        for _ in 0..50 {
            assert_eq!(ema.update(42.0), 42.0);
        }
    }
}
