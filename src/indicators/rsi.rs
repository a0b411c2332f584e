/// Floor for the average loss so a loss-free series reads as RSI 100.
const LOSS_EPSILON: f64 = 1e-9;

/// Streaming Wilder RSI.
///
/// The first delta sets the average gain and loss directly; later deltas are
/// smoothed with `avg = (avg * (length - 1) + component) / length`.
#[derive(Debug, Clone)]
pub struct Rsi {
    length: usize,
    prev: Option<f64>,
    avg_gain: f64,
    avg_loss: f64,
    deltas: usize,
    count: usize,
}

impl Rsi {
    pub fn new(length: usize) -> Self {
        Self {
            length: length.max(1),
            prev: None,
            avg_gain: 0.0,
            avg_loss: 0.0,
            deltas: 0,
            count: 0,
        }
    }

    /// Feed one close. Returns `None` for the very first sample.
    pub fn update(&mut self, x: f64) -> Option<f64> {
        self.count += 1;
        let prev = self.prev.replace(x)?;

        let delta = x - prev;
        let gain = delta.max(0.0);
        let loss = (-delta).max(0.0);

        if self.deltas == 0 {
            self.avg_gain = gain;
            self.avg_loss = loss;
        } else {
            let n = self.length as f64;
            self.avg_gain = (self.avg_gain * (n - 1.0) + gain) / n;
            self.avg_loss = (self.avg_loss * (n - 1.0) + loss) / n;
        }
        self.deltas += 1;

        Some(self.value_now())
    }

    fn value_now(&self) -> f64 {
        let rs = self.avg_gain / self.avg_loss.max(LOSS_EPSILON);
        100.0 - 100.0 / (1.0 + rs)
    }

    pub fn value(&self) -> Option<f64> {
        (self.deltas > 0).then(|| self.value_now())
    }

    pub fn is_ready(&self) -> bool {
        self.deltas > 0 && self.count >= self.length
    }
}
