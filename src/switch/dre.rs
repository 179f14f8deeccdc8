use crate::time::{Delta, Time};

/// A rate-limited EWMA estimator of link congestion.
///
/// The estimate is recomputed at most once per `interval`; in between, samples are ignored and
/// the cached estimate is returned.
#[derive(Debug, Clone, Copy, derive_new::new)]
pub struct Dre {
    alpha: f64,
    interval: Delta,
    #[new(default)]
    last_update: Time,
    #[new(default)]
    estimate: f64,
}

impl Dre {
    pub fn estimate(&self) -> f64 {
        self.estimate
    }

    pub fn sample(&mut self, now: Time, utilization: f64) -> f64 {
        if now.saturating_since(self.last_update) < self.interval {
            return self.estimate;
        }
        self.estimate = self.alpha * utilization + (1.0 - self.alpha) * self.estimate;
        self.last_update = now;
        self.estimate
    }
}
