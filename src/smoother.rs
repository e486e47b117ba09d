use crate::circular_queue::CircularQueue;
use crate::math;
use nalgebra as na;

pub const DEFAULT_ALPHA: f64 = 0.2;
pub const DEFAULT_HISTORY: usize = 32;

/// Exponential moving average over raw per-step homographies, plus the
/// running composition of the smoothed steps applied to frames.
///
/// Lower `alpha` gives a smoother but slower to react correction, higher
/// values follow the raw estimate closely and let jitter through.
#[derive(Debug, Clone)]
pub struct TemporalSmoother {
    alpha: f64,
    smoothed: na::Matrix3<f64>,
    accumulated: na::Matrix3<f64>,
    history: CircularQueue<na::Matrix3<f64>>,
}

impl TemporalSmoother {
    /// `alpha` must lie in (0, 1); configuration validation enforces it.
    pub fn new(alpha: f64, history_len: usize) -> Self {
        debug_assert!(alpha > 0.0 && alpha < 1.0);

        Self {
            alpha,
            smoothed: na::Matrix3::identity(),
            accumulated: na::Matrix3::identity(),
            history: CircularQueue::with_capacity(history_len),
        }
    }

    #[inline]
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Current smoothed per-step homography `S`.
    #[inline]
    pub fn smoothed(&self) -> &na::Matrix3<f64> {
        &self.smoothed
    }

    /// Running frame correction `A`.
    #[inline]
    pub fn accumulated(&self) -> &na::Matrix3<f64> {
        &self.accumulated
    }

    /// Most recent raw homographies, newest first.
    #[inline]
    pub fn history(&self) -> impl Iterator<Item = &na::Matrix3<f64>> {
        self.history.iter()
    }

    /// `S <- (1 - a) S + a H`, normalized by `S[2,2]`. A blend that can not
    /// be normalized leaves `S` untouched and returns `false`.
    pub fn smooth(&mut self, raw: &na::Matrix3<f64>) -> bool {
        if !raw.iter().all(|v| v.is_finite()) {
            return false;
        }

        self.history.push(*raw);

        let blended = self.smoothed * (1.0 - self.alpha) + raw * self.alpha;
        match math::normalize_projective(&blended) {
            Some(s) => {
                self.smoothed = s;
                true
            }
            None => false,
        }
    }

    /// Smooths `raw` and compounds the result into the running correction,
    /// `A <- S A`. Returns the new `A`.
    pub fn push(&mut self, raw: &na::Matrix3<f64>) -> na::Matrix3<f64> {
        if self.smooth(raw) {
            if let Some(a) = math::normalize_projective(&(self.smoothed * self.accumulated)) {
                self.accumulated = a;
            }
        }

        self.accumulated
    }
}

impl Default for TemporalSmoother {
    fn default() -> Self {
        Self::new(DEFAULT_ALPHA, DEFAULT_HISTORY)
    }
}
