//! Per-step motion estimation from tracked point correspondences.

use crate::homography::HomographySolver;
use crate::math;
use crate::sampler::PointSet;
use crate::smoother::TemporalSmoother;
use crate::transform::Transform;
use nalgebra as na;

/// Fewest valid tracked points a step needs to count as successful.
pub const MIN_CORRESPONDENCES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Estimate {
    /// Too few points survived tracking; the step is retried with the next frame.
    Stall,
    Update(Transform),
}

impl Estimate {
    #[inline]
    pub fn is_stall(&self) -> bool {
        matches!(self, Estimate::Stall)
    }
}

pub trait MotionEstimator {
    /// `prev` is the point set tracking started from, `curr` the tracked
    /// result, index aligned with it.
    fn estimate(&mut self, prev: &PointSet, curr: &PointSet) -> Estimate;
}

impl<T: MotionEstimator + ?Sized> MotionEstimator for Box<T> {
    #[inline]
    fn estimate(&mut self, prev: &PointSet, curr: &PointSet) -> Estimate {
        (**self).estimate(prev, curr)
    }
}

#[inline]
pub fn is_sufficient(curr: &PointSet) -> bool {
    curr.valid_count() >= MIN_CORRESPONDENCES
}

/// Pulls the centroid of the valid tracked points back onto the anchor.
#[derive(Debug, Clone)]
pub struct LocalEstimator {
    anchor: na::Point2<f64>,
}

impl LocalEstimator {
    pub fn new(anchor: na::Point2<f64>) -> Self {
        Self { anchor }
    }

    #[inline]
    pub fn anchor(&self) -> na::Point2<f64> {
        self.anchor
    }
}

impl MotionEstimator for LocalEstimator {
    fn estimate(&mut self, _prev: &PointSet, curr: &PointSet) -> Estimate {
        if !is_sufficient(curr) {
            return Estimate::Stall;
        }

        match valid_centroid(curr) {
            Some(c) => Estimate::Update(Transform::translation(
                self.anchor.x - c.x,
                self.anchor.y - c.y,
            )),
            None => Estimate::Stall,
        }
    }
}

/// Same correction as [`LocalEstimator`] over the whole frame, with a
/// constant bias added on top.
#[derive(Debug, Clone)]
pub struct GlobalEstimator {
    anchor: na::Point2<f64>,
    bias: na::Vector2<f64>,
}

impl GlobalEstimator {
    pub fn new(anchor: na::Point2<f64>, max_shift_x: f64, max_shift_y: f64) -> Self {
        Self {
            anchor,
            bias: na::Vector2::new(max_shift_x, max_shift_y),
        }
    }

    #[inline]
    pub fn anchor(&self) -> na::Point2<f64> {
        self.anchor
    }
}

impl MotionEstimator for GlobalEstimator {
    fn estimate(&mut self, _prev: &PointSet, curr: &PointSet) -> Estimate {
        if !is_sufficient(curr) {
            return Estimate::Stall;
        }

        match valid_centroid(curr) {
            Some(c) => Estimate::Update(Transform::translation(
                self.anchor.x - c.x + self.bias.x,
                self.anchor.y - c.y + self.bias.y,
            )),
            None => Estimate::Stall,
        }
    }
}

/// Fits a homography per step and feeds it through the temporal smoother.
/// The emitted transform is the smoother's running correction.
pub struct PerspectiveEstimator<S> {
    solver: S,
    smoother: TemporalSmoother,
    misses: usize,
}

impl<S: HomographySolver> PerspectiveEstimator<S> {
    pub fn new(solver: S, smoother: TemporalSmoother) -> Self {
        Self {
            solver,
            smoother,
            misses: 0,
        }
    }

    #[inline]
    pub fn smoother(&self) -> &TemporalSmoother {
        &self.smoother
    }

    /// Steps where the solver found no homography.
    #[inline]
    pub fn misses(&self) -> usize {
        self.misses
    }
}

impl<S: HomographySolver> MotionEstimator for PerspectiveEstimator<S> {
    fn estimate(&mut self, prev: &PointSet, curr: &PointSet) -> Estimate {
        if !is_sufficient(curr) {
            return Estimate::Stall;
        }

        let (src, dst): (Vec<na::Point2<f32>>, Vec<na::Point2<f32>>) =
            prev.valid_pairs(curr).map(|(p, c)| (*p, *c)).unzip();

        let accumulated = match self.solver.find(&src, &dst) {
            Some(h) => self.smoother.push(&h),
            None => {
                self.misses += 1;
                log::debug!("no homography for {} pairs, keeping correction", src.len());
                *self.smoother.accumulated()
            }
        };

        Estimate::Update(Transform::Projective(accumulated))
    }
}

fn valid_centroid(set: &PointSet) -> Option<na::Point2<f64>> {
    math::centroid(set.iter_valid()).map(|c| na::Point2::new(c.x as f64, c.y as f64))
}
