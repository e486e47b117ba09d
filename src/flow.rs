//! Sparse frame-to-frame correspondence tracking.
//!
//! The pipeline only depends on [`CorrespondenceTracker`]; it owns the
//! policy around the flow primitive (window sizing, convergence parameters,
//! reading the validity mask) while the numerical method is pluggable.
//! [`LucasKanade`] is the built-in pyramidal implementation, an OpenCV
//! backed one lives in `cv` behind the `opencv` feature.

use crate::bbox::Rect;
use crate::frame::GrayFrame;
use crate::sampler::PointSet;
use nalgebra as na;
use serde_derive::{Deserialize, Serialize};

pub const DEFAULT_MAX_LEVEL: u32 = 10;
pub const DEFAULT_EPS: f64 = 0.01;
pub const DEFAULT_COUNT: u32 = 30;

pub const DEFAULT_MIN_EIGEN: f32 = 1e-2;
pub const DEFAULT_MAX_ERROR: f32 = 20.0;

const MIN_WINDOW: u32 = 3;

/// Pyramid depth and termination criteria of the flow solver.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct FlowConfig {
    pub max_level: u32,
    pub eps: f64,
    pub count: u32,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            max_level: DEFAULT_MAX_LEVEL,
            eps: DEFAULT_EPS,
            count: DEFAULT_COUNT,
        }
    }
}

/// Everything one tracking call needs besides the images and the points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowParams {
    pub max_level: u32,
    pub eps: f64,
    pub count: u32,
    /// Full search window (width, height) in pixels.
    pub window: (u32, u32),
}

impl FlowParams {
    /// The search window is twice the tracked region's height on both
    /// axes, so larger regions tolerate larger motion.
    pub fn for_region(config: &FlowConfig, region: &Rect) -> Self {
        let side = (region.height * 2).max(MIN_WINDOW);

        Self {
            max_level: config.max_level,
            eps: config.eps,
            count: config.count,
            window: (side, side),
        }
    }
}

pub trait CorrespondenceTracker {
    /// Returns the new position of every input point together with a
    /// validity flag. The output always has the input's length.
    fn track(
        &mut self,
        prev: &GrayFrame,
        curr: &GrayFrame,
        points: &PointSet,
        params: &FlowParams,
    ) -> PointSet;
}

impl<T: CorrespondenceTracker + ?Sized> CorrespondenceTracker for Box<T> {
    #[inline]
    fn track(
        &mut self,
        prev: &GrayFrame,
        curr: &GrayFrame,
        points: &PointSet,
        params: &FlowParams,
    ) -> PointSet {
        (**self).track(prev, curr, points, params)
    }
}

/// Coarse-to-fine image pyramid, level 0 is full resolution.
#[derive(Debug, Clone)]
pub struct Pyramid {
    pub levels: Vec<GrayFrame>,
}

impl Pyramid {
    /// Builds at most `max_level + 1` levels. A level is only added while it
    /// stays larger than the search window on both axes.
    pub fn build(base: &GrayFrame, max_level: u32, window: (u32, u32)) -> Self {
        let mut levels = vec![base.clone()];

        while levels.len() <= max_level as usize {
            let last = &levels[levels.len() - 1];
            let (nw, nh) = (last.width() / 2, last.height() / 2);

            if nw <= window.0 as usize || nh <= window.1 as usize {
                break;
            }

            let next = last.downsample();
            levels.push(next);
        }

        Self { levels }
    }

    #[inline]
    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }
}

enum LkResult {
    Converged(f32, f32),
    MaxIter(f32, f32),
    Singular,
}

/// Pyramidal Lucas-Kanade with template gradients.
///
/// The template patch and its gradients are sampled once per level from the
/// previous frame, so the 2x2 normal matrix is constant across iterations;
/// only the error image is re-sampled from the current frame.
#[derive(Debug, Clone)]
pub struct LucasKanade {
    /// Points whose smallest structure-tensor eigenvalue (averaged per
    /// window pixel) falls below this, in either frame, are reported invalid.
    pub min_eigen_threshold: f32,
    /// Largest mean absolute intensity difference between the previous
    /// window and the tracked one in the current frame.
    pub max_error: f32,
}

impl Default for LucasKanade {
    fn default() -> Self {
        Self {
            min_eigen_threshold: DEFAULT_MIN_EIGEN,
            max_error: DEFAULT_MAX_ERROR,
        }
    }
}

impl LucasKanade {
    pub fn new(min_eigen_threshold: f32, max_error: f32) -> Self {
        Self {
            min_eigen_threshold,
            max_error,
        }
    }

    fn track_single(
        &self,
        prev: &Pyramid,
        curr: &Pyramid,
        point: &na::Point2<f32>,
        params: &FlowParams,
        num_levels: usize,
    ) -> (na::Point2<f32>, bool) {
        let mut dx = 0.0f32;
        let mut dy = 0.0f32;

        for level in (0..num_levels).rev() {
            let scale = 1.0 / (1u32 << level) as f32;
            let px = point.x * scale;
            let py = point.y * scale;

            let result = self.lk_level(
                &prev.levels[level],
                &curr.levels[level],
                px,
                py,
                dx,
                dy,
                params,
                level == 0,
            );

            match result {
                LkResult::Converged(ndx, ndy) | LkResult::MaxIter(ndx, ndy) => {
                    dx = ndx;
                    dy = ndy;
                }
                LkResult::Singular => {
                    return (
                        na::Point2::new(point.x + dx / scale, point.y + dy / scale),
                        false,
                    );
                }
            }

            if level > 0 {
                dx *= 2.0;
                dy *= 2.0;
            }
        }

        let next = na::Point2::new(point.x + dx, point.y + dy);
        let base = &curr.levels[0];
        let inside = next.x.is_finite()
            && next.y.is_finite()
            && next.x >= 0.0
            && next.y >= 0.0
            && next.x < base.width() as f32
            && next.y < base.height() as f32;

        if !inside {
            return (next, false);
        }

        let (error, min_eig) = window_match(&prev.levels[0], base, point, &next, params.window);
        if error > self.max_error {
            log::trace!("point {:?} lost, residual {:.2}", point, error);
            return (next, false);
        }

        (next, min_eig >= self.min_eigen_threshold)
    }

    #[allow(clippy::too_many_arguments)]
    fn lk_level(
        &self,
        prev: &GrayFrame,
        curr: &GrayFrame,
        px: f32,
        py: f32,
        mut dx: f32,
        mut dy: f32,
        params: &FlowParams,
        check_eigen: bool,
    ) -> LkResult {
        let half_x = (params.window.0 / 2) as isize;
        let half_y = (params.window.1 / 2) as isize;
        let area = ((2 * half_x + 1) * (2 * half_y + 1)) as usize;

        let mut template = Vec::with_capacity(area);
        let mut gx_buf = Vec::with_capacity(area);
        let mut gy_buf = Vec::with_capacity(area);

        let mut h00 = 0.0f32;
        let mut h01 = 0.0f32;
        let mut h11 = 0.0f32;

        for oy in -half_y..=half_y {
            for ox in -half_x..=half_x {
                let tx = px + ox as f32;
                let ty = py + oy as f32;

                let gx = 0.5 * (prev.sample(tx + 1.0, ty) - prev.sample(tx - 1.0, ty));
                let gy = 0.5 * (prev.sample(tx, ty + 1.0) - prev.sample(tx, ty - 1.0));

                template.push(prev.sample(tx, ty));
                gx_buf.push(gx);
                gy_buf.push(gy);

                h00 += gx * gx;
                h01 += gx * gy;
                h11 += gy * gy;
            }
        }

        let det = h00 * h11 - h01 * h01;
        if det.abs() < 1e-6 {
            return LkResult::Singular;
        }

        if check_eigen {
            let n = area as f32;
            let (a, b, c) = (h00 / n, h01 / n, h11 / n);
            let min_eig = 0.5 * (a + c - ((a - c) * (a - c) + 4.0 * b * b).sqrt());

            if min_eig < self.min_eigen_threshold {
                return LkResult::Singular;
            }
        }

        let inv_det = 1.0 / det;
        let ih00 = inv_det * h11;
        let ih01 = -inv_det * h01;
        let ih11 = inv_det * h00;
        let eps2 = (params.eps * params.eps) as f32;

        for _ in 0..params.count {
            let mut b0 = 0.0f32;
            let mut b1 = 0.0f32;

            let mut idx = 0;
            for oy in -half_y..=half_y {
                for ox in -half_x..=half_x {
                    let wx = px + dx + ox as f32;
                    let wy = py + dy + oy as f32;
                    let e = template[idx] - curr.sample(wx, wy);

                    b0 += gx_buf[idx] * e;
                    b1 += gy_buf[idx] * e;
                    idx += 1;
                }
            }

            let delta_x = ih00 * b0 + ih01 * b1;
            let delta_y = ih01 * b0 + ih11 * b1;

            dx += delta_x;
            dy += delta_y;

            if delta_x * delta_x + delta_y * delta_y < eps2 {
                return LkResult::Converged(dx, dy);
            }
        }

        LkResult::MaxIter(dx, dy)
    }
}

/// Mean absolute difference between the window around `from` in `prev` and
/// the one around `to` in `curr`, and the smallest per-pixel eigenvalue of
/// the structure tensor of the `curr` window.
fn window_match(
    prev: &GrayFrame,
    curr: &GrayFrame,
    from: &na::Point2<f32>,
    to: &na::Point2<f32>,
    window: (u32, u32),
) -> (f32, f32) {
    let half_x = (window.0 / 2) as isize;
    let half_y = (window.1 / 2) as isize;
    let n = ((2 * half_x + 1) * (2 * half_y + 1)) as f32;

    let mut error = 0.0f32;
    let (mut h00, mut h01, mut h11) = (0.0f32, 0.0f32, 0.0f32);

    for oy in -half_y..=half_y {
        for ox in -half_x..=half_x {
            let (ox, oy) = (ox as f32, oy as f32);
            let (cx, cy) = (to.x + ox, to.y + oy);

            error += (prev.sample(from.x + ox, from.y + oy) - curr.sample(cx, cy)).abs();

            let gx = 0.5 * (curr.sample(cx + 1.0, cy) - curr.sample(cx - 1.0, cy));
            let gy = 0.5 * (curr.sample(cx, cy + 1.0) - curr.sample(cx, cy - 1.0));
            h00 += gx * gx;
            h01 += gx * gy;
            h11 += gy * gy;
        }
    }

    let (a, b, c) = (h00 / n, h01 / n, h11 / n);
    let min_eig = 0.5 * (a + c - ((a - c) * (a - c) + 4.0 * b * b).sqrt());

    (error / n, min_eig)
}

impl CorrespondenceTracker for LucasKanade {
    fn track(
        &mut self,
        prev: &GrayFrame,
        curr: &GrayFrame,
        points: &PointSet,
        params: &FlowParams,
    ) -> PointSet {
        let prev_pyr = Pyramid::build(prev, params.max_level, params.window);
        let curr_pyr = Pyramid::build(curr, params.max_level, params.window);
        let num_levels = prev_pyr.num_levels().min(curr_pyr.num_levels());

        let (next, valid): (Vec<_>, Vec<_>) = points
            .points
            .iter()
            .map(|p| self.track_single(&prev_pyr, &curr_pyr, p, params, num_levels))
            .unzip();

        PointSet::with_mask(next, valid)
    }
}
