//! Robust projective transform estimation from point correspondences.

use crate::math;
use nalgebra as na;

/// Minimal number of correspondences a homography is defined by.
pub const MIN_PAIRS: usize = 4;

pub trait HomographySolver {
    /// Estimates `H` with `dst ~ H * src`, normalized so `H[2,2] == 1`.
    /// `None` when the correspondences admit no solution.
    fn find(&mut self, src: &[na::Point2<f32>], dst: &[na::Point2<f32>])
        -> Option<na::Matrix3<f64>>;
}

impl<T: HomographySolver + ?Sized> HomographySolver for Box<T> {
    #[inline]
    fn find(
        &mut self,
        src: &[na::Point2<f32>],
        dst: &[na::Point2<f32>],
    ) -> Option<na::Matrix3<f64>> {
        (**self).find(src, dst)
    }
}

/// RANSAC over minimal 4-point DLT fits, refined on the inlier set.
#[derive(Debug, Clone)]
pub struct RansacHomography {
    /// Maximal reprojection error (px) for a pair to count as an inlier.
    pub threshold: f64,
    pub max_iters: usize,
    pub confidence: f64,
    pub seed: u64,
}

impl Default for RansacHomography {
    fn default() -> Self {
        Self {
            threshold: 3.0,
            max_iters: 2000,
            confidence: 0.995,
            seed: 1,
        }
    }
}

impl HomographySolver for RansacHomography {
    fn find(
        &mut self,
        src: &[na::Point2<f32>],
        dst: &[na::Point2<f32>],
    ) -> Option<na::Matrix3<f64>> {
        let n = src.len();
        if n != dst.len() || n < MIN_PAIRS {
            return None;
        }

        let src: Vec<_> = src.iter().map(|p| na::Point2::new(p.x as f64, p.y as f64)).collect();
        let dst: Vec<_> = dst.iter().map(|p| na::Point2::new(p.x as f64, p.y as f64)).collect();

        if n == MIN_PAIRS {
            if is_degenerate(&src) || is_degenerate(&dst) {
                return None;
            }
            return dlt(&src, &dst);
        }

        let thresh2 = self.threshold * self.threshold;
        let mut best: Option<(usize, Vec<bool>, na::Matrix3<f64>)> = None;
        let mut iters = self.max_iters;
        let mut i = 0;

        while i < iters {
            let idx = sample_unique_indices(n, MIN_PAIRS, self.seed.wrapping_add(i as u64));
            i += 1;

            let s: Vec<_> = idx.iter().map(|&j| src[j]).collect();
            let d: Vec<_> = idx.iter().map(|&j| dst[j]).collect();
            if is_degenerate(&s) || is_degenerate(&d) {
                continue;
            }

            let h = match dlt(&s, &d) {
                Some(h) => h,
                None => continue,
            };

            let mask: Vec<bool> = src
                .iter()
                .zip(dst.iter())
                .map(|(s, d)| reprojection_error2(&h, s, d) <= thresh2)
                .collect();
            let count = mask.iter().filter(|m| **m).count();

            if best.as_ref().map_or(true, |(c, _, _)| count > *c) {
                iters = iters.min(adaptive_iterations(
                    count as f64 / n as f64,
                    self.confidence,
                    self.max_iters,
                ));
                best = Some((count, mask, h));
            }
        }

        let (count, mask, h) = best?;
        if count < MIN_PAIRS {
            return Some(h);
        }

        let (s, d): (Vec<_>, Vec<_>) = src
            .iter()
            .zip(dst.iter())
            .zip(mask.iter())
            .filter_map(|(pair, m)| if *m { Some((*pair.0, *pair.1)) } else { None })
            .unzip();

        Some(dlt(&s, &d).unwrap_or(h))
    }
}

/// Direct linear transform on Hartley-normalized points, solved through
/// the eigenvector of `A^T A` with the smallest eigenvalue.
pub fn dlt(src: &[na::Point2<f64>], dst: &[na::Point2<f64>]) -> Option<na::Matrix3<f64>> {
    let (ns, ts) = normalize_points_hartley(src)?;
    let (nd, td) = normalize_points_hartley(dst)?;

    let mut ata = na::SMatrix::<f64, 9, 9>::zeros();
    for (s, d) in ns.iter().zip(nd.iter()) {
        let (x, y, u, v) = (s.x, s.y, d.x, d.y);
        let r1 = na::SVector::<f64, 9>::from_column_slice(&[
            -x, -y, -1.0, 0.0, 0.0, 0.0, u * x, u * y, u,
        ]);
        let r2 = na::SVector::<f64, 9>::from_column_slice(&[
            0.0, 0.0, 0.0, -x, -y, -1.0, v * x, v * y, v,
        ]);

        ata += r1 * r1.transpose();
        ata += r2 * r2.transpose();
    }

    let eigen = na::SymmetricEigen::new(ata);
    let (min_idx, _) = eigen
        .eigenvalues
        .iter()
        .enumerate()
        .fold((0, f64::INFINITY), |acc, (i, v)| if *v < acc.1 { (i, *v) } else { acc });

    let h = eigen.eigenvectors.column(min_idx);
    let hn = na::Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);

    let td_inv = td.try_inverse()?;
    let m = td_inv * hn * ts;

    math::normalize_projective(&m).filter(|m| m.iter().all(|v| v.is_finite()))
}

fn normalize_points_hartley(
    pts: &[na::Point2<f64>],
) -> Option<(Vec<na::Point2<f64>>, na::Matrix3<f64>)> {
    if pts.len() < 2 {
        return None;
    }

    let n = pts.len() as f64;
    let mx = pts.iter().map(|p| p.x).sum::<f64>() / n;
    let my = pts.iter().map(|p| p.y).sum::<f64>() / n;
    let mean_dist = pts
        .iter()
        .map(|p| ((p.x - mx).powi(2) + (p.y - my).powi(2)).sqrt())
        .sum::<f64>()
        / n;

    if mean_dist <= 1e-12 {
        return None;
    }

    let s = std::f64::consts::SQRT_2 / mean_dist;
    let t = na::Matrix3::new(s, 0.0, -s * mx, 0.0, s, -s * my, 0.0, 0.0, 1.0);
    let out = pts
        .iter()
        .map(|p| na::Point2::new(s * (p.x - mx), s * (p.y - my)))
        .collect();

    Some((out, t))
}

// any three of the four sample points (nearly) on one line
fn is_degenerate(pts: &[na::Point2<f64>]) -> bool {
    let n = pts.len();
    for a in 0..n {
        for b in a + 1..n {
            for c in b + 1..n {
                let ab = pts[b] - pts[a];
                let ac = pts[c] - pts[a];
                let cross = ab.x * ac.y - ab.y * ac.x;

                if cross.abs() <= 1e-6 * (ab.norm() * ac.norm()).max(1e-12) {
                    return true;
                }
            }
        }
    }
    false
}

fn reprojection_error2(h: &na::Matrix3<f64>, s: &na::Point2<f64>, d: &na::Point2<f64>) -> f64 {
    match math::project(h, s.x, s.y) {
        Some((x, y)) => (x - d.x).powi(2) + (y - d.y).powi(2),
        None => f64::INFINITY,
    }
}

fn adaptive_iterations(inlier_ratio: f64, confidence: f64, max_iters: usize) -> usize {
    let w4 = inlier_ratio.powi(MIN_PAIRS as i32);
    if w4 >= 1.0 - f64::EPSILON {
        return 1;
    }
    if w4 <= f64::EPSILON {
        return max_iters;
    }

    let k = (1.0 - confidence).ln() / (1.0 - w4).ln();
    if k.is_finite() {
        (k.ceil() as usize).clamp(1, max_iters)
    } else {
        max_iters
    }
}

fn sample_unique_indices(n: usize, k: usize, seed: u64) -> Vec<usize> {
    let mut out = Vec::with_capacity(k);
    let mut used = vec![false; n];
    let mut state = seed ^ 0x9E37_79B9_7F4A_7C15;

    while out.len() < k {
        state = state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        let idx = ((state >> 33) as usize) % n;
        if !used[idx] {
            used[idx] = true;
            out.push(idx);
        }
    }
    out
}
