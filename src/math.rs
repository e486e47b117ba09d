use crate::Float;
use nalgebra as na;

/// Mean position of the points. `None` for an empty input.
pub fn centroid<'a, T, I>(points: I) -> Option<na::Point2<T>>
where
    T: Float,
    I: IntoIterator<Item = &'a na::Point2<T>>,
{
    let mut n = 0usize;
    let mut sx = T::zero();
    let mut sy = T::zero();

    for p in points {
        sx += p.x;
        sy += p.y;
        n += 1;
    }

    if n == 0 {
        return None;
    }

    let n = T::from_usize(n)?;
    Some(na::Point2::new(sx / n, sy / n))
}

/// Divides every element by the bottom-right one.
pub fn normalize_projective(m: &na::Matrix3<f64>) -> Option<na::Matrix3<f64>> {
    let w = m[(2, 2)];
    if !w.is_finite() || w.abs() < f64::EPSILON {
        return None;
    }

    Some(m.unscale(w))
}

/// Applies a 3x3 projective matrix to a point.
#[inline]
pub fn project(m: &na::Matrix3<f64>, x: f64, y: f64) -> Option<(f64, f64)> {
    let w = m[(2, 0)] * x + m[(2, 1)] * y + m[(2, 2)];
    if w.abs() < 1e-12 {
        return None;
    }

    Some((
        (m[(0, 0)] * x + m[(0, 1)] * y + m[(0, 2)]) / w,
        (m[(1, 0)] * x + m[(1, 1)] * y + m[(1, 2)]) / w,
    ))
}
