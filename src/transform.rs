use crate::math;
use nalgebra as na;

/// Geometric correction applied to a whole frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transform {
    /// 2x3 affine matrix. Produced by the translation strategies, so the
    /// linear part stays the identity.
    Affine(na::Matrix2x3<f64>),
    /// 3x3 projective matrix, normalized so the bottom-right element is 1.
    Projective(na::Matrix3<f64>),
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

impl Transform {
    #[inline]
    pub fn identity() -> Self {
        Self::translation(0.0, 0.0)
    }

    #[inline]
    pub fn translation(dx: f64, dy: f64) -> Self {
        Transform::Affine(na::Matrix2x3::new(1.0, 0.0, dx, 0.0, 1.0, dy))
    }

    /// Normalizes the matrix; `None` if it can not be normalized.
    #[inline]
    pub fn projective(m: na::Matrix3<f64>) -> Option<Self> {
        math::normalize_projective(&m).map(Transform::Projective)
    }

    /// Homogeneous 3x3 form.
    pub fn matrix(&self) -> na::Matrix3<f64> {
        match self {
            Transform::Affine(a) => na::Matrix3::new(
                a[(0, 0)],
                a[(0, 1)],
                a[(0, 2)],
                a[(1, 0)],
                a[(1, 1)],
                a[(1, 2)],
                0.0,
                0.0,
                1.0,
            ),
            Transform::Projective(m) => *m,
        }
    }

    /// Translation part, `(m[0,2], m[1,2])`.
    #[inline]
    pub fn offset(&self) -> (f64, f64) {
        let m = self.matrix();
        (m[(0, 2)], m[(1, 2)])
    }

    /// Maps a source point to its destination.
    #[inline]
    pub fn apply(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        math::project(&self.matrix(), x, y)
    }

    /// Destination-to-source mapping, `None` when the matrix is singular.
    pub fn inverse(&self) -> Option<Transform> {
        match self {
            Transform::Affine(_) => {
                let m = self.matrix().try_inverse()?;
                if !m.iter().all(|v| v.is_finite()) {
                    return None;
                }

                Some(Transform::Affine(na::Matrix2x3::new(
                    m[(0, 0)],
                    m[(0, 1)],
                    m[(0, 2)],
                    m[(1, 0)],
                    m[(1, 1)],
                    m[(1, 2)],
                )))
            }
            Transform::Projective(m) => {
                let inv = m.try_inverse()?;
                Transform::projective(inv)
            }
        }
    }
}
