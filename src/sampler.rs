use crate::bbox::Rect;
use nalgebra as na;

/// Tracked feature locations with a parallel validity mask.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PointSet {
    pub points: Vec<na::Point2<f32>>,
    pub valid: Vec<bool>,
}

impl PointSet {
    /// Freshly seeded set, every point valid.
    pub fn new(points: Vec<na::Point2<f32>>) -> Self {
        let valid = vec![true; points.len()];
        Self { points, valid }
    }

    pub fn with_mask(points: Vec<na::Point2<f32>>, valid: Vec<bool>) -> Self {
        debug_assert_eq!(points.len(), valid.len());
        Self { points, valid }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    #[inline]
    pub fn valid_count(&self) -> usize {
        self.valid.iter().filter(|v| **v).count()
    }

    #[inline]
    pub fn iter_valid(&self) -> impl Iterator<Item = &na::Point2<f32>> {
        self.points
            .iter()
            .zip(self.valid.iter())
            .filter_map(|(p, v)| if *v { Some(p) } else { None })
    }

    /// Pairs `(self[i], other[i])` for indexes valid in `other`.
    pub fn valid_pairs<'a>(
        &'a self,
        other: &'a PointSet,
    ) -> impl Iterator<Item = (&'a na::Point2<f32>, &'a na::Point2<f32>)> {
        self.points
            .iter()
            .zip(other.points.iter())
            .zip(other.valid.iter())
            .filter_map(|(pair, v)| if *v { Some(pair) } else { None })
    }
}

/// Lays a regular interior grid of tracking points over a rectangle.
#[derive(Debug, Clone, Copy)]
pub struct PointSampler {
    factor: u32,
}

impl PointSampler {
    pub fn new(factor: u32) -> Self {
        Self { factor }
    }

    #[inline]
    pub fn factor(&self) -> u32 {
        self.factor
    }

    /// `(factor - 1)^2` points, column by column, offset one step from the
    /// left top corner. An empty rectangle yields an empty set.
    pub fn sample(&self, rect: &Rect) -> PointSet {
        if rect.is_empty() || self.factor < 2 {
            return PointSet::default();
        }

        let step_x = Self::step(rect.width, self.factor);
        let step_y = Self::step(rect.height, self.factor);
        let (x, y) = (rect.x as f32, rect.y as f32);

        let mut points = Vec::with_capacity(((self.factor - 1) * (self.factor - 1)) as usize);
        for i in 1..self.factor {
            for j in 1..self.factor {
                points.push(na::Point2::new(
                    x + i as f32 * step_x,
                    y + j as f32 * step_y,
                ));
            }
        }

        PointSet::new(points)
    }

    // whole-pixel step unless the side is shorter than the factor
    fn step(side: u32, factor: u32) -> f32 {
        let step = side / factor;
        if step > 0 {
            step as f32
        } else {
            side as f32 / factor as f32
        }
    }
}
