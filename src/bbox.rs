use nalgebra as na;
use serde_derive::{Deserialize, Serialize};

/// Left-top-width-height rectangle in integer pixel coordinates.
///
/// This is the shape of a region of interest as it comes from a selector:
/// the left top corner plus the size. Negative corners are allowed (the
/// rectangle may start outside the frame) but sizes are unsigned.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    #[serde(rename = "w")]
    pub width: u32,
    #[serde(rename = "h")]
    pub height: u32,
}

impl Rect {
    #[inline]
    pub fn ltwh(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Whole-frame rectangle.
    #[inline]
    pub fn frame(dims: (u32, u32)) -> Self {
        Self::ltwh(0, 0, dims.0, dims.1)
    }

    #[inline(always)]
    pub fn left(&self) -> i32 {
        self.x
    }

    #[inline(always)]
    pub fn top(&self) -> i32 {
        self.y
    }

    #[inline(always)]
    pub fn right(&self) -> i32 {
        self.x + self.width as i32
    }

    #[inline(always)]
    pub fn bottom(&self) -> i32 {
        self.y + self.height as i32
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Center with integer halving of the size, the anchor translation
    /// strategies re-center on.
    #[inline]
    pub fn center(&self) -> na::Point2<f32> {
        na::Point2::new(
            (self.x + (self.width / 2) as i32) as f32,
            (self.y + (self.height / 2) as i32) as f32,
        )
    }

    /// Strict containment: the point must not lie on the border.
    #[inline]
    pub fn contains_strictly(&self, p: &na::Point2<f32>) -> bool {
        p.x > self.left() as f32
            && p.x < self.right() as f32
            && p.y > self.top() as f32
            && p.y < self.bottom() as f32
    }
}
