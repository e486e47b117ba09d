use ndarray::prelude::*;

pub const CHANNELS: usize = 3;

/// One decoded BGR image, stored as `(rows, cols, channels)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    data: Array3<u8>,
}

impl Frame {
    /// Black frame.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            data: Array3::zeros((height as usize, width as usize, CHANNELS)),
        }
    }

    /// Wraps an existing `(rows, cols, 3)` buffer.
    pub fn from_array(data: Array3<u8>) -> Option<Self> {
        if data.shape()[2] != CHANNELS {
            return None;
        }

        Some(Self { data })
    }

    pub fn from_fn<F: Fn(u32, u32) -> [u8; 3]>(width: u32, height: u32, f: F) -> Self {
        let mut frame = Self::new(width, height);
        for y in 0..height {
            for x in 0..width {
                frame.set_pixel(x, y, f(x, y));
            }
        }
        frame
    }

    /// (width, height)
    #[inline]
    pub fn dims(&self) -> (u32, u32) {
        let shape = self.data.shape();
        (shape[1] as u32, shape[0] as u32)
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.data.shape()[1] as u32
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.data.shape()[0] as u32
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let (x, y) = (x as usize, y as usize);
        [
            self.data[[y, x, 0]],
            self.data[[y, x, 1]],
            self.data[[y, x, 2]],
        ]
    }

    #[inline]
    pub fn set_pixel(&mut self, x: u32, y: u32, px: [u8; 3]) {
        let (x, y) = (x as usize, y as usize);
        for (c, v) in px.iter().enumerate() {
            self.data[[y, x, c]] = *v;
        }
    }

    #[inline]
    pub fn view(&self) -> ArrayView3<'_, u8> {
        self.data.view()
    }

    #[inline]
    pub fn view_mut(&mut self) -> ArrayViewMut3<'_, u8> {
        self.data.view_mut()
    }

    #[inline]
    pub fn into_array(self) -> Array3<u8> {
        self.data
    }

    /// Luma conversion with the ITU-R 601 weights, rounded to whole levels.
    pub fn to_gray(&self) -> GrayFrame {
        let data = Array2::from_shape_fn((self.data.shape()[0], self.data.shape()[1]), |(y, x)| {
            let b = self.data[[y, x, 0]] as f32;
            let g = self.data[[y, x, 1]] as f32;
            let r = self.data[[y, x, 2]] as f32;

            (0.299 * r + 0.587 * g + 0.114 * b).round()
        });

        GrayFrame { data }
    }

    /// Places `other` to the right of `self`. Rows missing in the shorter
    /// frame are left black.
    pub fn hstack(&self, other: &Frame) -> Frame {
        let (lw, lh) = self.dims();
        let (rw, rh) = other.dims();
        let mut out = Frame::new(lw + rw, lh.max(rh));

        let (lw, lh, rh) = (lw as usize, lh as usize, rh as usize);
        out.data.slice_mut(s![..lh, ..lw, ..]).assign(&self.data);
        out.data.slice_mut(s![..rh, lw.., ..]).assign(&other.data);

        out
    }
}

/// Single-channel intensity image used for tracking.
#[derive(Debug, Clone, PartialEq)]
pub struct GrayFrame {
    data: Array2<f32>,
}

impl GrayFrame {
    pub fn from_array(data: Array2<f32>) -> Self {
        Self { data }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.data.nrows()
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[[y, x]]
    }

    #[inline]
    pub fn view(&self) -> ArrayView2<'_, f32> {
        self.data.view()
    }

    /// Bilinear sample, coordinates clamped to the image border.
    pub fn sample(&self, x: f32, y: f32) -> f32 {
        let w = self.width();
        let h = self.height();
        if w == 0 || h == 0 {
            return 0.0;
        }

        let x = x.max(0.0).min((w - 1) as f32);
        let y = y.max(0.0).min((h - 1) as f32);

        let x0 = x.floor() as usize;
        let y0 = y.floor() as usize;
        let x1 = (x0 + 1).min(w - 1);
        let y1 = (y0 + 1).min(h - 1);

        let fx = x - x0 as f32;
        let fy = y - y0 as f32;

        let top = self.data[[y0, x0]] * (1.0 - fx) + self.data[[y0, x1]] * fx;
        let bottom = self.data[[y1, x0]] * (1.0 - fx) + self.data[[y1, x1]] * fx;

        top * (1.0 - fy) + bottom * fy
    }

    /// Halves the resolution by averaging 2x2 blocks.
    pub fn downsample(&self) -> GrayFrame {
        let w = self.width() / 2;
        let h = self.height() / 2;

        let data = Array2::from_shape_fn((h, w), |(y, x)| {
            let (sx, sy) = (x * 2, y * 2);
            (self.data[[sy, sx]]
                + self.data[[sy, sx + 1]]
                + self.data[[sy + 1, sx]]
                + self.data[[sy + 1, sx + 1]])
                * 0.25
        });

        GrayFrame { data }
    }
}
