use crate::frame::{Frame, CHANNELS};
use crate::transform::Transform;
use ndarray::prelude::*;

/// Warps `frame` by `transform` into a frame of the same size.
///
/// Every destination pixel is mapped back through the inverse transform and
/// sampled bilinearly. Destinations whose source falls outside the frame
/// stay black, and a transform without an inverse yields an all-black frame.
pub fn compensate(frame: &Frame, transform: &Transform) -> Frame {
    let (width, height) = frame.dims();
    let mut out = Frame::new(width, height);

    let inv = match transform.inverse() {
        Some(inv) => inv,
        None => {
            log::warn!("singular transform {:?}, emitting black frame", transform);
            return out;
        }
    };

    let src = frame.view();
    let mut dst = out.view_mut();

    for y in 0..height as usize {
        for x in 0..width as usize {
            let (sx, sy) = match inv.apply(x as f64, y as f64) {
                Some(p) => p,
                None => continue,
            };

            if let Some(px) = sample_bilinear(&src, sx, sy) {
                for c in 0..CHANNELS {
                    dst[[y, x, c]] = px[c];
                }
            }
        }
    }

    out
}

fn sample_bilinear(src: &ArrayView3<'_, u8>, x: f64, y: f64) -> Option<[u8; CHANNELS]> {
    let (h, w) = (src.shape()[0], src.shape()[1]);
    if w == 0 || h == 0 {
        return None;
    }

    let (max_x, max_y) = ((w - 1) as f64, (h - 1) as f64);
    if !(x >= 0.0 && y >= 0.0 && x <= max_x && y <= max_y) {
        return None;
    }

    let (x0, y0) = (x.floor(), y.floor());
    let (fx, fy) = (x - x0, y - y0);
    let (x0, y0) = (x0 as usize, y0 as usize);
    let (x1, y1) = ((x0 + 1).min(w - 1), (y0 + 1).min(h - 1));

    let mut px = [0u8; CHANNELS];
    for (c, v) in px.iter_mut().enumerate() {
        let top = src[[y0, x0, c]] as f64 * (1.0 - fx) + src[[y0, x1, c]] as f64 * fx;
        let bottom = src[[y1, x0, c]] as f64 * (1.0 - fx) + src[[y1, x1, c]] as f64 * fx;
        let value = top * (1.0 - fy) + bottom * fy;

        *v = value.round().clamp(0.0, 255.0) as u8;
    }

    Some(px)
}
