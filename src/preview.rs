use crate::error::Result;
use crate::frame::Frame;
use crate::sampler::PointSet;
use ndarray::prelude::*;

pub const BAR_HEIGHT: u32 = 15;
pub const BAR_BACKGROUND: [u8; 3] = [200, 200, 200];
pub const BAR_COMPLETED: [u8; 3] = [6, 176, 37];
pub const POINT_RADIUS: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    /// Stop reading input; whatever is buffered is still flushed.
    Stop,
}

/// Receives progress and preview images while a run goes on.
pub trait Presenter {
    /// `total` is the source's frame count when it reports one.
    fn progress(&mut self, processed: u64, total: Option<u64>);

    /// Called after every successful step with the newest frame, the points
    /// tracked on it and its compensated version.
    fn preview(&mut self, original: &Frame, points: &PointSet, stabilized: &Frame)
        -> Result<Control>;
}

impl<T: Presenter + ?Sized> Presenter for &mut T {
    #[inline]
    fn progress(&mut self, processed: u64, total: Option<u64>) {
        (**self).progress(processed, total)
    }

    #[inline]
    fn preview(
        &mut self,
        original: &Frame,
        points: &PointSet,
        stabilized: &Frame,
    ) -> Result<Control> {
        (**self).preview(original, points, stabilized)
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPresenter;

impl Presenter for NoopPresenter {
    fn progress(&mut self, _processed: u64, _total: Option<u64>) {}

    fn preview(&mut self, _: &Frame, _: &PointSet, _: &Frame) -> Result<Control> {
        Ok(Control::Continue)
    }
}

/// Fraction of the input consumed, `0.0` when the total is unknown.
pub fn ratio(processed: u64, total: Option<u64>) -> f64 {
    match total {
        Some(t) if t > 0 => (processed as f64 / t as f64).clamp(0.0, 1.0),
        _ => 0.0,
    }
}

/// Side-by-side preview: the original with its tracked points marked, the
/// stabilized frame to its right, and a progress bar along the bottom.
pub fn compose(original: &Frame, points: &PointSet, stabilized: &Frame, progress: f64) -> Frame {
    let mut marked = original.clone();
    for p in points.iter_valid() {
        draw_dot(&mut marked, p.x as i32, p.y as i32);
    }

    with_progress_bar(&marked.hstack(stabilized), progress)
}

/// Filled dot coloured by its own position, channels saturating at 255.
fn draw_dot(frame: &mut Frame, cx: i32, cy: i32) {
    let (w, h) = (frame.width() as i32, frame.height() as i32);
    let colour = [cx.clamp(0, 255) as u8, cy.clamp(0, 255) as u8, 0];

    for dy in -POINT_RADIUS..=POINT_RADIUS {
        for dx in -POINT_RADIUS..=POINT_RADIUS {
            let (x, y) = (cx + dx, cy + dy);
            if dx * dx + dy * dy > POINT_RADIUS * POINT_RADIUS
                || x < 0
                || y < 0
                || x >= w
                || y >= h
            {
                continue;
            }
            frame.set_pixel(x as u32, y as u32, colour);
        }
    }
}

fn with_progress_bar(image: &Frame, progress: f64) -> Frame {
    let (w, h) = image.dims();
    let mut out = Frame::new(w, h + BAR_HEIGHT);
    let completed = (w as f64 * progress.clamp(0.0, 1.0)) as usize;

    let mut view = out.view_mut();
    view.slice_mut(s![..h as usize, .., ..]).assign(&image.view());

    let (h, w) = (h as usize, w as usize);
    for y in h..h + BAR_HEIGHT as usize {
        for x in 0..w {
            let colour = if x < completed { BAR_COMPLETED } else { BAR_BACKGROUND };
            for (c, v) in colour.iter().enumerate() {
                view[[y, x, c]] = *v;
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra as na;

    #[test]
    fn preview_geometry() {
        let a = Frame::from_fn(20, 10, |_, _| [10, 20, 30]);
        let b = Frame::from_fn(20, 10, |_, _| [40, 50, 60]);
        let out = compose(&a, &PointSet::default(), &b, 0.25);

        assert_eq!(out.dims(), (40, 10 + BAR_HEIGHT));
        assert_eq!(out.pixel(0, 0), [10, 20, 30]);
        assert_eq!(out.pixel(20, 0), [40, 50, 60]);
        assert_eq!(out.pixel(9, 10), BAR_COMPLETED);
        assert_eq!(out.pixel(10, 24), BAR_BACKGROUND);
    }

    #[test]
    fn dots_only_for_valid_points() {
        let a = Frame::new(32, 32);
        let points = PointSet::with_mask(
            vec![na::Point2::new(10.0, 12.0), na::Point2::new(25.0, 25.0)],
            vec![true, false],
        );
        let out = compose(&a, &points, &a, 0.0);

        assert_eq!(out.pixel(10, 12), [10, 12, 0]);
        assert_eq!(out.pixel(13, 12), [10, 12, 0]);
        assert_eq!(out.pixel(13, 15), [0, 0, 0]);
        assert_eq!(out.pixel(25, 25), [0, 0, 0]);
    }

    #[test]
    fn dot_colour_saturates() {
        let mut f = Frame::new(400, 8);
        draw_dot(&mut f, 300, 4);

        assert_eq!(f.pixel(300, 4), [255, 4, 0]);
    }

    #[test]
    fn ratio_without_total() {
        assert_eq!(ratio(5, None), 0.0);
        assert_eq!(ratio(5, Some(10)), 0.5);
        assert_eq!(ratio(15, Some(10)), 1.0);
    }
}
