//! OpenCV backed video I/O, flow, homography and preview window.

use crate::config::StabilizerConfig;
use crate::error::{Error, Result};
use crate::flow::{CorrespondenceTracker, FlowParams, DEFAULT_MAX_ERROR};
use crate::frame::{Frame, GrayFrame, CHANNELS};
use crate::homography::{HomographySolver, MIN_PAIRS};
use crate::pipeline::{RunSummary, Stabilizer};
use crate::preview::{self, Control, Presenter};
use crate::sampler::PointSet;
use crate::video::{VideoSink, VideoSource};
use nalgebra as na;
use ndarray::Array3;
use opencv::{calib3d, core, highgui, prelude::*, video, videoio};

const FALLBACK_FPS: f64 = 25.0;

pub fn frame_to_mat(frame: &Frame) -> Result<core::Mat> {
    let (w, h) = frame.dims();
    let mut mat = core::Mat::new_rows_cols_with_default(
        h as i32,
        w as i32,
        core::CV_8UC3,
        core::Scalar::all(0.0),
    )?;

    let dst = mat.data_bytes_mut()?;
    for (d, s) in dst.iter_mut().zip(frame.view().iter()) {
        *d = *s;
    }

    Ok(mat)
}

pub fn mat_to_frame(mat: &core::Mat) -> Result<Frame> {
    if mat.typ() != core::CV_8UC3 {
        return Err(Error::SourceOpen(format!("unsupported pixel type {}", mat.typ())));
    }

    let owned;
    let mat = if mat.is_continuous() {
        mat
    } else {
        owned = mat.try_clone()?;
        &owned
    };

    let (rows, cols) = (mat.rows() as usize, mat.cols() as usize);
    let data = Array3::from_shape_vec((rows, cols, CHANNELS), mat.data_bytes()?.to_vec())
        .map_err(|e| Error::SourceOpen(e.to_string()))?;

    Frame::from_array(data).ok_or_else(|| Error::SourceOpen("bad frame layout".into()))
}

fn gray_to_mat(gray: &GrayFrame) -> Result<core::Mat> {
    let mut mat = core::Mat::new_rows_cols_with_default(
        gray.height() as i32,
        gray.width() as i32,
        core::CV_8UC1,
        core::Scalar::all(0.0),
    )?;

    let dst = mat.data_bytes_mut()?;
    for (d, s) in dst.iter_mut().zip(gray.view().iter()) {
        *d = s.round().clamp(0.0, 255.0) as u8;
    }

    Ok(mat)
}

pub struct CvSource {
    cap: videoio::VideoCapture,
    frame: core::Mat,
    fps: f64,
    total: Option<u64>,
}

impl CvSource {
    pub fn open(path: &str) -> Result<Self> {
        let cap = videoio::VideoCapture::from_file(path, videoio::CAP_ANY)?;
        if !videoio::VideoCapture::is_opened(&cap)? {
            return Err(Error::SourceOpen(path.to_string()));
        }

        let fps = cap.get(videoio::CAP_PROP_FPS)?;
        let total = cap.get(videoio::CAP_PROP_FRAME_COUNT)?;

        Ok(Self {
            cap,
            frame: core::Mat::default(),
            fps,
            total: if total > 0.0 { Some(total as u64) } else { None },
        })
    }
}

impl VideoSource for CvSource {
    fn read(&mut self) -> Result<Option<Frame>> {
        if !self.cap.read(&mut self.frame)? {
            return Ok(None);
        }

        if self.frame.cols() == 0 || self.frame.rows() == 0 {
            return Ok(None);
        }

        mat_to_frame(&self.frame).map(Some)
    }

    fn fps(&self) -> f64 {
        self.fps
    }

    fn frame_count(&self) -> Option<u64> {
        self.total
    }
}

/// XVID encoded output.
pub struct CvSink {
    writer: Option<videoio::VideoWriter>,
    size: (u32, u32),
}

impl CvSink {
    pub fn create(path: &str, size: (u32, u32), fps: f64) -> Result<Self> {
        let fps = if fps > 0.0 && fps.is_finite() {
            fps
        } else {
            log::warn!("source reports fps {}, writing at {}", fps, FALLBACK_FPS);
            FALLBACK_FPS
        };

        let writer = videoio::VideoWriter::new(
            path,
            videoio::VideoWriter::fourcc(b'X' as _, b'V' as _, b'I' as _, b'D' as _)?,
            fps,
            core::Size::new(size.0 as i32, size.1 as i32),
            true,
        )?;

        if !writer.is_opened()? {
            return Err(Error::Sink(format!("unable to open {}", path)));
        }

        Ok(Self {
            writer: Some(writer),
            size,
        })
    }
}

impl VideoSink for CvSink {
    fn write(&mut self, frame: &Frame) -> Result<()> {
        if frame.dims() != self.size {
            return Err(Error::FrameSize {
                expected: self.size,
                got: frame.dims(),
            });
        }

        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| Error::Sink("write after finish".into()))?;

        writer.write(&frame_to_mat(frame)?)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(mut w) = self.writer.take() {
            w.release()?;
        }
        Ok(())
    }
}

/// `calcOpticalFlowPyrLK` on 8-bit renderings of the gray frames.
#[derive(Debug, Clone)]
pub struct CvFlow {
    /// Points whose reported window error exceeds this are dropped.
    pub max_error: f32,
}

impl Default for CvFlow {
    fn default() -> Self {
        Self {
            max_error: DEFAULT_MAX_ERROR,
        }
    }
}

impl CvFlow {
    fn try_track(
        &self,
        prev: &GrayFrame,
        curr: &GrayFrame,
        points: &PointSet,
        params: &FlowParams,
    ) -> Result<PointSet> {
        let prev = gray_to_mat(prev)?;
        let curr = gray_to_mat(curr)?;

        let prev_pts: core::Vector<core::Point2f> = points
            .points
            .iter()
            .map(|p| core::Point2f::new(p.x, p.y))
            .collect();
        let mut next_pts = core::Vector::<core::Point2f>::new();
        let mut status = core::Vector::<u8>::new();
        let mut err = core::Vector::<f32>::new();

        let criteria = core::TermCriteria {
            typ: core::TermCriteria_COUNT + core::TermCriteria_EPS,
            max_count: params.count as i32,
            epsilon: params.eps,
        };

        video::calc_optical_flow_pyr_lk(
            &prev,
            &curr,
            &prev_pts,
            &mut next_pts,
            &mut status,
            &mut err,
            core::Size::new(params.window.0 as i32, params.window.1 as i32),
            params.max_level as i32,
            criteria,
            0,
            1e-4,
        )?;

        let next = next_pts.iter().map(|p| na::Point2::new(p.x, p.y)).collect();
        let valid = status
            .iter()
            .zip(err.iter())
            .map(|(s, e)| s == 1 && e <= self.max_error)
            .collect();

        Ok(PointSet::with_mask(next, valid))
    }
}

impl CorrespondenceTracker for CvFlow {
    fn track(
        &mut self,
        prev: &GrayFrame,
        curr: &GrayFrame,
        points: &PointSet,
        params: &FlowParams,
    ) -> PointSet {
        if points.is_empty() {
            return PointSet::default();
        }

        match self.try_track(prev, curr, points, params) {
            Ok(set) => set,
            Err(err) => {
                log::warn!("optical flow failed: {}", err);
                PointSet::with_mask(points.points.clone(), vec![false; points.len()])
            }
        }
    }
}

/// `findHomography` with RANSAC.
#[derive(Debug, Clone)]
pub struct CvHomography {
    pub threshold: f64,
}

impl Default for CvHomography {
    fn default() -> Self {
        Self { threshold: 3.0 }
    }
}

impl CvHomography {
    fn try_find(
        &self,
        src: &[na::Point2<f32>],
        dst: &[na::Point2<f32>],
    ) -> Result<Option<na::Matrix3<f64>>> {
        let src: core::Vector<core::Point2f> =
            src.iter().map(|p| core::Point2f::new(p.x, p.y)).collect();
        let dst: core::Vector<core::Point2f> =
            dst.iter().map(|p| core::Point2f::new(p.x, p.y)).collect();

        let mut inliers = core::Mat::default();
        let h = calib3d::find_homography(&src, &dst, &mut inliers, calib3d::RANSAC, self.threshold)?;
        if h.empty() {
            return Ok(None);
        }

        let mut m = na::Matrix3::zeros();
        for r in 0..3 {
            for c in 0..3 {
                m[(r, c)] = *h.at_2d::<f64>(r as i32, c as i32)?;
            }
        }

        Ok(crate::math::normalize_projective(&m))
    }
}

impl HomographySolver for CvHomography {
    fn find(
        &mut self,
        src: &[na::Point2<f32>],
        dst: &[na::Point2<f32>],
    ) -> Option<na::Matrix3<f64>> {
        if src.len() < MIN_PAIRS || src.len() != dst.len() {
            return None;
        }

        match self.try_find(src, dst) {
            Ok(h) => h,
            Err(err) => {
                log::debug!("findHomography failed: {}", err);
                None
            }
        }
    }
}

/// Shows the side-by-side preview in a highgui window; `q` stops the run.
pub struct WindowPresenter {
    window: String,
    delay_ms: i32,
    progress: f64,
}

impl WindowPresenter {
    pub fn new(window: &str, delay_ms: i32) -> Result<Self> {
        highgui::named_window(window, highgui::WINDOW_AUTOSIZE)?;

        Ok(Self {
            window: window.to_string(),
            delay_ms,
            progress: 0.0,
        })
    }
}

impl Presenter for WindowPresenter {
    fn progress(&mut self, processed: u64, total: Option<u64>) {
        self.progress = preview::ratio(processed, total);
    }

    fn preview(
        &mut self,
        original: &Frame,
        points: &PointSet,
        stabilized: &Frame,
    ) -> Result<Control> {
        let image = preview::compose(original, points, stabilized, self.progress);
        highgui::imshow(&self.window, &frame_to_mat(&image)?)?;

        let key = highgui::wait_key(self.delay_ms)?;
        if key & 0xFF == b'q' as i32 {
            return Ok(Control::Stop);
        }

        Ok(Control::Continue)
    }
}

impl Drop for WindowPresenter {
    fn drop(&mut self) {
        let _ = highgui::destroy_window(&self.window);
    }
}

/// Stabilizes the video file at `input` into an XVID file at `output` with
/// the OpenCV backends. The output is only created once the first input
/// frame has been decoded.
pub fn stabilize_file<P: Presenter>(
    input: &str,
    output: &str,
    config: StabilizerConfig,
    presenter: P,
) -> Result<RunSummary> {
    let mut source = CvSource::open(input)?;
    let stabilizer = Stabilizer::with_backends(config, CvFlow::default(), CvHomography::default())?;

    stabilizer.run_with(
        &mut source,
        |dims, fps| CvSink::create(output, dims, fps),
        presenter,
    )
}
