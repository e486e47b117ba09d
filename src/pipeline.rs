//! Stabilization run loop.
//!
//! Frames are buffered as they are read and every frame after the first is
//! tracked against the current reference. A successful step estimates one
//! new correction, writes out the whole buffer and makes the new frame the
//! reference. A stalled step writes nothing: the buffer keeps growing and the
//! next frame is tracked against the same reference again.
//!
//! Only the newest buffered frame gets the new correction. Older ones (the
//! first frame, frames that stalled) are written with the correction known
//! before them, never with one estimated from a later frame. The first frame
//! starts from the correction of the seeded points against themselves.

use crate::bbox::Rect;
use crate::buffer::FrameBuffer;
use crate::compensator::compensate;
use crate::config::{StabilizerConfig, Strategy};
use crate::error::{Error, Result};
use crate::estimator::{
    Estimate, GlobalEstimator, LocalEstimator, MotionEstimator, PerspectiveEstimator,
};
use crate::flow::{CorrespondenceTracker, FlowParams, LucasKanade};
use crate::frame::{Frame, GrayFrame};
use crate::homography::{HomographySolver, RansacHomography};
use crate::math;
use crate::preview::{Control, Presenter};
use crate::sampler::{PointSampler, PointSet};
use crate::smoother::{TemporalSmoother, DEFAULT_HISTORY};
use crate::transform::Transform;
use crate::video::{VideoSink, VideoSource};
use nalgebra as na;

/// One written frame and the correction it was written with.
#[derive(Debug, Clone, PartialEq)]
pub struct EmittedFrame {
    pub index: u64,
    pub transform: Transform,
    /// Written by a buffer-cap or end-of-stream flush rather than after a
    /// successful step.
    pub forced: bool,
    /// Tracking failed on this frame, so it carries the correction known
    /// before it rather than the one estimated after it.
    pub stalled: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub frames_read: u64,
    pub frames_written: u64,
    pub successful_steps: u64,
    pub stalls: u64,
    pub longest_stall: usize,
    pub forced_flushes: u64,
    pub reseeds: u64,
    pub homography_misses: usize,
    /// Raw per-step homographies of the perspective strategy, newest first,
    /// as many as the smoother keeps. Empty for the translation strategies.
    pub recent_homographies: Vec<na::Matrix3<f64>>,
    pub stopped_early: bool,
    pub emitted: Vec<EmittedFrame>,
}

enum Motion<H> {
    Local(LocalEstimator),
    Global(GlobalEstimator),
    Perspective(PerspectiveEstimator<H>),
}

impl<H: HomographySolver> Motion<H> {
    /// Correction for the reference frame itself, estimated from the seeded
    /// points against themselves. The smoother is left untouched.
    fn rest(&mut self, seeded: &PointSet) -> Transform {
        let est = match self {
            Motion::Local(e) => e.estimate(seeded, seeded),
            Motion::Global(e) => e.estimate(seeded, seeded),
            Motion::Perspective(e) => {
                Estimate::Update(Transform::Projective(*e.smoother().accumulated()))
            }
        };

        match est {
            Estimate::Update(t) => t,
            Estimate::Stall => Transform::identity(),
        }
    }

    fn misses(&self) -> usize {
        match self {
            Motion::Perspective(p) => p.misses(),
            _ => 0,
        }
    }

    fn recent_homographies(&self) -> Vec<na::Matrix3<f64>> {
        match self {
            Motion::Perspective(p) => p.smoother().history().copied().collect(),
            _ => Vec::new(),
        }
    }
}

impl<H: HomographySolver> MotionEstimator for Motion<H> {
    fn estimate(&mut self, prev: &PointSet, curr: &PointSet) -> Estimate {
        match self {
            Motion::Local(e) => e.estimate(prev, curr),
            Motion::Global(e) => e.estimate(prev, curr),
            Motion::Perspective(e) => e.estimate(prev, curr),
        }
    }
}

/// Stabilizes one video. The instance owns all per-run state and is
/// consumed by the run.
pub struct Stabilizer<T = LucasKanade, H = RansacHomography> {
    config: StabilizerConfig,
    sampler: PointSampler,
    tracker: T,
    solver: H,
}

impl Stabilizer {
    /// Pure Rust flow and homography backends.
    pub fn new(config: StabilizerConfig) -> Result<Self> {
        Self::with_backends(config, LucasKanade::default(), RansacHomography::default())
    }
}

impl<T, H> Stabilizer<T, H>
where
    T: CorrespondenceTracker,
    H: HomographySolver,
{
    pub fn with_backends(config: StabilizerConfig, tracker: T, solver: H) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            sampler: PointSampler::new(config.factor),
            config,
            tracker,
            solver,
        })
    }

    #[inline]
    pub fn config(&self) -> &StabilizerConfig {
        &self.config
    }

    /// Runs over `source`, writing every frame to `sink` in input order.
    pub fn run<S, K, P>(self, source: &mut S, sink: K, presenter: P) -> Result<RunSummary>
    where
        S: VideoSource + ?Sized,
        K: VideoSink,
        P: Presenter,
    {
        self.run_with(source, move |_, _| Ok(sink), presenter)
    }

    /// Like [`run`](Self::run), but the sink is only opened once the first
    /// frame has been read, from its `(width, height)` and the source fps.
    ///
    /// Once the sink is open, a failure still writes out the buffered frames
    /// with the last known correction and finishes the sink before the error
    /// is returned.
    pub fn run_with<S, K, F, P>(
        self,
        source: &mut S,
        open_sink: F,
        mut presenter: P,
    ) -> Result<RunSummary>
    where
        S: VideoSource + ?Sized,
        K: VideoSink,
        F: FnOnce((u32, u32), f64) -> Result<K>,
        P: Presenter,
    {
        let Self {
            config,
            sampler,
            mut tracker,
            solver,
        } = self;

        let first = source.read()?.ok_or(Error::EmptySource)?;
        let dims = first.dims();
        let total = source.frame_count();
        let mut sink = open_sink(dims, source.fps())?;

        let region = config.strategy.region(dims);
        let seeded = sampler.sample(&region);
        check_region(&region, dims);

        let params = FlowParams::for_region(&config.flow, &region);
        let mut estimator = build_estimator(&config, &region, &seeded, solver);
        let rest = estimator.rest(&seeded);

        log::info!(
            "stabilizing {}x{} video ({} frames) with {} strategy, {} points, window {:?}",
            dims.0,
            dims.1,
            total.map_or_else(|| "unknown".to_string(), |t| t.to_string()),
            config.strategy.name(),
            seeded.len(),
            params.window,
        );

        let mut run = Run {
            config: &config,
            summary: RunSummary::default(),
            buffer: FrameBuffer::new(),
            last_transform: rest,
            stall_run: 0,
        };

        let mut reference: GrayFrame = first.to_gray();
        let mut points = seeded;
        let mut index = 0u64;

        run.buffer.push(index, first);
        run.summary.frames_read = 1;
        presenter.progress(1, total);

        // frames already read are written out and the sink is closed even
        // when reading, tracking or writing fails part way
        let outcome = (|| -> Result<()> {
            while let Some(frame) = source.read()? {
                index += 1;
                run.summary.frames_read += 1;
                presenter.progress(run.summary.frames_read, total);

                if frame.dims() != dims {
                    return Err(Error::FrameSize {
                        expected: dims,
                        got: frame.dims(),
                    });
                }

                let gray = frame.to_gray();
                run.buffer.push(index, frame);

                let tracked = tracker.track(&reference, &gray, &points, &params);

                match estimator.estimate(&points, &tracked) {
                    Estimate::Update(transform) => {
                        if run.stall_run > 0 {
                            log::debug!("recovered after {} stalled frames", run.stall_run);
                        }

                        run.stall_run = 0;
                        run.summary.successful_steps += 1;

                        let last = run.drain(&mut sink, transform, false)?;
                        run.last_transform = transform;
                        reference = gray;
                        points = tracked;

                        if let Some((original, stabilized)) = last {
                            if presenter.preview(&original, &points, &stabilized)? == Control::Stop {
                                log::info!("stopped by presenter at frame {}", index);
                                run.summary.stopped_early = true;
                                break;
                            }
                        }
                    }

                    Estimate::Stall => {
                        run.buffer.mark_stalled();
                        run.stall(index, tracked.valid_count());

                        if let Some(n) = config.reseed_after_stalls {
                            if run.stall_run % n == 0 {
                                log::warn!(
                                    "re-seeding tracking points after {} stalled frames",
                                    run.stall_run
                                );
                                points = sampler.sample(&region);
                                reference = gray;
                                run.summary.reseeds += 1;
                            }
                        }

                        if let Some(cap) = config.max_buffered_frames {
                            if run.buffer.len() >= cap {
                                log::warn!(
                                    "{} frames buffered, flushing with last known transform",
                                    run.buffer.len()
                                );
                                run.flush(&mut sink)?;
                                run.summary.forced_flushes += 1;
                            }
                        }
                    }
                }
            }

            Ok(())
        })();

        if let Err(err) = outcome {
            log::error!("run aborted after {} frames: {}", run.summary.frames_read, err);

            if !run.buffer.is_empty() {
                if let Err(e) = run.flush(&mut sink) {
                    log::warn!("could not write buffered frames: {}", e);
                }
            }
            if let Err(e) = sink.finish() {
                log::warn!("could not finish output: {}", e);
            }

            return Err(err);
        }

        if !run.buffer.is_empty() {
            log::debug!(
                "end of stream, flushing {} buffered frames",
                run.buffer.len()
            );
            run.flush(&mut sink)?;
        }

        sink.finish()?;

        let mut summary = run.summary;
        summary.homography_misses = estimator.misses();
        summary.recent_homographies = estimator.recent_homographies();

        log::info!(
            "done: {} frames read, {} written, {} steps, {} stalls (longest {}), {} forced flushes",
            summary.frames_read,
            summary.frames_written,
            summary.successful_steps,
            summary.stalls,
            summary.longest_stall,
            summary.forced_flushes,
        );

        Ok(summary)
    }
}

struct Run<'a> {
    config: &'a StabilizerConfig,
    summary: RunSummary,
    buffer: FrameBuffer,
    last_transform: Transform,
    stall_run: usize,
}

impl Run<'_> {
    /// Compensates and writes every buffered frame. The newest one gets
    /// `transform`, older ones the last known correction. Returns the newest
    /// frame with its compensated version.
    fn drain<K: VideoSink>(
        &mut self,
        sink: &mut K,
        transform: Transform,
        forced: bool,
    ) -> Result<Option<(Frame, Frame)>> {
        let mut last = None;
        let newest = self.buffer.len().saturating_sub(1);
        let frozen = self.last_transform;

        for (i, buffered) in self.buffer.drain().enumerate() {
            let applied = if i == newest { transform } else { frozen };
            let stabilized = compensate(&buffered.frame, &applied);
            sink.write(&stabilized)?;

            self.summary.frames_written += 1;
            self.summary.emitted.push(EmittedFrame {
                index: buffered.index,
                transform: applied,
                forced,
                stalled: buffered.stalled,
            });

            last = Some((buffered.frame, stabilized));
        }

        Ok(last)
    }

    /// Writes out the buffer with the last known correction.
    fn flush<K: VideoSink>(&mut self, sink: &mut K) -> Result<()> {
        let transform = self.last_transform;
        self.drain(sink, transform, true)?;

        Ok(())
    }

    fn stall(&mut self, index: u64, valid: usize) {
        self.stall_run += 1;
        self.summary.stalls += 1;
        self.summary.longest_stall = self.summary.longest_stall.max(self.stall_run);

        log::debug!(
            "frame {}: only {} points tracked, {} frames buffered",
            index,
            valid,
            self.buffer.len()
        );

        if self.stall_run == self.config.stall_warn_after {
            log::warn!(
                "tracking stalled for {} consecutive frames, {} frames buffered",
                self.stall_run,
                self.buffer.len()
            );
        }
    }
}

fn check_region(region: &Rect, dims: (u32, u32)) {
    if region.is_empty() {
        log::warn!("empty tracking region {:?}, no frame will be tracked", region);
    } else if region.right() > dims.0 as i32 || region.bottom() > dims.1 as i32 {
        log::warn!("tracking region {:?} exceeds the {}x{} frame", region, dims.0, dims.1);
    }
}

/// Point the translation strategies pull the tracked centroid back to: the
/// centroid of the seeded grid, so an unmoved grid yields no correction.
fn anchor(region: &Rect, seeded: &PointSet) -> na::Point2<f64> {
    let c = math::centroid(seeded.points.iter()).unwrap_or_else(|| region.center());
    na::Point2::new(c.x as f64, c.y as f64)
}

fn build_estimator<H: HomographySolver>(
    config: &StabilizerConfig,
    region: &Rect,
    seeded: &PointSet,
    solver: H,
) -> Motion<H> {
    match config.strategy {
        Strategy::Local { .. } => Motion::Local(LocalEstimator::new(anchor(region, seeded))),
        Strategy::Global {
            max_shift_x,
            max_shift_y,
        } => Motion::Global(GlobalEstimator::new(
            anchor(region, seeded),
            f64::from(max_shift_x),
            f64::from(max_shift_y),
        )),
        Strategy::Perspective { .. } => Motion::Perspective(PerspectiveEstimator::new(
            solver,
            TemporalSmoother::new(config.smoothing_alpha, DEFAULT_HISTORY),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preview::NoopPresenter;
    use crate::video::{MemorySink, MemorySource};

    struct Fixed;

    impl CorrespondenceTracker for Fixed {
        fn track(
            &mut self,
            _: &GrayFrame,
            _: &GrayFrame,
            points: &PointSet,
            _: &FlowParams,
        ) -> PointSet {
            points.clone()
        }
    }

    #[test]
    fn sink_opens_after_first_frame() {
        let config = StabilizerConfig::local(Rect::ltwh(4, 4, 16, 16));
        let stab = Stabilizer::with_backends(config, Fixed, RansacHomography::default()).unwrap();
        let mut src = MemorySource::new(vec![Frame::new(32, 24); 3], 30.0);

        let mut seen = None;
        let mut sink = MemorySink::new();
        let (seen_ref, sink_ref) = (&mut seen, &mut sink);
        let summary = stab
            .run_with(
                &mut src,
                move |dims, fps| {
                    *seen_ref = Some((dims, fps));
                    Ok(sink_ref)
                },
                NoopPresenter,
            )
            .unwrap();

        assert_eq!(seen, Some(((32, 24), 30.0)));
        assert_eq!(summary.frames_written, 3);
        assert!(sink.is_finished());
    }

    #[test]
    fn empty_source_opens_no_sink() {
        let config = StabilizerConfig::global(0, 0);
        let stab = Stabilizer::new(config).unwrap();
        let mut src = MemorySource::new(vec![], 30.0);

        let res = stab.run_with(
            &mut src,
            |_, _| -> Result<MemorySink> { panic!("sink must not be opened") },
            NoopPresenter,
        );

        assert!(matches!(res, Err(Error::EmptySource)));
    }

    #[test]
    fn mismatched_frame_size_fails() {
        let config = StabilizerConfig::local(Rect::ltwh(4, 4, 16, 16));
        let stab = Stabilizer::with_backends(config, Fixed, RansacHomography::default()).unwrap();
        let mut src = MemorySource::new(vec![Frame::new(32, 24), Frame::new(16, 24)], 30.0);
        let mut sink = MemorySink::new();

        let res = stab.run(&mut src, &mut sink, NoopPresenter);
        assert!(matches!(
            res,
            Err(Error::FrameSize {
                expected: (32, 24),
                got: (16, 24)
            })
        ));

        // the frame read before the failure is still written and the output closed
        assert_eq!(sink.frames().len(), 1);
        assert!(sink.is_finished());
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let mut config = StabilizerConfig::local(Rect::ltwh(0, 0, 8, 8));
        config.factor = 0;

        assert!(matches!(Stabilizer::new(config), Err(Error::InvalidConfig(_))));
    }
}
