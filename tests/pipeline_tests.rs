use nalgebra as na;
use qstab::flow::{CorrespondenceTracker, FlowParams};
use qstab::homography::RansacHomography;
use qstab::{
    Control, Frame, GrayFrame, MemorySink, MemorySource, NoopPresenter, PointSampler, PointSet,
    Presenter, Rect, Stabilizer, StabilizerConfig, Transform, VideoSink,
};
use std::cell::RefCell;
use std::rc::Rc;

fn texture(x: f64, y: f64) -> u8 {
    let v = 128.0 + 50.0 * (0.21 * x).sin() + 40.0 * (0.17 * y).cos() + 20.0 * (0.07 * (x + y)).sin();
    v.round() as u8
}

/// Texture moved by `(dx, dy)`.
fn textured(w: u32, h: u32, dx: f64, dy: f64) -> Frame {
    Frame::from_fn(w, h, |x, y| {
        let v = texture(x as f64 - dx, y as f64 - dy);
        [v, v, v]
    })
}

fn flat(w: u32, h: u32, v: u8) -> Frame {
    Frame::from_fn(w, h, |_, _| [v, v, v])
}

fn is_blank(gray: &GrayFrame) -> bool {
    let first = gray.get(0, 0);
    gray.view().iter().all(|v| *v == first)
}

/// Tracker driven by a closure over the call number (1 for the second
/// frame read) and the points handed in.
struct Scripted<F>(F, usize);

impl<F> Scripted<F> {
    fn new(f: F) -> Self {
        Scripted(f, 0)
    }
}

impl<F> CorrespondenceTracker for Scripted<F>
where
    F: FnMut(usize, &GrayFrame, &PointSet) -> PointSet,
{
    fn track(
        &mut self,
        _prev: &GrayFrame,
        curr: &GrayFrame,
        points: &PointSet,
        _params: &FlowParams,
    ) -> PointSet {
        self.1 += 1;
        (self.0)(self.1, curr, points)
    }
}

fn still(points: &PointSet) -> PointSet {
    PointSet::new(points.points.clone())
}

fn lost(points: &PointSet) -> PointSet {
    PointSet::with_mask(points.points.clone(), vec![false; points.len()])
}

fn shifted(points: &PointSet, dx: f32, dy: f32) -> PointSet {
    PointSet::new(points.points.iter().map(|p| p + na::Vector2::new(dx, dy)).collect())
}

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Read(u64),
    Write,
}

type Log = Rc<RefCell<Vec<Event>>>;

struct LoggingSink(Log, MemorySink);

impl VideoSink for LoggingSink {
    fn write(&mut self, frame: &Frame) -> qstab::Result<()> {
        self.0.borrow_mut().push(Event::Write);
        self.1.write(frame)
    }

    fn finish(&mut self) -> qstab::Result<()> {
        self.1.finish()
    }
}

struct LoggingPresenter(Log);

impl Presenter for LoggingPresenter {
    fn progress(&mut self, processed: u64, _total: Option<u64>) {
        self.0.borrow_mut().push(Event::Read(processed));
    }

    fn preview(&mut self, _: &Frame, _: &PointSet, _: &Frame) -> qstab::Result<Control> {
        Ok(Control::Continue)
    }
}

/// Frames read but not yet written right after each read.
fn buffered_after_reads(log: &[Event]) -> Vec<(u64, i64)> {
    let mut out = Vec::new();
    let (mut reads, mut writes) = (0i64, 0i64);

    for (i, e) in log.iter().enumerate() {
        if let Event::Read(n) = e {
            reads += 1;
            // writes belonging to this read come after it
            let mut j = i + 1;
            while let Some(Event::Write) = log.get(j) {
                writes += 1;
                j += 1;
            }
            out.push((*n, reads - writes));
        }
    }

    out
}

fn frame_with_id(id: u8) -> Frame {
    flat(24, 24, id)
}

#[test]
fn every_frame_written_once_in_order() {
    let frames: Vec<_> = (0..12u8).map(|i| frame_with_id(10 + i)).collect();
    let mut src = MemorySource::new(frames.clone(), 30.0);
    let mut sink = MemorySink::new();

    // stalls on a few calls so frames pile up in between
    let tracker = Scripted::new(|n: usize, _: &GrayFrame, p: &PointSet| {
        if n % 3 == 0 || n == 7 {
            lost(p)
        } else {
            still(p)
        }
    });

    let config = StabilizerConfig::local(Rect::ltwh(4, 4, 16, 16));
    let summary = Stabilizer::with_backends(config, tracker, RansacHomography::default())
        .unwrap()
        .run(&mut src, &mut sink, NoopPresenter)
        .unwrap();

    assert_eq!(summary.frames_read, 12);
    assert_eq!(summary.frames_written, 12);
    assert_eq!(sink.frames(), &frames[..]);

    let order: Vec<_> = summary.emitted.iter().map(|e| e.index).collect();
    assert_eq!(order, (0..12).collect::<Vec<_>>());
    assert!(sink.is_finished());
}

#[test]
fn stalled_step_emits_nothing() {
    let log: Log = Rc::new(RefCell::new(Vec::new()));
    let frames: Vec<_> = (0..8u8).map(frame_with_id).collect();
    let mut src = MemorySource::new(frames, 30.0);

    let tracker = Scripted::new(|n: usize, _: &GrayFrame, p: &PointSet| {
        if (3..=5).contains(&n) {
            // three points left is one short of enough
            let mut set = still(p);
            set.valid.iter_mut().skip(3).for_each(|v| *v = false);
            set
        } else {
            still(p)
        }
    });

    let config = StabilizerConfig::local(Rect::ltwh(4, 4, 16, 16));
    let summary = Stabilizer::with_backends(config, tracker, RansacHomography::default())
        .unwrap()
        .run(
            &mut src,
            LoggingSink(log.clone(), MemorySink::new()),
            LoggingPresenter(log.clone()),
        )
        .unwrap();

    let buffered = buffered_after_reads(&log.borrow());
    assert_eq!(
        buffered,
        vec![(1, 1), (2, 0), (3, 0), (4, 1), (5, 2), (6, 3), (7, 0), (8, 0)]
    );

    assert_eq!(summary.stalls, 3);
    assert_eq!(summary.longest_stall, 3);

    let stalled: Vec<_> = summary.emitted.iter().filter(|e| e.stalled).map(|e| e.index).collect();
    assert_eq!(stalled, vec![3, 4, 5]);
}

#[test]
fn local_recenters_region_under_constant_translation() {
    let (w, h) = (400, 320);
    let frames: Vec<_> = (0..6)
        .map(|k| textured(w, h, 5.0 * k as f64, -3.0 * k as f64))
        .collect();
    let mut src = MemorySource::new(frames, 25.0);

    let config = StabilizerConfig::local(Rect::ltwh(100, 100, 80, 80));
    let summary = Stabilizer::new(config)
        .unwrap()
        .run(&mut src, MemorySink::new(), NoopPresenter)
        .unwrap();

    assert_eq!(summary.frames_written, 6);
    assert_eq!(summary.stalls, 0);

    for e in &summary.emitted {
        let k = e.index as f64;
        let (dx, dy) = e.transform.offset();

        // the region's content moved by (5k, -3k), its correction undoes that
        assert!((dx + 5.0 * k).abs() <= 1.0, "frame {}: dx {}", e.index, dx);
        assert!((dy - 3.0 * k).abs() <= 1.0, "frame {}: dy {}", e.index, dy);
    }

    assert_eq!(summary.emitted[0].transform, Transform::identity());
}

#[test]
fn global_static_video_is_shifted_by_bias() {
    let (w, h) = (64, 48);
    let input = textured(w, h, 0.0, 0.0);
    let mut src = MemorySource::new(vec![input.clone(); 4], 25.0);
    let mut sink = MemorySink::new();

    let config = StabilizerConfig::global(10, 0);
    let summary = Stabilizer::new(config)
        .unwrap()
        .run(&mut src, &mut sink, NoopPresenter)
        .unwrap();

    assert_eq!(summary.frames_written, 4);
    assert!(summary.recent_homographies.is_empty());

    for e in &summary.emitted {
        assert_eq!(e.transform, Transform::translation(10.0, 0.0));
    }

    for out in sink.frames() {
        for y in 0..h {
            for x in 0..w {
                let expected = if x >= 10 { input.pixel(x - 10, y) } else { [0, 0, 0] };
                assert_eq!(out.pixel(x, y), expected);
            }
        }
    }
}

#[test]
fn perspective_freezes_correction_over_blank_frames() {
    let (w, h) = (160, 120);
    // trackable, blank, blank, trackable, blank, trackable, trackable
    let pattern = [true, true, false, false, true, false, true, true];
    let frames: Vec<_> = pattern
        .iter()
        .enumerate()
        .map(|(k, t)| {
            if *t {
                textured(w, h, 2.0 * k as f64, 1.0 * k as f64)
            } else {
                flat(w, h, 90)
            }
        })
        .collect();
    let mut src = MemorySource::new(frames, 25.0);

    // points follow the content by (2, 1) per frame, nothing is found on a
    // blank frame
    let mut last_good = 0usize;
    let tracker = Scripted::new(move |n: usize, curr: &GrayFrame, p: &PointSet| {
        if is_blank(curr) {
            return lost(p);
        }
        let gap = (n - last_good) as f32;
        last_good = n;
        shifted(p, 2.0 * gap, gap)
    });

    let config = StabilizerConfig::perspective(Rect::ltwh(40, 30, 60, 60));
    let summary = Stabilizer::with_backends(config, tracker, RansacHomography::default())
        .unwrap()
        .run(&mut src, MemorySink::new(), NoopPresenter)
        .unwrap();

    assert_eq!(summary.frames_written, 8);
    assert_eq!(summary.stalls, 3);
    assert_eq!(summary.successful_steps, 4);

    let emitted = &summary.emitted;
    let transform = |i: usize| emitted[i].transform;

    for e in emitted {
        assert_eq!(e.transform.matrix()[(2, 2)], 1.0);
    }

    // blank frames keep the correction of the trackable frame before them
    assert_eq!(transform(2), transform(1));
    assert_eq!(transform(3), transform(1));
    assert_eq!(transform(5), transform(4));
    assert!(emitted[2].stalled && emitted[3].stalled && emitted[5].stalled);

    // tracking resumed, a new smoothed homography was composed
    assert_ne!(transform(4), transform(1));
    assert_ne!(transform(6), transform(4));

    // first step blends the (2, 1) shift into the identity with alpha 0.2
    let (dx, dy) = transform(1).offset();
    assert!((dx - 0.4).abs() < 1e-6 && (dy - 0.2).abs() < 1e-6, "{:?}", (dx, dy));
    assert_eq!(transform(0), Transform::Projective(na::Matrix3::identity()));

    // raw steps, newest first: 6 -> 7 moved (2, 1), 4 -> 6 moved (4, 2)
    let raw = &summary.recent_homographies;
    assert_eq!(raw.len(), 4);
    assert!((raw[0][(0, 2)] - 2.0).abs() < 1e-4 && (raw[0][(1, 2)] - 1.0).abs() < 1e-4);
    assert!((raw[1][(0, 2)] - 4.0).abs() < 1e-4 && (raw[1][(1, 2)] - 2.0).abs() < 1e-4);
}

#[test]
fn default_backends_stall_on_blank_frames() {
    // window is 120 px, the frame leaves room for it around every point
    let (w, h) = (240, 200);
    let pattern = [true, true, false, false, true, false, true, true];
    let frames: Vec<_> = pattern
        .iter()
        .enumerate()
        .map(|(k, t)| {
            if *t {
                textured(w, h, 2.0 * k as f64, 1.0 * k as f64)
            } else {
                flat(w, h, 90)
            }
        })
        .collect();
    let mut src = MemorySource::new(frames, 25.0);

    let config = StabilizerConfig::perspective(Rect::ltwh(90, 70, 60, 60));
    let summary = Stabilizer::new(config)
        .unwrap()
        .run(&mut src, MemorySink::new(), NoopPresenter)
        .unwrap();

    assert_eq!(summary.frames_written, 8);
    assert_eq!(summary.stalls, 3);
    assert_eq!(summary.longest_stall, 2);
    assert_eq!(summary.successful_steps, 4);
    assert_eq!(summary.forced_flushes, 0);

    let emitted = &summary.emitted;
    let transform = |i: usize| emitted[i].transform;

    let stalled: Vec<_> = emitted.iter().map(|e| e.stalled).collect();
    assert_eq!(stalled, pattern.iter().map(|t| !t).collect::<Vec<_>>());
    assert!(emitted.iter().all(|e| !e.forced));

    assert_eq!(transform(2), transform(1));
    assert_eq!(transform(3), transform(1));
    assert_eq!(transform(5), transform(4));
    assert_ne!(transform(4), transform(1));

    let (dx, dy) = transform(1).offset();
    assert!((dx - 0.4).abs() < 0.05 && (dy - 0.2).abs() < 0.05, "{:?}", (dx, dy));
}

#[test]
fn buffer_cap_forces_flush_with_last_correction() {
    let frames: Vec<_> = (0..10u8).map(frame_with_id).collect();
    let mut src = MemorySource::new(frames, 30.0);

    let tracker = Scripted::new(|n: usize, _: &GrayFrame, p: &PointSet| {
        if n == 1 {
            shifted(p, -2.0, 1.0)
        } else {
            lost(p)
        }
    });

    let mut config = StabilizerConfig::local(Rect::ltwh(4, 4, 16, 16));
    config.max_buffered_frames = Some(3);
    let summary = Stabilizer::with_backends(config, tracker, RansacHomography::default())
        .unwrap()
        .run(&mut src, MemorySink::new(), NoopPresenter)
        .unwrap();

    assert_eq!(summary.frames_written, 10);
    assert_eq!(summary.forced_flushes, 2);

    let order: Vec<_> = summary.emitted.iter().map(|e| e.index).collect();
    assert_eq!(order, (0..10).collect::<Vec<_>>());

    for e in &summary.emitted[2..] {
        assert!(e.forced);
        assert_eq!(e.transform, Transform::translation(2.0, -1.0));
    }
}

#[test]
fn end_of_stream_flushes_stalled_frames() {
    let frames: Vec<_> = (0..5u8).map(frame_with_id).collect();
    let mut src = MemorySource::new(frames, 30.0);
    let tracker = Scripted::new(|_: usize, _: &GrayFrame, p: &PointSet| lost(p));

    let config = StabilizerConfig::global(3, 4);
    let summary = Stabilizer::with_backends(config, tracker, RansacHomography::default())
        .unwrap()
        .run(&mut src, MemorySink::new(), NoopPresenter)
        .unwrap();

    assert_eq!(summary.frames_written, 5);
    assert_eq!(summary.successful_steps, 0);
    assert_eq!(summary.longest_stall, 4);
    assert!(summary.emitted.iter().all(|e| e.forced));

    // nothing was ever tracked, the first frame's own correction is used
    assert!(summary
        .emitted
        .iter()
        .all(|e| e.transform == Transform::translation(3.0, 4.0)));
}

#[test]
fn reseeds_after_consecutive_stalls() {
    let region = Rect::ltwh(4, 4, 16, 16);
    let grid = PointSampler::new(4).sample(&region);
    let frames: Vec<_> = (0..6u8).map(frame_with_id).collect();
    let mut src = MemorySource::new(frames, 30.0);

    // drifted points are lost for good, a fresh grid tracks again
    let tracker = Scripted::new(move |n: usize, _: &GrayFrame, p: &PointSet| {
        if n == 1 {
            shifted(p, 50.0, 50.0)
        } else if p.points == grid.points {
            still(p)
        } else {
            lost(p)
        }
    });

    let mut config = StabilizerConfig::local(region);
    config.reseed_after_stalls = Some(2);
    let summary = Stabilizer::with_backends(config, tracker, RansacHomography::default())
        .unwrap()
        .run(&mut src, MemorySink::new(), NoopPresenter)
        .unwrap();

    assert_eq!(summary.reseeds, 1);
    assert_eq!(summary.stalls, 2);
    assert_eq!(summary.successful_steps, 3);
    assert_eq!(summary.frames_written, 6);
    assert_eq!(summary.emitted[4].transform, Transform::identity());
}

#[test]
fn zero_sized_region_stalls_forever_but_writes_everything() {
    let frames: Vec<_> = (0..4u8).map(frame_with_id).collect();
    let mut src = MemorySource::new(frames.clone(), 30.0);
    let mut sink = MemorySink::new();

    let config = StabilizerConfig::local(Rect::ltwh(5, 5, 0, 0));
    let summary = Stabilizer::new(config)
        .unwrap()
        .run(&mut src, &mut sink, NoopPresenter)
        .unwrap();

    assert_eq!(summary.stalls, 3);
    assert_eq!(sink.frames(), &frames[..]);
}

struct StopAfter(usize);

impl Presenter for StopAfter {
    fn progress(&mut self, _: u64, _: Option<u64>) {}

    fn preview(&mut self, original: &Frame, _: &PointSet, stabilized: &Frame) -> qstab::Result<Control> {
        assert_eq!(original.dims(), stabilized.dims());

        self.0 -= 1;
        Ok(if self.0 == 0 { Control::Stop } else { Control::Continue })
    }
}

#[test]
fn presenter_stop_finishes_output() {
    let frames: Vec<_> = (0..10u8).map(frame_with_id).collect();
    let mut src = MemorySource::new(frames, 30.0);
    let mut sink = MemorySink::new();
    let tracker = Scripted::new(|_: usize, _: &GrayFrame, p: &PointSet| still(p));

    let config = StabilizerConfig::local(Rect::ltwh(4, 4, 16, 16));
    let summary = Stabilizer::with_backends(config, tracker, RansacHomography::default())
        .unwrap()
        .run(&mut src, &mut sink, StopAfter(2))
        .unwrap();

    assert!(summary.stopped_early);
    assert_eq!(summary.frames_read, 3);
    assert_eq!(sink.frames().len(), 3);
    assert!(sink.is_finished());
}
