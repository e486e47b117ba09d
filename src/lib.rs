pub mod bbox;
pub mod buffer;
pub mod compensator;
pub mod config;
#[cfg(feature = "opencv")]
pub mod cv;
pub mod error;
pub mod estimator;
pub mod flow;
pub mod frame;
pub mod homography;
pub mod logging;
pub mod math;
pub mod pipeline;
pub mod preview;
pub mod sampler;
pub mod smoother;
pub mod transform;
pub mod video;

mod circular_queue;

pub use bbox::Rect;
pub use config::{StabilizerConfig, Strategy};
pub use error::{Error, Result};
pub use frame::{Frame, GrayFrame};
pub use pipeline::{EmittedFrame, RunSummary, Stabilizer};
pub use preview::{Control, NoopPresenter, Presenter};
pub use sampler::{PointSampler, PointSet};
pub use transform::Transform;
pub use video::{MemorySink, MemorySource, VideoSink, VideoSource};

#[cfg(feature = "opencv")]
pub use cv::stabilize_file;

use nalgebra as na;
use std::fmt;

pub trait Float:
    num_traits::FromPrimitive + na::ComplexField + Copy + fmt::Debug + PartialEq + 'static
{
}

impl<T> Float for T where
    T: num_traits::FromPrimitive + na::ComplexField + Copy + fmt::Debug + PartialEq + 'static
{
}
