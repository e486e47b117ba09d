use crate::bbox::Rect;
use crate::error::{Error, Result};
use crate::flow::FlowConfig;
use crate::smoother::DEFAULT_ALPHA;
use serde_derive::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_FACTOR: u32 = 4;
pub const DEFAULT_STALL_WARN_AFTER: usize = 30;

/// Which correction is estimated and where points are tracked.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Strategy {
    /// Translation keeping the region of interest in place.
    Local { roi: Rect },
    /// Translation keeping the whole frame in place, plus a constant bias.
    Global {
        #[serde(default)]
        max_shift_x: i32,
        #[serde(default)]
        max_shift_y: i32,
    },
    /// Smoothed homography of the region of interest.
    Perspective { roi: Rect },
}

impl Strategy {
    /// Area the tracking points are laid over for a frame of `dims`.
    pub fn region(&self, dims: (u32, u32)) -> Rect {
        match self {
            Strategy::Local { roi } | Strategy::Perspective { roi } => *roi,
            Strategy::Global { .. } => Rect::frame(dims),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Local { .. } => "local",
            Strategy::Global { .. } => "global",
            Strategy::Perspective { .. } => "perspective",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StabilizerConfig {
    pub strategy: Strategy,

    #[serde(default)]
    pub flow: FlowConfig,

    /// Grid density; `(factor - 1)^2` points are tracked.
    #[serde(default = "default_factor")]
    pub factor: u32,

    #[serde(default = "default_alpha")]
    pub smoothing_alpha: f64,

    /// Force a flush with the last known correction once this many frames
    /// wait. Unbounded when unset.
    #[serde(default)]
    pub max_buffered_frames: Option<usize>,

    /// Lay a fresh grid after this many consecutive stalls.
    #[serde(default)]
    pub reseed_after_stalls: Option<usize>,

    #[serde(default = "default_stall_warn_after")]
    pub stall_warn_after: usize,
}

fn default_factor() -> u32 {
    DEFAULT_FACTOR
}

fn default_alpha() -> f64 {
    DEFAULT_ALPHA
}

fn default_stall_warn_after() -> usize {
    DEFAULT_STALL_WARN_AFTER
}

impl StabilizerConfig {
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            flow: FlowConfig::default(),
            factor: DEFAULT_FACTOR,
            smoothing_alpha: DEFAULT_ALPHA,
            max_buffered_frames: None,
            reseed_after_stalls: None,
            stall_warn_after: DEFAULT_STALL_WARN_AFTER,
        }
    }

    pub fn local(roi: Rect) -> Self {
        Self::new(Strategy::Local { roi })
    }

    pub fn global(max_shift_x: i32, max_shift_y: i32) -> Self {
        Self::new(Strategy::Global {
            max_shift_x,
            max_shift_y,
        })
    }

    pub fn perspective(roi: Rect) -> Self {
        Self::new(Strategy::Perspective { roi })
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;

        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;

        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        match self.strategy {
            Strategy::Local { roi } | Strategy::Perspective { roi } => {
                if roi.x < 0 || roi.y < 0 {
                    return Err(invalid(format!("roi origin must be non-negative, got {:?}", roi)));
                }
            }
            Strategy::Global { .. } => {}
        }

        if !(self.flow.eps > 0.0 && self.flow.eps.is_finite()) {
            return Err(invalid(format!("flow.eps must be positive, got {}", self.flow.eps)));
        }

        if self.flow.count == 0 {
            return Err(invalid("flow.count must be positive".into()));
        }

        if self.factor < 2 {
            return Err(invalid(format!("factor must be at least 2, got {}", self.factor)));
        }

        if !(self.smoothing_alpha > 0.0 && self.smoothing_alpha < 1.0) {
            return Err(invalid(format!(
                "smoothing_alpha must lie in (0, 1), got {}",
                self.smoothing_alpha
            )));
        }

        if self.max_buffered_frames == Some(0) {
            return Err(invalid("max_buffered_frames must be positive".into()));
        }

        if self.reseed_after_stalls == Some(0) {
            return Err(invalid("reseed_after_stalls must be positive".into()));
        }

        if self.stall_warn_after == 0 {
            return Err(invalid("stall_warn_after must be positive".into()));
        }

        Ok(())
    }
}

#[inline]
fn invalid(msg: String) -> Error {
    Error::InvalidConfig(msg)
}
