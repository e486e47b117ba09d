use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unable to open video source: {0}")]
    SourceOpen(String),

    #[error("Unable to read the first frame")]
    EmptySource,

    #[error("Frame size mismatch: expected {expected:?}, got {got:?}")]
    FrameSize {
        expected: (u32, u32),
        got: (u32, u32),
    },

    #[error("Video sink error: {0}")]
    Sink(String),

    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Json Error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Logger Error: {0}")]
    Logger(#[from] flexi_logger::FlexiLoggerError),

    #[cfg(feature = "opencv")]
    #[error("OpenCV Error: {0}")]
    OpenCv(#[from] opencv::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
