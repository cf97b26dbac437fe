use thiserror::Error;
#[derive(Debug, Error)]
pub enum ViewerError {
    #[error("no streams could be resolved on the network")]
    SourceUnavailable,
    #[error("stream '{0}' was not found")]
    StreamNotFound(String),
    #[error("ring buffer is empty; nothing has been ingested yet")]
    InsufficientData,
    #[error("invalid frequency filter: {0}")]
    InvalidFilterSpec(String),
    #[error("cannot switch streams while a recording is in progress")]
    StreamSwitchWhileRecording,
    #[error("channel count mismatch: expected {expected}, got {actual}")]
    ChannelMismatch { expected: usize, actual: usize },
    #[error("chunk carries {samples} samples but {timestamps} timestamps")]
    TimestampMismatch { samples: usize, timestamps: usize },
    #[error("sample rate must be greater than zero (got {0})")]
    InvalidSampleRate(f64),
    #[error("unknown filter kernel '{0}'")]
    UnknownKernel(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("session is closed")]
    SessionClosed,
    #[error("failed to flush recording: {0}")]
    Recording(String),
    #[error("failed to parse configuration: {0}")]
    Config(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to render plot: {0}")]
    Plot(String),
}
impl<E: std::error::Error + Send + Sync + 'static> From<plotters::drawing::DrawingAreaErrorKind<E>>
    for ViewerError
{
    fn from(value: plotters::drawing::DrawingAreaErrorKind<E>) -> Self {
        ViewerError::Plot(format!("{value:?}"))
    }
}
impl From<image::ImageError> for ViewerError {
    fn from(value: image::ImageError) -> Self {
        ViewerError::Plot(value.to_string())
    }
}
