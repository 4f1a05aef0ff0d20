use thiserror::Error;

use crate::media::StreamKind;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("unsupported {} stream", .0.as_str())]
    UnsupportedStream(StreamKind),
    #[error("source unavailable")]
    SourceUnavailable,
    #[error("decoder unavailable")]
    DecoderUnavailable,
    #[error("sink unavailable")]
    SinkUnavailable,
    #[error("no file open")]
    NotOpen,
    #[error("seek target out of range: {position_us}us")]
    SeekOutOfRange { position_us: i64 },
    #[error("stage failure: {0}")]
    StageFailure(String),
}

impl From<String> for PipelineError {
    fn from(value: String) -> Self {
        Self::StageFailure(value)
    }
}
