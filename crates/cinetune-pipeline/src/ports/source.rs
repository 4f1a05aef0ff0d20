use cinetune_core::{FileInfo, Packet, PipelineError};

/// Container reader: yields packets on demand, in container order.
pub trait MediaSource: Send {
    fn file_info(&self) -> FileInfo;

    /// `Ok(None)` is end of stream.
    fn next_packet(&mut self) -> Result<Option<Packet>, PipelineError>;

    /// Seeks to the container position nearest `target_us` and returns the
    /// clamped native position actually reached.
    fn seek_us(&mut self, target_us: i64) -> Result<i64, PipelineError>;
}

/// Opens a container for one file; called once per `OpenFileReq`.
pub type SourceOpener =
    Box<dyn FnMut(&str) -> Result<Box<dyn MediaSource>, PipelineError> + Send>;
