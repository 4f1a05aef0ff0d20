use cinetune_core::{AudioFrame, PipelineError, VideoFrame};

/// Audio playback device.
pub trait AudioSink: Send {
    fn start(&mut self);

    fn pause(&mut self);

    /// Stops playback and discards anything still queued in hardware.
    fn stop(&mut self);

    fn set_volume(&mut self, linear: f64);

    /// Writes interleaved samples starting at `from_sample`; returns how
    /// many samples the device accepted (0 when its buffer is full).
    fn write(&mut self, frame: &AudioFrame, from_sample: usize) -> Result<usize, PipelineError>;

    /// Playback time still queued in the hardware buffer.
    fn queued_us(&self) -> i64;

    /// Estimated delay between a written sample and it becoming audible.
    fn latency_us(&self) -> i64;
}

/// Video display device.
pub trait VideoSink: Send {
    /// Displays `frame` and returns the previously displayed frame for
    /// buffer recycling (None on the first call after open).
    fn show(&mut self, frame: VideoFrame) -> Option<VideoFrame>;
}
