use serde::{Deserialize, Serialize};

pub const MICROS_PER_SEC: i64 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Audio,
    Video,
}

impl StreamKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

/// One compressed unit read from the container.
///
/// Packets are move-only: the demuxer hands ownership downstream and never
/// touches the payload again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub stream: StreamKind,
    pub pts_us: i64,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoSize {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub duration_us: Option<i64>,
    pub has_audio: bool,
    pub has_video: bool,
    pub video_size: Option<VideoSize>,
}

/// One decoded audio frame, interleaved `f32` samples.
///
/// Lives in a pooled buffer slot; decoders fill it in place so the hot path
/// never allocates per frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioFrame {
    pub pts_us: i64,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl AudioFrame {
    /// Playback duration of `samples` interleaved samples at this format.
    pub fn samples_to_us(&self, samples: usize) -> i64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0;
        }
        let frames = (samples / self.channels as usize) as i64;
        frames * MICROS_PER_SEC / self.sample_rate as i64
    }
}

/// One decoded video frame. Pixel format is opaque to the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VideoFrame {
    pub pts_us: i64,
    pub size: VideoSize,
    pub interlaced: bool,
    pub data: Vec<u8>,
}

pub fn us_to_secs(pts_us: i64) -> f64 {
    pts_us as f64 / MICROS_PER_SEC as f64
}

pub fn secs_to_us(secs: f64) -> i64 {
    (secs * MICROS_PER_SEC as f64).round() as i64
}

#[cfg(test)]
mod tests {
    use super::{secs_to_us, us_to_secs, MICROS_PER_SEC};

    #[test]
    fn second_conversions_round_trip() {
        assert_eq!(secs_to_us(1.0), MICROS_PER_SEC);
        assert_eq!(secs_to_us(us_to_secs(123_456)), 123_456);
        assert_eq!(secs_to_us(-0.5), -500_000);
    }
}
