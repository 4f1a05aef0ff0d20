//! Test doubles for the media backend ports: a scripted container source,
//! copy-through codec engines, a paced in-memory audio device and a
//! recording video sink.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use cinetune_core::{
    AudioFrame, FileInfo, Notification, Packet, PipelineError, StreamKind, VideoFrame, VideoSize,
};
use cinetune_pipeline::ports::{
    AudioDecodeEngine, AudioSink, DecodeError, DeinterlaceEngine, MediaSource, SourceOpener,
    VideoDecodeEngine, VideoSink,
};
use cinetune_pipeline::{start_player, PipelineConfig, PlayerHandle, PlayerPorts};

pub const AUDIO_SAMPLE_RATE: u32 = 10_000;
pub const AUDIO_CHANNELS: u16 = 1;
/// Samples per scripted audio packet: 100 ms at the test sample rate.
pub const AUDIO_FRAME_SAMPLES: usize = 1_000;
pub const FRAME_INTERVAL_US: i64 = 100_000;

pub struct ScriptedSource {
    info: FileInfo,
    packets: Vec<Packet>,
    cursor: usize,
    reads: Arc<AtomicUsize>,
}

impl MediaSource for ScriptedSource {
    fn file_info(&self) -> FileInfo {
        self.info.clone()
    }

    fn next_packet(&mut self) -> Result<Option<Packet>, PipelineError> {
        let Some(packet) = self.packets.get(self.cursor) else {
            return Ok(None);
        };
        self.cursor += 1;
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(Some(packet.clone()))
    }

    fn seek_us(&mut self, target_us: i64) -> Result<i64, PipelineError> {
        let index = self
            .packets
            .iter()
            .position(|p| p.pts_us >= target_us)
            .unwrap_or(self.packets.len().saturating_sub(1));
        self.cursor = index;
        Ok(self.packets.get(index).map_or(target_us, |p| p.pts_us))
    }
}

/// Interleaved audio/video packet script: one packet per stream every
/// `FRAME_INTERVAL_US`, for `frames` intervals.
pub fn interleaved_packets(frames: usize, audio: bool, video: bool) -> Vec<Packet> {
    let mut packets = Vec::new();
    for i in 0..frames {
        let pts_us = i as i64 * FRAME_INTERVAL_US;
        if audio {
            packets.push(Packet {
                stream: StreamKind::Audio,
                pts_us,
                payload: vec![0u8; 16],
            });
        }
        if video {
            packets.push(Packet {
                stream: StreamKind::Video,
                pts_us,
                payload: vec![i as u8; 16],
            });
        }
    }
    packets
}

pub fn scripted_opener(
    info: FileInfo,
    packets: Vec<Packet>,
    reads: Arc<AtomicUsize>,
) -> SourceOpener {
    Box::new(move |_path| {
        Ok(Box::new(ScriptedSource {
            info: info.clone(),
            packets: packets.clone(),
            cursor: 0,
            reads: Arc::clone(&reads),
        }) as Box<dyn MediaSource>)
    })
}

/// Produces one constant-amplitude audio frame per packet.
pub struct ToneAudioEngine {
    pub amplitude: f32,
}

impl AudioDecodeEngine for ToneAudioEngine {
    fn open(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }

    fn decode(&mut self, packet: &Packet, out: &mut AudioFrame) -> Result<bool, DecodeError> {
        out.pts_us = packet.pts_us;
        out.sample_rate = AUDIO_SAMPLE_RATE;
        out.channels = AUDIO_CHANNELS;
        out.samples.clear();
        out.samples.resize(AUDIO_FRAME_SAMPLES, self.amplitude);
        Ok(true)
    }

    fn reset(&mut self) {}

    fn close(&mut self) {}
}

pub struct CopyVideoEngine;

impl VideoDecodeEngine for CopyVideoEngine {
    fn open(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }

    fn decode(&mut self, packet: &Packet, out: &mut VideoFrame) -> Result<bool, DecodeError> {
        out.pts_us = packet.pts_us;
        out.size = VideoSize {
            width: 320,
            height: 240,
        };
        out.interlaced = false;
        out.data.clear();
        out.data.extend_from_slice(&packet.payload);
        Ok(true)
    }

    fn reset(&mut self) {}

    fn close(&mut self) {}
}

pub struct NoopDeinterlacer;

impl DeinterlaceEngine for NoopDeinterlacer {
    fn process(&mut self, _mode: cinetune_core::DeinterlaceMode, _frame: &mut VideoFrame) {}

    fn reset(&mut self) {}
}

#[derive(Debug)]
pub struct AudioSinkState {
    started: bool,
    pub volume: f64,
    queued_us: i64,
    capacity_us: i64,
    last_drain: Instant,
    pub written_us: i64,
}

impl AudioSinkState {
    fn drain(&mut self) {
        let now = Instant::now();
        if self.started {
            let elapsed = now.duration_since(self.last_drain).as_micros() as i64;
            self.queued_us = (self.queued_us - elapsed).max(0);
        }
        self.last_drain = now;
    }
}

/// Audio device model: a bounded buffer that drains in real time while
/// started. Latency equals the buffered playback time.
#[derive(Clone)]
pub struct FakeAudioSink {
    state: Arc<Mutex<AudioSinkState>>,
}

impl FakeAudioSink {
    pub fn new(capacity_us: i64) -> Self {
        Self {
            state: Arc::new(Mutex::new(AudioSinkState {
                started: false,
                volume: 1.0,
                queued_us: 0,
                capacity_us,
                last_drain: Instant::now(),
                written_us: 0,
            })),
        }
    }

    pub fn written_us(&self) -> i64 {
        self.state.lock().unwrap().written_us
    }

    /// Position of the sample leaving the device right now: everything
    /// written minus what is still buffered.
    pub fn played_us(&self) -> i64 {
        let mut state = self.state.lock().unwrap();
        state.drain();
        state.written_us - state.queued_us
    }

    pub fn volume(&self) -> f64 {
        self.state.lock().unwrap().volume
    }
}

impl AudioSink for FakeAudioSink {
    fn start(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.drain();
        state.started = true;
    }

    fn pause(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.drain();
        state.started = false;
    }

    fn stop(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.started = false;
        state.queued_us = 0;
        state.last_drain = Instant::now();
    }

    fn set_volume(&mut self, linear: f64) {
        self.state.lock().unwrap().volume = linear;
    }

    fn write(&mut self, frame: &AudioFrame, from_sample: usize) -> Result<usize, PipelineError> {
        let mut state = self.state.lock().unwrap();
        state.drain();
        if state.queued_us >= state.capacity_us {
            return Ok(0);
        }
        let remaining = frame.samples.len().saturating_sub(from_sample);
        state.queued_us += frame.samples_to_us(remaining);
        state.written_us += frame.samples_to_us(remaining);
        Ok(remaining)
    }

    fn queued_us(&self) -> i64 {
        let mut state = self.state.lock().unwrap();
        state.drain();
        state.queued_us
    }

    fn latency_us(&self) -> i64 {
        let mut state = self.state.lock().unwrap();
        state.drain();
        state.queued_us
    }
}

/// Records every shown frame with its wall-clock show time.
#[derive(Clone, Default)]
pub struct RecordingVideoSink {
    shown: Arc<Mutex<Vec<(i64, Instant)>>>,
    held: Arc<Mutex<Option<VideoFrame>>>,
}

impl RecordingVideoSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shown(&self) -> Vec<(i64, Instant)> {
        self.shown.lock().unwrap().clone()
    }
}

impl VideoSink for RecordingVideoSink {
    fn show(&mut self, frame: VideoFrame) -> Option<VideoFrame> {
        self.shown
            .lock()
            .unwrap()
            .push((frame.pts_us, Instant::now()));
        self.held.lock().unwrap().replace(frame)
    }
}

pub struct TestPipeline {
    pub player: PlayerHandle,
    pub reads: Arc<AtomicUsize>,
    pub audio_sink: FakeAudioSink,
    pub video_sink: RecordingVideoSink,
}

pub fn file_info(duration_us: i64, audio: bool, video: bool) -> FileInfo {
    FileInfo {
        duration_us: Some(duration_us),
        has_audio: audio,
        has_video: video,
        video_size: video.then_some(VideoSize {
            width: 320,
            height: 240,
        }),
    }
}

fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Spawns a full pipeline over the scripted backends.
pub fn scripted_pipeline(
    info: FileInfo,
    packets: Vec<Packet>,
    amplitude: f32,
    cfg: PipelineConfig,
) -> TestPipeline {
    init_tracing();
    let reads = Arc::new(AtomicUsize::new(0));
    let audio_sink = FakeAudioSink::new(150_000);
    let video_sink = RecordingVideoSink::new();
    let ports = PlayerPorts {
        open_source: scripted_opener(info, packets, Arc::clone(&reads)),
        audio_engine: Box::new(ToneAudioEngine { amplitude }),
        video_engine: Box::new(CopyVideoEngine),
        deinterlace_engine: Box::new(NoopDeinterlacer),
        audio_sink: Box::new(audio_sink.clone()),
        video_sink: Box::new(video_sink.clone()),
    };
    let player = start_player(ports, cfg).expect("spawn pipeline");
    TestPipeline {
        player,
        reads,
        audio_sink,
        video_sink,
    }
}

/// Polls the notification stream until `pred` matches or `timeout` passes.
pub fn wait_for(
    rx: &mut tokio::sync::broadcast::Receiver<Notification>,
    timeout: Duration,
    mut pred: impl FnMut(&Notification) -> bool,
) -> Option<Notification> {
    let deadline = Instant::now() + timeout;
    loop {
        match rx.try_recv() {
            Ok(notification) => {
                if pred(&notification) {
                    return Some(notification);
                }
            }
            Err(tokio::sync::broadcast::error::TryRecvError::Empty) => {
                if Instant::now() >= deadline {
                    return None;
                }
                std::thread::sleep(Duration::from_millis(5));
            }
            Err(tokio::sync::broadcast::error::TryRecvError::Lagged(_)) => {}
            Err(tokio::sync::broadcast::error::TryRecvError::Closed) => return None,
        }
    }
}

/// Collects matching notifications for a fixed window.
pub fn collect_for(
    rx: &mut tokio::sync::broadcast::Receiver<Notification>,
    window: Duration,
    mut pred: impl FnMut(&Notification) -> bool,
) -> Vec<Notification> {
    let deadline = Instant::now() + window;
    let mut matched = Vec::new();
    while Instant::now() < deadline {
        match rx.try_recv() {
            Ok(notification) => {
                if pred(&notification) {
                    matched.push(notification);
                }
            }
            Err(tokio::sync::broadcast::error::TryRecvError::Empty) => {
                std::thread::sleep(Duration::from_millis(5));
            }
            Err(tokio::sync::broadcast::error::TryRecvError::Lagged(_)) => {}
            Err(tokio::sync::broadcast::error::TryRecvError::Closed) => break,
        }
    }
    matched
}
