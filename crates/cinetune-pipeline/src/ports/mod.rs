//! Call contracts of the external media backends.
//!
//! Container reading, codec invocation, deinterlacing pixel math and device
//! programming all live behind these traits; the pipeline only coordinates
//! them. Implementations must be `Send` (they move onto actor threads) and
//! must not block longer than a device write.

pub mod decode;
pub mod deinterlace;
pub mod sink;
pub mod source;

pub use decode::{AudioDecodeEngine, DecodeError, VideoDecodeEngine};
pub use deinterlace::DeinterlaceEngine;
pub use sink::{AudioSink, VideoSink};
pub use source::{MediaSource, SourceOpener};
