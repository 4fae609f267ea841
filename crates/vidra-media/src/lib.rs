#![forbid(unsafe_code)]

//! Shared media primitives for the vidra playback engine: the rational
//! clock, decoded sample records and the segment demuxer contract.

mod demux;
mod error;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
mod sample;
mod time;

pub use demux::{SegmentDemuxer, rescale_audio};
pub use error::{MediaError, MediaResult};
pub use sample::{AudioSample, DecodedFragment, VideoSample};
pub use time::{MEDIA_TIMESCALE, MediaTime};
