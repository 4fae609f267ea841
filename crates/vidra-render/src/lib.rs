#![forbid(unsafe_code)]

//! The buffers renderer: two ring-buffered sample queues feeding a video
//! layer and an audio renderer whose shared clock this crate drives.

mod clock;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
mod renderer;
mod ring;
mod sink;

pub use clock::PlaybackClock;
pub use renderer::{BuffersRenderer, RendererOptions};
pub use ring::SampleRing;
pub use sink::{AudioSink, VideoLayer};
