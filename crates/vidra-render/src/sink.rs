//! Seams to the platform media layers.
//!
//! The underlying layers are owned by the embedder (a sample-buffer
//! display layer and an audio renderer sharing a synchronizer). The
//! renderer only needs backpressure, enqueue and flush.

use vidra_media::{AudioSample, VideoSample};

/// The video sample-buffer layer.
pub trait VideoLayer: Send {
    /// Whether the layer wants more samples right now.
    fn is_ready_for_more(&self) -> bool;

    fn enqueue(&mut self, sample: VideoSample);

    /// Discard everything queued in the layer.
    fn flush(&mut self);
}

/// The audio renderer.
pub trait AudioSink: Send {
    fn is_ready_for_more(&self) -> bool;

    fn enqueue(&mut self, sample: AudioSample);

    fn flush(&mut self);

    fn set_volume(&mut self, volume: f32);

    fn set_muted(&mut self, muted: bool);
}
