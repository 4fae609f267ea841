use bytes::Bytes;

use crate::time::MediaTime;

/// One decoded-ready video sample.
#[derive(Clone, Debug)]
pub struct VideoSample {
    /// Presentation timestamp, already offset by the fragment basetime.
    pub pts: MediaTime,
    /// Decode timestamp.
    pub dts: MediaTime,
    pub duration: MediaTime,
    /// Sync sample: decodable without reference to prior samples.
    pub is_key: bool,
    pub data: Bytes,
}

/// One decoded-ready audio sample. Audio samples are always sync samples.
#[derive(Clone, Debug)]
pub struct AudioSample {
    pub pts: MediaTime,
    pub duration: MediaTime,
    pub data: Bytes,
}

/// A fully demuxed fragment, ready for the renderer.
#[derive(Clone, Debug)]
pub struct DecodedFragment {
    pub fragment_index: usize,
    /// Presentation time of the fragment start in the session timeline.
    pub basetime: MediaTime,
    /// Length of the video track in the rational clock. May differ from
    /// the playlist `#EXTINF` value by container rounding.
    pub duration: MediaTime,
    /// Whether the segment bytes came from the on-disk scratch.
    pub from_cache: bool,
    pub video: Vec<VideoSample>,
    pub audio: Vec<AudioSample>,
}

impl DecodedFragment {
    /// Presentation time one tick past the last sample of this fragment.
    #[must_use]
    pub fn end_time(&self) -> MediaTime {
        self.basetime + self.duration
    }
}
