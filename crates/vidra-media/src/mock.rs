//! Deterministic demuxer for tests.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;

use crate::{
    demux::SegmentDemuxer,
    error::{MediaError, MediaResult},
    sample::{AudioSample, DecodedFragment, VideoSample},
    time::{MEDIA_TIMESCALE, MediaTime},
};

/// Produces synthetic sample grids without touching the segment bytes.
///
/// Every fragment gets `frames` video samples at a fixed cadence with a key
/// frame every `keyframe_interval` samples (the first sample is always key),
/// and a matching audio run. Deterministic, so tests can assert exact
/// timestamps.
pub struct MockDemuxer {
    pub fragment_secs: f64,
    pub frames: usize,
    pub audio_frames: usize,
    pub keyframe_interval: usize,
    /// Fragment indices that fail with `DecodeMedia`.
    pub fail_indices: Vec<usize>,
    pub demuxed: AtomicUsize,
}

impl Default for MockDemuxer {
    fn default() -> Self {
        Self {
            fragment_secs: 6.0,
            frames: 180,
            audio_frames: 282,
            keyframe_interval: 30,
            fail_indices: Vec::new(),
            demuxed: AtomicUsize::new(0),
        }
    }
}

impl MockDemuxer {
    pub fn with_fragment_secs(fragment_secs: f64) -> Self {
        Self {
            fragment_secs,
            ..Self::default()
        }
    }

    /// Number of successful demux calls so far.
    pub fn demuxed(&self) -> usize {
        self.demuxed.load(Ordering::Relaxed)
    }
}

impl SegmentDemuxer for MockDemuxer {
    fn demux(
        &self,
        _segment: &Path,
        basetime: MediaTime,
        fragment_index: usize,
    ) -> MediaResult<DecodedFragment> {
        if self.fail_indices.contains(&fragment_index) {
            return Err(MediaError::DecodeMedia(format!(
                "injected failure for fragment {fragment_index}"
            )));
        }
        if self.frames == 0 {
            return Err(MediaError::EmptyVideo);
        }
        if self.audio_frames == 0 {
            return Err(MediaError::EmptyAudio);
        }

        let duration = MediaTime::with_seconds(self.fragment_secs, MEDIA_TIMESCALE);
        let frame_ticks = duration.value() / self.frames as i64;
        let video = (0..self.frames)
            .map(|i| {
                let pts = basetime + MediaTime::new(i as i64 * frame_ticks, MEDIA_TIMESCALE);
                VideoSample {
                    pts,
                    dts: pts,
                    duration: MediaTime::new(frame_ticks, MEDIA_TIMESCALE),
                    is_key: i % self.keyframe_interval == 0,
                    data: Bytes::from_static(b"v"),
                }
            })
            .collect();

        let audio_ticks = duration.value() / self.audio_frames as i64;
        let audio = (0..self.audio_frames)
            .map(|i| AudioSample {
                pts: basetime + MediaTime::new(i as i64 * audio_ticks, MEDIA_TIMESCALE),
                duration: MediaTime::new(audio_ticks, MEDIA_TIMESCALE),
                data: Bytes::from_static(b"a"),
            })
            .collect();

        self.demuxed.fetch_add(1, Ordering::Relaxed);

        Ok(DecodedFragment {
            fragment_index,
            basetime,
            duration,
            from_cache: false,
            video,
            audio,
        })
    }
}
