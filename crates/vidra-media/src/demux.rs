use std::path::Path;

use crate::{
    error::MediaResult,
    sample::{AudioSample, DecodedFragment},
    time::MediaTime,
};

/// Demux one persisted MP4 segment into timed sample sequences.
///
/// Contract for implementations:
/// - every sample timestamp is offset by `basetime`;
/// - the fragment `duration` is the video track's length in the rational
///   clock;
/// - the audio track is rescaled with [`rescale_audio`] so both tracks end
///   together;
/// - `is_key` comes from the codec-level sync attachment.
///
/// Runs synchronously; callers hop it onto a blocking context.
pub trait SegmentDemuxer: Send + Sync {
    fn demux(
        &self,
        segment: &Path,
        basetime: MediaTime,
        fragment_index: usize,
    ) -> MediaResult<DecodedFragment>;
}

/// Stretch an audio sample run so its end time matches `video_end`.
///
/// Encoders routinely produce audio tracks a few milliseconds short or long
/// of the video track. Scaling timestamps and durations by the ratio of
/// track lengths keeps A/V alignment stable across fragment boundaries.
pub fn rescale_audio(samples: &mut [AudioSample], basetime: MediaTime, video_end: MediaTime) {
    let Some(last) = samples.last() else {
        return;
    };

    let audio_end = last.pts + last.duration;
    if audio_end == video_end || audio_end <= basetime {
        return;
    }

    let scale = (video_end - basetime).seconds() / (audio_end - basetime).seconds();
    for sample in samples.iter_mut() {
        let offset = (sample.pts - basetime).seconds() * scale;
        let ts = sample.pts.timescale();
        sample.pts = basetime + MediaTime::with_seconds(offset, ts);
        sample.duration = MediaTime::with_seconds(sample.duration.seconds() * scale, ts);
    }
}
