//! Precomputed presentation-time grid over a session's fragments.

use vidra_media::{MEDIA_TIMESCALE, MediaTime};

use crate::playlist::MediaPlaylist;

/// One fragment slot on the shared time grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeFragment {
    /// Sum of all preceding fragment durations.
    pub timestamp: MediaTime,
    pub duration: MediaTime,
}

/// The session time grid, built once from the first media playlist.
///
/// All variants of a session must share this grid: identical fragment
/// counts and per-index durations (within container rounding), so the
/// i-th fragment of any variant is temporally interchangeable.
#[derive(Debug, Clone)]
pub struct Timeline {
    fragments: Vec<TimeFragment>,
}

/// Per-index duration slack when comparing variant grids, in seconds.
const GRID_TOLERANCE_SECS: f64 = 0.01;

impl Timeline {
    pub fn from_playlist(playlist: &MediaPlaylist) -> Self {
        let mut fragments = Vec::with_capacity(playlist.fragments.len());
        let mut cursor = MediaTime::new(0, MEDIA_TIMESCALE);

        for fragment in &playlist.fragments {
            let duration = MediaTime::with_seconds(fragment.duration_secs, MEDIA_TIMESCALE);
            fragments.push(TimeFragment {
                timestamp: cursor,
                duration,
            });
            cursor = cursor + duration;
        }

        Self { fragments }
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<TimeFragment> {
        self.fragments.get(index).copied()
    }

    /// Index of the fragment whose interval contains `t`.
    ///
    /// Times past the end clamp to the last index.
    pub fn index_for(&self, t: MediaTime) -> usize {
        if self.fragments.is_empty() {
            return 0;
        }

        match self
            .fragments
            .binary_search_by(|f| f.timestamp.cmp(&t))
        {
            Ok(i) => i,
            Err(0) => 0,
            Err(i) => {
                let prev = self.fragments[i - 1];
                if t < prev.timestamp + prev.duration {
                    i - 1
                } else {
                    i.min(self.fragments.len() - 1)
                }
            }
        }
    }

    /// Presentation time at which the last fragment ends.
    pub fn finish_time(&self) -> MediaTime {
        self.fragments
            .last()
            .map(|f| f.timestamp + f.duration)
            .unwrap_or(MediaTime::ZERO)
    }

    /// Whether another variant's playlist shares this grid.
    pub fn matches(&self, playlist: &MediaPlaylist) -> bool {
        if playlist.fragments.len() != self.fragments.len() {
            return false;
        }
        self.fragments
            .iter()
            .zip(&playlist.fragments)
            .all(|(slot, fragment)| {
                (slot.duration.seconds() - fragment.duration_secs).abs() <= GRID_TOLERANCE_SECS
            })
    }
}

#[cfg(test)]
mod tests {
    use url::Url;

    use super::*;
    use crate::playlist::{ByteRange, Fragment, InitSegment, MediaPlaylist};

    fn playlist(durations: &[f64]) -> MediaPlaylist {
        let url: Url = "http://127.0.0.1/partfile1.mp4".parse().unwrap();
        MediaPlaylist {
            target_duration: 6,
            version: 6,
            media_sequence: 0,
            independent_segments: true,
            init: InitSegment {
                url: url.clone(),
                byte_range: ByteRange { start: 0, length: 1024 },
            },
            fragments: durations
                .iter()
                .enumerate()
                .map(|(i, &duration_secs)| Fragment {
                    duration_secs,
                    byte_range: ByteRange {
                        start: 1024 + i as u64 * 1000,
                        length: 1000,
                    },
                    url: url.clone(),
                })
                .collect(),
        }
    }

    #[test]
    fn timestamps_are_prefix_sums_of_durations() {
        let timeline = Timeline::from_playlist(&playlist(&[6.0, 6.0, 6.0, 6.0]));

        assert_eq!(timeline.len(), 4);
        for i in 0..4 {
            let slot = timeline.get(i).unwrap();
            assert!((slot.timestamp.seconds() - 6.0 * i as f64).abs() < 1e-9);
            assert!((slot.duration.seconds() - 6.0).abs() < 1e-9);
        }
        assert!((timeline.finish_time().seconds() - 24.0).abs() < 1e-9);
    }

    #[test]
    fn adjacent_slots_tile_exactly() {
        let timeline = Timeline::from_playlist(&playlist(&[6.0, 5.5, 6.02, 3.98]));
        for i in 0..timeline.len() - 1 {
            let a = timeline.get(i).unwrap();
            let b = timeline.get(i + 1).unwrap();
            assert_eq!(a.timestamp + a.duration, b.timestamp);
        }
    }

    #[test]
    fn index_lookup_covers_interior_boundaries_and_past_end() {
        let timeline = Timeline::from_playlist(&playlist(&[6.0, 6.0, 6.0, 6.0]));

        let at = |secs: f64| timeline.index_for(MediaTime::with_seconds(secs, MEDIA_TIMESCALE));
        assert_eq!(at(0.0), 0);
        assert_eq!(at(5.999), 0);
        assert_eq!(at(6.0), 1);
        assert_eq!(at(13.2), 2);
        assert_eq!(at(23.999), 3);
        assert_eq!(at(24.0), 3);
        assert_eq!(at(1000.0), 3);
    }

    #[test]
    fn grid_match_tolerates_rounding_only() {
        let timeline = Timeline::from_playlist(&playlist(&[6.0, 6.0]));
        assert!(timeline.matches(&playlist(&[6.004, 5.996])));
        assert!(!timeline.matches(&playlist(&[6.0, 5.0])));
        assert!(!timeline.matches(&playlist(&[6.0, 6.0, 6.0])));
    }
}
