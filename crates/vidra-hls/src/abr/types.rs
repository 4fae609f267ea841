use std::time::Duration;

/// Tunable constants of the ABR controller.
#[derive(Clone, Debug)]
pub struct AbrOptions {
    /// Buffer level at which fetching pauses entirely.
    pub buffering_duration: Duration,
    /// Below this buffer level the situation is urgent.
    pub urgent_duration: Duration,
    /// Above this buffer level the situation is relaxed.
    pub not_urgent_duration: Duration,
    /// Bandwidth headroom required in the normal tier.
    pub bitrate_ratio: f64,
    /// Headroom required when the buffer is nearly dry.
    pub urgent_ratio: f64,
    /// Headroom required when the buffer is comfortable.
    pub not_urgent_ratio: f64,
    /// EWMA weight when the instantaneous rate exceeds the estimate.
    pub upgrade_speed: f64,
    /// EWMA weight when the instantaneous rate is below the estimate.
    pub downgrade_speed: f64,
    /// Floor for measured load durations; guards the rate computation
    /// against near-zero denominators on tiny segments.
    pub min_measurable_load: Duration,
    /// Fixed starting estimate in bits/s. `None` seeds from the
    /// process-wide last known value.
    pub initial_bitrate: Option<f64>,
}

impl Default for AbrOptions {
    fn default() -> Self {
        Self {
            buffering_duration: Duration::from_secs(30),
            urgent_duration: Duration::from_secs(5),
            not_urgent_duration: Duration::from_secs(15),
            bitrate_ratio: 1.3,
            urgent_ratio: 2.0,
            not_urgent_ratio: 1.1,
            upgrade_speed: 0.1,
            downgrade_speed: 0.3,
            min_measurable_load: Duration::from_millis(10),
            initial_bitrate: None,
        }
    }
}

/// User-facing quality selection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum QualitySelection {
    /// Adaptive selection driven by the throughput estimate.
    #[default]
    Auto,
    /// Pin the variant with this vertical resolution.
    Height(u32),
}
