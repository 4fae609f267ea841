use uuid::Uuid;

/// Coarse playback state driven by user input, end-of-stream detection
/// and buffering.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PlayState {
    #[default]
    Paused,
    Playing,
    Finished,
}

/// Aggregate snapshot published on every display tick.
#[derive(Clone, Debug, PartialEq)]
pub struct PlayerStatus {
    pub state: PlayState,
    /// Renderer clock position in seconds.
    pub position_secs: f64,
    /// `true` while playing but stalled waiting for data.
    pub buffering: bool,
    /// Seconds already promised to the renderer.
    pub buffered_secs: f64,
    pub base_rate: f64,
    /// Reissued on every user seek.
    pub seek_id: Uuid,
}

impl Default for PlayerStatus {
    fn default() -> Self {
        Self {
            state: PlayState::Paused,
            position_secs: 0.0,
            buffering: false,
            buffered_secs: 0.0,
            base_rate: 1.0,
            seek_id: Uuid::nil(),
        }
    }
}

/// Monotone buffered range paired with the total duration.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BufferingStatus {
    /// Seconds buffered from the start of the timeline.
    pub buffered_secs: f64,
    /// Total duration of the timeline in seconds.
    pub total_secs: f64,
}
