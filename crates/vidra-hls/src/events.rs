//! Session events for monitoring and UI integration.

use std::time::Duration;

use crate::{abr::ChoiceReason, playlist::VariantId};

/// Events emitted by a running HLS session.
#[derive(Clone, Debug)]
pub enum SessionEvent {
    /// ABR picked a variant for the next fragment.
    VariantChosen {
        fragment_index: usize,
        variant: VariantId,
        reason: ChoiceReason,
    },
    /// A fragment finished loading and was handed to the renderer.
    FragmentLoaded {
        fragment_index: usize,
        variant: VariantId,
        bytes: u64,
        elapsed: Duration,
        from_cache: bool,
    },
    /// A fragment load or decode failed; the index does not advance.
    FragmentError {
        fragment_index: usize,
        error: String,
    },
    /// The session jumped to a new position.
    Seeked {
        fragment_index: usize,
        progress_secs: f64,
    },
    /// All fragments have been emitted.
    EndOfStream,
}
