#![forbid(unsafe_code)]

//! HLS for the vidra playback engine: playlist parsing, the on-disk
//! fragment scratch, per-variant byte-range loading, adaptive bitrate
//! selection and the timer-driven session that wires it all together.

pub mod abr;
mod cache;
mod error;
mod events;
mod fetch;
mod loader;
mod options;
pub mod playlist;
mod session;
mod timeline;

pub use cache::FragmentCache;
pub use error::{HlsError, HlsResult};
pub use events::SessionEvent;
pub use fetch::PlaylistFetcher;
pub use loader::{FragmentLoader, LoadOutcome, LoadedFragment};
pub use options::SessionOptions;
pub use playlist::{
    ByteRange, Fragment, InitSegment, MasterId, MasterPlaylist, MediaPlaylist, Resolution,
    Variant, VariantId, parse_master_playlist, parse_media_playlist,
};
pub use session::{HlsSession, SessionSink};
pub use timeline::{TimeFragment, Timeline};
