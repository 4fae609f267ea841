#![forbid(unsafe_code)]

//! Loopback HLS origin.
//!
//! The playback engine consumes fragments by URL; this server gives it a
//! plain-HTTP surface over resources that actually live behind the
//! embedder's byte-range fetcher. Per registered session it serves:
//!
//! - `/<id>/master.m3u8`: synthesized from the session's variant set;
//! - `/<id>/hls_level_<height>.m3u8`: the provider playlist text with
//!   `mtproto:<fileId>` references rewritten to `partfile<fileId>.mp4`;
//! - `/<id>/partfile<fileId>.mp4`: ranged reads delegated to the fetcher.

mod rewrite;
mod server;

pub use rewrite::{rewrite_media_playlist, synthesize_master};
pub use server::{HlsOrigin, OriginError, OriginResult, SessionSpec, VariantSpec};
