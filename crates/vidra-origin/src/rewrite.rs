//! Playlist text synthesis and rewriting.

use crate::server::VariantSpec;

/// Synthesize a master playlist from a session's variant set.
///
/// Each variant points at `hls_level_<height>.m3u8`. The output parses
/// back into exactly the variant set it was built from.
pub fn synthesize_master(variants: &[VariantSpec]) -> String {
    let mut out = String::from("#EXTM3U\n");
    for v in variants {
        out.push_str(&format!(
            "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}x{}\nhls_level_{}.m3u8\n",
            v.bandwidth, v.width, v.height, v.height
        ));
    }
    out
}

/// Rewrite every `mtproto:<fileId>` occurrence to `partfile<fileId>.mp4`.
///
/// The provider's media playlists reference fragments through an internal
/// scheme; the local origin exposes the same bytes as ranged part-files.
pub fn rewrite_media_playlist(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(at) = rest.find("mtproto:") {
        out.push_str(&rest[..at]);
        let tail = &rest[at + "mtproto:".len()..];
        let digits = tail.chars().take_while(char::is_ascii_digit).count();
        if digits == 0 {
            // Not a file reference; keep the literal text.
            out.push_str("mtproto:");
            rest = tail;
            continue;
        }
        out.push_str("partfile");
        out.push_str(&tail[..digits]);
        out.push_str(".mp4");
        rest = &tail[digits..];
    }
    out.push_str(rest);
    out
}
