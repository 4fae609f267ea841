//! M3U8 playlist parsing and data types.
//!
//! The dialect handled here is the byte-range flavor: every variant's
//! fragments are ranges into a single container file, announced through
//! `#EXT-X-MAP`/`#EXT-X-BYTERANGE`. Parsing is tolerant at the entry level
//! (a malformed variant or fragment is skipped, never fatal) and strict at
//! the playlist level (missing header or required top-level fields fail).

use sha2::{Digest, Sha256};
use url::Url;

use crate::error::{HlsError, HlsResult};

/// Identifies a variant within a parsed master playlist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VariantId(pub usize);

/// Stable identity of a master playlist, derived from its source URL and
/// variant set. Keys the on-disk fragment scratch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MasterId(String);

impl MasterId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MasterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    #[must_use]
    pub fn pixels(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// A byte range into a container file: (start, length).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub length: u64,
}

impl ByteRange {
    #[must_use]
    pub fn end(&self) -> u64 {
        self.start + self.length
    }
}

/// One variant stream entry from a master playlist.
#[derive(Debug, Clone)]
pub struct Variant {
    pub bandwidth: u64,
    pub resolution: Resolution,
    /// Absolute URL of the media playlist for this variant.
    pub url: Url,
}

/// Parsed master playlist. Variants are ordered by descending bandwidth.
#[derive(Debug, Clone)]
pub struct MasterPlaylist {
    pub id: MasterId,
    pub version: u32,
    pub variants: Vec<Variant>,
}

impl MasterPlaylist {
    pub fn variant(&self, id: VariantId) -> Option<&Variant> {
        self.variants.get(id.0)
    }
}

/// Initialization segment descriptor (`#EXT-X-MAP`).
#[derive(Debug, Clone)]
pub struct InitSegment {
    pub url: Url,
    pub byte_range: ByteRange,
}

/// One media fragment entry.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub duration_secs: f64,
    pub byte_range: ByteRange,
    pub url: Url,
}

/// Parsed media playlist.
#[derive(Debug, Clone)]
pub struct MediaPlaylist {
    pub target_duration: u32,
    pub version: u32,
    pub media_sequence: u64,
    pub independent_segments: bool,
    pub init: InitSegment,
    pub fragments: Vec<Fragment>,
}

/// Split an attribute list on commas, preserving commas inside double
/// quotes (`CODECS="avc1,mp4a"` is one attribute).
fn split_attributes(input: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;

    for (i, c) in input.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                out.push(&input[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(&input[start..]);
    out
}

/// Look up `KEY=value` in an attribute list, stripping surrounding quotes.
fn attribute<'a>(attributes: &[&'a str], key: &str) -> Option<&'a str> {
    attributes.iter().find_map(|attr| {
        let (k, v) = attr.split_once('=')?;
        if k.trim() != key {
            return None;
        }
        Some(v.trim().trim_matches('"'))
    })
}

/// Parse `WxH`.
fn parse_resolution(value: &str) -> Option<Resolution> {
    let (w, h) = value.split_once('x')?;
    Some(Resolution {
        width: w.parse().ok()?,
        height: h.parse().ok()?,
    })
}

/// Parse `length@start`.
fn parse_byte_range(value: &str) -> Option<ByteRange> {
    let (length, start) = value.split_once('@')?;
    Some(ByteRange {
        length: length.trim().parse().ok()?,
        start: start.trim().parse().ok()?,
    })
}

fn require_header<'a>(
    text: &'a str,
    err: fn(String) -> HlsError,
) -> Result<impl Iterator<Item = &'a str>, HlsError> {
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
    match lines.next() {
        Some("#EXTM3U") => Ok(lines),
        _ => Err(err("missing #EXTM3U header".to_string())),
    }
}

fn master_id(source_url: &Url, variants: &[Variant]) -> MasterId {
    let mut hasher = Sha256::new();
    hasher.update(source_url.as_str().as_bytes());
    for v in variants {
        hasher.update(v.bandwidth.to_le_bytes());
        hasher.update(v.resolution.width.to_le_bytes());
        hasher.update(v.resolution.height.to_le_bytes());
        hasher.update(v.url.as_str().as_bytes());
    }
    MasterId(hex::encode(&hasher.finalize()[..16]))
}

/// Parses a master playlist into [`MasterPlaylist`].
///
/// A variant needs both `BANDWIDTH` and `RESOLUTION`; entries missing
/// either are skipped. Relative URIs resolve against `base_url`.
pub fn parse_master_playlist(text: &str, base_url: &Url) -> HlsResult<MasterPlaylist> {
    let mut lines = require_header(text, HlsError::ParseMaster)?;

    let mut version = 0u32;
    let mut variants: Vec<Variant> = Vec::new();

    while let Some(line) = lines.next() {
        if let Some(v) = line.strip_prefix("#EXT-X-VERSION:") {
            version = v.trim().parse().unwrap_or(0);
        } else if let Some(attrs) = line.strip_prefix("#EXT-X-STREAM-INF:") {
            let Some(uri) = lines.next().filter(|l| !l.starts_with('#')) else {
                continue;
            };
            let attrs = split_attributes(attrs);

            let bandwidth = attribute(&attrs, "BANDWIDTH").and_then(|v| v.parse::<u64>().ok());
            let resolution = attribute(&attrs, "RESOLUTION").and_then(parse_resolution);
            let (Some(bandwidth), Some(resolution)) = (bandwidth, resolution) else {
                tracing::debug!(line = %line, "skipping variant without BANDWIDTH/RESOLUTION");
                continue;
            };

            let Ok(url) = base_url.join(uri) else {
                tracing::debug!(uri = %uri, "skipping variant with unresolvable URI");
                continue;
            };

            variants.push(Variant {
                bandwidth,
                resolution,
                url,
            });
        }
    }

    variants.sort_by(|a, b| b.bandwidth.cmp(&a.bandwidth));
    let id = master_id(base_url, &variants);

    Ok(MasterPlaylist {
        id,
        version,
        variants,
    })
}

/// Parses a media playlist into [`MediaPlaylist`].
///
/// Target duration, version, media sequence and the `#EXT-X-MAP` URI with
/// byte range are required; fragments need `#EXTINF` and
/// `#EXT-X-BYTERANGE`, and incomplete entries are dropped in place.
pub fn parse_media_playlist(text: &str, base_url: &Url) -> HlsResult<MediaPlaylist> {
    let lines = require_header(text, HlsError::ParsePlaylist)?;

    let mut target_duration: Option<u32> = None;
    let mut version: Option<u32> = None;
    let mut media_sequence: Option<u64> = None;
    let mut independent_segments = false;
    let mut init: Option<InitSegment> = None;
    let mut fragments: Vec<Fragment> = Vec::new();

    let mut pending_duration: Option<f64> = None;
    let mut pending_range: Option<ByteRange> = None;

    for line in lines {
        if let Some(v) = line.strip_prefix("#EXT-X-TARGETDURATION:") {
            target_duration = v.trim().parse().ok();
        } else if let Some(v) = line.strip_prefix("#EXT-X-VERSION:") {
            version = v.trim().parse().ok();
        } else if let Some(v) = line.strip_prefix("#EXT-X-MEDIA-SEQUENCE:") {
            media_sequence = v.trim().parse().ok();
        } else if line == "#EXT-X-INDEPENDENT-SEGMENTS" {
            independent_segments = true;
        } else if let Some(attrs) = line.strip_prefix("#EXT-X-MAP:") {
            let attrs = split_attributes(attrs);
            let uri = attribute(&attrs, "URI");
            let byte_range = attribute(&attrs, "BYTERANGE").and_then(parse_byte_range);
            if let (Some(uri), Some(byte_range)) = (uri, byte_range) {
                if let Ok(url) = base_url.join(uri) {
                    init = Some(InitSegment { url, byte_range });
                }
            }
        } else if let Some(v) = line.strip_prefix("#EXTINF:") {
            pending_duration = v.split(',').next().and_then(|d| d.trim().parse().ok());
        } else if let Some(v) = line.strip_prefix("#EXT-X-BYTERANGE:") {
            pending_range = parse_byte_range(v.trim());
        } else if !line.starts_with('#') {
            // URI line closes the pending fragment.
            let duration = pending_duration.take();
            let range = pending_range.take();
            let (Some(duration_secs), Some(byte_range)) = (duration, range) else {
                tracing::debug!(uri = %line, "skipping fragment without duration/byterange");
                continue;
            };
            let Ok(url) = base_url.join(line) else {
                tracing::debug!(uri = %line, "skipping fragment with unresolvable URI");
                continue;
            };
            fragments.push(Fragment {
                duration_secs,
                byte_range,
                url,
            });
        }
    }

    let target_duration = target_duration
        .ok_or_else(|| HlsError::ParsePlaylist("missing #EXT-X-TARGETDURATION".to_string()))?;
    let version =
        version.ok_or_else(|| HlsError::ParsePlaylist("missing #EXT-X-VERSION".to_string()))?;
    let media_sequence = media_sequence
        .ok_or_else(|| HlsError::ParsePlaylist("missing #EXT-X-MEDIA-SEQUENCE".to_string()))?;
    let init = init.ok_or_else(|| {
        HlsError::ParsePlaylist("missing #EXT-X-MAP with URI and BYTERANGE".to_string())
    })?;

    Ok(MediaPlaylist {
        target_duration,
        version,
        media_sequence,
        independent_segments,
        init,
        fragments,
    })
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;

    #[fixture]
    fn base_url() -> Url {
        "http://127.0.0.1:8080/session1/master.m3u8".parse().unwrap()
    }

    #[fixture]
    fn master_text() -> &'static str {
        r#"#EXTM3U
#EXT-X-VERSION:6
#EXT-X-STREAM-INF:BANDWIDTH=400000,RESOLUTION=640x360,CODECS="avc1.42c01e,mp4a.40.2"
hls_level_360.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=1500000,RESOLUTION=1280x720,CODECS="avc1.42c01e,mp4a.40.2"
hls_level_720.m3u8
"#
    }

    #[fixture]
    fn media_text() -> &'static str {
        r#"#EXTM3U
#EXT-X-VERSION:6
#EXT-X-TARGETDURATION:6
#EXT-X-MEDIA-SEQUENCE:0
#EXT-X-INDEPENDENT-SEGMENTS
#EXT-X-MAP:URI="partfile100.mp4",BYTERANGE="1024@0"
#EXTINF:6.000,
#EXT-X-BYTERANGE:500000@1024
partfile100.mp4
#EXTINF:6.000,
#EXT-X-BYTERANGE:480000@501024
partfile100.mp4
#EXTINF:5.500,
#EXT-X-BYTERANGE:470000@981024
partfile100.mp4
"#
    }

    #[rstest]
    fn master_orders_variants_by_descending_bandwidth(master_text: &str, base_url: Url) {
        let master = parse_master_playlist(master_text, &base_url).unwrap();

        assert_eq!(master.version, 6);
        assert_eq!(master.variants.len(), 2);
        assert_eq!(master.variants[0].bandwidth, 1_500_000);
        assert_eq!(master.variants[0].resolution, Resolution::new(1280, 720));
        assert_eq!(
            master.variants[0].url.as_str(),
            "http://127.0.0.1:8080/session1/hls_level_720.m3u8"
        );
        assert_eq!(master.variants[1].bandwidth, 400_000);
    }

    #[rstest]
    fn master_skips_variants_missing_required_attributes(base_url: Url) {
        let text = "#EXTM3U\n\
            #EXT-X-STREAM-INF:BANDWIDTH=400000\n\
            no_resolution.m3u8\n\
            #EXT-X-STREAM-INF:RESOLUTION=640x360\n\
            no_bandwidth.m3u8\n\
            #EXT-X-STREAM-INF:BANDWIDTH=1500000,RESOLUTION=1280x720\n\
            ok.m3u8\n";
        let master = parse_master_playlist(text, &base_url).unwrap();
        assert_eq!(master.variants.len(), 1);
        assert_eq!(master.variants[0].resolution.height, 720);
    }

    #[rstest]
    fn master_without_header_fails(base_url: Url) {
        let err = parse_master_playlist("#EXT-X-VERSION:6\n", &base_url).unwrap_err();
        assert!(matches!(err, HlsError::ParseMaster(_)));
    }

    #[rstest]
    fn master_id_is_stable_for_same_input(master_text: &str, base_url: Url) {
        let a = parse_master_playlist(master_text, &base_url).unwrap();
        let b = parse_master_playlist(master_text, &base_url).unwrap();
        assert_eq!(a.id, b.id);
    }

    #[rstest]
    fn quoted_commas_do_not_split_attributes() {
        let attrs = split_attributes(r#"BANDWIDTH=1,CODECS="avc1,mp4a",RESOLUTION=1x1"#);
        assert_eq!(attrs.len(), 3);
        assert_eq!(attribute(&attrs, "CODECS"), Some("avc1,mp4a"));
    }

    #[rstest]
    fn media_parses_init_and_fragments(media_text: &str, base_url: Url) {
        let media = parse_media_playlist(media_text, &base_url).unwrap();

        assert_eq!(media.target_duration, 6);
        assert_eq!(media.media_sequence, 0);
        assert!(media.independent_segments);
        assert_eq!(media.init.byte_range, ByteRange { start: 0, length: 1024 });
        assert_eq!(media.fragments.len(), 3);
        assert_eq!(media.fragments[0].duration_secs, 6.0);
        assert_eq!(
            media.fragments[1].byte_range,
            ByteRange {
                start: 501_024,
                length: 480_000
            }
        );
        assert_eq!(media.fragments[2].duration_secs, 5.5);
    }

    #[rstest]
    fn media_drops_incomplete_fragments(base_url: Url) {
        let text = "#EXTM3U\n\
            #EXT-X-VERSION:6\n\
            #EXT-X-TARGETDURATION:6\n\
            #EXT-X-MEDIA-SEQUENCE:0\n\
            #EXT-X-MAP:URI=\"partfile1.mp4\",BYTERANGE=\"100@0\"\n\
            #EXTINF:6.0,\n\
            no_byterange.mp4\n\
            #EXT-X-BYTERANGE:100@100\n\
            no_extinf.mp4\n\
            #EXTINF:6.0,\n\
            #EXT-X-BYTERANGE:100@200\n\
            ok.mp4\n";
        let media = parse_media_playlist(text, &base_url).unwrap();
        assert_eq!(media.fragments.len(), 1);
        assert_eq!(media.fragments[0].byte_range.start, 200);
    }

    #[rstest]
    #[case("#EXTM3U\n#EXT-X-VERSION:6\n#EXT-X-MEDIA-SEQUENCE:0\n#EXT-X-MAP:URI=\"a.mp4\",BYTERANGE=\"1@0\"\n")]
    #[case("#EXTM3U\n#EXT-X-TARGETDURATION:6\n#EXT-X-MEDIA-SEQUENCE:0\n#EXT-X-MAP:URI=\"a.mp4\",BYTERANGE=\"1@0\"\n")]
    #[case("#EXTM3U\n#EXT-X-TARGETDURATION:6\n#EXT-X-VERSION:6\n#EXT-X-MAP:URI=\"a.mp4\",BYTERANGE=\"1@0\"\n")]
    #[case("#EXTM3U\n#EXT-X-TARGETDURATION:6\n#EXT-X-VERSION:6\n#EXT-X-MEDIA-SEQUENCE:0\n")]
    fn media_missing_required_field_fails(#[case] text: &str, base_url: Url) {
        let err = parse_media_playlist(text, &base_url).unwrap_err();
        assert!(matches!(err, HlsError::ParsePlaylist(_)));
    }

    #[rstest]
    fn byte_range_end_is_start_plus_length() {
        let range = ByteRange {
            start: 1024,
            length: 500_000,
        };
        assert_eq!(range.end(), 501_024);
    }
}
