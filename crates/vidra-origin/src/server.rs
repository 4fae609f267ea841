use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use parking_lot::RwLock;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, warn};
use url::Url;
use vidra_net::{RangeFetcher, RangeSpec};

use crate::rewrite::{rewrite_media_playlist, synthesize_master};

#[derive(Debug, Error)]
pub enum OriginError {
    #[error("failed to bind loopback listener: {0}")]
    Bind(std::io::Error),

    #[error("invalid origin URL: {0}")]
    InvalidUrl(String),
}

pub type OriginResult<T> = Result<T, OriginError>;

/// One variant as the origin advertises it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VariantSpec {
    pub bandwidth: u64,
    pub width: u32,
    pub height: u32,
}

/// Everything the origin needs to serve one playback session.
#[derive(Clone)]
pub struct SessionSpec {
    pub variants: Vec<VariantSpec>,
    /// height -> provider media playlist text (may contain `mtproto:`
    /// references).
    pub playlists: HashMap<u32, String>,
    /// fileId -> resource handle passed to the byte-range fetcher.
    pub files: HashMap<u64, Url>,
}

struct OriginState {
    sessions: RwLock<HashMap<String, SessionSpec>>,
    fetcher: Arc<dyn RangeFetcher>,
}

/// HTTP/1.1 origin on loopback. Dropping the handle stops the server.
pub struct HlsOrigin {
    state: Arc<OriginState>,
    addr: SocketAddr,
    serve_task: tokio::task::JoinHandle<()>,
}

impl HlsOrigin {
    /// Bind on an ephemeral loopback port and start serving.
    pub async fn bind(fetcher: Arc<dyn RangeFetcher>) -> OriginResult<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(OriginError::Bind)?;
        let addr = listener.local_addr().map_err(OriginError::Bind)?;

        let state = Arc::new(OriginState {
            sessions: RwLock::new(HashMap::new()),
            fetcher,
        });

        let app = Router::new()
            .route("/{session_id}/{resource}", get(serve_resource))
            .with_state(Arc::clone(&state));

        let serve_task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                warn!(error = %e, "hls origin stopped");
            }
        });

        debug!(%addr, "hls origin listening");
        Ok(Self {
            state,
            addr,
            serve_task,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn register(&self, session_id: impl Into<String>, spec: SessionSpec) {
        self.state.sessions.write().insert(session_id.into(), spec);
    }

    pub fn unregister(&self, session_id: &str) {
        self.state.sessions.write().remove(session_id);
    }

    /// Master playlist URL for a registered session.
    pub fn master_url(&self, session_id: &str) -> OriginResult<Url> {
        format!("http://{}/{}/master.m3u8", self.addr, session_id)
            .parse()
            .map_err(|e| OriginError::InvalidUrl(format!("{e}")))
    }
}

impl Drop for HlsOrigin {
    fn drop(&mut self) {
        self.serve_task.abort();
    }
}

async fn serve_resource(
    State(state): State<Arc<OriginState>>,
    Path((session_id, resource)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let session = state.sessions.read().get(&session_id).cloned();
    let Some(session) = session else {
        return StatusCode::NOT_FOUND.into_response();
    };

    if resource == "master.m3u8" {
        return playlist_response(synthesize_master(&session.variants));
    }

    if let Some(height) = resource
        .strip_prefix("hls_level_")
        .and_then(|r| r.strip_suffix(".m3u8"))
        .and_then(|h| h.parse::<u32>().ok())
    {
        return match session.playlists.get(&height) {
            Some(text) => playlist_response(rewrite_media_playlist(text)),
            None => StatusCode::NOT_FOUND.into_response(),
        };
    }

    if let Some(file_id) = resource
        .strip_prefix("partfile")
        .and_then(|r| r.strip_suffix(".mp4"))
        .and_then(|id| id.parse::<u64>().ok())
    {
        let Some(url) = session.files.get(&file_id) else {
            return StatusCode::NOT_FOUND.into_response();
        };
        return serve_part_file(&state, url, &headers).await;
    }

    StatusCode::NOT_FOUND.into_response()
}

fn playlist_response(text: String) -> Response {
    (
        [(header::CONTENT_TYPE, "application/vnd.apple.mpegurl")],
        text,
    )
        .into_response()
}

async fn serve_part_file(state: &OriginState, url: &Url, headers: &HeaderMap) -> Response {
    let range = headers
        .get(header::RANGE)
        .map(|value| parse_range_header(value.to_str().unwrap_or_default()));

    match range {
        None => match state.fetcher.fetch_bytes(url).await {
            Ok(bytes) => bytes.to_vec().into_response(),
            Err(e) => upstream_error(url, &e),
        },
        Some(None) => StatusCode::RANGE_NOT_SATISFIABLE.into_response(),
        Some(Some(spec)) => match state.fetcher.fetch_range(url, spec).await {
            Ok(bytes) => {
                let end = spec.start + bytes.len().saturating_sub(1) as u64;
                (
                    StatusCode::PARTIAL_CONTENT,
                    [(
                        header::CONTENT_RANGE,
                        format!("bytes {}-{}/*", spec.start, end),
                    )],
                    bytes.to_vec(),
                )
                    .into_response()
            }
            Err(e) => upstream_error(url, &e),
        },
    }
}

fn upstream_error(url: &Url, error: &vidra_net::NetError) -> Response {
    warn!(url = %url, error = %error, "part-file fetch failed");
    StatusCode::BAD_GATEWAY.into_response()
}

/// Parse `bytes=a-b` / `bytes=a-`. `None` means malformed.
fn parse_range_header(value: &str) -> Option<RangeSpec> {
    let spec = value.strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    let start: u64 = start.trim().parse().ok()?;
    let end = end.trim();
    if end.is_empty() {
        return Some(RangeSpec::from_start(start));
    }
    let end: u64 = end.parse().ok()?;
    if end < start {
        return None;
    }
    Some(RangeSpec::new(start, Some(end)))
}
