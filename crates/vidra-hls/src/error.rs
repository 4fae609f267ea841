#![forbid(unsafe_code)]

use thiserror::Error;

/// HLS session errors.
#[derive(Debug, Error)]
pub enum HlsError {
    #[error("Master playlist parse error: {0}")]
    ParseMaster(String),

    #[error("Media playlist parse error: {0}")]
    ParsePlaylist(String),

    #[error("Network error: {0}")]
    Net(#[from] vidra_net::NetError),

    #[error("Media error: {0}")]
    Media(#[from] vidra_media::MediaError),

    #[error("Local fragment cache error: {0}")]
    LocalFilesAccess(String),

    #[error("Variant not found: {0}")]
    VariantNotFound(String),

    #[error("Fragment index out of range: {0}")]
    FragmentNotFound(usize),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl From<std::io::Error> for HlsError {
    fn from(e: std::io::Error) -> Self {
        HlsError::LocalFilesAccess(e.to_string())
    }
}

pub type HlsResult<T> = Result<T, HlsError>;
