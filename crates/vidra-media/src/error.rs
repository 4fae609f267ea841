use thiserror::Error;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("segment has no video track")]
    EmptyVideo,

    #[error("segment has no audio track")]
    EmptyAudio,

    #[error("media decode failed: {0}")]
    DecodeMedia(String),
}

pub type MediaResult<T> = Result<T, MediaError>;
