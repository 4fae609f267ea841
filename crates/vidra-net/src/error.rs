use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum NetError {
    #[error("HTTP error {status} for {url}")]
    HttpError {
        url: Url,
        status: u16,
        body: Option<String>,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request timed out: {0}")]
    Timeout(Url),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl From<reqwest::Error> for NetError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            if let Some(url) = e.url() {
                return NetError::Timeout(url.clone());
            }
        }
        NetError::Transport(e.to_string())
    }
}

pub type NetResult<T> = Result<T, NetError>;
