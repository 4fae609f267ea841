use std::future::Future;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use tracing::{trace, warn};
use url::Url;

use crate::{
    error::{NetError, NetResult},
    retry::RetryPolicy,
    traits::RangeFetcher,
    types::{Headers, NetOptions, RangeSpec},
};

#[derive(Clone, Debug)]
pub struct HttpClient {
    inner: Client,
    options: NetOptions,
    retry: RetryPolicy,
}

impl HttpClient {
    pub fn new(options: NetOptions) -> NetResult<Self> {
        let inner = Client::builder()
            .pool_max_idle_per_host(options.pool_max_idle_per_host)
            .build()
            .map_err(|e| NetError::Transport(format!("failed to build http client: {e}")))?;
        let retry = RetryPolicy::new(
            options.max_retries,
            options.retry_base_delay,
            options.max_retry_delay,
        );
        Ok(Self {
            inner,
            options,
            retry,
        })
    }

    fn apply_headers(
        mut req: reqwest::RequestBuilder,
        headers: Option<&Headers>,
    ) -> reqwest::RequestBuilder {
        if let Some(headers) = headers {
            for (k, v) in headers.iter() {
                req = req.header(k, v);
            }
        }
        req
    }

    /// Retry transport-level failures with exponential backoff. HTTP
    /// status errors are final: the server answered.
    async fn with_retries<T, F, Fut>(&self, op: F) -> NetResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = NetResult<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(error @ (NetError::Transport(_) | NetError::Timeout(_))) => {
                    if attempt >= self.retry.max_retries {
                        return Err(error);
                    }
                    attempt += 1;
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(attempt, delay_ms = delay.as_millis(), error = %error, "retrying request");
                    tokio::time::sleep(delay).await;
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn get_bytes_once(&self, url: &Url, headers: Option<&Headers>) -> NetResult<Bytes> {
        let req = self.inner.get(url.clone());
        let req = Self::apply_headers(req, headers);
        let req = req.timeout(self.options.request_timeout);

        let resp = req.send().await.map_err(NetError::from)?;
        let status = resp.status();

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(NetError::HttpError {
                url: url.clone(),
                status: status.as_u16(),
                body: Some(body),
            });
        }

        resp.bytes().await.map_err(NetError::from)
    }

    async fn get_range_once(
        &self,
        url: &Url,
        range: RangeSpec,
        headers: Option<&Headers>,
    ) -> NetResult<Bytes> {
        let req = self
            .inner
            .get(url.clone())
            .header("Range", range.to_header_value());
        let req = Self::apply_headers(req, headers);
        let req = req.timeout(self.options.request_timeout);

        let resp = req.send().await.map_err(NetError::from)?;
        let status = resp.status();

        // Servers that ignore Range answer 200 with the full body; both
        // that and 206 carry the requested bytes from `start`.
        if !(status.is_success() || status.as_u16() == 206) {
            let body = resp.text().await.unwrap_or_default();
            return Err(NetError::HttpError {
                url: url.clone(),
                status: status.as_u16(),
                body: Some(body),
            });
        }

        let bytes = resp.bytes().await.map_err(NetError::from)?;
        trace!(url = %url, range = %range.to_header_value(), bytes = bytes.len(), "range fetch done");
        Ok(bytes)
    }

    pub async fn get_bytes(&self, url: Url, headers: Option<&Headers>) -> NetResult<Bytes> {
        self.with_retries(|| self.get_bytes_once(&url, headers)).await
    }

    pub async fn get_range(
        &self,
        url: Url,
        range: RangeSpec,
        headers: Option<&Headers>,
    ) -> NetResult<Bytes> {
        self.with_retries(|| self.get_range_once(&url, range, headers))
            .await
    }
}

#[async_trait]
impl RangeFetcher for HttpClient {
    async fn fetch_bytes(&self, url: &Url) -> NetResult<Bytes> {
        self.get_bytes(url.clone(), None).await
    }

    async fn fetch_range(&self, url: &Url, range: RangeSpec) -> NetResult<Bytes> {
        self.get_range(url.clone(), range, None).await
    }
}
