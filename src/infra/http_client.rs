use async_trait::async_trait;
use reqwest::StatusCode;
use std::future::Future;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::app::ports::MediaFetcher;
use crate::error::{DownloadError, Result};

/// Client for API calls. Every request is bounded by both timeouts.
pub fn build_client(user_agent: &str, timeout: Duration, connect_timeout: Duration) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .connect_timeout(connect_timeout)
        .build()?;
    Ok(client)
}

/// Client for media bodies. No total timeout: a large video may take minutes,
/// so `ReqwestFetcher` bounds each read instead.
pub fn build_media_client(user_agent: &str, connect_timeout: Duration) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(user_agent)
        .connect_timeout(connect_timeout)
        .build()?;
    Ok(client)
}

/// Streams media bodies chunk by chunk into the caller's writer.
/// A response that goes quiet for longer than `read_timeout` fails as transient.
#[derive(Clone)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
    read_timeout: Duration,
}

impl ReqwestFetcher {
    pub fn new(client: reqwest::Client, read_timeout: Duration) -> Self {
        Self { client, read_timeout }
    }

    async fn within<T>(
        &self,
        url: &str,
        step: impl Future<Output = reqwest::Result<T>>,
    ) -> std::result::Result<T, DownloadError> {
        match tokio::time::timeout(self.read_timeout, step).await {
            Ok(result) => result.map_err(|e| DownloadError::from_transport(url, &e)),
            Err(_) => Err(DownloadError::Transient {
                url: url.to_string(),
                reason: format!("no data for {}s", self.read_timeout.as_secs_f64()),
            }),
        }
    }
}

#[async_trait]
impl MediaFetcher for ReqwestFetcher {
    async fn fetch_into(
        &self,
        url: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> std::result::Result<u64, DownloadError> {
        let mut resp = self.within(url, self.client.get(url).send()).await?;

        let status = resp.status();
        if status != StatusCode::OK {
            return Err(DownloadError::from_status(url, status.as_u16()));
        }

        let mut written: u64 = 0;
        while let Some(chunk) = self.within(url, resp.chunk()).await? {
            sink.write_all(&chunk).await.map_err(|e| DownloadError::Io {
                path: url.into(),
                source: e,
            })?;
            written += chunk.len() as u64;
        }
        Ok(written)
    }
}
