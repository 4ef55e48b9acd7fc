//! Shared HTTP plumbing for the Google Cloud REST clients

use crate::error::{Result, RuntimeError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::time::{Duration, Instant};

/// HTTP client that attaches a bearer token to every request
#[derive(Clone)]
pub(crate) struct CloudHttpClient {
    client: reqwest::Client,
    access_token: Option<String>,
}

impl CloudHttpClient {
    pub(crate) fn new(timeout_ms: u64, access_token: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()?;
        Ok(Self {
            client,
            access_token,
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    pub(crate) async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        tracing::debug!("GET {}", url);
        let response = self.authorize(self.client.get(url)).send().await?;
        Self::decode(response).await
    }

    pub(crate) async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<T> {
        tracing::debug!("POST {}", url);
        let response = self
            .authorize(self.client.post(url))
            .json(body)
            .send()
            .await?;
        Self::decode(response).await
    }

    /// DELETE a resource. A 404 counts as success.
    pub(crate) async fn delete(&self, url: &str) -> Result<()> {
        tracing::debug!("DELETE {}", url);
        let response = self.authorize(self.client.delete(url)).send().await?;
        let status = response.status();
        if status.is_success() || status == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(RuntimeError::Service {
            status: status.as_u16(),
            body: response.text().await.unwrap_or_default(),
        })
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            return Err(RuntimeError::Service {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        let text = response.text().await?;
        // Empty bodies (e.g. insertAll without errors) decode as `{}`
        let text = if text.trim().is_empty() { "{}" } else { text.as_str() };
        Ok(serde_json::from_str(text)?)
    }
}

/// Polling schedule for long-running cloud operations
#[derive(Debug, Clone, Copy)]
pub(crate) struct PollSchedule {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollSchedule {
    /// Call `check` until it yields a value, sleeping `interval` between calls.
    pub(crate) async fn run<T, F, Fut>(&self, what: &str, mut check: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        let started = Instant::now();
        loop {
            if let Some(done) = check().await? {
                return Ok(done);
            }
            if started.elapsed() >= self.timeout {
                return Err(RuntimeError::Timeout(what.to_string()));
            }
            tracing::debug!("Waiting for {} ({:?} elapsed)", what, started.elapsed());
            tokio::time::sleep(self.interval).await;
        }
    }
}

/// Percent-encode a single URL path segment
pub(crate) fn segment(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}
