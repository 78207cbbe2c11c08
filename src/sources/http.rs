use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE, CONNECTION};
use reqwest::StatusCode;
use thiserror::Error;
use tracing::warn;

use crate::config::Settings;

pub const MAX_RETRIES: u32 = 2;
const BASE_BACKOFF_MS: u64 = 1000;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    Status(StatusCode),
}

impl FetchError {
    /// Transport failures, rate limiting and 5xx are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            FetchError::Status(s) => *s == StatusCode::TOO_MANY_REQUESTS || s.is_server_error(),
        }
    }
}

/// Stateless page fetcher for sites that render results server-side.
pub struct HttpFetcher {
    client: reqwest::Client,
    max_retries: u32,
    base_backoff: Duration,
}

impl HttpFetcher {
    pub fn new(settings: &Settings) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.as_str())
            .default_headers(headers)
            .timeout(settings.http_timeout())
            .build()?;
        Ok(Self {
            client,
            max_retries: MAX_RETRIES,
            base_backoff: Duration::from_millis(BASE_BACKOFF_MS),
        })
    }

    pub fn with_backoff(mut self, max_retries: u32, base_backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.base_backoff = base_backoff;
        self
    }

    /// GET `url` and return the body, retrying transient failures with
    /// exponential backoff. Any other non-200 status is returned as
    /// [`FetchError::Status`] without retrying.
    pub async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        let mut attempt = 0;
        loop {
            let err = match self.get_once(url).await {
                Ok(body) => return Ok(body),
                Err(e) => e,
            };
            if !err.is_transient() || attempt >= self.max_retries {
                return Err(err);
            }
            let backoff = self.base_backoff * 2u32.pow(attempt);
            warn!(
                "GET {} failed: {} (attempt {}/{}), backing off {:.1}s",
                url,
                err,
                attempt + 1,
                self.max_retries,
                backoff.as_secs_f64()
            );
            tokio::time::sleep(backoff).await;
            attempt += 1;
        }
    }

    async fn get_once(&self, url: &str) -> Result<String, FetchError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(FetchError::Status(status));
        }
        Ok(response.text().await?)
    }
}
