// src/retry/strategy.rs
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use url::Url;

use crate::cancellation::CancellationHandle;
use crate::config::RetryConfig;

/// `attempt -> duration`, invoked before attempt `k >= 2`. `RetryConfig`
/// resolves to one of these at construction time.
pub type RetryDelay = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

#[derive(Clone)]
pub struct RetryPolicy {
    pub budget: u32,
    pub delay: RetryDelay,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy").field("budget", &self.budget).finish_non_exhaustive()
    }
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            budget: config.budget,
            delay: config.delay.into_fn(),
        }
    }
}

/// Why the forwarder is asking for a new target. Connection refusals get an
/// on-demand health probe from the caller; everything else just gets logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReselectReason {
    ConnectionRefused,
    Other,
}

#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("connection refused")]
    ConnectionRefused,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request timed out")]
    Timeout,
    #[error("upstream returned {0}")]
    UpstreamStatus(StatusCode),
    #[error("no healthy backend")]
    NoHealthyBackend,
    #[error("cancelled")]
    Cancelled,
}

/// A forwarded request's method, target path/query, headers, and body.
/// Forwarded verbatim to whichever backend is selected.
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ForwardResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

/// The egress HTTP client: retry budget, retry predicate, cancellation-aware
/// delay, and a caller-supplied re-selection hook invoked between attempts.
pub struct HttpForwarder {
    client: reqwest::Client,
    retry: RetryPolicy,
    cancel: CancellationHandle,
}

impl HttpForwarder {
    pub fn new(retry: RetryPolicy, cancel: CancellationHandle) -> Self {
        let client = reqwest::Client::builder()
            .build()
            .expect("failed to build egress HTTP client");
        Self { client, retry, cancel }
    }

    /// Dispatches `request` at `target`, retrying under the configured
    /// budget. `reselect` is called between attempts with the attempt number
    /// that just failed, the reason for the retry, and the error that
    /// triggered it, and must return the target for the next attempt (or an
    /// error, which aborts remaining retries).
    pub async fn forward<F, Fut>(
        &self,
        mut target: Url,
        request: &ForwardRequest,
        mut reselect: F,
    ) -> Result<ForwardResponse, ForwardError>
    where
        F: FnMut(u32, ReselectReason, ForwardError) -> Fut,
        Fut: Future<Output = Result<Url, ForwardError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            if self.cancel.is_cancelled() {
                return Err(ForwardError::Cancelled);
            }

            let error = match self.send_once(&target, request).await {
                Ok(response) => return Ok(response),
                Err(error) => error,
            };

            if !Self::is_retryable(&error) || attempt > self.retry.budget {
                return Err(error);
            }

            let reason = if matches!(error, ForwardError::ConnectionRefused) {
                ReselectReason::ConnectionRefused
            } else {
                ReselectReason::Other
            };

            if reason == ReselectReason::Other {
                let delay = (self.retry.delay)(attempt);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = self.cancel.cancelled() => return Err(ForwardError::Cancelled),
                }
            }

            target = reselect(attempt, reason, error).await?;
        }
    }

    async fn send_once(&self, target: &Url, request: &ForwardRequest) -> Result<ForwardResponse, ForwardError> {
        let mut url = target.clone();
        url.set_path(&request.path);
        url.set_query(request.query.as_deref());

        let mut builder = self
            .client
            .request(request.method.clone(), url)
            .headers(request.headers.clone());
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let send = builder.send();
        let response = tokio::select! {
            res = send => res,
            _ = self.cancel.cancelled() => return Err(ForwardError::Cancelled),
        };

        match response {
            Ok(response) => {
                let status = response.status();
                let headers = response.headers().clone();
                let body = response
                    .bytes()
                    .await
                    .map_err(|e| ForwardError::Transport(e.to_string()))?
                    .to_vec();

                if status.is_server_error() {
                    Err(ForwardError::UpstreamStatus(status))
                } else {
                    Ok(ForwardResponse { status, headers, body })
                }
            }
            Err(e) if e.is_timeout() => Err(ForwardError::Timeout),
            Err(e) if e.is_connect() => Err(ForwardError::ConnectionRefused),
            Err(e) => Err(ForwardError::Transport(e.to_string())),
        }
    }

    fn is_retryable(error: &ForwardError) -> bool {
        matches!(
            error,
            ForwardError::ConnectionRefused | ForwardError::Transport(_) | ForwardError::Timeout | ForwardError::UpstreamStatus(_)
        )
    }
}
