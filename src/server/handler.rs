// src/server/handler.rs
use std::sync::Arc;

use hyper::{Body, Request, Response, StatusCode};
use tokio::sync::Mutex;
use tower::Service;

use crate::health::HealthChecker;
use crate::load_balancer::SelectionPolicy;
use crate::proxy::{Backend, BackendPool};
use crate::retry::{ForwardError, ForwardRequest, HttpForwarder, ReselectReason};

/// The per-request pipeline of the ingress server: pick a backend, forward
/// with retry, re-selecting (and, on connection refusal, probing) between
/// attempts, and translate the outcome into a client-facing response.
/// Never surfaces a retry attempt to the caller — only the final outcome.
pub struct RequestForwarder {
    pool: Arc<BackendPool>,
    policy: Arc<dyn SelectionPolicy>,
    checker: Arc<HealthChecker>,
    forwarder: HttpForwarder,
}

impl RequestForwarder {
    pub fn new(
        pool: Arc<BackendPool>,
        policy: Arc<dyn SelectionPolicy>,
        checker: Arc<HealthChecker>,
        forwarder: HttpForwarder,
    ) -> Self {
        Self {
            pool,
            policy,
            checker,
            forwarder,
        }
    }

    pub async fn handle(&self, req: Request<Body>) -> Response<Body> {
        let healthy = self.pool.healthy_set();
        if healthy.is_empty() {
            tracing::warn!("no healthy backend at entry, responding 500");
            return Self::synthesize_500();
        }

        let backend = match self.policy.next_server(&healthy) {
            Ok((backend, _)) => backend,
            Err(_) => return Self::synthesize_500(),
        };

        let (parts, body) = req.into_parts();
        let body = match hyper::body::to_bytes(body).await {
            Ok(bytes) => bytes.to_vec(),
            Err(e) => {
                tracing::error!(error = %e, "failed to buffer request body");
                return Self::synthesize_500();
            }
        };

        let forward_request = ForwardRequest {
            method: parts.method.clone(),
            path: parts.uri.path().to_string(),
            query: parts.uri.query().map(|q| q.to_string()),
            headers: parts.headers.clone(),
            body,
        };

        let current = Arc::new(Mutex::new(backend));
        let target = current.lock().await.url.clone();

        tracing::info!(backend = %target, path = %parts.uri.path(), "forwarding request");

        let result = self
            .forwarder
            .forward(target, &forward_request, |attempt, reason, error| {
                self.reselect(attempt, reason, error, &current)
            })
            .await;

        match result {
            Ok(response) => {
                let backend = current.lock().await.clone();
                backend.record_success();
                tracing::info!(backend = %backend.url, status = %response.status, "request forwarding completed");
                Self::to_hyper_response(response)
            }
            Err(ForwardError::Cancelled) => {
                tracing::info!("request forwarding cancelled during shutdown");
                Self::synthesize_500()
            }
            Err(e) => {
                tracing::warn!(error = %e, "retry budget exhausted, responding 500");
                Self::synthesize_500()
            }
        }
    }

    async fn reselect(
        &self,
        attempt: u32,
        reason: ReselectReason,
        error: ForwardError,
        current: &Arc<Mutex<Arc<Backend>>>,
    ) -> Result<url::Url, ForwardError> {
        let previous = current.lock().await.clone();

        match reason {
            ReselectReason::ConnectionRefused => {
                tracing::warn!(backend = %previous.url, retry = attempt, "connection refused, probing backend");
                self.checker.probe_now(previous.clone()).await;
            }
            ReselectReason::Other => {
                tracing::warn!(backend = %previous.url, retry = attempt, error = %error, "forward attempt failed");
            }
        }

        let healthy = self.pool.healthy_set();
        let (next, _) = self
            .policy
            .next_server(&healthy)
            .map_err(|_| ForwardError::NoHealthyBackend)?;

        let url = next.url.clone();
        *current.lock().await = next;
        Ok(url)
    }

    fn to_hyper_response(response: crate::retry::ForwardResponse) -> Response<Body> {
        let mut builder = Response::builder().status(response.status);
        if let Some(headers) = builder.headers_mut() {
            *headers = response.headers;
        }
        builder
            .body(Body::from(response.body))
            .unwrap_or_else(|_| Self::synthesize_500())
    }

    fn synthesize_500() -> Response<Body> {
        Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .body(Body::empty())
            .expect("building a 500 response cannot fail")
    }
}

#[derive(Clone)]
pub struct RequestHandler {
    forwarder: Arc<RequestForwarder>,
}

impl RequestHandler {
    pub fn new(forwarder: Arc<RequestForwarder>) -> Self {
        Self { forwarder }
    }
}

impl Service<Request<Body>> for RequestHandler {
    type Response = Response<Body>;
    type Error = std::convert::Infallible;
    type Future = futures::future::BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut std::task::Context<'_>) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let forwarder = self.forwarder.clone();
        Box::pin(async move { Ok(forwarder.handle(req).await) })
    }
}
