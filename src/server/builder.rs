// src/server/builder.rs
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use hyper::server::conn::Http;
use hyper::{Body, Request, Response};
use tokio::sync::Notify;
use tower::Service;

use crate::cancellation::CancellationHandle;
use crate::server::listener::bind_tcp;

/// Tracks in-flight connection-handling tasks so shutdown can wait for them
/// to drain instead of dropping them mid-response.
#[derive(Default)]
struct Drain {
    count: AtomicUsize,
    idle: Notify,
}

impl Drain {
    fn enter(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn exit(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    async fn wait(&self) {
        loop {
            // Register interest before checking the count: a `notify_waiters`
            // between the check and the await would otherwise be missed.
            let notified = self.idle.notified();
            if self.count.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Binds a TCP listener and serves `handler` over HTTP/1.1, one Tokio task
/// per connection, until the shared cancellation handle fires. `serve()`
/// then waits for in-flight connections to drain before returning.
pub struct ServerBuilder<H>
where
    H: Service<Request<Body>, Response = Response<Body>> + Send + Clone + 'static,
    H::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    H::Future: Send + 'static,
{
    addr: SocketAddr,
    handler: Option<H>,
    cancel: CancellationHandle,
}

impl<H> ServerBuilder<H>
where
    H: Service<Request<Body>, Response = Response<Body>> + Send + Clone + 'static,
    H::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    H::Future: Send + 'static,
{
    pub fn new(addr: SocketAddr, cancel: CancellationHandle) -> Self {
        Self {
            addr,
            handler: None,
            cancel,
        }
    }

    pub fn with_handler(mut self, handler: H) -> Self {
        self.handler = Some(handler);
        self
    }

    pub async fn serve(self) -> Result<()> {
        let handler = self.handler.expect("handler must be set via with_handler()");
        let drain = Arc::new(Drain::default());

        let listener = bind_tcp(self.addr).await?;
        tracing::info!(addr = %self.addr, "ingress server listening");

        loop {
            let (stream, peer) = tokio::select! {
                accepted = listener.accept() => accepted?,
                _ = self.cancel.cancelled() => break,
            };

            let svc = handler.clone();
            let drain = drain.clone();
            drain.enter();

            tokio::spawn(async move {
                let http = Http::new();
                if let Err(err) = http.serve_connection(stream, svc).await {
                    tracing::warn!(%peer, %err, "connection error");
                }
                drain.exit();
            });
        }

        tracing::info!("ingress server draining in-flight connections");
        drain.wait().await;
        tracing::info!("ingress server stopped");
        Ok(())
    }
}
