// src/server/listener.rs
use anyhow::{Context, Result};
use std::net::SocketAddr;
use tokio::net::TcpListener;

/// Binds the ingress port. Kept as its own function so `ServerBuilder`
/// doesn't need to know anything about the underlying transport.
pub async fn bind_tcp(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind ingress listener on {addr}"))
}
