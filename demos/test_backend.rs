// demos/test_backend.rs
//
// A minimal upstream for exercising a running load balancer by hand:
//
//   cargo run --bin test_backend -- 9001 /health
//
// Answers every request with a small JSON body identifying itself and a
// running request count, and answers the configured health path with 200
// (or 503 while toggled unhealthy via SIGUSR1-free round-trip: every 30s it
// flips so a manual health-check loop has something to observe).

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use tokio::time::sleep;

#[derive(Clone)]
struct Upstream {
    port: u16,
    health_path: Arc<String>,
    served: Arc<AtomicU64>,
    healthy: Arc<AtomicBool>,
}

impl Upstream {
    async fn respond(self, req: Request<Body>) -> Result<Response<Body>, Infallible> {
        let count = self.served.fetch_add(1, Ordering::SeqCst) + 1;
        let path = req.uri().path();

        if path == self.health_path.as_str() {
            return Ok(if self.healthy.load(Ordering::SeqCst) {
                Response::new(Body::from("ok"))
            } else {
                Response::builder()
                    .status(StatusCode::SERVICE_UNAVAILABLE)
                    .body(Body::from("unhealthy"))
                    .unwrap()
            });
        }

        let body = format!(r#"{{"port":{},"served":{},"path":"{}"}}"#, self.port, count, path);
        Ok(Response::builder()
            .status(StatusCode::OK)
            .header("content-type", "application/json")
            .header("x-backend-port", self.port.to_string())
            .body(Body::from(body))
            .unwrap())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let port: u16 = args.next().and_then(|s| s.parse().ok()).unwrap_or(9001);
    let health_path = args.next().unwrap_or_else(|| "/health".to_string());

    let upstream = Upstream {
        port,
        health_path: Arc::new(health_path.clone()),
        served: Arc::new(AtomicU64::new(0)),
        healthy: Arc::new(AtomicBool::new(true)),
    };

    let toggler = upstream.clone();
    tokio::spawn(async move {
        loop {
            sleep(Duration::from_secs(30)).await;
            let now = !toggler.healthy.load(Ordering::SeqCst);
            toggler.healthy.store(now, Ordering::SeqCst);
            println!("[backend {}] health toggled to {}", toggler.port, now);
        }
    });

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let make_svc = make_service_fn(move |_conn| {
        let upstream = upstream.clone();
        async move { Ok::<_, Infallible>(service_fn(move |req| upstream.clone().respond(req))) }
    });

    println!("test backend listening on http://{addr}, health path {health_path}");
    Server::bind(&addr).serve(make_svc).await?;
    Ok(())
}
