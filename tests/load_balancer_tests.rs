// tests/load_balancer_tests.rs
//
// End-to-end scenarios exercised at the component level: a `BackendPool`,
// a selection policy, a `HealthChecker`, and an `HttpForwarder` wired
// together through `RequestForwarder`, against real `mockito` upstreams
// (and, where refusal matters, a real TCP port that's been closed).

use std::net::TcpListener as StdTcpListener;
use std::sync::Arc;
use std::time::{Duration, Instant};

use hyper::{Body, Request, StatusCode};
use layer7_lb::cancellation::CancellationHandle;
use layer7_lb::config::{BackendConfig, HealthCheckConfig, RetryConfig, RetryDelayKind};
use layer7_lb::health::HealthChecker;
use layer7_lb::load_balancer::{RoundRobinPolicy, SelectionPolicy, WeightedRoundRobinPolicy};
use layer7_lb::proxy::BackendPool;
use layer7_lb::retry::{HttpForwarder, RetryPolicy};
use layer7_lb::server::RequestForwarder;
use url::Url;

async fn mock_server(status: usize) -> mockito::ServerGuard {
    let mut server = mockito::Server::new_async().await;
    server.mock("GET", "/").with_status(status).create_async().await;
    server
}

fn backend_cfg(url: &str, weight: Option<u32>) -> BackendConfig {
    BackendConfig {
        url: Url::parse(url).unwrap(),
        weight,
    }
}

async fn health_cfg() -> HealthCheckConfig {
    HealthCheckConfig {
        interval_ms: 60_000,
        timeout_ms: 1_000,
        path: "/".to_string(),
    }
}

/// Scenario 1: three healthy backends, round-robin, six sequential GETs —
/// each backend serves exactly two.
#[tokio::test]
async fn round_robin_distributes_evenly_across_healthy_backends() {
    let mut servers = Vec::new();
    let mut configs = Vec::new();
    for _ in 0..3 {
        let server = mock_server(200).await;
        configs.push(backend_cfg(&server.url(), None));
        servers.push(server);
    }

    let cancel = CancellationHandle::new();
    let pool = Arc::new(BackendPool::new(&configs, cancel.clone()));
    for backend in pool.all() {
        backend.transition_status(layer7_lb::proxy::HealthStatus::Healthy).await;
    }
    pool.refresh_healthy_set().await;

    let checker = HealthChecker::new(health_cfg().await, pool.clone(), cancel.clone());
    let forwarder = HttpForwarder::new(RetryPolicy::new(&RetryConfig::default()), cancel);
    let policy: Arc<dyn SelectionPolicy> = Arc::new(RoundRobinPolicy::new());
    let req_forwarder = RequestForwarder::new(pool.clone(), policy, checker, forwarder);

    for _ in 0..6 {
        let response = req_forwarder.handle(Request::new(Body::empty())).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    for backend in pool.all() {
        assert_eq!(backend.total_requests_served(), 2);
    }
}

/// Scenario 2: a connection refusal triggers an on-demand probe that marks
/// the backend unhealthy, and the retry succeeds against the other backend.
#[tokio::test]
async fn connection_refusal_triggers_probe_and_retry_succeeds() {
    let dead_listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
    let dead_addr = dead_listener.local_addr().unwrap();
    drop(dead_listener); // port is free again; nothing accepts on it

    let healthy = mock_server(200).await;

    let cancel = CancellationHandle::new();
    let pool = Arc::new(BackendPool::new(
        &[
            backend_cfg(&format!("http://{dead_addr}"), None),
            backend_cfg(&healthy.url(), None),
        ],
        cancel.clone(),
    ));
    // Both start healthy: the refusal, not the probe schedule, is what removes B1.
    for backend in pool.all() {
        backend.transition_status(layer7_lb::proxy::HealthStatus::Healthy).await;
    }
    pool.refresh_healthy_set().await;

    let checker = HealthChecker::new(health_cfg().await, pool.clone(), cancel.clone());
    let retry = RetryPolicy {
        budget: 2,
        delay: RetryDelayKind::Linear { step_ms: 1 }.into_fn(),
    };
    let forwarder = HttpForwarder::new(retry, cancel);
    let policy: Arc<dyn SelectionPolicy> = Arc::new(RoundRobinPolicy::new());
    let req_forwarder = RequestForwarder::new(pool.clone(), policy, checker, forwarder);

    let response = req_forwarder.handle(Request::new(Body::empty())).await;
    assert_eq!(response.status(), StatusCode::OK);

    let dead_backend = pool.find(&format!("{}:{}", dead_addr.ip(), dead_addr.port())).unwrap();
    assert_eq!(
        dead_backend.status().await,
        layer7_lb::proxy::HealthStatus::Unhealthy
    );
    assert_eq!(pool.healthy_set().len(), 1);
}

/// Scenario 3: retry exhaustion against a backend that always 500s. With
/// budget 3 and a 10ms linear delay, exactly 4 upstream attempts occur,
/// spaced at least 10ms/20ms/30ms apart, and the client sees 500.
#[tokio::test]
async fn retry_exhaustion_makes_budget_plus_one_attempts_spaced_by_delay() {
    let mut server = mockito::Server::new_async().await;
    let mock = server.mock("GET", "/").with_status(500).expect(4).create_async().await;

    let cancel = CancellationHandle::new();
    let pool = Arc::new(BackendPool::new(&[backend_cfg(&server.url(), None)], cancel.clone()));
    pool.all()[0].transition_status(layer7_lb::proxy::HealthStatus::Healthy).await;
    pool.refresh_healthy_set().await;

    let checker = HealthChecker::new(health_cfg().await, pool.clone(), cancel.clone());
    let retry = RetryPolicy {
        budget: 3,
        delay: RetryDelayKind::Linear { step_ms: 10 }.into_fn(),
    };
    let forwarder = HttpForwarder::new(retry, cancel);
    let policy: Arc<dyn SelectionPolicy> = Arc::new(RoundRobinPolicy::new());
    let req_forwarder = RequestForwarder::new(pool.clone(), policy, checker, forwarder);

    let start = Instant::now();
    let response = req_forwarder.handle(Request::new(Body::empty())).await;
    let elapsed = start.elapsed();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(elapsed >= Duration::from_millis(10 + 20 + 30));
    assert_eq!(pool.all()[0].total_requests_served(), 0);
    mock.assert_async().await;
}

/// Scenario 4: weighted round-robin over {1, 2, 1} across 400 requests
/// lands on the exact expected per-backend totals.
#[tokio::test]
async fn weighted_round_robin_fairness_over_400_requests() {
    let mut servers = Vec::new();
    let mut configs = Vec::new();
    for weight in [1u32, 2, 1] {
        let server = mock_server(200).await;
        configs.push(backend_cfg(&server.url(), Some(weight)));
        servers.push(server);
    }

    let cancel = CancellationHandle::new();
    let pool = Arc::new(BackendPool::new(&configs, cancel.clone()));
    for backend in pool.all() {
        backend.transition_status(layer7_lb::proxy::HealthStatus::Healthy).await;
    }
    pool.refresh_healthy_set().await;

    let checker = HealthChecker::new(health_cfg().await, pool.clone(), cancel.clone());
    let forwarder = HttpForwarder::new(RetryPolicy::new(&RetryConfig::default()), cancel);
    let policy: Arc<dyn SelectionPolicy> = Arc::new(WeightedRoundRobinPolicy::new());
    let req_forwarder = RequestForwarder::new(pool.clone(), policy, checker, forwarder);

    for _ in 0..400 {
        let response = req_forwarder.handle(Request::new(Body::empty())).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let totals: Vec<u64> = pool.all().iter().map(|b| b.total_requests_served()).collect();
    assert_eq!(totals, vec![100, 200, 100]);
}

/// Scenario 5 (scaled down from 10 000/2 000 to keep CI-sized): concurrent
/// requests against three healthy backends all land somewhere, and no
/// backend trails the busiest by more than the concurrency bound.
#[tokio::test]
async fn concurrent_round_robin_requests_balance_within_drift_bound() {
    const TOTAL: usize = 300;
    const CONCURRENCY: usize = 50;

    let mut servers = Vec::new();
    let mut configs = Vec::new();
    for _ in 0..3 {
        let server = mock_server(200).await;
        configs.push(backend_cfg(&server.url(), None));
        servers.push(server);
    }

    let cancel = CancellationHandle::new();
    let pool = Arc::new(BackendPool::new(&configs, cancel.clone()));
    for backend in pool.all() {
        backend.transition_status(layer7_lb::proxy::HealthStatus::Healthy).await;
    }
    pool.refresh_healthy_set().await;

    let checker = HealthChecker::new(health_cfg().await, pool.clone(), cancel.clone());
    let forwarder = HttpForwarder::new(RetryPolicy::new(&RetryConfig::default()), cancel);
    let policy: Arc<dyn SelectionPolicy> = Arc::new(RoundRobinPolicy::new());
    let req_forwarder = Arc::new(RequestForwarder::new(pool.clone(), policy, checker, forwarder));

    let mut successes = 0usize;
    for chunk_start in (0..TOTAL).step_by(CONCURRENCY) {
        let chunk_len = CONCURRENCY.min(TOTAL - chunk_start);
        let mut handles = Vec::with_capacity(chunk_len);
        for _ in 0..chunk_len {
            let req_forwarder = req_forwarder.clone();
            handles.push(tokio::spawn(async move { req_forwarder.handle(Request::new(Body::empty())).await }));
        }
        for handle in handles {
            let response = handle.await.unwrap();
            if response.status() == StatusCode::OK {
                successes += 1;
            }
        }
    }

    assert_eq!(successes, TOTAL);
    let totals: Vec<u64> = pool.all().iter().map(|b| b.total_requests_served()).collect();
    let max = *totals.iter().max().unwrap();
    let min = *totals.iter().min().unwrap();
    assert_eq!(totals.iter().sum::<u64>() as usize, TOTAL);
    assert!(max - min <= CONCURRENCY as u64);
}

/// Scenario 6: cold start against an unreachable backend returns 500 until
/// it comes up, at which point requests succeed within one probe interval.
#[tokio::test]
async fn cold_start_then_recovery_within_one_interval() {
    let probe_listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
    let addr = probe_listener.local_addr().unwrap();
    drop(probe_listener); // nothing listens yet: connections to `addr` refuse

    let cancel = CancellationHandle::new();
    let pool = Arc::new(BackendPool::new(
        &[backend_cfg(&format!("http://{addr}"), None)],
        cancel.clone(),
    ));

    let checker = HealthChecker::new(
        HealthCheckConfig {
            interval_ms: 100,
            timeout_ms: 200,
            path: "/health".to_string(),
        },
        pool.clone(),
        cancel.clone(),
    );
    let forwarder = HttpForwarder::new(RetryPolicy::new(&RetryConfig::default()), cancel.clone());
    let policy: Arc<dyn SelectionPolicy> = Arc::new(RoundRobinPolicy::new());
    let req_forwarder = RequestForwarder::new(pool.clone(), policy, checker.clone(), forwarder);

    checker.spawn().await;

    let response = req_forwarder.handle(Request::new(Body::empty())).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    tokio::time::sleep(Duration::from_millis(150)).await;
    let response = req_forwarder.handle(Request::new(Body::empty())).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(pool.healthy_set().is_empty());

    // Bring the backend up on the exact address the pool already has.
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(_) => return,
            };
            tokio::spawn(async move {
                let svc = hyper::service::service_fn(|_req: Request<Body>| async {
                    Ok::<_, std::convert::Infallible>(hyper::Response::new(Body::from("ok")))
                });
                let _ = hyper::server::conn::Http::new().serve_connection(stream, svc).await;
            });
        }
    });

    let mut recovered = false;
    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if !pool.healthy_set().is_empty() {
            recovered = true;
            break;
        }
    }
    assert!(recovered, "backend did not become healthy after coming up");

    let response = req_forwarder.handle(Request::new(Body::empty())).await;
    assert_eq!(response.status(), StatusCode::OK);

    cancel.cancel();
    checker.stop().await;
}
