//! Concurrency: many simultaneous requests through the one upstream socket.

use std::collections::HashSet;
use std::time::Instant;

use mtls_relay::config::{ReconnectPolicy, WireFormat};

mod common;

async fn run_concurrent(wire_format: WireFormat) {
    let pki = common::pki();
    let backend = common::start_backend(&pki, "127.0.0.1:0").await;

    let mut config = common::relay_config(&pki, backend.port(), ReconnectPolicy::FailPermanent);
    config.upstream.wire_format = wire_format;
    let edge = common::start_edge(config).await;
    let edge = std::sync::Arc::new(edge);

    let concurrency = 20;
    let requests_per_task = 10;
    let client = common::client();
    let start = Instant::now();

    let mut tasks = Vec::new();
    for task in 0..concurrency {
        let client = client.clone();
        let edge = edge.clone();
        tasks.push(tokio::spawn(async move {
            let mut seen = Vec::new();
            for i in 0..requests_per_task {
                let id = format!("{task}-{i}");
                let res = client
                    .get(edge.url())
                    .header("X-Request-ID", &id)
                    .send()
                    .await
                    .unwrap();
                assert_eq!(res.status(), 200);
                assert_eq!(res.headers()["x-request-id"], id.as_str());
                let body = res.text().await.unwrap();
                assert!(
                    body.ends_with(&format!("Received ReqID {id}.)")),
                    "response for {id} carried another id: {body}"
                );
                seen.push(id);
            }
            seen
        }));
    }

    let mut ids = HashSet::new();
    for task in tasks {
        ids.extend(task.await.unwrap());
    }
    let total = concurrency * requests_per_task;
    assert_eq!(ids.len(), total);

    let status = edge.machine.status();
    assert_eq!(status.requests_forwarded, total as u64);
    assert_eq!(status.connects_succeeded, 1, "all requests share one connection");
    println!("{total} requests in {:?} ({wire_format:?})", start.elapsed());

    edge.shutdown.trigger();
    backend.kill().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_keep_their_ids() {
    run_concurrent(WireFormat::Header).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_keep_their_ids_json() {
    run_concurrent(WireFormat::Json).await;
}
