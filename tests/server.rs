//! End-to-end: a real listener, a real client, graceful shutdown.

use std::time::Duration;

use serde_json::Value;
use tokio::net::TcpListener;

use tour_gateway::config::Environment;
use tour_gateway::{HttpServer, Shutdown};

mod common;

#[tokio::test]
async fn test_serves_and_shuts_down() {
    let gw = common::gateway(common::config(Environment::Production));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let server = HttpServer::new(gw.pipeline);
    let handle = tokio::spawn(server.run(listener, shutdown.subscribe()));

    let client = reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap();

    let res = client
        .get(format!("http://{}/api/v1/tours?difficulty=easy&difficulty=hard", addr))
        .send()
        .await
        .expect("gateway unreachable");
    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["x-ratelimit-limit"], "100");
    assert!(res.headers().contains_key("x-request-id"));
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["query"]["difficulty"], "easy");

    let res = client
        .post(format!("http://{}/webhook-checkout", addr))
        .header("content-type", "application/json")
        .body("{\"id\": \"evt_1\"}")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(
        &gw.webhook.received.lock().unwrap()[0][..],
        b"{\"id\": \"evt_1\"}"
    );

    let res = client
        .get(format!("http://{}/api/v1/unknown", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 404);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "fail");

    shutdown.trigger();
    let stopped = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("server did not stop");
    assert!(stopped.unwrap().is_ok());
}

#[tokio::test]
async fn test_client_ip_comes_from_connection_without_proxy_trust() {
    let mut config = common::config(Environment::Production);
    config.listener.trust_proxy = false;
    config.rate_limit.max_requests = 2;
    let gw = common::gateway(config);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let handle = tokio::spawn(HttpServer::new(gw.pipeline).run(listener, shutdown.subscribe()));

    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    let mut statuses = Vec::new();
    for forwarded in ["10.0.0.1", "10.0.0.2", "10.0.0.3"] {
        let res = client
            .get(format!("http://{}/api/v1/users", addr))
            .header("x-forwarded-for", forwarded)
            .send()
            .await
            .unwrap();
        statuses.push(res.status().as_u16());
    }
    // Spoofed forwarding headers are ignored; all three share 127.0.0.1.
    assert_eq!(statuses, vec![200, 200, 429]);
    assert_eq!(gw.store.len(), 1);

    shutdown.trigger();
    let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
}
