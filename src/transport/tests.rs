use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use http::{Method, StatusCode};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::framing::{Response, read_request};
use super::message::{PublishResponse, PushResponse};
use super::{AppState, Server};
use crate::config::Settings;
use crate::utils::{Error, Result};

struct Running {
    addr: SocketAddr,
    state: Arc<AppState>,
    shutdown: CancellationToken,
    handle: JoinHandle<Result<()>>,
}

fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.server.port = 0;
    settings.broker.subscribe_timeout_secs = 2;
    settings.broker.publish_retry_delay_ms = 50;
    settings.broker.shutdown_grace_ms = 500;
    settings
}

async fn start(settings: Settings) -> Running {
    let server = Server::bind(settings).await.expect("bind");
    let addr = server.local_addr().expect("local addr");
    let state = server.state();
    let shutdown = server.shutdown_token();
    let handle = tokio::spawn(server.run());
    Running {
        addr,
        state,
        shutdown,
        handle,
    }
}

fn request(method: &str, path: &str, body: Option<&str>) -> String {
    match body {
        Some(body) => format!(
            "{method} {path} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        ),
        None => format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\n\r\n"),
    }
}

/// Send one raw request and return the status code and body.
async fn send(addr: SocketAddr, raw: String) -> (u16, String) {
    let mut stream = TcpStream::connect(addr).await.expect("connect");
    stream.write_all(raw.as_bytes()).await.expect("write request");
    let mut response = Vec::new();
    stream
        .read_to_end(&mut response)
        .await
        .expect("read response");
    let text = String::from_utf8(response).expect("utf-8 response");
    let (head, body) = text.split_once("\r\n\r\n").expect("response head");
    let status = head
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .expect("status code");
    (status, body.to_string())
}

async fn wait_for_listeners(state: &AppState, topic: &str, n: usize) {
    while state.broker.listener_count(topic) != n {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_read_request_parses_path_query_and_body() {
    let raw = request("POST", "/subscribe/page?favicon=%2Ficons%2Fa.ico&x=1", Some(r#"{"a":1}"#));
    let mut reader = raw.as_bytes();

    let req = read_request(&mut reader, 1024)
        .await
        .expect("read")
        .expect("request");

    assert_eq!(req.method, Method::POST);
    assert_eq!(req.path, "/subscribe/page");
    assert_eq!(req.query_param("favicon"), Some("/icons/a.ico"));
    assert_eq!(req.query_param("x"), Some("1"));
    assert_eq!(req.body, br#"{"a":1}"#);
}

#[tokio::test]
async fn test_read_request_rejects_declared_oversized_body() {
    let raw = request("POST", "/publish/page", Some(&"1".repeat(64)));
    let mut reader = raw.as_bytes();

    let err = read_request(&mut reader, 16).await.unwrap_err();
    assert!(matches!(err, Error::PayloadTooLarge { size: 64, limit: 16 }));
}

#[tokio::test]
async fn test_read_request_handles_empty_and_malformed_input() {
    let mut empty: &[u8] = b"";
    assert!(read_request(&mut empty, 16).await.expect("read").is_none());

    let mut garbage: &[u8] = b"\x00\x01 nonsense\r\n\r\n";
    assert!(matches!(
        read_request(&mut garbage, 16).await,
        Err(Error::MalformedRequest(_))
    ));
}

#[tokio::test]
async fn test_response_writes_cors_and_omits_body_for_no_content() {
    let mut out = Vec::new();
    Response::no_content()
        .write_to(&mut out)
        .await
        .expect("write");
    let text = String::from_utf8(out).expect("utf-8");
    assert!(text.starts_with("HTTP/1.1 204 No Content\r\n"));
    assert!(text.contains("Access-Control-Allow-Origin: *\r\n"));
    assert!(!text.contains("Content-Length"));
    assert!(text.ends_with("\r\n\r\n"));

    let response = Response::from_error(&Error::PayloadTooLarge { size: 2, limit: 1 });
    assert_eq!(response.status, StatusCode::PAYLOAD_TOO_LARGE);
    let response = Response::from_error(&Error::MissingTopic);
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_publish_reaches_waiting_subscriber() {
    let server = start(test_settings()).await;

    let subscriber = {
        let addr = server.addr;
        tokio::spawn(async move { send(addr, request("GET", "/subscribe/page", None)).await })
    };
    wait_for_listeners(&server.state, "page", 1).await;

    let (status, body) = send(
        server.addr,
        request("POST", "/publish/page", Some(r#"{"url":"http://x","title":"t"}"#)),
    )
    .await;
    assert_eq!(status, 200);
    let published: PublishResponse = serde_json::from_str(&body).expect("publish body");
    assert_eq!(published, PublishResponse { delivered: 1 });

    let (status, body) = subscriber.await.expect("join");
    assert_eq!(status, 200);
    let received: Value = serde_json::from_str(&body).expect("subscriber body");
    assert_eq!(received, json!({"url": "http://x", "title": "t"}));

    server.shutdown.cancel();
    server.handle.await.expect("join").expect("run");
}

#[tokio::test]
async fn test_publish_without_listeners_reports_zero() {
    let server = start(test_settings()).await;

    let (status, body) = send(server.addr, request("POST", "/publish/empty", Some("{}"))).await;
    assert_eq!(status, 200);
    let published: PublishResponse = serde_json::from_str(&body).expect("publish body");
    assert_eq!(published.delivered, 0);

    server.shutdown.cancel();
}

#[tokio::test]
async fn test_subscribe_times_out_with_no_content() {
    let mut settings = test_settings();
    settings.broker.subscribe_timeout_secs = 1;
    let server = start(settings).await;
    let started = Instant::now();

    let (status, body) = send(server.addr, request("GET", "/subscribe/quiet?favicon=q.ico", None)).await;

    assert_eq!(status, 204);
    assert!(body.is_empty());
    assert!(started.elapsed() >= Duration::from_millis(900));
    assert_eq!(server.state.broker.listener_count("quiet"), 0);
    assert_eq!(
        server.state.broker.topic("quiet").favicon().as_deref(),
        Some("q.ico")
    );

    server.shutdown.cancel();
}

#[tokio::test]
async fn test_input_rejections() {
    let mut settings = test_settings();
    settings.broker.max_payload_bytes = 16;
    let server = start(settings).await;

    let oversized = format!(r#"{{"blob":"{}"}}"#, "x".repeat(32));
    let (status, _) = send(server.addr, request("POST", "/publish/page", Some(&oversized))).await;
    assert_eq!(status, 413);

    let (status, _) = send(server.addr, request("POST", "/publish/page", Some("nope"))).await;
    assert_eq!(status, 400);

    let (status, _) = send(server.addr, request("POST", "/publish/", Some("{}"))).await;
    assert_eq!(status, 400);

    let (status, _) = send(server.addr, request("GET", "/publish/page", None)).await;
    assert_eq!(status, 405);

    let (status, _) = send(server.addr, request("POST", "/wait", Some("{}"))).await;
    assert_eq!(status, 405);

    let (status, _) = send(server.addr, request("GET", "/nowhere", None)).await;
    assert_eq!(status, 404);

    server.shutdown.cancel();
}

#[tokio::test]
async fn test_options_preflight_is_answered() {
    let server = start(test_settings()).await;
    let mut stream = TcpStream::connect(server.addr).await.expect("connect");
    stream
        .write_all(request("OPTIONS", "/publish/page", None).as_bytes())
        .await
        .expect("write");
    let mut response = String::new();
    stream.read_to_string(&mut response).await.expect("read");

    assert!(response.starts_with("HTTP/1.1 204"));
    assert!(response.contains("Access-Control-Allow-Methods: POST, OPTIONS\r\n"));

    server.shutdown.cancel();
}

#[tokio::test]
async fn test_queued_events_are_returned_in_order() {
    let server = start(test_settings()).await;

    let (status, body) = send(server.addr, request("POST", "/events/s1", Some(r#"{"n":1}"#))).await;
    assert_eq!(status, 202);
    let pushed: PushResponse = serde_json::from_str(&body).expect("push body");
    assert_eq!(pushed.pending, 1);
    let (status, _) = send(server.addr, request("POST", "/events/s1", Some(r#"{"n":2}"#))).await;
    assert_eq!(status, 202);

    let (status, body) = send(server.addr, request("GET", "/wait?session=s1&timeout=1", None)).await;
    assert_eq!(status, 200);
    let events: Value = serde_json::from_str(&body).expect("wait body");
    assert_eq!(events, json!([{"n": 1}, {"n": 2}]));

    server.shutdown.cancel();
}

#[tokio::test]
async fn test_wait_on_default_session_wakes_on_push() {
    let server = start(test_settings()).await;

    let waiter = {
        let addr = server.addr;
        tokio::spawn(async move { send(addr, request("GET", "/wait?timeout=30", None)).await })
    };
    while server.state.sessions.queue("default").waiter_count() != 1 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let started = Instant::now();

    let (status, _) = send(server.addr, request("POST", "/events", Some(r#""ready""#))).await;
    assert_eq!(status, 202);

    let (status, body) = waiter.await.expect("join");
    assert_eq!(status, 200);
    assert_eq!(body, r#"["ready"]"#);
    assert!(started.elapsed() < Duration::from_secs(5));

    server.shutdown.cancel();
}

#[tokio::test]
async fn test_wait_times_out_after_requested_window() {
    let server = start(test_settings()).await;
    let started = Instant::now();

    let (status, body) = send(server.addr, request("GET", "/wait?timeout=1", None)).await;

    assert_eq!(status, 204);
    assert!(body.is_empty());
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(900));
    assert!(elapsed < Duration::from_secs(10));

    server.shutdown.cancel();
}

#[tokio::test]
async fn test_index_lists_topics() {
    let server = start(test_settings()).await;
    let _ = send(server.addr, request("POST", "/publish/page", Some("{}"))).await;

    let (status, body) = send(server.addr, request("GET", "/", None)).await;
    assert_eq!(status, 200);
    assert!(body.contains("topics: 1"));
    assert!(body.contains("page (0 listening"));

    server.shutdown.cancel();
}

#[tokio::test]
async fn test_disconnected_subscriber_releases_slot() {
    let server = start(test_settings()).await;

    let mut stream = TcpStream::connect(server.addr).await.expect("connect");
    stream
        .write_all(request("GET", "/subscribe/page", None).as_bytes())
        .await
        .expect("write");
    wait_for_listeners(&server.state, "page", 1).await;

    drop(stream);
    tokio::time::timeout(
        Duration::from_secs(1),
        wait_for_listeners(&server.state, "page", 0),
    )
    .await
    .expect("slot released after disconnect");

    server.shutdown.cancel();
}

#[tokio::test]
async fn test_shutdown_releases_waiters_and_stops_server() {
    let mut settings = test_settings();
    settings.broker.subscribe_timeout_secs = 60;
    let server = start(settings).await;

    let subscriber = {
        let addr = server.addr;
        tokio::spawn(async move { send(addr, request("GET", "/subscribe/page", None)).await })
    };
    wait_for_listeners(&server.state, "page", 1).await;

    server.shutdown.cancel();

    let (status, _) = subscriber.await.expect("join");
    assert_eq!(status, 204);
    tokio::time::timeout(Duration::from_secs(2), server.handle)
        .await
        .expect("server stopped")
        .expect("join")
        .expect("run");
    assert!(TcpStream::connect(server.addr).await.is_err());
}

#[tokio::test]
async fn test_idle_watchdog_stops_server() {
    let mut settings = test_settings();
    settings.broker.idle_timeout_secs = 1;
    settings.broker.idle_check_interval_secs = 1;
    let server = start(settings).await;

    tokio::time::timeout(Duration::from_secs(5), server.handle)
        .await
        .expect("watchdog shut the server down")
        .expect("join")
        .expect("run");
    assert!(server.shutdown.is_cancelled());
}

#[tokio::test]
async fn test_second_bind_reports_already_running() {
    let server = start(test_settings()).await;

    let mut settings = test_settings();
    settings.server.port = server.addr.port();
    match Server::bind(settings).await {
        Err(Error::AlreadyRunning { addr }) => {
            assert!(addr.ends_with(&server.addr.port().to_string()));
        }
        Err(other) => panic!("expected AlreadyRunning, got {other}"),
        Ok(_) => panic!("second bind unexpectedly succeeded"),
    }

    server.shutdown.cancel();
}
