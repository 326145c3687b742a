mod common;

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{build, people, small_settings};
use headcount::api::{ApiConfig, ApiHandle, ApiServer};
use headcount::detect::StubBackend;
use headcount::events::EventBus;
use headcount::ingest::{CameraId, NoDeviceOpener};
use headcount::Monitor;

fn start(backend: StubBackend) -> (Arc<Monitor>, ApiHandle) {
    let events = Arc::new(EventBus::new());
    let mut settings = small_settings(CameraId::Synthetic("api".into()));
    settings.capture.frame_rate = 20;
    let orch = build(settings, backend, Arc::new(NoDeviceOpener), events.clone());
    let monitor = Arc::new(Monitor::start(orch, events).expect("start monitor"));
    let handle = ApiServer::new(
        ApiConfig {
            addr: "127.0.0.1:0".to_string(),
        },
        monitor.clone(),
    )
    .spawn()
    .expect("spawn api");
    (monitor, handle)
}

fn request(addr: SocketAddr, method: &str, path: &str, body: Option<&str>) -> (u16, String) {
    let mut stream = TcpStream::connect(addr).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("timeout");
    let body = body.unwrap_or("");
    let req = format!(
        "{method} {path} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(req.as_bytes()).expect("write");
    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).expect("read");
    let text = String::from_utf8_lossy(&raw).into_owned();
    let status = text
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    let body = text
        .split_once("\r\n\r\n")
        .map(|(_, b)| b.to_string())
        .unwrap_or_default();
    (status, body)
}

/// Read from a streaming endpoint until `needle` shows up.
fn read_until(addr: SocketAddr, path: &str, needle: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_millis(500)))
        .expect("timeout");
    let req = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n\r\n");
    stream.write_all(req.as_bytes()).expect("write");
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut raw = Vec::new();
    let mut buf = [0u8; 4096];
    while Instant::now() < deadline {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => raw.extend_from_slice(&buf[..n]),
            Err(_) => {}
        }
        if raw.windows(needle.len()).any(|w| w == needle) {
            break;
        }
    }
    raw
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[test]
fn health_and_status_round_trip() {
    let (monitor, handle) = start(StubBackend::new(32, 32));

    let (status, body) = request(handle.addr, "GET", "/health", None);
    assert_eq!(status, 200);
    assert!(body.contains("ok"));

    let (status, body) = request(handle.addr, "GET", "/api/status", None);
    assert_eq!(status, 200);
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["tracking"], false);
    assert_eq!(json["source_mode"], "synthetic");

    let (status, body) = request(handle.addr, "POST", "/api/tracking", Some(r#"{"tracking":true}"#));
    assert_eq!(status, 200);
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["tracking"], true);
    assert!(monitor.with(|orch| orch.is_tracking()).unwrap());

    let (status, _) = request(handle.addr, "GET", "/nope", None);
    assert_eq!(status, 404);

    handle.stop().unwrap();
    monitor.stop().unwrap();
}

#[test]
fn invalid_payloads_are_rejected() {
    let (monitor, handle) = start(StubBackend::new(32, 32));

    let (status, body) = request(
        handle.addr,
        "POST",
        "/api/config",
        Some(r#"{"camera":{"frameRate":0}}"#),
    );
    assert_eq!(status, 400);
    assert!(body.contains("frame_rate"));

    let (status, _) = request(handle.addr, "POST", "/api/config", Some(r#"{"bogus":1}"#));
    assert_eq!(status, 400);

    let (status, _) = request(handle.addr, "POST", "/api/sensitivity", Some(r#"{"level":"extreme"}"#));
    assert_eq!(status, 400);

    let (status, _) = request(handle.addr, "POST", "/api/errors/42/resolve", None);
    assert_eq!(status, 404);

    let (status, _) = request(handle.addr, "GET", "/api/logs?page=abc", None);
    assert_eq!(status, 400);

    let settings = monitor.with(|orch| orch.settings().clone()).unwrap();
    assert_eq!(settings.capture.frame_rate, 20);

    handle.stop().unwrap();
    monitor.stop().unwrap();
}

#[test]
fn sensitivity_and_logs_endpoints() {
    let (monitor, handle) = start(StubBackend::new(32, 32));

    let (status, body) = request(handle.addr, "POST", "/api/sensitivity", Some(r#"{"level":"High"}"#));
    assert_eq!(status, 200);
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["settings"]["sensitivity"], "High");

    let (status, body) = request(handle.addr, "GET", "/api/logs?search=sensitivity", None);
    assert_eq!(status, 200);
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["total"], 1);

    let (status, body) = request(handle.addr, "GET", "/api/logs/export", None);
    assert_eq!(status, 200);
    assert!(body.starts_with("timestamp,count,status"));

    let (status, body) = request(handle.addr, "GET", "/api/errors?scope=all", None);
    assert_eq!(status, 200);
    assert_eq!(body, "[]");

    let (status, body) = request(handle.addr, "POST", "/api/errors/clear", None);
    assert_eq!(status, 200);
    assert!(body.contains("\"removed\":0"));

    handle.stop().unwrap();
    monitor.stop().unwrap();
}

#[test]
fn video_feed_streams_jpeg_parts() {
    let (monitor, handle) = start(StubBackend::new(32, 32).with_output(people(1)));

    let raw = read_until(handle.addr, "/video_feed", &[0xFF, 0xD8]);
    assert!(contains(&raw, b"multipart/x-mixed-replace; boundary=frame"));
    assert!(contains(&raw, b"--frame\r\nContent-Type: image/jpeg"));
    assert!(contains(&raw, &[0xFF, 0xD8]));

    handle.stop().unwrap();
    monitor.stop().unwrap();
}

#[test]
fn events_stream_starts_with_stats() {
    let (monitor, handle) = start(StubBackend::new(32, 32));

    let raw = read_until(handle.addr, "/events", b"event: status_change");
    assert!(contains(&raw, b"text/event-stream"));
    assert!(contains(&raw, b"event: stats_update\ndata: {"));

    handle.stop().unwrap();
    monitor.stop().unwrap();
}
