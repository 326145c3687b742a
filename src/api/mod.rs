//! HTTP control and streaming surface.
//!
//! A small HTTP/1.1 server on std threads. Each connection gets its own
//! thread because `/video_feed` and `/events` stay open for the life of the
//! client. Handlers only talk to the `Monitor`; they never touch the camera.

use crate::config::{CameraUpdate, Sensitivity, SettingsUpdate};
use crate::error::ControlError;
use crate::events::Event;
use crate::ingest::CameraId;
use crate::logbook::{parse_time_bound, LogQuery, RowStatus};
use crate::orchestrator::ErrorScope;
use crate::worker::Monitor;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const MAX_HEADER_BYTES: usize = 8192;
const MAX_BODY_BYTES: usize = 64 * 1024;
const STREAM_POLL: Duration = Duration::from_secs(1);
/// A streaming client that accepts no bytes for this long is disconnected.
const STREAM_WRITE_TIMEOUT: Duration = Duration::from_secs(10);
const MJPEG_BOUNDARY: &str = "frame";

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:5000".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    monitor: Arc<Monitor>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, monitor: Arc<Monitor>) -> Self {
        Self { cfg, monitor }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "api configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let monitor = self.monitor;
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, monitor, shutdown_thread) {
                log::error!("http api stopped: {}", err);
            }
        });

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(listener: TcpListener, monitor: Arc<Monitor>, shutdown: Arc<AtomicBool>) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                let monitor = monitor.clone();
                let shutdown = shutdown.clone();
                std::thread::spawn(move || {
                    if let Err(err) = handle_connection(stream, &monitor, &shutdown) {
                        log::debug!("http request ended: {:#}", err);
                    }
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, monitor: &Monitor, shutdown: &AtomicBool) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_write_timeout(Some(STREAM_WRITE_TIMEOUT))?;
    let peer = stream.peer_addr()?;
    let local = stream.local_addr()?;
    if local.ip().is_loopback() && !peer.ip().is_loopback() {
        write_json_response(&mut stream, 403, r#"{"error":"forbidden"}"#)?;
        return Ok(());
    }

    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            write_error(&mut stream, 400, "bad_request", &err.to_string())?;
            return Err(err);
        }
    };

    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/health") => write_json_response(&mut stream, 200, r#"{"status":"ok"}"#),
        ("GET", "/video_feed") => stream_video(&mut stream, monitor, shutdown),
        ("GET", "/events") => stream_events(&mut stream, monitor, shutdown),
        ("GET", "/api/stats") => {
            let snapshot = monitor.with(|orch| orch.snapshot())?;
            write_serialized(&mut stream, 200, &snapshot)
        }
        ("GET", "/api/status") => {
            let status = monitor.with(|orch| orch.status())?;
            write_serialized(&mut stream, 200, &status)
        }
        ("GET", "/api/logs") => {
            let query = match log_query(&request.query) {
                Ok(query) => query,
                Err(err) => return write_control_error(&mut stream, &err),
            };
            let page = monitor.with(|orch| orch.logs(&query))?;
            write_serialized(&mut stream, 200, &page)
        }
        ("GET", "/api/logs/export") => {
            let bounds = time_range(&request.query);
            let (start, end) = match bounds {
                Ok(bounds) => bounds,
                Err(err) => return write_control_error(&mut stream, &err),
            };
            match monitor.with(|orch| orch.export_logs(start, end))? {
                Ok(csv) => write_response(
                    &mut stream,
                    200,
                    "text/csv",
                    &[(
                        "Content-Disposition",
                        "attachment; filename=\"occupancy_log.csv\"",
                    )],
                    &csv,
                ),
                Err(err) => write_control_error(&mut stream, &err),
            }
        }
        ("GET", "/api/errors") => {
            let scope = match request.query.get("scope").map(String::as_str) {
                None | Some("active") => ErrorScope::Active,
                Some("all") => ErrorScope::All,
                Some(other) => {
                    return write_error(
                        &mut stream,
                        400,
                        "invalid_scope",
                        &format!("scope must be active or all, got {:?}", other),
                    )
                }
            };
            let records = monitor.with(|orch| orch.errors(scope))?;
            write_serialized(&mut stream, 200, &records)
        }
        ("POST", path) => handle_post(&mut stream, monitor, path, &request.body),
        (_, path) if is_known_path(path) => {
            write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)
        }
        _ => write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#),
    }
}

fn is_known_path(path: &str) -> bool {
    matches!(
        path,
        "/health"
            | "/video_feed"
            | "/events"
            | "/api/stats"
            | "/api/status"
            | "/api/logs"
            | "/api/logs/export"
            | "/api/errors"
            | "/api/tracking"
            | "/api/pause"
            | "/api/camera"
            | "/api/camera/test"
            | "/api/sensitivity"
            | "/api/config"
            | "/api/errors/clear"
    )
}

#[derive(Deserialize)]
struct TrackingRequest {
    tracking: bool,
}

#[derive(Deserialize)]
struct PauseRequest {
    paused: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CameraRequest {
    camera: Option<CameraId>,
    resolution: Option<String>,
    frame_rate: Option<u32>,
}

#[derive(Deserialize)]
struct CameraTestRequest {
    camera: CameraId,
}

#[derive(Deserialize)]
struct SensitivityRequest {
    level: Sensitivity,
}

fn handle_post(stream: &mut TcpStream, monitor: &Monitor, path: &str, body: &[u8]) -> Result<()> {
    match path {
        "/api/tracking" => {
            let Some(req) = parse_body::<TrackingRequest>(stream, body)? else {
                return Ok(());
            };
            let status = monitor.with(|orch| {
                orch.set_tracking(req.tracking);
                orch.status()
            })?;
            write_serialized(stream, 200, &status)
        }
        "/api/pause" => {
            let Some(req) = parse_body::<PauseRequest>(stream, body)? else {
                return Ok(());
            };
            let status = monitor.with(|orch| {
                orch.set_paused(req.paused);
                orch.status()
            })?;
            write_serialized(stream, 200, &status)
        }
        "/api/camera" => {
            let Some(req) = parse_body::<CameraRequest>(stream, body)? else {
                return Ok(());
            };
            let update = CameraUpdate {
                id: req.camera,
                resolution: req.resolution,
                frame_rate: req.frame_rate,
            };
            match monitor.with(|orch| orch.switch_camera(update).map(|_| orch.status()))? {
                Ok(status) => write_serialized(stream, 200, &status),
                Err(err) => write_control_error(stream, &err),
            }
        }
        "/api/camera/test" => {
            let Some(req) = parse_body::<CameraTestRequest>(stream, body)? else {
                return Ok(());
            };
            let probe = monitor.test_camera(req.camera)?;
            write_serialized(stream, 200, &probe)
        }
        "/api/sensitivity" => {
            let Some(req) = parse_body::<SensitivityRequest>(stream, body)? else {
                return Ok(());
            };
            match monitor.with(|orch| orch.set_sensitivity(req.level).map(|_| orch.status()))? {
                Ok(status) => write_serialized(stream, 200, &status),
                Err(err) => write_control_error(stream, &err),
            }
        }
        "/api/config" => {
            let Some(update) = parse_body::<SettingsUpdate>(stream, body)? else {
                return Ok(());
            };
            match monitor.with(|orch| orch.apply_update(&update).map(|_| orch.status()))? {
                Ok(status) => write_serialized(stream, 200, &status),
                Err(err) => write_control_error(stream, &err),
            }
        }
        "/api/errors/clear" => {
            let removed = monitor.with(|orch| orch.clear_errors())?;
            write_serialized(stream, 200, &serde_json::json!({ "removed": removed }))
        }
        other => {
            let Some((id, action)) = other
                .strip_prefix("/api/errors/")
                .and_then(|rest| rest.split_once('/'))
            else {
                return write_json_response(stream, 404, r#"{"error":"not_found"}"#);
            };
            let Ok(id) = id.parse::<u64>() else {
                return write_error(stream, 400, "invalid_id", "error id must be an integer");
            };
            let result = match action {
                "resolve" => monitor.with(|orch| orch.resolve_error(id))?,
                "dismiss" => monitor.with(|orch| orch.dismiss_error(id))?,
                _ => return write_json_response(stream, 404, r#"{"error":"not_found"}"#),
            };
            match result {
                Ok(record) => write_serialized(stream, 200, &record),
                Err(err) => write_control_error(stream, &err),
            }
        }
    }
}

/// Decode a JSON body, answering 400 on failure.
fn parse_body<T: for<'de> Deserialize<'de>>(
    stream: &mut TcpStream,
    body: &[u8],
) -> Result<Option<T>> {
    let body = if body.is_empty() { b"{}".as_slice() } else { body };
    match serde_json::from_slice(body) {
        Ok(value) => Ok(Some(value)),
        Err(err) => {
            write_error(stream, 400, "invalid_request", &err.to_string())?;
            Ok(None)
        }
    }
}

fn log_query(params: &HashMap<String, String>) -> Result<LogQuery, ControlError> {
    let (start, end) = time_range(params)?;
    let status = params
        .get("status")
        .filter(|s| !s.is_empty() && s.as_str() != "all")
        .map(|s| s.parse::<RowStatus>())
        .transpose()?;
    let number = |key: &str| -> Result<usize, ControlError> {
        match params.get(key).filter(|s| !s.is_empty()) {
            None => Ok(0),
            Some(raw) => raw.parse().map_err(|_| {
                crate::error::ConfigurationError::new(key, "must be a non-negative integer").into()
            }),
        }
    };
    Ok(LogQuery {
        search: params.get("search").cloned(),
        start,
        end,
        status,
        page: number("page")?,
        page_size: number("page_size")?,
    })
}

type TimeRange = (Option<chrono::NaiveDateTime>, Option<chrono::NaiveDateTime>);

fn time_range(params: &HashMap<String, String>) -> Result<TimeRange, ControlError> {
    let bound = |key: &str, is_end: bool| {
        params
            .get(key)
            .filter(|s| !s.is_empty())
            .map(|s| parse_time_bound(s, is_end))
            .transpose()
    };
    Ok((bound("start", false)?, bound("end", true)?))
}

fn stream_video(stream: &mut TcpStream, monitor: &Monitor, shutdown: &AtomicBool) -> Result<()> {
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary={}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        MJPEG_BOUNDARY
    );
    stream.write_all(header.as_bytes())?;

    let feed = monitor.feed().clone();
    let mut last_seq = 0;
    if let Some((seq, frame)) = feed.latest() {
        write_mjpeg_part(stream, &frame)?;
        last_seq = seq;
    }
    while !shutdown.load(Ordering::SeqCst) && !feed.is_closed() {
        if let Some((seq, frame)) = feed.wait_next(last_seq, STREAM_POLL) {
            write_mjpeg_part(stream, &frame)?;
            last_seq = seq;
        }
    }
    Ok(())
}

fn write_mjpeg_part(stream: &mut TcpStream, jpeg: &[u8]) -> Result<()> {
    let head = format!(
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        MJPEG_BOUNDARY,
        jpeg.len()
    );
    stream.write_all(head.as_bytes())?;
    stream.write_all(jpeg)?;
    stream.write_all(b"\r\n")?;
    stream.flush()?;
    Ok(())
}

fn stream_events(stream: &mut TcpStream, monitor: &Monitor, shutdown: &AtomicBool) -> Result<()> {
    let header = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n";
    stream.write_all(header.as_bytes())?;

    let receiver = monitor.events().subscribe();
    let (snapshot, status) = monitor.with(|orch| (orch.snapshot(), orch.status()))?;
    write_sse(stream, &Event::StatsUpdate(snapshot))?;
    write_sse(
        stream,
        &Event::StatusChange {
            system_status: status.system_status,
            stream_state: status.state.name().to_string(),
        },
    )?;

    while !shutdown.load(Ordering::SeqCst) {
        match receiver.recv_timeout(STREAM_POLL) {
            Ok(event) => write_sse(stream, &event)?,
            Err(RecvTimeoutError::Timeout) => {
                stream.write_all(b": keepalive\n\n")?;
                stream.flush()?;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    Ok(())
}

fn write_sse(stream: &mut TcpStream, event: &Event) -> Result<()> {
    let payload = event.payload_json()?;
    let message = format!("event: {}\ndata: {}\n\n", event.name(), payload);
    stream.write_all(message.as_bytes())?;
    stream.flush()?;
    Ok(())
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    let header_end = loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before request completed"));
        }
        data.extend_from_slice(&buf[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(anyhow!("request too large"));
        }
    };

    let text = String::from_utf8_lossy(&data[..header_end]).into_owned();
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let content_length: usize = match headers.get("content-length") {
        Some(value) => value
            .parse()
            .map_err(|_| anyhow!("invalid content-length"))?,
        None => 0,
    };
    if content_length > MAX_BODY_BYTES {
        return Err(anyhow!("request body too large"));
    }
    let mut body = data[header_end..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before body completed"));
        }
        body.extend_from_slice(&buf[..n]);
    }
    body.truncate(content_length);

    let (path, query) = match raw_path.split_once('?') {
        Some((path, query)) => (path, query),
        None => (raw_path, ""),
    };
    let query = url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect();

    Ok(HttpRequest {
        method: method.to_string(),
        path: path.to_string(),
        query,
        body,
    })
}

fn write_control_error(stream: &mut TcpStream, err: &ControlError) -> Result<()> {
    let (status, code) = match err {
        ControlError::Configuration(_) => (400, "invalid_configuration"),
        ControlError::UnknownRecord(_) => (404, "unknown_record"),
        ControlError::RecordNotActive(_) => (409, "record_not_active"),
        ControlError::Camera(_) => (503, "camera_unavailable"),
        ControlError::Export(_) => (500, "export_failed"),
    };
    write_error(stream, status, code, &err.to_string())
}

fn write_error(stream: &mut TcpStream, status: u16, code: &str, message: &str) -> Result<()> {
    let body = serde_json::json!({ "error": code, "message": message });
    write_serialized(stream, status, &body)
}

fn write_serialized<T: Serialize>(stream: &mut TcpStream, status: u16, value: &T) -> Result<()> {
    let payload = serde_json::to_vec(value)?;
    write_response(stream, status, "application/json", &[], &payload)
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", &[], body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    extra_headers: &[(&str, &str)],
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        403 => "HTTP/1.1 403 Forbidden",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        409 => "HTTP/1.1 409 Conflict",
        503 => "HTTP/1.1 503 Service Unavailable",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let mut header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    for (name, value) in extra_headers {
        header.push_str(&format!("{}: {}\r\n", name, value));
    }
    header.push_str("\r\n");
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    query: HashMap<String, String>,
    body: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn log_query_parses_filters() {
        let query = log_query(&params(&[
            ("search", "count"),
            ("status", "warning"),
            ("start", "2024-05-01"),
            ("page", "2"),
            ("page_size", "50"),
        ]))
        .unwrap();
        assert_eq!(query.search.as_deref(), Some("count"));
        assert_eq!(query.status, Some(RowStatus::Warning));
        assert!(query.start.is_some());
        assert!(query.end.is_none());
        assert_eq!((query.page, query.page_size), (2, 50));
    }

    #[test]
    fn log_query_rejects_bad_values() {
        assert!(matches!(
            log_query(&params(&[("status", "purple")])),
            Err(ControlError::Configuration(_))
        ));
        assert!(log_query(&params(&[("page", "-1")])).is_err());
        assert!(log_query(&params(&[("end", "soon")])).is_err());
    }

    #[test]
    fn all_status_means_no_filter() {
        let query = log_query(&params(&[("status", "all")])).unwrap();
        assert!(query.status.is_none());
    }
}
