//! Lightweight HTTP sidecar exposing read-only cluster status.
//!
//! Runs on its own port alongside the replica's binary protocol listener.
//! Serves minimal HTTP/1.1 GET responses for two endpoints:
//! - `GET /status` -- this replica's round, epoch, leader and log length
//! - `GET /health` -- liveness check, always 200 while the process is up

use std::io::{Read, Write};
use std::net::SocketAddr;

use mio::net::TcpListener;
use mio::{Interest, Poll, Token};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::NodeError;

pub const HTTP_LISTENER_TOKEN: Token = Token(1);

/// Read-only snapshot of replica state, refreshed by the main loop after
/// every processed event and handed to the sidecar for rendering.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub key: String,
    pub round: u64,
    pub epoch: u64,
    pub log_len: usize,
    pub leader: String,
    pub n: u64,
    pub is_leader: bool,
}

pub struct HttpSidecar {
    listener: TcpListener,
}

impl HttpSidecar {
    pub fn bind(addr: SocketAddr, poll: &Poll) -> Result<Self, NodeError> {
        let mut listener = TcpListener::bind(addr)?;
        poll.registry()
            .register(&mut listener, HTTP_LISTENER_TOKEN, Interest::READABLE)?;
        debug!(%addr, "http sidecar listening");
        Ok(Self { listener })
    }

    /// Accepts and services every pending connection. Connections are not
    /// kept alive -- each serves exactly one request/response.
    pub fn handle_accept(&self, status: &StatusSnapshot) {
        loop {
            match self.listener.accept() {
                Ok((mut stream, addr)) => {
                    debug!(%addr, "http connection");
                    let mut buf = [0u8; 1024];
                    let n = match stream.read(&mut buf) {
                        Ok(0) => continue,
                        Ok(n) => n,
                        Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
                        Err(e) => {
                            warn!(%addr, error = %e, "http read error");
                            continue;
                        }
                    };
                    let request = String::from_utf8_lossy(&buf[..n]);
                    let response = match parse_request_path(&request) {
                        Some(path) => dispatch(path, status),
                        None => http_response(400, "text/plain", "Bad Request"),
                    };
                    if let Err(e) = stream.write_all(response.as_bytes()) {
                        debug!(%addr, error = %e, "http write error");
                    }
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!(error = %e, "http accept error");
                    break;
                }
            }
        }
    }
}

fn parse_request_path(request: &str) -> Option<&str> {
    let first_line = request.lines().next()?;
    let mut parts = first_line.split_whitespace();
    let method = parts.next()?;
    let path = parts.next()?;
    if method != "GET" {
        return None;
    }
    Some(path)
}

fn dispatch(path: &str, status: &StatusSnapshot) -> String {
    match path {
        "/status" => {
            let body = serde_json::to_string(status).unwrap_or_else(|_| "{}".to_string());
            http_response(200, "application/json", &body)
        }
        "/health" => http_response(200, "application/json", r#"{"status":"up"}"#),
        _ => http_response(404, "text/plain", "Not Found"),
    }
}

fn http_response(status: u16, content_type: &str, body: &str) -> String {
    let reason = match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        _ => "Unknown",
    };
    format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> StatusSnapshot {
        StatusSnapshot {
            key: "aa".repeat(32),
            round: 3,
            epoch: 1,
            log_len: 3,
            leader: "bb".repeat(32),
            n: 4,
            is_leader: false,
        }
    }

    #[test]
    fn parses_get_path() {
        assert_eq!(parse_request_path("GET /status HTTP/1.1\r\n"), Some("/status"));
    }

    #[test]
    fn rejects_non_get() {
        assert_eq!(parse_request_path("POST /status HTTP/1.1\r\n"), None);
    }

    #[test]
    fn dispatches_status_as_json() {
        let resp = dispatch("/status", &snapshot());
        assert!(resp.contains("200 OK"));
        assert!(resp.contains("\"round\":3"));
    }

    #[test]
    fn dispatches_health() {
        let resp = dispatch("/health", &snapshot());
        assert!(resp.contains("200 OK"));
        assert!(resp.contains("up"));
    }

    #[test]
    fn unknown_path_is_404() {
        let resp = dispatch("/nope", &snapshot());
        assert!(resp.contains("404"));
    }
}
