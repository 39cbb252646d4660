//! Minimal HTTP/1.1 exposition server.
//!
//! One task per connection, one request per connection (`Connection: close`).
//! Routes:
//! - `GET /healthz`       liveness, always `ok`
//! - `GET /metrics`       latest snapshot as JSON
//! - `GET /metrics-prom`  Prometheus text exposition

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use prometheus::Registry;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::collector::Collector;
use crate::exposition;

const READ_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_LINE: usize = 8 * 1024;
const MAX_HEADERS: usize = 100;

/// What the handlers read from.
#[derive(Clone)]
pub struct AppState {
    pub collector: Arc<Collector>,
    pub registry: Registry,
}

pub struct Server {
    listener: TcpListener,
    state: Arc<AppState>,
}

impl Server {
    pub async fn bind(addr: SocketAddr, state: AppState) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        Ok(Self { listener, state: Arc::new(state) })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `cancel` fires, then wait for open
    /// connections to finish.
    pub async fn serve(self, cancel: CancellationToken) -> Result<()> {
        info!(addr = %self.local_addr()?, "HTTP server listening");
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let state = Arc::clone(&self.state);
                        connections.spawn(async move {
                            if let Err(e) = handle_connection(stream, state).await {
                                debug!(peer = %peer, error = %e, "Connection error");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "Failed to accept connection"),
                },
                // reap finished connections so the set does not grow
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        drop(self.listener);
        while connections.join_next().await.is_some() {}
        info!("HTTP server stopped");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl Response {
    fn new(status: u16, content_type: &'static str, body: impl Into<Vec<u8>>) -> Self {
        Self { status, content_type, body: body.into() }
    }

    fn text(status: u16, body: &str) -> Self {
        Self::new(status, "text/plain; charset=utf-8", body)
    }

    fn reason(&self) -> &'static str {
        match self.status {
            200 => "OK",
            400 => "Bad Request",
            404 => "Not Found",
            405 => "Method Not Allowed",
            _ => "Internal Server Error",
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n",
            self.status,
            self.reason(),
            self.content_type,
            self.body.len()
        );
        if self.status == 405 {
            out.push_str("Allow: GET\r\n");
        }
        out.push_str("\r\n");

        let mut bytes = out.into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }
}

/// Dispatch one request. `path` may carry a query string, which is ignored.
pub fn route(method: &str, path: &str, state: &AppState) -> Response {
    let path = path.split('?').next().unwrap_or(path);

    let known = matches!(path, "/healthz" | "/metrics" | "/metrics-prom");
    if !known {
        return Response::text(404, "not found");
    }
    if method != "GET" {
        return Response::text(405, "method not allowed");
    }

    match path {
        "/healthz" => Response::text(200, "ok"),
        "/metrics" => match serde_json::to_vec(&state.collector.last()) {
            Ok(body) => Response::new(200, "application/json", body),
            Err(e) => {
                warn!(error = %e, "Failed to serialize snapshot");
                Response::text(500, "internal error")
            }
        },
        _ => match exposition::encode_text(&state.registry) {
            Ok(body) => Response::new(200, exposition::text_content_type(), body),
            Err(e) => {
                warn!(error = %e, "Failed to encode registry");
                Response::text(500, "internal error")
            }
        },
    }
}

async fn handle_connection(stream: TcpStream, state: Arc<AppState>) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let head = tokio::time::timeout(READ_TIMEOUT, read_head(&mut reader)).await;
    let response = match head {
        Ok(Ok(Some((method, path)))) => {
            debug!(method = %method, path = %path, "Request");
            route(&method, &path, &state)
        }
        Ok(Ok(None)) => return Ok(()),
        Ok(Err(e)) => {
            debug!(error = %e, "Malformed request");
            Response::text(400, "bad request")
        }
        Err(_) => Response::text(400, "request timeout"),
    };

    write_half.write_all(&response.to_bytes()).await?;
    write_half.shutdown().await?;
    Ok(())
}

/// Read the request line and headers. `None` means the peer closed
/// before sending anything.
async fn read_head<R>(reader: &mut R) -> Result<Option<(String, String)>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    if read_bounded_line(reader, &mut line).await? == 0 {
        return Ok(None);
    }
    let (method, path) = parse_request_line(&line)?;

    for _ in 0..MAX_HEADERS {
        line.clear();
        let n = read_bounded_line(reader, &mut line).await?;
        if n == 0 || line.trim_end().is_empty() {
            return Ok(Some((method, path)));
        }
    }
    anyhow::bail!("too many headers")
}

/// Read one line, buffering at most `MAX_LINE + 1` bytes of it.
async fn read_bounded_line<R>(reader: &mut R, line: &mut String) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let n = (&mut *reader)
        .take(MAX_LINE as u64 + 1)
        .read_line(line)
        .await?;
    if n > MAX_LINE {
        anyhow::bail!("header line too long");
    }
    Ok(n)
}

fn parse_request_line(line: &str) -> Result<(String, String)> {
    let mut parts = line.split_whitespace();
    let (Some(method), Some(path), Some(version)) = (parts.next(), parts.next(), parts.next()) else {
        anyhow::bail!("invalid request line: {:?}", line.trim_end());
    };
    if !version.starts_with("HTTP/1.") {
        anyhow::bail!("unsupported protocol {}", version);
    }
    if !path.starts_with('/') {
        anyhow::bail!("invalid request target {}", path);
    }
    Ok((method.to_string(), path.to_string()))
}
