//! Raw-socket splice for `Connection: Upgrade` requests (WebSocket and friends).
//!
//! Byte-for-byte, no framing awareness: dial the backend over raw TCP, write the original
//! request line and headers by hand, wait for the backend's own `101` before hijacking the
//! client connection, then run two copy loops until either side hits EOF.

use std::io;

use axum::body::Body;
use axum::extract::Request;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::Response;
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::warn;

use crate::error::ForwardError;
use crate::routing::Backend;

pub async fn handle(backend: &Backend, req: Request) -> Result<Response, ForwardError> {
    let method = req.method().clone();
    let path = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let mut headers = req.headers().clone();
    let host_value = HeaderValue::from_str(&backend.endpoint)
        .map_err(|err| ForwardError::Upgrade(io::Error::other(err)))?;
    headers.insert(axum::http::header::HOST, host_value);

    let on_upgrade = hyper::upgrade::on(req);

    let mut upstream = TcpStream::connect(&backend.endpoint)
        .await
        .map_err(ForwardError::Upgrade)?;

    write_request_head(&mut upstream, method.as_str(), &path, &headers)
        .await
        .map_err(ForwardError::Upgrade)?;

    let (status, response_headers) = read_response_head(&mut upstream)
        .await
        .map_err(ForwardError::Upgrade)?;

    if status != StatusCode::SWITCHING_PROTOCOLS.as_u16() {
        return Err(ForwardError::Upgrade(io::Error::other(format!(
            "upstream declined upgrade (status {status})"
        ))));
    }

    tokio::spawn(async move {
        match on_upgrade.await {
            Ok(upgraded) => {
                let mut client_io = TokioIo::new(upgraded);
                if let Err(err) = splice(&mut client_io, &mut upstream).await {
                    warn!(error = %err, "upgrade splice ended with error");
                }
            }
            Err(err) => warn!(error = %err, "client upgrade handshake failed"),
        }
    });

    let mut builder = Response::builder().status(StatusCode::SWITCHING_PROTOCOLS);
    for (name, value) in response_headers.iter() {
        builder = builder.header(name, value);
    }
    builder
        .body(Body::empty())
        .map_err(|err| ForwardError::Upgrade(io::Error::other(err)))
}

async fn write_request_head(
    stream: &mut TcpStream,
    method: &str,
    path: &str,
    headers: &HeaderMap,
) -> io::Result<()> {
    let mut head = format!("{method} {path} HTTP/1.1\r\n");
    for (name, value) in headers.iter() {
        if let Ok(value) = value.to_str() {
            head.push_str(name.as_str());
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }
    }
    head.push_str("\r\n");
    stream.write_all(head.as_bytes()).await
}

/// Reads the upstream's response line and headers directly off the raw socket, stopping at the
/// blank line. Returns the status code and the parsed header set; any buffered body bytes read
/// past the blank line are intentionally dropped (an upgrade response carries none).
async fn read_response_head(stream: &mut TcpStream) -> io::Result<(u16, HeaderMap)> {
    let mut buf = Vec::with_capacity(512);
    let mut chunk = [0u8; 512];

    let head_end = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "upstream closed before sending a response",
            ));
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find_double_crlf(&buf) {
            break pos;
        }
        if buf.len() > 64 * 1024 {
            return Err(io::Error::other("upstream response head too large"));
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]);
    let mut lines = head.split("\r\n");
    let status_line = lines.next().unwrap_or_default();
    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| io::Error::other("malformed upstream status line"))?;

    let mut headers = HeaderMap::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            if let (Ok(name), Ok(value)) = (
                axum::http::HeaderName::from_bytes(name.trim().as_bytes()),
                HeaderValue::from_str(value.trim()),
            ) {
                headers.insert(name, value);
            }
        }
    }

    Ok((status, headers))
}

fn find_double_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

async fn splice<A, B>(a: &mut A, b: &mut B) -> io::Result<(u64, u64)>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut a_read, mut a_write) = tokio::io::split(a);
    let (mut b_read, mut b_write) = tokio::io::split(b);

    let a_to_b = async {
        let mut total = 0u64;
        let mut buf = vec![0u8; 8192];
        loop {
            match a_read.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    b_write.write_all(&buf[..n]).await?;
                    total += n as u64;
                }
                Err(e) => return Err(e),
            }
        }
        let _ = b_write.shutdown().await;
        Ok(total)
    };

    let b_to_a = async {
        let mut total = 0u64;
        let mut buf = vec![0u8; 8192];
        loop {
            match b_read.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    a_write.write_all(&buf[..n]).await?;
                    total += n as u64;
                }
                Err(e) => return Err(e),
            }
        }
        let _ = a_write.shutdown().await;
        Ok(total)
    };

    let (a_result, b_result): (io::Result<u64>, io::Result<u64>) = tokio::join!(a_to_b, b_to_a);
    Ok((a_result.unwrap_or(0), b_result.unwrap_or(0)))
}
