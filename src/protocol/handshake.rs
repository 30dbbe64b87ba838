//! Upgrade handshake negotiation.
//!
//! Consumes the plaintext request head, validates the upgrade path and key,
//! and answers with either `101 Switching Protocols` or a bare `404`/`400`.
//! A failed handshake is terminal for the connection; there are no retries.
//!
//! # Exchange
//!
//! ```text
//! GET /ws HTTP/1.1                      HTTP/1.1 101 Switching Protocols
//! Host: example.com                     Upgrade: websocket
//! Upgrade: websocket            ──►     Connection: Upgrade
//! Connection: Upgrade                   Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=
//! Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::io::ErrorKind;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Fixed GUID appended to the client key before hashing.
pub const ACCEPT_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Header carrying the client's handshake key.
pub const KEY_HEADER: &str = "Sec-WebSocket-Key";

/// Decoded length of a valid handshake key.
const KEY_LEN: usize = 16;

const STATUS_BAD_REQUEST: u16 = 400;
const STATUS_NOT_FOUND: u16 = 404;

// ============================================================================
// RequestHeaders
// ============================================================================

/// Upgrade request headers.
///
/// Names keep their original case and arrival order; lookups ignore case.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestHeaders {
    entries: Vec<(String, String)>,
}

impl RequestHeaders {
    /// Creates an empty header set.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a header.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Returns the first value for `name`, compared case-insensitively.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Returns `true` if a header named `name` is present.
    #[inline]
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Iterates headers in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns the number of headers.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if there are no headers.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// UpgradeRequest
// ============================================================================

/// A validated upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeRequest {
    /// Request path without the query.
    pub path: String,
    /// Raw query string (after `?`), if any.
    pub query: Option<String>,
    /// All request headers.
    pub headers: RequestHeaders,
    /// Client handshake key.
    pub key: String,
}

impl UpgradeRequest {
    /// Returns the accept token for this request's key.
    #[inline]
    #[must_use]
    pub fn accept_token(&self) -> String {
        accept_token(&self.key)
    }
}

// ============================================================================
// Pure Functions
// ============================================================================

/// Computes `base64(sha1(key + GUID))`.
#[must_use]
pub fn accept_token(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(ACCEPT_GUID.as_bytes());
    BASE64.encode(sha1.finalize())
}

/// Parses and validates a request head (request line plus headers).
///
/// # Errors
///
/// Returns [`Error::Handshake`] with status 404 if the path does not match
/// `expected_path`, or 400 if the request is malformed or the key is missing.
pub fn parse_request(head: &str, expected_path: &str) -> Result<UpgradeRequest> {
    let mut lines = head.lines();

    let request_line = lines
        .next()
        .ok_or_else(|| Error::handshake(STATUS_BAD_REQUEST, "empty request"))?;
    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(Error::handshake(
            STATUS_BAD_REQUEST,
            format!("malformed request line: {request_line:?}"),
        ));
    };

    if method != "GET" || !version.starts_with("HTTP/") {
        return Err(Error::handshake(
            STATUS_BAD_REQUEST,
            format!("not an upgrade request: {request_line:?}"),
        ));
    }

    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path, Some(query.to_string())),
        None => (target, None),
    };

    if path != expected_path {
        return Err(Error::handshake(
            STATUS_NOT_FOUND,
            format!("path {path} does not match {expected_path}"),
        ));
    }

    let mut headers = RequestHeaders::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        let (name, value) = line.split_once(':').ok_or_else(|| {
            Error::handshake(STATUS_BAD_REQUEST, format!("malformed header: {line:?}"))
        })?;
        headers.insert(name.trim(), value.trim());
    }

    let key = headers
        .get(KEY_HEADER)
        .filter(|key| !key.is_empty())
        .ok_or_else(|| Error::handshake(STATUS_BAD_REQUEST, "missing Sec-WebSocket-Key"))?
        .to_string();

    match BASE64.decode(&key) {
        Ok(raw) if raw.len() == KEY_LEN => {}
        _ => {
            return Err(Error::handshake(
                STATUS_BAD_REQUEST,
                format!("invalid Sec-WebSocket-Key: {key:?}"),
            ));
        }
    }

    Ok(UpgradeRequest {
        path: path.to_string(),
        query,
        headers,
        key,
    })
}

/// Builds the `101 Switching Protocols` response for `key`.
#[must_use]
pub fn switching_protocols_response(key: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\
         \r\n",
        accept_token(key)
    )
}

/// Builds a bodyless rejection response.
#[must_use]
pub fn rejection_response(status: u16) -> String {
    let reason = match status {
        STATUS_NOT_FOUND => "Not Found",
        _ => "Bad Request",
    };
    format!("HTTP/1.1 {status} {reason}\r\nContent-Length: 0\r\n\r\n")
}

// ============================================================================
// Stream Negotiation
// ============================================================================

/// Reads the request head up to and including the blank line.
///
/// # Errors
///
/// - [`Error::ConnectionClosed`] if the stream ends before the blank line
/// - [`Error::Handshake`] (400) if the head exceeds `max_bytes` or is not UTF-8
pub async fn read_request_head<R>(reader: &mut R, max_bytes: usize) -> Result<String>
where
    R: AsyncBufRead + Unpin,
{
    let mut head = String::new();

    loop {
        let remaining = max_bytes.saturating_sub(head.len());
        if remaining == 0 {
            return Err(Error::handshake(
                STATUS_BAD_REQUEST,
                format!("request head exceeds {max_bytes} bytes"),
            ));
        }

        let mut limited = (&mut *reader).take(remaining as u64);
        let read = match limited.read_line(&mut head).await {
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::InvalidData => {
                return Err(Error::handshake(STATUS_BAD_REQUEST, "request head is not UTF-8"));
            }
            Err(e) => return Err(e.into()),
        };

        if read == 0 {
            return Err(Error::ConnectionClosed);
        }

        if !head.ends_with('\n') {
            // Line cut off by the byte limit.
            continue;
        }

        if head.ends_with("\r\n\r\n") || head.ends_with("\n\n") || head == "\r\n" {
            return Ok(head);
        }
    }
}

/// Runs the full handshake on a stream.
///
/// On success the `101` response has been written and flushed. On rejection
/// the matching status response has been written (best-effort) before the
/// error is returned.
///
/// # Errors
///
/// - [`Error::Handshake`] if the request was rejected
/// - [`Error::ConnectionClosed`] if the peer left before finishing the request
/// - [`Error::Io`] if writing the success response fails
pub async fn negotiate<R, W>(
    reader: &mut R,
    writer: &mut W,
    expected_path: &str,
    max_bytes: usize,
) -> Result<UpgradeRequest>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let outcome = match read_request_head(reader, max_bytes).await {
        Ok(head) => parse_request(&head, expected_path),
        Err(e) => Err(e),
    };

    match outcome {
        Ok(request) => {
            writer
                .write_all(switching_protocols_response(&request.key).as_bytes())
                .await?;
            writer.flush().await?;
            debug!(path = %request.path, "Handshake accepted");
            Ok(request)
        }
        Err(Error::Handshake { status, message }) => {
            warn!(status, reason = %message, "Handshake rejected");
            let response = rejection_response(status);
            if writer.write_all(response.as_bytes()).await.is_ok() {
                let _ = writer.flush().await;
            }
            Err(Error::Handshake { status, message })
        }
        Err(e) => Err(e),
    }
}

// ============================================================================
// Tests
// ============================================================================
