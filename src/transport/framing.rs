//! Minimal HTTP/1.1 framing
//!
//! Just enough of the protocol for long-poll endpoints: one request per
//! connection, `Content-Length` bodies only, and every response closes the
//! connection. The request head is parsed with `httparse`.

use std::collections::HashMap;

use http::{Method, StatusCode};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::transport::message::ErrorResponse;
use crate::utils::{Error, Result};

const MAX_HEAD_BYTES: usize = 16 * 1024;
const MAX_HEADERS: usize = 64;
const READ_CHUNK: usize = 4096;

#[derive(Debug)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub query: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl Request {
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }
}

struct Head {
    len: usize,
    method: Method,
    target: String,
    content_length: usize,
}

fn parse_head(buf: &[u8]) -> Result<Option<Head>> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);
    let len = match req.parse(buf) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(e) => return Err(Error::MalformedRequest(e.to_string())),
    };

    let method = req
        .method
        .ok_or_else(|| Error::MalformedRequest("missing method".into()))?;
    let method = Method::from_bytes(method.as_bytes())
        .map_err(|e| Error::MalformedRequest(e.to_string()))?;
    let target = req
        .path
        .ok_or_else(|| Error::MalformedRequest("missing request target".into()))?
        .to_string();

    let mut content_length = 0;
    for header in req.headers.iter() {
        if header.name.eq_ignore_ascii_case("transfer-encoding") {
            return Err(Error::MalformedRequest(
                "chunked bodies are not supported".into(),
            ));
        }
        if header.name.eq_ignore_ascii_case("content-length") {
            content_length = std::str::from_utf8(header.value)
                .ok()
                .and_then(|v| v.trim().parse().ok())
                .ok_or_else(|| Error::MalformedRequest("invalid content-length".into()))?;
        }
    }

    Ok(Some(Head {
        len,
        method,
        target,
        content_length,
    }))
}

/// Read one request from `reader`.
///
/// Returns `Ok(None)` when the peer closes the connection before sending
/// anything. A declared body larger than `max_body` is rejected before any
/// of it is read.
pub async fn read_request<R>(reader: &mut R, max_body: usize) -> Result<Option<Request>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; READ_CHUNK];

    let head = loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            return Err(Error::MalformedRequest("truncated request head".into()));
        }
        buf.extend_from_slice(&chunk[..n]);

        if let Some(head) = parse_head(&buf)? {
            break head;
        }
        if buf.len() > MAX_HEAD_BYTES {
            return Err(Error::MalformedRequest("request head too large".into()));
        }
    };

    if head.content_length > max_body {
        return Err(Error::PayloadTooLarge {
            size: head.content_length,
            limit: max_body,
        });
    }

    let mut body = buf.split_off(head.len);
    if body.len() < head.content_length {
        let already = body.len();
        body.resize(head.content_length, 0);
        reader.read_exact(&mut body[already..]).await?;
    }
    body.truncate(head.content_length);

    let (path, query) = match head.target.split_once('?') {
        Some((path, query)) => (path.to_string(), query),
        None => (head.target.clone(), ""),
    };
    let query = url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect();

    Ok(Some(Request {
        method: head.method,
        path,
        query,
        body,
    }))
}

#[derive(Debug)]
pub struct Response {
    pub status: StatusCode,
    pub content_type: Option<&'static str>,
    pub allow: Option<&'static str>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            content_type: None,
            allow: None,
            body: Vec::new(),
        }
    }

    pub fn no_content() -> Self {
        Self::new(StatusCode::NO_CONTENT)
    }

    pub fn json<T: Serialize + ?Sized>(status: StatusCode, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self {
                status,
                content_type: Some("application/json"),
                allow: None,
                body,
            },
            Err(e) => Self::text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        }
    }

    pub fn text(status: StatusCode, text: String) -> Self {
        Self {
            status,
            content_type: Some("text/plain; charset=utf-8"),
            allow: None,
            body: text.into_bytes(),
        }
    }

    pub fn error(status: StatusCode, message: impl Into<String>) -> Self {
        Self::json(
            status,
            &ErrorResponse {
                error: message.into(),
            },
        )
    }

    /// Map a crate error onto a status code: input rejections are 4xx,
    /// everything else is a server fault.
    pub fn from_error(err: &Error) -> Self {
        let status = match err {
            Error::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            e if e.is_client_error() => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::error(status, err.to_string())
    }

    pub fn method_not_allowed(allow: &'static str) -> Self {
        Self::error(StatusCode::METHOD_NOT_ALLOWED, "method not allowed").with_allow(allow)
    }

    pub fn with_allow(mut self, allow: &'static str) -> Self {
        self.allow = Some(allow);
        self
    }

    pub async fn write_to<W>(&self, writer: &mut W) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let mut head = format!(
            "HTTP/1.1 {} {}\r\n",
            self.status.as_u16(),
            self.status.canonical_reason().unwrap_or("")
        );
        if let Some(content_type) = self.content_type {
            head.push_str(&format!("Content-Type: {content_type}\r\n"));
        }
        if self.status != StatusCode::NO_CONTENT {
            head.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
        }
        if let Some(allow) = self.allow {
            head.push_str(&format!("Allow: {allow}\r\n"));
            head.push_str(&format!("Access-Control-Allow-Methods: {allow}\r\n"));
            head.push_str("Access-Control-Allow-Headers: Content-Type\r\n");
        }
        head.push_str("Access-Control-Allow-Origin: *\r\n");
        head.push_str("Cache-Control: no-store\r\n");
        head.push_str("Connection: close\r\n\r\n");

        writer.write_all(head.as_bytes()).await?;
        if self.status != StatusCode::NO_CONTENT {
            writer.write_all(&self.body).await?;
        }
        writer.flush().await
    }
}
