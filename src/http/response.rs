//! Streaming HTTP/1.1 response writer.
//!
//! A [`Response`] moves through three states: **open** (status, headers and
//! cookies are mutable), **headers-sent** (after the first write) and
//! **finished** (after [`end`](Response::end)). Headers go out exactly once;
//! writes after the end are silently dropped.

use std::fmt;
use std::path::Path;

use bytes::{BufMut, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{Cookie, Headers, StatusCode};

/// Content type applied to every new response until overridden.
pub const DEFAULT_CONTENT_TYPE: &str = "text/html; charset=utf-8";

/// Chunk size used when streaming files.
const FILE_CHUNK_SIZE: usize = 100 * 1024;

/// Errors produced by the response writer.
#[derive(Debug, Error)]
pub enum ResponseError {
    #[error("headers can't be sent again")]
    HeadersAlreadySent,

    #[error("headers can't be sent, response is ended")]
    ResponseFinished,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    HeadersSent,
    Finished,
}

/// Byte sink the response is written to, usually the write half of a TCP stream.
pub type Transport = Box<dyn AsyncWrite + Send + Unpin>;

/// An HTTP/1.1 response bound to its transport.
///
/// The body is sent with `Transfer-Encoding: chunked` unless the caller set
/// an explicit `Content-Length`, in which case bytes are written verbatim.
/// Responses that carry no body (1xx, `204`, `304`, or the answer to a
/// `HEAD` request) are neither chunked nor given payload bytes.
///
/// # Examples
///
/// ```
/// use rmvc::http::{Response, StatusCode};
/// use tokio::io::AsyncReadExt;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let (client, server) = tokio::io::duplex(4096);
/// let mut response = Response::new(Box::new(server));
/// response.set_status(StatusCode::CREATED);
/// response.write("done").await?;
/// response.end().await?;
/// drop(response);
///
/// let mut raw = String::new();
/// let mut client = client;
/// client.read_to_string(&mut raw).await?;
/// assert!(raw.starts_with("HTTP/1.1 201 Created\r\n"));
/// assert!(raw.ends_with("4\r\ndone\r\n0\r\n\r\n"));
/// # Ok(())
/// # }
/// ```
pub struct Response {
    status: StatusCode,
    headers: Headers,
    cookies: Vec<Cookie>,
    state: State,
    chunked: bool,
    head_only: bool,
    transport: Transport,
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("cookies", &self.cookies)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Response {
    /// Creates an open `200 OK` response with the default content type.
    pub fn new(transport: Transport) -> Self {
        let mut headers = Headers::new();
        headers.set("Content-Type", DEFAULT_CONTENT_TYPE);
        Self {
            status: StatusCode::OK,
            headers,
            cookies: Vec::new(),
            state: State::Open,
            chunked: true,
            head_only: false,
            transport,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Sets the status code. Has no effect on the wire once headers are sent.
    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Sets a header, replacing any previous value with the same name.
    ///
    /// # Errors
    ///
    /// [`ResponseError::HeadersAlreadySent`] or [`ResponseError::ResponseFinished`]
    /// once the head has been written.
    pub fn set_header(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), ResponseError> {
        self.ensure_open()?;
        self.headers.set(name, value);
        Ok(())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type")
    }

    pub fn set_content_type(&mut self, value: impl Into<String>) -> Result<(), ResponseError> {
        self.set_header("Content-Type", value)
    }

    /// Adds a cookie, replacing any cookie already set under the same name.
    pub fn set_cookie(&mut self, cookie: Cookie) -> Result<(), ResponseError> {
        self.ensure_open()?;
        match self.cookies.iter_mut().find(|c| c.name() == cookie.name()) {
            Some(existing) => *existing = cookie,
            None => self.cookies.push(cookie),
        }
        Ok(())
    }

    pub fn cookie(&self, name: &str) -> Option<&Cookie> {
        self.cookies.iter().find(|c| c.name() == name)
    }

    /// Points the client at `url` with `302 Found`. The caller must still [`end`](Self::end).
    pub fn redirect(&mut self, url: impl Into<String>) -> Result<(), ResponseError> {
        self.set_header("Location", url)?;
        self.status = StatusCode::FOUND;
        Ok(())
    }

    /// Marks the response as the answer to a `HEAD` request: the head is
    /// sent as usual and body writes are dropped.
    pub fn set_head_only(&mut self, head_only: bool) {
        self.head_only = head_only;
    }

    /// Whether the message may not carry a body.
    pub fn is_bodyless(&self) -> bool {
        self.head_only || matches!(self.status.as_u16(), 100..=199 | 204 | 304)
    }

    pub fn headers_sent(&self) -> bool {
        self.state != State::Open
    }

    pub fn is_finished(&self) -> bool {
        self.state == State::Finished
    }

    /// Writes the status line, headers and one `Set-Cookie` line per cookie.
    ///
    /// # Errors
    ///
    /// Fails if called twice or after the response ended.
    pub async fn write_headers(&mut self) -> Result<(), ResponseError> {
        self.ensure_open()?;

        self.chunked = !self.is_bodyless() && !self.headers.contains("content-length");
        let mut head = BytesMut::with_capacity(256 + self.headers.len() * 64);
        head.put(
            format!(
                "HTTP/1.1 {} {}\r\n",
                self.status.as_u16(),
                self.status.canonical_reason()
            )
            .as_bytes(),
        );
        for (name, value) in self.headers.iter() {
            head.put(format!("{name}: {value}\r\n").as_bytes());
        }
        for cookie in &self.cookies {
            head.put(format!("Set-Cookie: {}\r\n", cookie.to_header_value()).as_bytes());
        }
        if self.chunked {
            head.put(&b"Transfer-Encoding: chunked\r\n"[..]);
        }
        if !self.headers.contains("connection") {
            head.put(&b"Connection: close\r\n"[..]);
        }
        head.put(&b"\r\n"[..]);

        self.state = State::HeadersSent;
        self.transport.write_all(&head).await?;
        Ok(())
    }

    /// Streams a piece of body, sending the headers first if needed.
    ///
    /// A no-op once the response is finished.
    pub async fn write(&mut self, data: impl AsRef<[u8]>) -> Result<(), ResponseError> {
        match self.state {
            State::Finished => return Ok(()),
            State::Open => self.write_headers().await?,
            State::HeadersSent => {}
        }
        self.write_payload(data.as_ref()).await
    }

    /// Streams the content of `path` in fixed-size chunks.
    pub async fn write_file(&mut self, path: impl AsRef<Path>) -> Result<(), ResponseError> {
        if self.is_finished() {
            return Ok(());
        }
        let file = tokio::fs::File::open(path).await?;
        self.write_reader(file).await
    }

    async fn write_reader<R>(&mut self, mut reader: R) -> Result<(), ResponseError>
    where
        R: AsyncRead + Unpin,
    {
        if self.state == State::Open {
            self.write_headers().await?;
        }
        let mut chunk = vec![0u8; FILE_CHUNK_SIZE];
        loop {
            let read = reader.read(&mut chunk).await?;
            if read == 0 {
                return Ok(());
            }
            self.write_payload(&chunk[..read]).await?;
        }
    }

    /// Finishes the response. Idempotent.
    pub async fn end(&mut self) -> Result<(), ResponseError> {
        match self.state {
            State::Finished => return Ok(()),
            State::Open => self.write_headers().await?,
            State::HeadersSent => {}
        }
        self.state = State::Finished;
        if self.chunked {
            self.transport.write_all(b"0\r\n\r\n").await?;
        }
        self.transport.flush().await?;
        Ok(())
    }

    /// Shuts the transport down. Used by the server once the response ended.
    pub async fn close(&mut self) -> Result<(), ResponseError> {
        self.transport.shutdown().await?;
        Ok(())
    }

    async fn write_payload(&mut self, data: &[u8]) -> Result<(), ResponseError> {
        if data.is_empty() || self.is_bodyless() {
            return Ok(());
        }
        if self.chunked {
            let mut frame = BytesMut::with_capacity(data.len() + 16);
            frame.put(format!("{:x}\r\n", data.len()).as_bytes());
            frame.put(data);
            frame.put(&b"\r\n"[..]);
            self.transport.write_all(&frame).await?;
        } else {
            self.transport.write_all(data).await?;
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), ResponseError> {
        match self.state {
            State::Open => Ok(()),
            State::HeadersSent => Err(ResponseError::HeadersAlreadySent),
            State::Finished => Err(ResponseError::ResponseFinished),
        }
    }
}
