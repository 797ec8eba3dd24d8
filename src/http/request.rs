//! Inbound request: head parsing with [`httparse`], body accumulation and
//! the decoded query, form, file, cookie and route-parameter views.

use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use super::body::{self, DecodeError, PostedFile};
use super::cookie::parse_cookie_header;
use super::{Headers, Method, Parameters};
use crate::session::Session;

/// Errors that can occur while reading an HTTP/1.1 request off the wire.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request is incomplete, more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("request body exceeds maximum allowed size of {max_bytes} bytes")]
    BodyTooLarge { max_bytes: usize },
}

/// One inbound request, from head parsing to the end of the connection.
///
/// The head (method, URL, headers, query string, cookies) is decoded by
/// [`Request::parse`]. The body is decoded separately by
/// [`Request::parse_body`] once it has been fully received. Route
/// parameters are filled in by the router and the session is attached by
/// the session store.
///
/// # Examples
///
/// ```
/// use rmvc::http::Request;
///
/// let raw = b"GET /blog/42?sort=asc HTTP/1.1\r\nHost: localhost\r\nCookie: theme=dark\r\n\r\n";
/// let (request, _offset) = Request::parse(raw, None).unwrap();
///
/// assert_eq!(request.method().as_str(), "GET");
/// assert_eq!(request.path(), "/blog/42");
/// assert_eq!(request.query().get_str("sort"), Some("asc"));
/// assert_eq!(request.cookie("theme"), Some("dark"));
/// ```
#[derive(Debug)]
pub struct Request {
    method: Method,
    raw_url: String,
    path: String,
    query_string: Option<String>,
    headers: Headers,
    query: Parameters,
    form: Parameters,
    json: Option<Value>,
    files: HashMap<String, PostedFile>,
    cookies: HashMap<String, String>,
    route_params: Parameters,
    session: Session,
    request_time: DateTime<Utc>,
    remote_addr: Option<SocketAddr>,
}

impl Request {
    /// Maximum number of headers we support per request.
    const MAX_HEADERS: usize = 64;

    /// Parses the request head from `buf`.
    ///
    /// Returns the request and the offset at which the body begins in `buf`.
    ///
    /// # Errors
    ///
    /// - [`RequestError::Incomplete`]: the head terminator has not arrived yet.
    /// - [`RequestError::Parse`]: the head is malformed.
    /// - [`RequestError::MissingField`]: method or path is absent.
    pub fn parse(
        buf: &[u8],
        remote_addr: Option<SocketAddr>,
    ) -> Result<(Self, usize), RequestError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw_req = httparse::Request::new(&mut headers);

        let body_offset = match raw_req.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(RequestError::Incomplete),
        };

        let Ok(method) = raw_req
            .method
            .ok_or(RequestError::MissingField { field: "method" })?
            .parse::<Method>();
        let raw_url = raw_req
            .path
            .ok_or(RequestError::MissingField { field: "path" })?
            .to_owned();

        let mut header_map = Headers::with_capacity(raw_req.headers.len());
        for header in raw_req.headers.iter() {
            if let Ok(value) = std::str::from_utf8(header.value) {
                header_map.append(header.name, value);
            }
        }

        Ok((Self::from_parts(method, raw_url, header_map, remote_addr), body_offset))
    }

    /// Builds a request from an already-parsed head.
    pub fn from_parts(
        method: Method,
        raw_url: String,
        headers: Headers,
        remote_addr: Option<SocketAddr>,
    ) -> Self {
        let (path, query_string) = match raw_url.split_once('?') {
            Some((path, query)) => (path.to_owned(), Some(query.to_owned())),
            None => (raw_url.clone(), None),
        };
        let query = query_string
            .as_deref()
            .map(|q| Parameters::from_urlencoded(q.as_bytes()))
            .unwrap_or_default();

        let mut cookies = HashMap::new();
        for header in headers.get_all("cookie") {
            cookies.extend(parse_cookie_header(header));
        }

        Self {
            method,
            raw_url,
            path,
            query_string,
            headers,
            query,
            form: Parameters::new(),
            json: None,
            files: HashMap::new(),
            cookies,
            route_params: Parameters::new(),
            session: Session::disabled(),
            request_time: Utc::now(),
            remote_addr,
        }
    }

    /// Decodes a fully received body according to the `Content-Type` header.
    ///
    /// # Errors
    ///
    /// See [`DecodeError`].
    pub fn parse_body(&mut self, body: &[u8]) -> Result<(), DecodeError> {
        let decoded = body::decode(self.headers.get("content-type"), body)?;
        self.form = decoded.form;
        self.json = decoded.json;
        self.files = decoded.files;
        Ok(())
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The request target as received, including the query string.
    pub fn raw_url(&self) -> &str {
        &self.raw_url
    }

    /// The request path, without the query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query_string(&self) -> Option<&str> {
        self.query_string.as_deref()
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn query(&self) -> &Parameters {
        &self.query
    }

    pub fn form(&self) -> &Parameters {
        &self.form
    }

    /// The decoded JSON body, when the request carried `application/json`.
    pub fn json(&self) -> Option<&Value> {
        self.json.as_ref()
    }

    pub fn files(&self) -> &HashMap<String, PostedFile> {
        &self.files
    }

    pub fn file(&self, field: &str) -> Option<&PostedFile> {
        self.files.get(field)
    }

    pub fn cookies(&self) -> &HashMap<String, String> {
        &self.cookies
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn route_params(&self) -> &Parameters {
        &self.route_params
    }

    pub fn route_params_mut(&mut self) -> &mut Parameters {
        &mut self.route_params
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn set_session(&mut self, session: Session) {
        self.session = session;
    }

    /// When the request head was parsed.
    pub fn request_time(&self) -> DateTime<Utc> {
        self.request_time
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Value of `Content-Length`, if present and well formed.
    pub fn content_length(&self) -> Option<usize> {
        self.headers.get("content-length")?.trim().parse().ok()
    }
}

/// Accumulates a request body up to a size limit.
///
/// Once the limit is exceeded the accumulator is faulted: the bytes buffered
/// so far are dropped, further data is discarded, and the error surfaces only
/// from [`finish`](Self::finish) at end-of-stream.
#[derive(Debug)]
pub struct BodyAccumulator {
    buf: BytesMut,
    max_bytes: usize,
    received: usize,
    faulted: bool,
}

impl BodyAccumulator {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_bytes,
            received: 0,
            faulted: false,
        }
    }

    /// Appends a chunk of body data.
    pub fn push(&mut self, chunk: &[u8]) {
        self.received += chunk.len();
        if self.faulted {
            return;
        }
        if self.buf.len() + chunk.len() > self.max_bytes {
            self.faulted = true;
            self.buf = BytesMut::new();
            return;
        }
        self.buf.extend_from_slice(chunk);
    }

    /// Total bytes seen, including discarded ones.
    pub fn received(&self) -> usize {
        self.received
    }

    pub fn is_faulted(&self) -> bool {
        self.faulted
    }

    /// Ends the stream, yielding the complete body.
    ///
    /// # Errors
    ///
    /// [`RequestError::BodyTooLarge`] if the limit was exceeded at any point.
    pub fn finish(self) -> Result<Bytes, RequestError> {
        if self.faulted {
            return Err(RequestError::BodyTooLarge {
                max_bytes: self.max_bytes,
            });
        }
        Ok(self.buf.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_get() {
        let raw = b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let (req, offset) = Request::parse(raw, None).unwrap();
        assert_eq!(req.method(), &Method::Get);
        assert_eq!(req.path(), "/");
        assert_eq!(req.raw_url(), "/");
        assert_eq!(req.headers().get("host"), Some("localhost"));
        assert_eq!(offset, raw.len());
        assert!(!req.session().is_enabled());
    }

    #[test]
    fn parse_query_string() {
        let raw = b"GET /search?q=rust+lang&page=2 HTTP/1.1\r\nHost: example.com\r\n\r\n";
        let (req, _) = Request::parse(raw, None).unwrap();
        assert_eq!(req.path(), "/search");
        assert_eq!(req.raw_url(), "/search?q=rust+lang&page=2");
        assert_eq!(req.query_string(), Some("q=rust+lang&page=2"));
        assert_eq!(req.query().get_str("q"), Some("rust lang"));
        assert_eq!(req.query().get_str("page"), Some("2"));
    }

    #[test]
    fn cookies_from_every_cookie_header() {
        let raw = b"GET / HTTP/1.1\r\nCookie: a=1; b=2\r\nCookie: c=3\r\n\r\n";
        let (req, _) = Request::parse(raw, None).unwrap();
        assert_eq!(req.cookie("a"), Some("1"));
        assert_eq!(req.cookie("b"), Some("2"));
        assert_eq!(req.cookie("c"), Some("3"));
    }

    #[test]
    fn incomplete_request() {
        let raw = b"GET / HTTP/1.1\r\nHost:";
        assert!(matches!(
            Request::parse(raw, None),
            Err(RequestError::Incomplete)
        ));
    }

    #[test]
    fn content_length_and_body_offset() {
        let raw = b"POST /form HTTP/1.1\r\nContent-Length: 9\r\n\r\nname=john";
        let (mut req, offset) = Request::parse(raw, None).unwrap();
        assert_eq!(req.content_length(), Some(9));
        req.parse_body(&raw[offset..]).unwrap();
        assert_eq!(req.form().get_str("name"), Some("john"));
    }

    #[test]
    fn json_body_via_header() {
        let raw = b"POST /api HTTP/1.1\r\nContent-Type: application/json\r\n\r\n";
        let (mut req, _) = Request::parse(raw, None).unwrap();
        req.parse_body(br#"{"id": 5}"#).unwrap();
        assert_eq!(req.form().get("id"), Some(&serde_json::json!(5)));
        assert!(req.json().is_some());
    }

    #[test]
    fn accumulator_under_limit() {
        let mut acc = BodyAccumulator::new(10);
        acc.push(b"hello");
        acc.push(b"world");
        assert_eq!(acc.finish().unwrap().as_ref(), b"helloworld");
    }

    #[test]
    fn accumulator_faults_but_keeps_draining() {
        let mut acc = BodyAccumulator::new(8);
        acc.push(b"hello");
        acc.push(b"world");
        assert!(acc.is_faulted());
        acc.push(b"more data after the fault");
        assert_eq!(acc.received(), 35);
        assert!(matches!(
            acc.finish(),
            Err(RequestError::BodyTooLarge { max_bytes: 8 })
        ));
    }
}
