//! HTTP primitives shared by the decoder, the router and the response writer.
//!
//! [`Method`] and [`StatusCode`] live here; the request side ([`Request`],
//! [`Parameters`], [`PostedFile`]) and the response side ([`Response`],
//! [`Cookie`]) live in their own submodules.

use std::fmt;

pub mod body;
pub mod cookie;
pub mod headers;
pub mod params;
pub mod request;
pub mod response;

pub use body::{DecodeError, PostedFile};
pub use cookie::Cookie;
pub use headers::Headers;
pub use params::Parameters;
pub use request::{Request, RequestError};
pub use response::{Response, ResponseError};

/// An HTTP response status code.
///
/// Any code from 100 to 999 can be carried, so a controller is free to
/// answer with whatever its protocol needs. The codes the pipeline itself
/// produces have named constants.
///
/// # Examples
///
/// ```
/// use rmvc::http::StatusCode;
///
/// assert_eq!(StatusCode::FOUND.as_u16(), 302);
/// assert_eq!(StatusCode::FOUND.canonical_reason(), "Found");
/// assert_eq!(StatusCode::from_u16(418).map(StatusCode::canonical_reason), Some(""));
/// assert!(StatusCode::from_u16(42).is_none());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatusCode(u16);

macro_rules! status_codes {
    ($($name:ident = $code:literal $reason:literal,)+) => {
        impl StatusCode {
            $(pub const $name: Self = Self($code);)+

            /// Reason phrase for the status line. Empty for codes without a
            /// named constant.
            pub fn canonical_reason(self) -> &'static str {
                match self.0 {
                    $($code => $reason,)+
                    _ => "",
                }
            }
        }
    };
}

status_codes! {
    OK = 200 "OK",
    CREATED = 201 "Created",
    NO_CONTENT = 204 "No Content",
    MOVED_PERMANENTLY = 301 "Moved Permanently",
    FOUND = 302 "Found",
    SEE_OTHER = 303 "See Other",
    NOT_MODIFIED = 304 "Not Modified",
    BAD_REQUEST = 400 "Bad Request",
    UNAUTHORIZED = 401 "Unauthorized",
    FORBIDDEN = 403 "Forbidden",
    NOT_FOUND = 404 "Not Found",
    METHOD_NOT_ALLOWED = 405 "Method Not Allowed",
    PAYLOAD_TOO_LARGE = 413 "Payload Too Large",
    REQUEST_HEADER_FIELDS_TOO_LARGE = 431 "Request Header Fields Too Large",
    INTERNAL_SERVER_ERROR = 500 "Internal Server Error",
    SERVICE_UNAVAILABLE = 503 "Service Unavailable",
}

impl StatusCode {
    /// Accepts any three-digit code.
    pub fn from_u16(code: u16) -> Option<Self> {
        (100..1000).contains(&code).then_some(Self(code))
    }

    pub fn as_u16(self) -> u16 {
        self.0
    }
}

impl Default for StatusCode {
    fn default() -> Self {
        Self::OK
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.0, self.canonical_reason())
    }
}

impl From<StatusCode> for u16 {
    fn from(code: StatusCode) -> u16 {
        code.0
    }
}

/// An HTTP request method.
///
/// Route verb filters compare against [`Method::as_str`], so extension
/// methods are kept verbatim (uppercased) in the `Custom` variant.
///
/// # Examples
///
/// ```
/// use rmvc::http::Method;
///
/// let method: Method = "post".parse().unwrap();
/// assert_eq!(method, Method::Post);
/// assert_eq!(method.as_str(), "POST");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
    Patch,
    Connect,
    Trace,
    /// A non-standard extension method.
    Custom(String),
}

impl Method {
    /// Returns the method as an uppercase string slice.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
            Self::Patch => "PATCH",
            Self::Connect => "CONNECT",
            Self::Trace => "TRACE",
            Self::Custom(s) => s.as_str(),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Method {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.to_ascii_uppercase();
        Ok(match upper.as_str() {
            "GET" => Self::Get,
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "DELETE" => Self::Delete,
            "HEAD" => Self::Head,
            "OPTIONS" => Self::Options,
            "PATCH" => Self::Patch,
            "CONNECT" => Self::Connect,
            "TRACE" => Self::Trace,
            _ => Self::Custom(upper),
        })
    }
}

impl AsRef<str> for Method {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}
