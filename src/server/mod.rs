//! Async TCP server using Tokio.
//!
//! Accepts TCP connections and runs one request per connection through an
//! [`Application`]. Every response is sent with `Connection: close`.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::app::Application;
use crate::http::request::BodyAccumulator;
use crate::http::{Request, RequestError, StatusCode};

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Largest request head we buffer before answering 431.
const MAX_HEAD_SIZE: usize = 64 * 1024;

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// The rmvc HTTP server.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
///
/// use rmvc::app::Application;
/// use rmvc::config::Config;
/// use rmvc::server::Server;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::default();
///     let server = Server::bind(config.server_addr()).await?;
///     let app = Arc::new(Application::new(config)?);
///     server.run(app).await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Binds the server to the given TCP address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound
    /// (e.g. port already in use, insufficient permissions).
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serves `app` until the process is terminated.
    pub async fn run(self, app: Arc<Application>) -> Result<(), ServerError> {
        self.run_until(app, std::future::pending()).await
    }

    /// Serves `app` until `shutdown` resolves.
    ///
    /// The session garbage collector runs alongside the accept loop while
    /// sessions are enabled and is stopped on return. Connections already
    /// accepted are left to finish on their own.
    pub async fn run_until<S>(self, app: Arc<Application>, shutdown: S) -> Result<(), ServerError>
    where
        S: Future<Output = ()>,
    {
        let collector = app.sessions().is_enabled().then(|| {
            Arc::clone(app.sessions()).spawn_garbage_collector(app.config().session_gc_interval())
        });
        info!(
            address = %self.local_addr,
            debug = app.config().debug,
            sessions = ?app.sessions().mode(),
            "rmvc listening"
        );

        tokio::pin!(shutdown);
        loop {
            let (stream, peer_addr) = tokio::select! {
                () = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!(error = %e, "failed to accept connection");
                        continue;
                    }
                },
            };

            debug!(peer = %peer_addr, "connection accepted");
            let app = Arc::clone(&app);

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, app).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }

        if let Some(collector) = collector {
            collector.abort();
        }
        info!(address = %self.local_addr, "rmvc stopped");
        Ok(())
    }
}

/// Serves exactly one request on `stream`.
///
/// The head is buffered until complete, the body is accumulated up to
/// `Content-Length` under the configured size limit, and the session is
/// persisted once the response has ended.
async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    app: Arc<Application>,
) -> Result<(), std::io::Error> {
    let (mut reader, mut writer) = stream.into_split();
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

    let (mut request, body_offset) = loop {
        if reader.read_buf(&mut buf).await? == 0 {
            debug!(peer = %peer_addr, "connection closed before a complete request");
            return Ok(());
        }
        match Request::parse(&buf, Some(peer_addr)) {
            Ok(parsed) => break parsed,
            Err(RequestError::Incomplete) if buf.len() <= MAX_HEAD_SIZE => continue,
            Err(RequestError::Incomplete) => {
                warn!(peer = %peer_addr, "request head too large, sending 431");
                return reject(&mut writer, StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE).await;
            }
            Err(e) => {
                warn!(peer = %peer_addr, error = %e, "bad request, sending 400");
                return reject(&mut writer, StatusCode::BAD_REQUEST).await;
            }
        }
    };

    let content_length = request.content_length().unwrap_or(0);
    let mut body = BodyAccumulator::new(app.config().post_max_size);
    let buffered = &buf[body_offset..];
    body.push(&buffered[..buffered.len().min(content_length)]);
    receive_body(&mut reader, &mut body, content_length).await?;

    let mut response = app.response(Box::new(writer));
    app.handle(&mut request, &mut response, body.finish()).await;

    if let Err(e) = request.session().update() {
        warn!(session = %request.session().id(), error = %e, "failed to persist the session");
    }
    if let Err(e) = response.close().await {
        debug!(peer = %peer_addr, error = %e, "failed to shut the connection down");
    }
    Ok(())
}

/// Reads the rest of the body into `body`, stopping at `content_length`
/// bytes or end of stream.
async fn receive_body(
    reader: &mut OwnedReadHalf,
    body: &mut BodyAccumulator,
    content_length: usize,
) -> Result<(), std::io::Error> {
    let mut chunk = BytesMut::with_capacity(INITIAL_BUF_SIZE);
    while body.received() < content_length {
        chunk.clear();
        if reader.read_buf(&mut chunk).await? == 0 {
            debug!(
                received = body.received(),
                expected = content_length,
                "body ended early"
            );
            break;
        }
        let wanted = content_length - body.received();
        body.push(&chunk[..chunk.len().min(wanted)]);
    }
    Ok(())
}

/// Answers a request that never reached the application.
async fn reject<W>(writer: &mut W, status: StatusCode) -> Result<(), std::io::Error>
where
    W: AsyncWrite + Unpin,
{
    let reason = status.canonical_reason();
    let head = format!(
        "HTTP/1.1 {} {reason}\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{reason}",
        status.as_u16(),
        reason.len()
    );
    writer.write_all(head.as_bytes()).await?;
    writer.shutdown().await
}
