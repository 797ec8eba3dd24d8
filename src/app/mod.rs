//! The application context and the per-request dispatch pipeline.
//!
//! An [`Application`] owns everything that outlives a single request: the
//! configuration, the router (route table and controller registry) and the
//! session store. It is built once, populated with routes and controllers,
//! then shared behind an [`Arc`] by every connection task.
//!
//! For each request, [`Application::handle`] runs, strictly in order: body
//! decoding, session restoration, the injection guard over query and form,
//! routing and the action itself, and finally the response flush. Any
//! failure is rendered by [`Application::render_error`].

use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Config;
use crate::http::{
    DecodeError, Method, Request, RequestError, Response, ResponseError, StatusCode,
    response::Transport,
};
use crate::router::{RouteError, Router};
use crate::security::{GuardError, prevent_injection, prevent_injection_in};
use crate::session::{SessionError, SessionStore};

pub mod pages;

/// Route parameter carrying the error message into the error route.
pub const ERROR_PARAM: &str = "error";

/// Any failure that aborts a request.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Request(#[from] RequestError),

    #[error("failed to decode the request body: {0}")]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Guard(#[from] GuardError),

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error(transparent)]
    Response(#[from] ResponseError),
}

impl DispatchError {
    /// HTTP status the failure is rendered with: 404 for unresolvable
    /// routes and controllers, 500 otherwise.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Route(e) => e.status_code(),
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Process-wide state shared by every connection.
#[derive(Debug)]
pub struct Application {
    config: Config,
    router: Router,
    sessions: Arc<SessionStore>,
}

impl Application {
    /// Builds the application with an empty router.
    ///
    /// # Errors
    ///
    /// When the session store cannot be created (file mode with an
    /// unusable directory).
    pub fn new(config: Config) -> Result<Self, SessionError> {
        Self::with_router(config, Router::new())
    }

    /// Builds the application around an existing router, applying the
    /// configured direct call prefix, not-found route and debug flag to it.
    pub fn with_router(config: Config, mut router: Router) -> Result<Self, SessionError> {
        router.set_direct_action_prefix(config.direct_action_call_url_prefix.clone());
        router.set_not_found_route(config.not_found_route_name.clone());
        router.set_debug(config.debug);
        let sessions = Arc::new(config.session_store()?);
        Ok(Self {
            config,
            router,
            sessions,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Routes and controllers may only be changed before the application is shared.
    pub fn router_mut(&mut self) -> &mut Router {
        &mut self.router
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// A fresh response on `transport` carrying the configured headers.
    pub fn response(&self, transport: Transport) -> Response {
        let mut response = Response::new(transport);
        for (name, value) in &self.config.http_response_headers {
            // A fresh response is open; this cannot fail.
            let _ = response.set_header(name.as_str(), value.as_str());
        }
        response
    }

    /// Runs the full pipeline for one request and renders any failure.
    ///
    /// `body` is the outcome of receiving the request body.
    pub async fn handle(
        &self,
        request: &mut Request,
        response: &mut Response,
        body: Result<Bytes, RequestError>,
    ) {
        response.set_head_only(*request.method() == Method::Head);
        let outcome = match body {
            Ok(body) => self.dispatch(request, response, &body).await,
            Err(e) => Err(e.into()),
        };
        if let Err(error) = outcome {
            warn!(
                method = %request.method(),
                path = %request.path(),
                error = %error,
                "request failed"
            );
            self.render_error(request, response, &error).await;
        }
    }

    /// Decodes `body`, opens the session, guards the input, routes the
    /// request and writes the action's result.
    ///
    /// # Errors
    ///
    /// The first failing step, unrendered.
    pub async fn dispatch(
        &self,
        request: &mut Request,
        response: &mut Response,
        body: &[u8],
    ) -> Result<(), DispatchError> {
        if !body.is_empty() {
            request.parse_body(body)?;
        }
        self.sessions.open(request, response)?;
        prevent_injection_in(request.query())?;
        prevent_injection_in(request.form())?;
        if let Some(json) = request.json() {
            prevent_injection(json)?;
        }

        debug!(method = %request.method(), path = %request.path(), "dispatching request");
        let url = request.raw_url().to_owned();
        if let Some(content) = self.router.render_url(&url, request, response).await? {
            response.write(content).await?;
        }
        response.end().await?;
        Ok(())
    }

    /// Renders `error`: through the configured error route when there is
    /// one, else (or when that route fails too) with the built-in page.
    ///
    /// The built-in page shows the message and its causes only in debug
    /// mode. Write failures are logged, since the client is likely gone.
    pub async fn render_error(
        &self,
        request: &mut Request,
        response: &mut Response,
        error: &DispatchError,
    ) {
        response.set_status(error.status_code());

        if let Some(route) = &self.config.error_route_name {
            request
                .route_params_mut()
                .insert(ERROR_PARAM, error.to_string());
            match self.router.render_route(route, request, response).await {
                Ok(content) => {
                    if let Err(e) = self.finish(response, content).await {
                        debug!(error = %e, "failed to write the error route");
                    }
                    return;
                }
                Err(route_error) => {
                    warn!(route = %route, error = %route_error, "error route failed");
                    self.render_builtin_error(response, &route_error).await;
                    return;
                }
            }
        }
        self.render_builtin_error(response, error).await;
    }

    async fn render_builtin_error(
        &self,
        response: &mut Response,
        error: &(dyn std::error::Error + Send + Sync),
    ) {
        let content = if self.config.debug {
            let mut causes = Vec::new();
            let mut source = error.source();
            while let Some(cause) = source {
                causes.push(cause.to_string());
                source = cause.source();
            }
            if !response.headers_sent() {
                let _ = response.set_content_type(pages::HTML_CONTENT_TYPE);
            }
            Bytes::from(pages::error(&error.to_string(), &causes))
        } else {
            Bytes::from_static(pages::ERROR_TEXT.as_bytes())
        };
        if let Err(e) = self.finish(response, Some(content)).await {
            debug!(error = %e, "failed to write the error page");
        }
    }

    async fn finish(&self, response: &mut Response, content: Option<Bytes>) -> Result<(), ResponseError> {
        if let Some(content) = content {
            response.write(content).await?;
        }
        response.end().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{ActionResult, Controller};
    use crate::http::Headers;
    use crate::router::RouteItem;
    use crate::session::{SESSION_COOKIE_NAME, SessionMode};
    use async_trait::async_trait;
    use tokio::io::{AsyncReadExt, DuplexStream};

    /// Echoes its inputs; `boom` fails, `oops` reports the error parameter.
    struct Pages;

    #[async_trait]
    impl Controller for Pages {
        fn has_action(&self, name: &str) -> bool {
            matches!(name, "hello" | "boom" | "oops" | "count" | "json")
        }

        async fn execute_action(&self, name: &str, req: &mut Request, res: &mut Response) -> ActionResult {
            match name {
                "hello" => {
                    let who = req.form().get_str("name").unwrap_or("world").to_owned();
                    Ok(Some(Bytes::from(format!("hello {who}"))))
                }
                "boom" => Err("boom".into()),
                "json" => {
                    let body = req.json().map(ToString::to_string).unwrap_or_default();
                    Ok(Some(Bytes::from(format!("json {body}"))))
                }
                "oops" => {
                    res.set_status(StatusCode::INTERNAL_SERVER_ERROR);
                    let msg = req.route_params().get_str(ERROR_PARAM).unwrap_or_default().to_owned();
                    Ok(Some(Bytes::from(format!("sorry: {msg}"))))
                }
                "count" => {
                    let n = req.session().get_as::<u64>("n").unwrap_or(0) + 1;
                    req.session_mut().set("n", n);
                    Ok(Some(Bytes::from(n.to_string())))
                }
                _ => Ok(None),
            }
        }
    }

    fn app(config: Config) -> Application {
        let mut app = Application::new(config).unwrap();
        let router = app.router_mut();
        router.register_controller("Pages", || Box::new(Pages));
        router.register("hello", RouteItem::new("^/hello$", "Pages", "hello"));
        router.register("boom", RouteItem::new("^/boom$", "Pages", "boom"));
        router.register("oops", RouteItem::new("^$never", "Pages", "oops"));
        router.register("count", RouteItem::new("^/count$", "Pages", "count"));
        router.register("json", RouteItem::new("^/json$", "Pages", "json"));
        app
    }

    fn request(method: &str, url: &str, headers: &[(&str, &str)]) -> Request {
        let mut map = Headers::new();
        for (name, value) in headers {
            map.append(*name, *value);
        }
        Request::from_parts(method.parse().unwrap(), url.to_owned(), map, None)
    }

    async fn run(app: &Application, mut req: Request, body: Result<Bytes, RequestError>) -> (String, Request) {
        let (mut client, server): (DuplexStream, DuplexStream) = tokio::io::duplex(64 * 1024);
        let mut res = app.response(Box::new(server));
        app.handle(&mut req, &mut res, body).await;
        drop(res);
        let mut raw = String::new();
        client.read_to_string(&mut raw).await.unwrap();
        (raw, req)
    }

    #[tokio::test]
    async fn dispatches_form_posts() {
        let app = app(Config::default());
        let req = request(
            "POST",
            "/hello",
            &[("Content-Type", "application/x-www-form-urlencoded")],
        );
        let (raw, _) = run(&app, req, Ok(Bytes::from_static(b"name=ada"))).await;
        assert!(raw.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(raw.contains("X-Powered-By: rmvc\r\n"));
        assert!(raw.contains("hello ada"));
    }

    #[tokio::test]
    async fn guard_blocks_injected_query_before_the_action() {
        let app = app(Config::default());
        let req = request("GET", "/hello?q=%3Cscript%3E", &[]);
        let (raw, _) = run(&app, req, Ok(Bytes::new())).await;
        assert!(raw.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
        assert!(raw.contains(pages::ERROR_TEXT));
        assert!(!raw.contains("hello"));
    }

    #[tokio::test]
    async fn guard_scans_json_bodies_that_are_not_objects() {
        let app = app(Config::default());
        let headers = [("Content-Type", "application/json")];

        let req = request("POST", "/json", &headers);
        let body = Bytes::from_static(br#"["<script>alert(1)</script>"]"#);
        let (raw, _) = run(&app, req, Ok(body)).await;
        assert!(raw.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
        assert!(!raw.contains("json ["));

        let req = request("POST", "/json", &headers);
        let (raw, _) = run(&app, req, Ok(Bytes::from_static(b"\"{{ 7 * 7 }}\""))).await;
        assert!(raw.starts_with("HTTP/1.1 500"));

        let req = request("POST", "/json", &headers);
        let (raw, _) = run(&app, req, Ok(Bytes::from_static(br#"["fine", 2]"#))).await;
        assert!(raw.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(raw.contains(r#"json ["fine",2]"#));
    }

    #[tokio::test]
    async fn head_requests_get_headers_only() {
        let app = app(Config::default());
        let (raw, _) = run(&app, request("HEAD", "/hello", &[]), Ok(Bytes::new())).await;
        assert!(raw.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(!raw.contains("hello world"));
        assert!(!raw.contains("Transfer-Encoding"));
        assert!(raw.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn oversized_body_renders_an_error() {
        let app = app(Config::default());
        let req = request("POST", "/hello", &[]);
        let (raw, _) = run(&app, req, Err(RequestError::BodyTooLarge { max_bytes: 4 })).await;
        assert!(raw.starts_with("HTTP/1.1 500"));
    }

    #[tokio::test]
    async fn unknown_url_is_a_404() {
        let app = app(Config::default());
        let (raw, _) = run(&app, request("GET", "/nope", &[]), Ok(Bytes::new())).await;
        assert!(raw.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(raw.contains(pages::NOT_FOUND_TEXT));
    }

    #[tokio::test]
    async fn debug_error_page_shows_the_cause() {
        let app = app(Config {
            debug: true,
            ..Config::default()
        });
        let (raw, _) = run(&app, request("GET", "/boom", &[]), Ok(Bytes::new())).await;
        assert!(raw.starts_with("HTTP/1.1 500"));
        assert!(raw.contains("action failed: boom"));
        assert!(raw.contains("text/html; charset=utf-8"));
    }

    #[tokio::test]
    async fn error_route_receives_the_message() {
        let app = app(Config {
            error_route_name: Some("oops".to_owned()),
            ..Config::default()
        });
        let (raw, _) = run(&app, request("GET", "/boom", &[]), Ok(Bytes::new())).await;
        assert!(raw.starts_with("HTTP/1.1 500"));
        assert!(raw.contains("sorry: action failed: boom"));
    }

    #[tokio::test]
    async fn failing_error_route_falls_back_to_the_builtin_page() {
        let app = app(Config {
            error_route_name: Some("missing".to_owned()),
            ..Config::default()
        });
        let (raw, _) = run(&app, request("GET", "/boom", &[]), Ok(Bytes::new())).await;
        assert!(raw.starts_with("HTTP/1.1 500"));
        assert!(raw.contains(pages::ERROR_TEXT));
    }

    #[tokio::test]
    async fn sessions_survive_between_requests() {
        let app = app(Config {
            session_mode: SessionMode::Memory,
            ..Config::default()
        });

        let (raw, req) = run(&app, request("GET", "/count", &[]), Ok(Bytes::new())).await;
        assert!(raw.contains(&format!("Set-Cookie: {SESSION_COOKIE_NAME}=")));
        req.session().update().unwrap();
        let id = req.session().id().to_owned();

        let cookie = format!("{SESSION_COOKIE_NAME}={id}");
        let (raw, req) = run(
            &app,
            request("GET", "/count", &[("Cookie", cookie.as_str())]),
            Ok(Bytes::new()),
        )
        .await;
        assert_eq!(req.session().get_as::<u64>("n"), Some(2));
        assert!(raw.contains("\r\n1\r\n2\r\n"));
    }

    #[test]
    fn status_mapping() {
        let not_found = DispatchError::from(RouteError::ControllerNotFound {
            identifier: "X".into(),
        });
        assert_eq!(not_found.status_code(), StatusCode::NOT_FOUND);
        let denied = DispatchError::from(RouteError::DirectCallNotAllowed {
            identifier: "X".into(),
            action: "y".into(),
        });
        assert_eq!(denied.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            DispatchError::from(GuardError::InjectionDetected).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
