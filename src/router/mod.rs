//! Request routing: map URL paths and HTTP methods to controller actions.
//!
//! The [`Router`] owns a table of named [`RouteItem`]s and the
//! [`ControllerRegistry`] they point into. Two URL shapes are understood:
//!
//! | URL                                  | Dispatches to                              |
//! |--------------------------------------|--------------------------------------------|
//! | `/blog/42` matching `^/blog/(?P<id>\d+)$` | the first route whose pattern and verb filter match |
//! | `/mvc/action/Blog/Posts.list`        | action `list` of controller `Blog/Posts`, if allow-listed |
//!
//! Routes are tried in registration order; the first match wins. Named
//! capture groups become route parameters, and route defaults fill in
//! whatever is still unbound.
//!
//! The router never renders error pages itself: every failure is returned
//! as a [`RouteError`] for the dispatcher to render.

use std::path::Path;
use std::sync::LazyLock;

use bytes::Bytes;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::app::pages;
use crate::config::ConfigError;
use crate::controller::{BoxError, Controller, ControllerRegistry};
use crate::http::{Request, Response, ResponseError, StatusCode};
use crate::security::{GuardError, prevent_injection_in};

mod route;

pub use route::{ANY_VERB, RouteItem};
use route::{CompiledRoute, RouteTable};

/// Default prefix of direct action call URLs.
pub const DEFAULT_DIRECT_ACTION_PREFIX: &str = "/mvc/action/";

/// `/Identifier/Of/Controller.method`; the identifier runs up to the last dot.
static DIRECT_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/(.+)\.([^./]+)$").expect("direct call pattern is valid")
});

/// What an action produced for the dispatcher to write.
pub type RenderResult = Result<Option<Bytes>, RouteError>;

/// Errors raised while resolving or running a route.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("unable to find the {name} route in the routes table")]
    RouteNotFound { name: String },

    #[error("no controller registered as {identifier}")]
    ControllerNotFound { identifier: String },

    #[error("the {identifier} controller doesn't contain the action {action}")]
    InvalidController { identifier: String, action: String },

    #[error("{url} doesn't match the direct action call format ({prefix}Identifier/Of/The/Controller.method)")]
    MalformedDirectCallUrl { url: String, prefix: String },

    #[error("the action {identifier}.{action} doesn't accept direct action calls")]
    DirectCallNotAllowed { identifier: String, action: String },

    #[error("route {name} has an invalid pattern: {source}")]
    InvalidPattern {
        name: String,
        #[source]
        source: regex::Error,
    },

    #[error(transparent)]
    Injection(#[from] GuardError),

    #[error("action failed: {0}")]
    Action(#[source] BoxError),

    #[error(transparent)]
    Response(#[from] ResponseError),
}

impl RouteError {
    /// Whether the failure means "nothing to serve here".
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::RouteNotFound { .. } | Self::ControllerNotFound { .. }
        )
    }

    /// HTTP status the error is rendered with.
    pub fn status_code(&self) -> StatusCode {
        if self.is_not_found() {
            StatusCode::NOT_FOUND
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Route table, controller registry and the URL conventions around them.
///
/// Populated before the server starts and only read afterwards.
///
/// # Examples
///
/// ```rust
/// use rmvc::router::{RouteItem, Router};
///
/// let mut router = Router::new();
/// router.register(
///     "post",
///     RouteItem::new(r"^/blog/(?P<id>\d+)$", "Blog/Posts", "show").verbs("GET"),
/// );
/// assert_eq!(router.len(), 1);
/// assert!(router.route("post").is_some());
/// ```
#[derive(Debug)]
pub struct Router {
    routes: Vec<CompiledRoute>,
    controllers: ControllerRegistry,
    direct_action_prefix: String,
    not_found_route: Option<String>,
    debug: bool,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        Self::with_controllers(ControllerRegistry::new())
    }

    pub fn with_controllers(controllers: ControllerRegistry) -> Self {
        Self {
            routes: Vec::new(),
            controllers,
            direct_action_prefix: DEFAULT_DIRECT_ACTION_PREFIX.to_owned(),
            not_found_route: None,
            debug: false,
        }
    }

    pub fn controllers(&self) -> &ControllerRegistry {
        &self.controllers
    }

    pub fn controllers_mut(&mut self) -> &mut ControllerRegistry {
        &mut self.controllers
    }

    /// Shorthand for `controllers_mut().register(..)`.
    pub fn register_controller<F>(&mut self, identifier: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Controller> + Send + Sync + 'static,
    {
        self.controllers.register(identifier, factory);
    }

    pub fn direct_action_prefix(&self) -> &str {
        &self.direct_action_prefix
    }

    pub fn set_direct_action_prefix(&mut self, prefix: impl Into<String>) {
        self.direct_action_prefix = prefix.into();
    }

    /// Route rendered (with status 404) when no route matches.
    pub fn set_not_found_route(&mut self, name: Option<String>) {
        self.not_found_route = name;
    }

    /// Verbose built-in pages.
    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    /// Inserts a route, or replaces the one with the same name in place.
    ///
    /// The pattern is compiled here, but a compile error only surfaces as
    /// [`RouteError::InvalidPattern`] when the route is tried.
    pub fn register(&mut self, name: impl Into<String>, item: RouteItem) {
        let route = CompiledRoute::new(name.into(), item);
        match self.routes.iter_mut().find(|r| r.name == route.name) {
            Some(existing) => *existing = route,
            None => self.routes.push(route),
        }
    }

    /// Registers every route of a JSON declaration document, in document order.
    ///
    /// Returns the number of routes read.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Json`] when the document is not a map of route declarations.
    pub fn load_routes_from_json(&mut self, json: &str) -> Result<usize, ConfigError> {
        let RouteTable(routes) = serde_json::from_str(json)?;
        let count = routes.len();
        for (name, item) in routes {
            self.register(name, item);
        }
        Ok(count)
    }

    /// Reads a JSON declaration file and registers its routes.
    pub fn load_routes_from_file(&mut self, path: impl AsRef<Path>) -> Result<usize, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        self.load_routes_from_json(&json)
    }

    pub fn route(&self, name: &str) -> Option<&RouteItem> {
        self.routes.iter().find(|r| r.name == name).map(|r| &r.item)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Runs the action bound to route `name`.
    ///
    /// # Errors
    ///
    /// [`RouteError::RouteNotFound`], [`RouteError::ControllerNotFound`],
    /// [`RouteError::InvalidController`], or the action's own failure.
    pub async fn render_route(
        &self,
        name: &str,
        request: &mut Request,
        response: &mut Response,
    ) -> RenderResult {
        let item = self.route(name).ok_or_else(|| RouteError::RouteNotFound {
            name: name.to_owned(),
        })?;
        item.apply_defaults(request.route_params_mut());

        let controller = self.resolve(&item.controller_identifier, &item.action)?;
        if controller
            .before_execute_action(request, response)
            .await
            .cancel_action_execution
        {
            return Ok(None);
        }
        controller
            .execute_action(&item.action, request, response)
            .await
            .map_err(RouteError::Action)
    }

    /// Routes `url` to an action and runs it.
    ///
    /// The query string is ignored. A URL under the direct action call prefix
    /// invokes `Identifier.action` directly; anything else goes through the
    /// route table, and then the not-found route or the built-in 404 body.
    pub async fn render_url(
        &self,
        url: &str,
        request: &mut Request,
        response: &mut Response,
    ) -> RenderResult {
        let path = url.split('?').next().unwrap_or_default();

        if let Some(rest) = path.strip_prefix(self.direct_action_prefix.as_str()) {
            return self.render_direct_call(path, rest, request, response).await;
        }

        for route in &self.routes {
            let regex = route.regex.as_ref().map_err(|e| RouteError::InvalidPattern {
                name: route.name.clone(),
                source: e.clone(),
            })?;
            let Some(captures) = regex.captures(path) else {
                continue;
            };
            if !route.item.allows(request.method()) {
                continue;
            }

            debug!(route = %route.name, path, "route matched");
            let params = request.route_params_mut();
            // A group that took no part in the match unbinds its key.
            for group in regex.capture_names().flatten() {
                let value = captures
                    .name(group)
                    .map_or(Value::Null, |m| Value::from(m.as_str()));
                params.insert(group, value);
            }
            prevent_injection_in(request.route_params())?;

            return self.render_route(&route.name, request, response).await;
        }

        response.set_status(StatusCode::NOT_FOUND);
        if let Some(name) = &self.not_found_route {
            request.route_params_mut().insert("url", path);
            return self.render_route(name, request, response).await;
        }
        if self.debug {
            response.set_content_type(pages::HTML_CONTENT_TYPE)?;
            return Ok(Some(pages::not_found(path).into()));
        }
        Ok(Some(Bytes::from_static(pages::NOT_FOUND_TEXT.as_bytes())))
    }

    async fn render_direct_call(
        &self,
        path: &str,
        rest: &str,
        request: &mut Request,
        response: &mut Response,
    ) -> RenderResult {
        let target = format!("/{rest}");
        let captures = DIRECT_CALL
            .captures(&target)
            .ok_or_else(|| RouteError::MalformedDirectCallUrl {
                url: path.to_owned(),
                prefix: self.direct_action_prefix.clone(),
            })?;
        let identifier = &captures[1];
        let action = &captures[2];

        let controller = self.resolve(identifier, action)?;
        if controller
            .before_execute_action(request, response)
            .await
            .cancel_action_execution
        {
            return Ok(None);
        }
        if !controller.is_direct_action_call_allowed(action) {
            return Err(RouteError::DirectCallNotAllowed {
                identifier: identifier.to_owned(),
                action: action.to_owned(),
            });
        }

        debug!(controller = identifier, action, "direct action call");
        controller
            .execute_action(action, request, response)
            .await
            .map_err(RouteError::Action)
    }

    fn resolve(&self, identifier: &str, action: &str) -> Result<Box<dyn Controller>, RouteError> {
        let controller = self.controllers.resolve(identifier)?;
        if !controller.has_action(action) {
            return Err(RouteError::InvalidController {
                identifier: identifier.to_owned(),
                action: action.to_owned(),
            });
        }
        Ok(controller)
    }
}
