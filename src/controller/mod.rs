//! Controllers: the capability the router dispatches to, and the registry
//! that builds them by identifier.
//!
//! A controller is created fresh for every dispatched action by a
//! zero-argument factory registered under an opaque identifier such as
//! `"Blog/Posts"`. Actions are looked up by name through an explicit table,
//! never by probing the controller at runtime.
//!
//! # Examples
//!
//! ```rust
//! use std::sync::LazyLock;
//!
//! use bytes::Bytes;
//! use rmvc::controller::{ActionResult, ActionTable, BoxFuture, Controller, ControllerRegistry};
//! use rmvc::http::{Request, Response};
//!
//! struct Hello;
//!
//! fn greet<'a>(_: &'a Hello, req: &'a mut Request, _: &'a mut Response) -> BoxFuture<'a, ActionResult> {
//!     Box::pin(async move {
//!         let who = req.route_params().get_str("name").unwrap_or("world").to_owned();
//!         Ok(Some(Bytes::from(format!("Hello, {who}!"))))
//!     })
//! }
//!
//! static ACTIONS: LazyLock<ActionTable<Hello>> =
//!     LazyLock::new(|| ActionTable::new().direct("greet", greet));
//!
//! #[async_trait::async_trait]
//! impl Controller for Hello {
//!     fn has_action(&self, name: &str) -> bool {
//!         ACTIONS.contains(name)
//!     }
//!
//!     fn is_direct_action_call_allowed(&self, name: &str) -> bool {
//!         ACTIONS.is_direct(name)
//!     }
//!
//!     async fn execute_action(&self, name: &str, req: &mut Request, res: &mut Response) -> ActionResult {
//!         ACTIONS.call(self, name, req, res).await
//!     }
//! }
//!
//! let mut registry = ControllerRegistry::new();
//! registry.register("Hello", || Box::new(Hello));
//! assert!(registry.resolve("Hello").is_ok());
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::http::{Request, Response};
use crate::router::RouteError;

/// Opaque error type returned by controller actions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A boxed, `Send` future borrowing from its arguments.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What an action produced: a body to write, or `None` when it wrote
/// directly to the response (or has nothing to say).
pub type ActionResult = Result<Option<Bytes>, BoxError>;

/// Outcome of the pre-action hook.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BeforeExecuteAction {
    /// Skip the action and return no content.
    pub cancel_action_execution: bool,
}

impl BeforeExecuteAction {
    pub fn proceed() -> Self {
        Self::default()
    }

    pub fn cancel() -> Self {
        Self {
            cancel_action_execution: true,
        }
    }
}

/// Capability every dispatch target must provide.
#[async_trait]
pub trait Controller: Send + Sync {
    /// Runs before any action. Returning [`BeforeExecuteAction::cancel`]
    /// short-circuits the dispatch, e.g. after issuing a redirect to a login page.
    async fn before_execute_action(
        &self,
        _request: &mut Request,
        _response: &mut Response,
    ) -> BeforeExecuteAction {
        BeforeExecuteAction::proceed()
    }

    /// Whether `name` may be reached through the direct action call URL.
    fn is_direct_action_call_allowed(&self, _name: &str) -> bool {
        false
    }

    /// Whether the controller exposes an action called `name`.
    fn has_action(&self, name: &str) -> bool;

    /// Invokes the action called `name`.
    async fn execute_action(
        &self,
        name: &str,
        request: &mut Request,
        response: &mut Response,
    ) -> ActionResult;
}

/// Typed pointer to an action of controller `C`.
pub type ActionFn<C> =
    for<'a> fn(&'a C, &'a mut Request, &'a mut Response) -> BoxFuture<'a, ActionResult>;

/// Registration-time table mapping action names to typed functions, with a
/// per-action allow-list for direct calls.
pub struct ActionTable<C> {
    actions: HashMap<&'static str, ActionFn<C>>,
    direct: HashSet<&'static str>,
}

impl<C> Default for ActionTable<C> {
    fn default() -> Self {
        Self {
            actions: HashMap::new(),
            direct: HashSet::new(),
        }
    }
}

impl<C> fmt::Debug for ActionTable<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionTable")
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .field("direct", &self.direct)
            .finish()
    }
}

impl<C> ActionTable<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an action reachable through routes only.
    #[must_use]
    pub fn action(mut self, name: &'static str, action: ActionFn<C>) -> Self {
        self.actions.insert(name, action);
        self
    }

    /// Registers an action that may also be invoked by direct action call.
    #[must_use]
    pub fn direct(mut self, name: &'static str, action: ActionFn<C>) -> Self {
        self.actions.insert(name, action);
        self.direct.insert(name);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    pub fn is_direct(&self, name: &str) -> bool {
        self.direct.contains(name)
    }

    /// Runs the action called `name` on `controller`.
    ///
    /// An unknown name yields an error result.
    pub async fn call(
        &self,
        controller: &C,
        name: &str,
        request: &mut Request,
        response: &mut Response,
    ) -> ActionResult {
        match self.actions.get(name) {
            Some(action) => action(controller, request, response).await,
            None => Err(format!("no action named {name}").into()),
        }
    }
}

/// Factory producing a fresh controller instance.
pub type ControllerFactory = Arc<dyn Fn() -> Box<dyn Controller> + Send + Sync>;

/// Maps controller identifiers to factories.
///
/// Populated before the server starts accepting connections and read-only
/// afterwards.
#[derive(Default, Clone)]
pub struct ControllerRegistry {
    factories: HashMap<String, ControllerFactory>,
}

impl fmt::Debug for ControllerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.factories.keys()).finish()
    }
}

impl ControllerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the factory for `identifier`.
    pub fn register<F>(&mut self, identifier: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Controller> + Send + Sync + 'static,
    {
        self.factories.insert(identifier.into(), Arc::new(factory));
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.factories.contains_key(identifier)
    }

    /// Builds a new instance of the controller registered as `identifier`.
    ///
    /// # Errors
    ///
    /// [`RouteError::ControllerNotFound`] when nothing is registered under it.
    pub fn resolve(&self, identifier: &str) -> Result<Box<dyn Controller>, RouteError> {
        self.factories
            .get(identifier)
            .map(|factory| factory())
            .ok_or_else(|| RouteError::ControllerNotFound {
                identifier: identifier.to_owned(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo {
        prefix: &'static str,
    }

    fn shout<'a>(c: &'a Echo, req: &'a mut Request, _: &'a mut Response) -> BoxFuture<'a, ActionResult> {
        Box::pin(async move { Ok(Some(Bytes::from(format!("{}{}", c.prefix, req.path())))) })
    }

    fn quiet<'a>(_: &'a Echo, _: &'a mut Request, _: &'a mut Response) -> BoxFuture<'a, ActionResult> {
        Box::pin(async move { Ok(None) })
    }

    fn table() -> ActionTable<Echo> {
        ActionTable::new().direct("shout", shout).action("quiet", quiet)
    }

    fn exchange() -> (Request, Response) {
        let (req, _) = Request::parse(b"GET /here HTTP/1.1\r\n\r\n", None).unwrap();
        let (_client, server) = tokio::io::duplex(64);
        (req, Response::new(Box::new(server)))
    }

    #[test]
    fn table_lookup_and_allow_list() {
        let t = table();
        assert!(t.contains("shout"));
        assert!(t.contains("quiet"));
        assert!(!t.contains("missing"));
        assert!(t.is_direct("shout"));
        assert!(!t.is_direct("quiet"));
    }

    #[tokio::test]
    async fn table_dispatches_by_name() {
        let t = table();
        let echo = Echo { prefix: "at " };
        let (mut req, mut res) = exchange();

        let body = t.call(&echo, "shout", &mut req, &mut res).await.unwrap();
        assert_eq!(body.as_deref(), Some(&b"at /here"[..]));
        assert!(t.call(&echo, "quiet", &mut req, &mut res).await.unwrap().is_none());
        assert!(t.call(&echo, "nope", &mut req, &mut res).await.is_err());
    }

    struct Bare;

    #[async_trait]
    impl Controller for Bare {
        fn has_action(&self, _name: &str) -> bool {
            false
        }

        async fn execute_action(&self, _: &str, _: &mut Request, _: &mut Response) -> ActionResult {
            Ok(None)
        }
    }

    #[test]
    fn registry_resolves_registered_identifiers() {
        let mut registry = ControllerRegistry::new();
        registry.register("Admin/Bare", || Box::new(Bare));

        assert!(registry.contains("Admin/Bare"));
        let controller = registry.resolve("Admin/Bare").unwrap();
        assert!(!controller.is_direct_action_call_allowed("anything"));

        match registry.resolve("Nope") {
            Err(RouteError::ControllerNotFound { identifier }) => assert_eq!(identifier, "Nope"),
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("expected ControllerNotFound"),
        }
    }
}
