//! # rmvc
//!
//! An async MVC request pipeline: regex routing to controller actions,
//! request body decoding, per-client sessions and HTTP/1.1 response framing.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use bytes::Bytes;
//! use rmvc::controller::{ActionResult, Controller};
//! use rmvc::{Application, Config, Request, Response, RouteItem, Server};
//!
//! struct Home;
//!
//! #[async_trait::async_trait]
//! impl Controller for Home {
//!     fn has_action(&self, name: &str) -> bool {
//!         name == "index"
//!     }
//!
//!     async fn execute_action(&self, _: &str, _: &mut Request, _: &mut Response) -> ActionResult {
//!         Ok(Some(Bytes::from_static(b"Hello, World!")))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let server = Server::bind(config.server_addr()).await?;
//!
//!     let mut app = Application::new(config)?;
//!     app.router_mut().register_controller("Home", || Box::new(Home));
//!     app.router_mut().register("home", RouteItem::new("^/$", "Home", "index"));
//!
//!     server.run(Arc::new(app)).await?;
//!     Ok(())
//! }
//! ```

pub mod app;
pub mod config;
pub mod controller;
pub mod http;
pub mod router;
pub mod security;
pub mod server;
pub mod session;

pub use app::{Application, DispatchError};
pub use config::{Config, ConfigError};
pub use controller::{Controller, ControllerRegistry};
pub use http::{Cookie, Headers, Method, PostedFile, Request, Response, StatusCode};
pub use router::{RouteError, RouteItem, Router};
pub use server::{Server, ServerError};
pub use session::{Session, SessionMode, SessionStore};
