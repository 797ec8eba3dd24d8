//! Input screening and request-forgery protection.
//!
//! - [`xss`]: recursive denylist scan of parameters before dispatch.
//! - [`csrf`]: session-backed anti-forgery tokens.
//!
//! Both are heuristics layered on top of proper output encoding, not a
//! replacement for it.

pub mod csrf;
pub mod xss;

pub use xss::{GuardError, escape_html, prevent_injection, prevent_injection_in};
