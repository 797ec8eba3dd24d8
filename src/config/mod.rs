//! Application configuration, loaded from JSON.
//!
//! Every key is optional and uses camelCase:
//!
//! ```json
//! {
//!   "debug": true,
//!   "serverPort": 3000,
//!   "sessionMode": "file",
//!   "sessionFilePath": "~/var/sessions",
//!   "notFoundRouteName": "notFound",
//!   "httpResponseHeaders": { "X-Powered-By": "rmvc" }
//! }
//! ```
//!
//! Paths starting with `~/` are relative to `appRootPath` and paths starting
//! with `@/` to `webRootPath` (see [`Config::map_path`]). Text is always UTF-8.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::router::DEFAULT_DIRECT_ACTION_PREFIX;
use crate::session::{SessionError, SessionMode, SessionStore};

/// Errors raised while loading configuration or route declarations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration document: {0}")]
    Json(#[from] serde_json::Error),
}

/// Runtime settings shared by the router, session store and server.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub app_root_path: PathBuf,
    pub web_root_path: PathBuf,
    /// Verbose built-in error pages.
    pub debug: bool,
    pub direct_action_call_url_prefix: String,
    /// Route rendered (with status 500) when dispatch fails.
    pub error_route_name: Option<String>,
    /// Route rendered (with status 404) when no route matches.
    pub not_found_route_name: Option<String>,
    /// Headers added to every response.
    pub http_response_headers: BTreeMap<String, String>,
    /// Largest accepted request body, in bytes.
    pub post_max_size: usize,
    pub server_host: String,
    pub server_port: u16,
    pub session_mode: SessionMode,
    pub session_file_path: String,
    /// Seconds a session may stay untouched before collection.
    pub session_timeout: u64,
    /// Seconds between two garbage-collection sweeps.
    pub session_gc_interval: u64,
    /// Free-form settings for the application itself.
    pub app_settings: Value,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_root_path: PathBuf::from("./"),
            web_root_path: PathBuf::from("./"),
            debug: false,
            direct_action_call_url_prefix: DEFAULT_DIRECT_ACTION_PREFIX.to_owned(),
            error_route_name: None,
            not_found_route_name: None,
            http_response_headers: BTreeMap::from([(
                "X-Powered-By".to_owned(),
                "rmvc".to_owned(),
            )]),
            post_max_size: 20 * 1024 * 1024,
            server_host: "127.0.0.1".to_owned(),
            server_port: 8080,
            session_mode: SessionMode::Off,
            session_file_path: "/tmp".to_owned(),
            session_timeout: 7200,
            session_gc_interval: 60,
            app_settings: Value::Object(Default::default()),
        }
    }
}

impl Config {
    /// Parses a JSON document; missing keys keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// `host:port` to listen on.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout)
    }

    pub fn session_gc_interval(&self) -> Duration {
        Duration::from_secs(self.session_gc_interval.max(1))
    }

    /// Resolves `~/` against the application root and `@/` against the web
    /// root. The result is made absolute; other paths are only made absolute.
    ///
    /// ```
    /// use rmvc::config::Config;
    ///
    /// let config = Config {
    ///     app_root_path: "/srv/app".into(),
    ///     web_root_path: "/srv/app/public".into(),
    ///     ..Config::default()
    /// };
    /// assert_eq!(config.map_path("~/sessions"), std::path::Path::new("/srv/app/sessions"));
    /// assert_eq!(config.map_path("@/logo.png"), std::path::Path::new("/srv/app/public/logo.png"));
    /// assert_eq!(config.map_path("/etc/hosts"), std::path::Path::new("/etc/hosts"));
    /// ```
    pub fn map_path(&self, url: &str) -> PathBuf {
        let mapped = if let Some(rest) = url.strip_prefix("~/") {
            self.app_root_path.join(rest)
        } else if let Some(rest) = url.strip_prefix("@/") {
            self.web_root_path.join(rest)
        } else {
            PathBuf::from(url)
        };
        std::path::absolute(&mapped).unwrap_or(mapped)
    }

    /// Builds the session store for the configured mode.
    ///
    /// # Errors
    ///
    /// In file mode, when the session directory cannot be created.
    pub fn session_store(&self) -> Result<SessionStore, SessionError> {
        Ok(match self.session_mode {
            SessionMode::Off => SessionStore::off(),
            SessionMode::Memory => SessionStore::memory(self.session_timeout()),
            SessionMode::File => SessionStore::file(
                self.map_path(&self.session_file_path),
                self.session_timeout(),
            )?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_document_keeps_defaults() {
        let config = Config::from_json_str("{}").unwrap();
        assert!(!config.debug);
        assert_eq!(config.direct_action_call_url_prefix, "/mvc/action/");
        assert_eq!(config.post_max_size, 20_971_520);
        assert_eq!(config.server_addr(), "127.0.0.1:8080");
        assert_eq!(config.session_mode, SessionMode::Off);
        assert_eq!(config.session_timeout(), Duration::from_secs(7200));
        assert_eq!(
            config.http_response_headers.get("X-Powered-By").map(String::as_str),
            Some("rmvc")
        );
    }

    #[test]
    fn camel_case_keys() {
        let config = Config::from_json_str(
            r#"{
                "debug": true,
                "serverHost": "0.0.0.0",
                "serverPort": 3000,
                "sessionMode": "memory",
                "sessionTimeout": 60,
                "errorRouteName": "error",
                "httpResponseHeaders": {"X-Frame-Options": "DENY"},
                "appSettings": {"title": "Blog"}
            }"#,
        )
        .unwrap();
        assert!(config.debug);
        assert_eq!(config.server_addr(), "0.0.0.0:3000");
        assert_eq!(config.session_mode, SessionMode::Memory);
        assert_eq!(config.error_route_name.as_deref(), Some("error"));
        assert_eq!(config.http_response_headers.len(), 1);
        assert_eq!(config.app_settings, json!({"title": "Blog"}));
    }

    #[test]
    fn rejects_malformed_documents() {
        assert!(matches!(
            Config::from_json_str(r#"{"sessionMode": "redis"}"#),
            Err(ConfigError::Json(_))
        ));
        assert!(matches!(
            Config::from_json_file("/definitely/not/here.json"),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn file_sessions_are_created_under_the_app_root() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            app_root_path: dir.path().to_path_buf(),
            session_mode: SessionMode::File,
            session_file_path: "~/sessions".to_owned(),
            ..Config::default()
        };
        let store = config.session_store().unwrap();
        assert_eq!(store.mode(), SessionMode::File);
        assert!(dir.path().join("sessions").is_dir());
    }
}
