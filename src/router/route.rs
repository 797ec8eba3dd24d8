//! Route declarations and their compiled form.

use std::fmt;

use regex::Regex;
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::http::{Method, Parameters};

/// Verb filter accepting every method.
pub const ANY_VERB: &str = "*";

fn any_verb() -> String {
    ANY_VERB.to_owned()
}

/// One routing rule: a path pattern bound to a controller action.
///
/// Deserializes from the declaration format:
///
/// ```json
/// {
///   "pattern": "^/blog/(?P<id>\\d+)$",
///   "controllerIdentifier": "Blog/Posts",
///   "action": "show",
///   "httpVerbs": "GET,HEAD",
///   "defaultParameters": { "format": "html" }
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteItem {
    /// Regular expression tested against the URL path. Named groups become
    /// route parameters.
    pub pattern: String,
    /// Key into the controller registry.
    pub controller_identifier: String,
    /// Action name on the controller.
    pub action: String,
    /// Comma-separated allowed methods, or `*`.
    #[serde(default = "any_verb")]
    pub http_verbs: String,
    /// Fallback route parameters, applied only where no value is bound.
    #[serde(default)]
    pub default_parameters: Map<String, Value>,
}

impl RouteItem {
    pub fn new(
        pattern: impl Into<String>,
        controller_identifier: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            pattern: pattern.into(),
            controller_identifier: controller_identifier.into(),
            action: action.into(),
            http_verbs: any_verb(),
            default_parameters: Map::new(),
        }
    }

    #[must_use]
    pub fn verbs(mut self, http_verbs: impl Into<String>) -> Self {
        self.http_verbs = http_verbs.into();
        self
    }

    #[must_use]
    pub fn default_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.default_parameters.insert(key.into(), value.into());
        self
    }

    /// Whether `method` passes the verb filter.
    pub fn allows(&self, method: &Method) -> bool {
        let verbs = self.http_verbs.trim();
        verbs == ANY_VERB
            || verbs
                .split(',')
                .any(|verb| verb.trim().eq_ignore_ascii_case(method.as_str()))
    }

    /// Fills route parameters that are absent or null from the defaults.
    pub fn apply_defaults(&self, params: &mut Parameters) {
        for (key, value) in &self.default_parameters {
            params.insert_default(key, value);
        }
    }
}

/// A registered route with its pattern compiled once.
///
/// An invalid pattern is kept as its compile error and reported when the
/// route is tried.
#[derive(Debug)]
pub(crate) struct CompiledRoute {
    pub(crate) name: String,
    pub(crate) item: RouteItem,
    pub(crate) regex: Result<Regex, regex::Error>,
}

impl CompiledRoute {
    pub(crate) fn new(name: String, item: RouteItem) -> Self {
        let regex = Regex::new(&item.pattern);
        Self { name, item, regex }
    }
}

/// Route declarations in document order.
///
/// A plain map would lose the order of the declarations, and the order is
/// the match priority.
#[derive(Debug, Default)]
pub(crate) struct RouteTable(pub(crate) Vec<(String, RouteItem)>);

impl<'de> Deserialize<'de> for RouteTable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TableVisitor;

        impl<'de> Visitor<'de> for TableVisitor {
            type Value = RouteTable;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of route names to route declarations")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<RouteTable, A::Error> {
                let mut routes = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((name, item)) = access.next_entry::<String, RouteItem>()? {
                    routes.push((name, item));
                }
                Ok(RouteTable(routes))
            }
        }

        deserializer.deserialize_map(TableVisitor)
    }
}
