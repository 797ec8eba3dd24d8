//! Loosely typed parameter maps: query string, form fields and route parameters.

use serde_json::{Map, Value};

/// A string-keyed map of JSON-like values.
///
/// Form-encoded sources produce strings, or arrays of strings when a key is
/// repeated. JSON bodies and route defaults may carry any [`Value`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Parameters {
    map: Map<String, Value>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `application/x-www-form-urlencoded` data.
    ///
    /// `+` and percent escapes are decoded; invalid UTF-8 is replaced. A key
    /// seen more than once collects its values into an array, in order.
    ///
    /// ```
    /// use rmvc::http::Parameters;
    ///
    /// let p = Parameters::from_urlencoded(b"q=rust+lang&tag=a&tag=b");
    /// assert_eq!(p.get_str("q"), Some("rust lang"));
    /// assert_eq!(p.get("tag").unwrap(), &serde_json::json!(["a", "b"]));
    /// ```
    pub fn from_urlencoded(input: &[u8]) -> Self {
        let mut params = Self::new();
        for (key, value) in url::form_urlencoded::parse(input) {
            params.append(key.into_owned(), value.into_owned());
        }
        params
    }

    fn append(&mut self, key: String, value: String) {
        match self.map.get_mut(&key) {
            Some(Value::Array(items)) => items.push(Value::String(value)),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, Value::String(value)]);
            }
            None => {
                self.map.insert(key, Value::String(value));
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.map.get(key)
    }

    /// Returns the value for `key` when it is a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.map.get(key).and_then(Value::as_str)
    }

    /// Inserts or overwrites `key`, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.map.insert(key.into(), value.into())
    }

    /// Inserts `value` only when `key` is absent or bound to `null`.
    ///
    /// Returns `true` when the value was written.
    pub fn insert_default(&mut self, key: &str, value: &Value) -> bool {
        match self.map.get(key) {
            Some(Value::Null) | None => {
                self.map.insert(key.to_owned(), value.clone());
                true
            }
            Some(_) => false,
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.map.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.map.iter()
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.map.values()
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.map
    }
}

impl From<Map<String, Value>> for Parameters {
    fn from(map: Map<String, Value>) -> Self {
        Self { map }
    }
}
