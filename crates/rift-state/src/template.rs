//! Exchange data extraction and template rendering.
//!
//! Key expressions and payload templates are rendered against the matched
//! request and the finalized response of an exchange. Rendering is strict:
//! a placeholder that cannot be resolved is a [`StateError::Resolution`],
//! never an empty string or the literal placeholder text.
//!
//! # Supported Template Variables
//!
//! - `${request.method}`, `${request.path}`, `${request.body}`
//! - `${request.query.<name>}` - Query parameter value
//! - `${request.headers.<name>}` - Header value (case-insensitive)
//! - `${request.pathParams.<name>}` - Path parameter from route pattern
//! - `${request.pathSegments.<n>}` - Zero-based path segment (`/a/b` -> `a`, `b`)
//! - `${request.body.<jsonpath>}` - JSONPath into a JSON body (`${request.body.$.id}`)
//! - `${response.status}`, `${response.body}`, `${response.headers.<name>}`,
//!   `${response.body.<jsonpath>}`
//!
//! # Reading stored state
//!
//! [`ExchangeRenderer::render_with_state`] additionally resolves
//! `${context[<name>]}`, `${context[<name>].<field.path>}` and
//! `${context[<name>].<field.path>[<position>]}` against a context store.
//! Exchange placeholders inside the name are resolved first, so
//! `${context[order:${request.pathParams.id}].status}` works. A failed read
//! renders the read-error placeholder (`[state: {error}]` by default, with
//! `{error}` replaced by the error message) and is reported in
//! [`RenderedBody::failures`].
//!
//! # Example
//!
//! ```yaml
//! recordState:
//!   context: "order:${request.pathParams.id}"
//!   state:
//!     orderId: "${request.body.$.orderId}"
//! ```

use crate::error::{Result, StateError};
use crate::store::list::value_as_text;
use crate::store::{ContextStore, ListPosition};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_json_path::JsonPath;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Placeholder rendered for a failed state read unless configured otherwise.
pub const DEFAULT_READ_ERROR_PLACEHOLDER: &str = "[state: {error}]";

/// Regex for matching innermost template variables: `${...}` without nested braces
static PLACEHOLDER_REGEX: OnceLock<Regex> = OnceLock::new();

/// Regex for what follows the name of a context read: `.field.path[position]`
static CONTEXT_SUFFIX_REGEX: OnceLock<Regex> = OnceLock::new();

const CONTEXT_READ_OPEN: &str = "${context[";

fn get_placeholder_regex() -> &'static Regex {
    PLACEHOLDER_REGEX
        .get_or_init(|| Regex::new(r"\$\{([^{}]*)\}").expect("placeholder regex is valid"))
}

fn get_context_suffix_regex() -> &'static Regex {
    CONTEXT_SUFFIX_REGEX.get_or_init(|| {
        Regex::new(r"^(?:\.([^\[\]]+))?(?:\[([^\[\]]+)\])?$")
            .expect("context suffix regex is valid")
    })
}

/// Byte offset of the `}` closing the placeholder that `s` starts with,
/// skipping over nested `${...}` placeholders.
fn closing_brace(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut depth = 0usize;
    let mut i = 2;
    while i < bytes.len() {
        match bytes[i] {
            b'$' if bytes.get(i + 1) == Some(&b'{') => {
                depth += 1;
                i += 2;
                continue;
            }
            b'}' if depth == 0 => return Some(i),
            b'}' => depth -= 1,
            _ => {}
        }
        i += 1;
    }
    None
}

/// Split `name]rest` at the first `]` that is not inside a nested placeholder.
fn split_context_name(s: &str) -> Option<(&str, &str)> {
    let bytes = s.as_bytes();
    let mut depth = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'$' if bytes.get(i + 1) == Some(&b'{') => {
                depth += 1;
                i += 2;
                continue;
            }
            b'}' if depth > 0 => depth -= 1,
            b']' if depth == 0 => return Some((&s[..i], &s[i + 1..])),
            _ => {}
        }
        i += 1;
    }
    None
}

/// Parsed request data for template substitution
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestData {
    /// HTTP method (GET, POST, etc.)
    pub method: String,
    /// Request path (without query string)
    pub path: String,
    /// Query parameters parsed from the URL
    #[serde(default)]
    pub query: HashMap<String, String>,
    /// Request headers
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Path parameters extracted from route patterns (e.g., /users/:id)
    #[serde(default)]
    pub path_params: HashMap<String, String>,
    /// Raw request body
    #[serde(default)]
    pub body: String,
}

impl RequestData {
    /// Create RequestData from request components
    pub fn new<I, K, V>(
        method: &str,
        path: &str,
        query_string: Option<&str>,
        headers: I,
        body: Option<&str>,
    ) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        Self {
            method: method.to_string(),
            path: path.to_string(),
            query: parse_query_string(query_string),
            headers: headers
                .into_iter()
                .map(|(k, v)| (k.as_ref().to_lowercase(), v.into()))
                .collect(),
            path_params: HashMap::new(),
            body: body.unwrap_or("").to_string(),
        }
    }

    /// Extract path parameters from a route pattern
    ///
    /// # Example
    /// ```ignore
    /// let pattern = "/users/:id/posts/:post_id";
    /// let path = "/users/123/posts/456";
    /// // Returns: {"id": "123", "post_id": "456"}
    /// ```
    pub fn extract_path_params(&mut self, pattern: &str) {
        self.path_params.extend(extract_path_params(pattern, &self.path));
    }

    /// Builder-style path parameter
    pub fn with_path_param(mut self, name: &str, value: &str) -> Self {
        self.path_params.insert(name.to_string(), value.to_string());
        self
    }

    /// Header value, case-insensitive
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Non-empty path segments
    pub fn path_segments(&self) -> Vec<&str> {
        self.path.split('/').filter(|s| !s.is_empty()).collect()
    }

    /// Get a value by dotted path (e.g., "query.name", "headers.content-type")
    pub fn get(&self, path: &str) -> Option<String> {
        let parts: Vec<&str> = path.splitn(2, '.').collect();

        match parts.as_slice() {
            ["path"] => Some(self.path.clone()),
            ["method"] => Some(self.method.clone()),
            ["body"] => Some(self.body.clone()),
            ["query", name] => self.query.get(*name).cloned(),
            ["headers", name] => self.header(name).map(str::to_string),
            ["pathParams", name] | ["path_params", name] => self.path_params.get(*name).cloned(),
            ["pathSegments", index] => {
                let index = index.trim_start_matches('[').trim_end_matches(']');
                let index: usize = index.parse().ok()?;
                self.path_segments().get(index).map(|s| s.to_string())
            }
            ["body", json_path] => extract_json_path(&self.body, json_path),
            _ => None,
        }
    }
}

/// Finalized response data for template substitution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseData {
    #[serde(default = "default_status")]
    pub status: u16,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: String,
}

fn default_status() -> u16 {
    200
}

impl Default for ResponseData {
    fn default() -> Self {
        Self {
            status: default_status(),
            headers: HashMap::new(),
            body: String::new(),
        }
    }
}

impl ResponseData {
    pub fn new(status: u16, body: &str) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.to_string(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_lowercase(), value.to_string());
        self
    }

    pub fn get(&self, path: &str) -> Option<String> {
        let parts: Vec<&str> = path.splitn(2, '.').collect();

        match parts.as_slice() {
            ["status"] | ["statusCode"] => Some(self.status.to_string()),
            ["body"] => Some(self.body.clone()),
            ["headers", name] => find_header(&self.headers, name).map(str::to_string),
            ["body", json_path] => extract_json_path(&self.body, json_path),
            _ => None,
        }
    }
}

/// A matched request paired with the response produced for it
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Exchange {
    pub request: RequestData,
    #[serde(default)]
    pub response: ResponseData,
}

impl Exchange {
    pub fn new(request: RequestData, response: ResponseData) -> Self {
        Self { request, response }
    }

    /// Get a value by its placeholder path (`request.path`, `response.status`)
    pub fn get(&self, path: &str) -> Option<String> {
        match path.split_once('.') {
            Some(("request", rest)) => self.request.get(rest),
            Some(("response", rest)) => self.response.get(rest),
            _ => None,
        }
    }
}

fn find_header<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Evaluate a JSONPath expression against a JSON text, first match only
fn extract_json_path(json_str: &str, path: &str) -> Option<String> {
    if !path.starts_with('$') {
        return None;
    }
    let json: Value = serde_json::from_str(json_str).ok()?;
    let path = JsonPath::parse(path).ok()?;
    path.query(&json).first().map(value_as_text)
}

/// Parse query string into a HashMap
pub fn parse_query_string(query: Option<&str>) -> HashMap<String, String> {
    let mut params = HashMap::new();
    if let Some(q) = query {
        for pair in q.split('&') {
            if let Some((key, value)) = pair.split_once('=') {
                let decoded = urlencoding::decode(value).unwrap_or_default().to_string();
                params.insert(key.to_string(), decoded);
            } else if !pair.is_empty() {
                params.insert(pair.to_string(), String::new());
            }
        }
    }
    params
}

/// Extract path parameters from a route pattern and actual path
///
/// Supports patterns like:
/// - `/users/:id` - named parameter
/// - `/users/:id/posts/:post_id` - multiple parameters
fn extract_path_params(pattern: &str, path: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();

    let pattern_parts: Vec<&str> = pattern.split('/').collect();
    let path_parts: Vec<&str> = path.split('/').collect();

    if pattern_parts.len() != path_parts.len() {
        return params;
    }

    for (pattern_part, path_part) in pattern_parts.iter().zip(path_parts.iter()) {
        if let Some(param_name) = pattern_part.strip_prefix(':') {
            params.insert(param_name.to_string(), path_part.to_string());
        } else if pattern_part != path_part {
            // Pattern doesn't match
            return HashMap::new();
        }
    }

    params
}

/// Check if a string contains template variables
pub fn has_template_variables(s: &str) -> bool {
    get_placeholder_regex().is_match(s)
}

/// Renders key expressions and payload templates against an exchange.
///
/// Implementations must be deterministic for a given exchange and must fail
/// rather than emit placeholder text when a variable cannot be resolved.
pub trait TemplateRenderer: Send + Sync {
    fn render(&self, template: &str, exchange: &Exchange) -> Result<String>;

    /// Render every string in a JSON value, object keys included.
    fn render_value(&self, template: &Value, exchange: &Exchange) -> Result<Value> {
        match template {
            Value::String(s) => Ok(Value::String(self.render(s, exchange)?)),
            Value::Array(items) => items
                .iter()
                .map(|item| self.render_value(item, exchange))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            Value::Object(map) => {
                let mut rendered = serde_json::Map::with_capacity(map.len());
                for (key, value) in map {
                    rendered.insert(
                        self.render(key, exchange)?,
                        self.render_value(value, exchange)?,
                    );
                }
                Ok(Value::Object(rendered))
            }
            scalar => Ok(scalar.clone()),
        }
    }
}

/// Response body rendered with state reads
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedBody {
    pub body: String,
    /// Reads that failed and were rendered as the read-error placeholder
    pub failures: Vec<StateError>,
}

/// Default renderer for `${request.*}` / `${response.*}` placeholders
#[derive(Debug, Clone)]
pub struct ExchangeRenderer {
    read_error_placeholder: String,
}

impl Default for ExchangeRenderer {
    fn default() -> Self {
        Self::new(DEFAULT_READ_ERROR_PLACEHOLDER)
    }
}

impl ExchangeRenderer {
    pub fn new(read_error_placeholder: &str) -> Self {
        Self {
            read_error_placeholder: read_error_placeholder.to_string(),
        }
    }

    /// Text rendered in place of a failed state read.
    pub fn read_error_text(&self, err: &StateError) -> String {
        self.read_error_placeholder.replace("{error}", &err.to_string())
    }

    /// Render a response body, resolving context reads against `store`.
    ///
    /// Context reads are taken from the template only: text substituted from
    /// the exchange is never scanned for further reads. Exchange placeholders
    /// outside reads stay strict; failed or malformed reads render the
    /// read-error placeholder and are collected in `failures`.
    pub fn render_with_state(
        &self,
        template: &str,
        exchange: &Exchange,
        store: &dyn ContextStore,
    ) -> Result<RenderedBody> {
        let mut failures = Vec::new();
        let mut body = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find(CONTEXT_READ_OPEN) {
            body.push_str(&self.render(&rest[..start], exchange)?);
            let tail = &rest[start..];

            let (placeholder, read) = match closing_brace(tail) {
                Some(end) => {
                    rest = &tail[end + 1..];
                    let placeholder = &tail[..=end];
                    let inner = &tail[CONTEXT_READ_OPEN.len()..end];
                    (placeholder, self.read_context(placeholder, inner, exchange, store))
                }
                None => {
                    rest = "";
                    (
                        tail,
                        Err(StateError::resolution(tail, "unterminated context read")),
                    )
                }
            };

            match read {
                Ok(value) => body.push_str(&value_as_text(&value)),
                Err(err) => {
                    tracing::debug!("State read '{}' failed: {}", placeholder, err);
                    body.push_str(&self.read_error_text(&err));
                    failures.push(err);
                }
            }
        }
        body.push_str(&self.render(rest, exchange)?);

        Ok(RenderedBody { body, failures })
    }

    /// Resolve one `context[name].field[position]` read. `inner` is the text
    /// between `${context[` and the closing brace.
    fn read_context(
        &self,
        placeholder: &str,
        inner: &str,
        exchange: &Exchange,
        store: &dyn ContextStore,
    ) -> Result<Value> {
        let (name, suffix) = split_context_name(inner)
            .ok_or_else(|| StateError::resolution(placeholder, "context name is not closed"))?;
        let name = self.render(name, exchange)?;
        if name.trim().is_empty() {
            return Err(StateError::resolution(placeholder, "context name is empty"));
        }

        let suffix = self.render(suffix, exchange)?;
        let caps = get_context_suffix_regex().captures(&suffix).ok_or_else(|| {
            StateError::resolution(
                placeholder,
                "expected an optional field path followed by one list position",
            )
        })?;
        let field = caps.get(1).map(|m| m.as_str());
        match caps.get(2) {
            Some(position) => {
                let position = position.as_str().parse::<ListPosition>()?;
                store.lookup(&name, field, Some(&position))
            }
            None => store.lookup(&name, field, None),
        }
    }
}

impl TemplateRenderer for ExchangeRenderer {
    fn render(&self, template: &str, exchange: &Exchange) -> Result<String> {
        if template.contains(CONTEXT_READ_OPEN) {
            return Err(StateError::resolution(
                template,
                "context reads are only available when rendering response bodies",
            ));
        }

        let mut out = String::with_capacity(template.len());
        let mut last = 0;
        for caps in get_placeholder_regex().captures_iter(template) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            let var_path = &caps[1];
            out.push_str(&template[last..whole.start()]);
            let value = exchange.get(var_path).ok_or_else(|| {
                StateError::resolution(template, format!("no value for '{var_path}'"))
            })?;
            out.push_str(&value);
            last = whole.end();
        }
        out.push_str(&template[last..]);
        Ok(out)
    }
}
