//! Request context management
//!
//! This module provides the RequestContext that holds per-request state while a
//! request is threaded through an execution path.

use std::{
    any::Any,
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Instant,
};

use bytes::Bytes;
use http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::router::Route;

/// Session bound to a request by the session stage
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub id: String,
    pub data: JsonMap<String, JsonValue>,
    /// Created for this request rather than loaded from the provider
    pub is_new: bool,
    dirty: bool,
}

impl Session {
    pub fn new(id: impl Into<String>, data: JsonMap<String, JsonValue>, is_new: bool) -> Self {
        Self {
            id: id.into(),
            data,
            is_new,
            dirty: is_new,
        }
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.data.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: JsonValue) {
        self.data.insert(key.into(), value);
        self.dirty = true;
    }

    pub fn remove(&mut self, key: &str) -> Option<JsonValue> {
        let removed = self.data.remove(key);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    /// Whether the session changed and must be written back
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }
}

/// Route matched by the routing stage, with its extracted parameters
#[derive(Clone)]
pub struct MatchedRoute {
    pub route: Arc<Route>,
    pub params: BTreeMap<String, String>,
}

/// Response under construction
#[derive(Debug, Clone)]
pub struct SiteResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Set once a stage has fully produced the response
    pub finished: bool,
}

impl Default for SiteResponse {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            finished: false,
        }
    }
}

impl SiteResponse {
    /// Replace the response with a redirect to `location`
    pub fn redirect(&mut self, status: StatusCode, location: &str) {
        self.status = status;
        self.body = Bytes::new();
        if let Ok(value) = HeaderValue::from_str(location) {
            self.headers.insert(header::LOCATION, value);
        } else {
            log::warn!("Ignoring invalid redirect location: {location}");
        }
        self.finished = true;
    }

    /// Replace the response body and its content type
    pub fn content(&mut self, status: StatusCode, content_type: &'static str, body: impl Into<String>) {
        self.status = status;
        self.body = Bytes::from(body.into());
        self.headers
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    }

    /// Replace the response body with plain text
    pub fn text(&mut self, status: StatusCode, body: impl Into<String>) {
        self.content(status, "text/plain; charset=utf-8", body);
    }

    /// Replace the response body with HTML
    pub fn html(&mut self, status: StatusCode, body: impl Into<String>) {
        self.content(status, "text/html; charset=utf-8", body);
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty() && !self.headers.contains_key(header::LOCATION)
    }
}

/// Per-request state shared by every stage of an execution path
pub struct RequestContext {
    /// Unique id for log correlation
    pub request_id: String,
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,

    /// Name of the execution path serving this request
    pub execution_path: Option<String>,
    pub route: Option<MatchedRoute>,
    pub session: Option<Session>,
    /// Parsed form fields
    pub forms: BTreeMap<String, String>,
    /// Template selected for the render stage
    pub template: Option<String>,
    pub response: SiteResponse,
    pub request_start: Instant,

    /// Values handed to templates
    items: JsonMap<String, JsonValue>,
    /// Typed values for stages (type-erased, thread-safe)
    vars: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new(Method::GET, "/")
    }
}

impl RequestContext {
    /// Create a context for a request line; the query string is split off the path
    pub fn new(method: Method, uri: &str) -> Self {
        let (path, query) = match uri.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (uri.to_string(), None),
        };

        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            method,
            path: if path.is_empty() { "/".to_string() } else { path },
            query,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            execution_path: None,
            route: None,
            session: None,
            forms: BTreeMap::new(),
            template: None,
            response: SiteResponse::default(),
            request_start: Instant::now(),
            items: JsonMap::new(),
            vars: HashMap::new(),
        }
    }

    pub fn with_header(mut self, name: header::HeaderName, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.append(name, value);
        }
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Get a request header as a string
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Find a cookie value in the `Cookie` header
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .find_map(|pair| {
                let (k, v) = pair.split_once('=')?;
                (k.trim() == name).then(|| v.trim())
            })
    }

    /// Get a path parameter extracted by the routing stage
    pub fn param(&self, name: &str) -> Option<&str> {
        self.route
            .as_ref()
            .and_then(|m| m.params.get(name))
            .map(|s| s.as_str())
    }

    /// Store a template-visible item
    pub fn set_item(&mut self, key: impl Into<String>, value: JsonValue) {
        self.items.insert(key.into(), value);
    }

    pub fn item(&self, key: &str) -> Option<&JsonValue> {
        self.items.get(key)
    }

    pub fn items(&self) -> &JsonMap<String, JsonValue> {
        &self.items
    }

    /// Store a typed value into the context
    pub fn set<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.vars.insert(key.into(), Box::new(value));
    }

    /// Get a typed reference from the context
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.vars.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    /// Get a string slice if the stored value is a `String`
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get::<String>(key).map(|s| s.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Box<dyn Any + Send + Sync>> {
        self.vars.remove(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_split() {
        let ctx = RequestContext::new(Method::GET, "/content/about?draft=1");
        assert_eq!(ctx.path, "/content/about");
        assert_eq!(ctx.query.as_deref(), Some("draft=1"));

        let ctx = RequestContext::new(Method::GET, "");
        assert_eq!(ctx.path, "/");
    }

    #[test]
    fn test_typed_vars() {
        let mut ctx = RequestContext::default();
        ctx.set("test_key", "test_value".to_string());
        ctx.set("count", 3usize);
        assert_eq!(ctx.get_str("test_key"), Some("test_value"));
        assert_eq!(ctx.get::<usize>("count"), Some(&3));
        assert!(ctx.get::<u8>("count").is_none());

        assert!(ctx.remove("test_key").is_some());
        assert!(!ctx.contains("test_key"));
    }

    #[test]
    fn test_cookies() {
        let ctx = RequestContext::default()
            .with_header(header::COOKIE, "theme=dark; folio.sid=abc123")
            .with_header(header::COOKIE, "other=1");
        assert_eq!(ctx.cookie("folio.sid"), Some("abc123"));
        assert_eq!(ctx.cookie("other"), Some("1"));
        assert_eq!(ctx.cookie("missing"), None);
    }

    #[test]
    fn test_items_and_session() {
        let mut ctx = RequestContext::default();
        ctx.set_item("title", json!("Home"));
        assert_eq!(ctx.item("title"), Some(&json!("Home")));

        let mut session = Session::new("s1", JsonMap::new(), false);
        assert!(!session.is_dirty());
        session.insert("user", json!("ada"));
        assert!(session.is_dirty());
        session.mark_clean();
        assert!(session.remove("missing").is_none());
        assert!(!session.is_dirty());
    }

    #[test]
    fn test_redirect_response() {
        let mut response = SiteResponse::default();
        assert!(response.is_empty());
        response.redirect(StatusCode::FOUND, "/login");
        assert!(response.finished);
        assert!(!response.is_empty());
        assert_eq!(response.headers.get(header::LOCATION).unwrap(), "/login");
    }
}
