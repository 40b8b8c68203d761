//! Collaborator interfaces consumed by the core
//!
//! Storage, templating and sessions are provided from outside the core; stages
//! only ever talk to them through these traits.

use async_trait::async_trait;
use serde_json::{Map as JsonMap, Value as JsonValue};

use super::error::SiteResult;

/// Read access to stored content
#[async_trait]
pub trait ContentProvider: Send + Sync {
    /// Fetch one content item by collection and key
    async fn fetch(&self, collection: &str, key: &str) -> SiteResult<Option<JsonValue>>;

    /// List the keys stored in a collection
    async fn keys(&self, collection: &str) -> SiteResult<Vec<String>>;
}

/// Body produced by a renderer and the media type it must be served as
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub body: String,
    pub content_type: &'static str,
}

impl Rendered {
    pub const HTML: &'static str = "text/html; charset=utf-8";
    pub const JSON: &'static str = "application/json";

    pub fn html(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            content_type: Self::HTML,
        }
    }

    pub fn json(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            content_type: Self::JSON,
        }
    }
}

/// Turns a named template and its items into a response body.
///
/// Implementations own output encoding: values substituted into markup must
/// come out escaped.
#[async_trait]
pub trait TemplateRenderer: Send + Sync {
    async fn render(&self, template: &str, items: &JsonMap<String, JsonValue>)
        -> SiteResult<Rendered>;
}

/// Session persistence keyed by session id
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Load session data, `None` if the id is unknown or expired
    async fn load(&self, id: &str) -> SiteResult<Option<JsonMap<String, JsonValue>>>;

    async fn save(&self, id: &str, data: &JsonMap<String, JsonValue>) -> SiteResult<()>;

    async fn destroy(&self, id: &str) -> SiteResult<()>;
}
