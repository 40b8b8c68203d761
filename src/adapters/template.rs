use async_trait::async_trait;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::core::{Rendered, SiteError, SiteResult, TemplateRenderer};

// `{{ name }}` or `{{ content.title }}`
static PLACEHOLDER_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z0-9_]+(?:\.[A-Za-z0-9_]+)*)\s*\}\}")
        .expect("Invalid regex pattern for template placeholders")
});

/// Renderer that substitutes `{{ path }}` placeholders with item values.
///
/// Unknown templates fall back to a JSON dump of the items so that a site
/// without registered templates still produces a response.
#[derive(Default)]
pub struct SimpleTemplateRenderer {
    templates: DashMap<String, String>,
    strict: bool,
}

impl SimpleTemplateRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail on unknown templates instead of dumping items
    pub fn strict() -> Self {
        Self {
            templates: DashMap::new(),
            strict: true,
        }
    }

    pub fn register(&self, name: impl Into<String>, source: impl Into<String>) {
        self.templates.insert(name.into(), source.into());
    }

    fn substitute(source: &str, items: &JsonMap<String, JsonValue>) -> String {
        PLACEHOLDER_REGEX
            .replace_all(source, |caps: &Captures| {
                lookup(items, &caps[1])
                    .map(|value| escape_html(&display(value)))
                    .unwrap_or_default()
            })
            .into_owned()
    }
}

fn lookup<'a>(items: &'a JsonMap<String, JsonValue>, path: &str) -> Option<&'a JsonValue> {
    let mut parts = path.split('.');
    let mut current = items.get(parts.next()?)?;
    for part in parts {
        current = current.get(part)?;
    }
    Some(current)
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

fn display(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Null => String::new(),
        other => other.to_string(),
    }
}

#[async_trait]
impl TemplateRenderer for SimpleTemplateRenderer {
    async fn render(
        &self,
        template: &str,
        items: &JsonMap<String, JsonValue>,
    ) -> SiteResult<Rendered> {
        match self.templates.get(template) {
            Some(source) => Ok(Rendered::html(Self::substitute(source.value(), items))),
            None if self.strict => Err(SiteError::NotFound(format!("template '{template}'"))),
            None => Ok(Rendered::json(serde_json::to_string(items)?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn items() -> JsonMap<String, JsonValue> {
        let mut items = JsonMap::new();
        items.insert("title".into(), json!("Home"));
        items.insert("content".into(), json!({"body": "Welcome", "views": 3}));
        items
    }

    #[tokio::test]
    async fn test_substitution() {
        let renderer = SimpleTemplateRenderer::new();
        renderer.register("page", "<h1>{{ title }}</h1><p>{{content.body}}</p>{{content.views}}{{missing}}");
        let out = renderer.render("page", &items()).await.unwrap();
        assert_eq!(out, Rendered::html("<h1>Home</h1><p>Welcome</p>3"));
    }

    #[tokio::test]
    async fn test_values_are_escaped() {
        let renderer = SimpleTemplateRenderer::new();
        renderer.register("comment", "<p title=\"{{ who }}\">{{ body }}</p>");
        let mut items = JsonMap::new();
        items.insert("who".into(), json!("\"o'neil\""));
        items.insert("body".into(), json!("<script>x && y</script>"));

        let out = renderer.render("comment", &items).await.unwrap();
        assert_eq!(
            out.body,
            "<p title=\"&quot;o&#39;neil&quot;\">&lt;script&gt;x &amp;&amp; y&lt;/script&gt;</p>"
        );
    }

    #[tokio::test]
    async fn test_unknown_template() {
        let renderer = SimpleTemplateRenderer::new();
        let out = renderer.render("nope", &items()).await.unwrap();
        assert_eq!(out.content_type, Rendered::JSON);
        assert!(out.body.contains("\"title\":\"Home\""));

        let strict = SimpleTemplateRenderer::strict();
        assert!(matches!(
            strict.render("nope", &items()).await,
            Err(SiteError::NotFound(_))
        ));
    }
}
