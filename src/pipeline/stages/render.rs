use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::{
    core::{RequestContext, SiteResult, TemplateRenderer},
    pipeline::{Next, StageHandler},
};

use super::stage_config;

pub const STAGE_NAME: &str = "render";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RenderConfig {
    /// Template used when no route picked one
    template: Option<String>,
}

/// Renders the selected template when no earlier stage produced a body
pub struct RenderStage {
    templates: Arc<dyn TemplateRenderer>,
}

impl RenderStage {
    pub fn new(templates: Arc<dyn TemplateRenderer>) -> Self {
        Self { templates }
    }
}

#[async_trait]
impl StageHandler for RenderStage {
    async fn run(
        &self,
        ctx: &mut RequestContext,
        config: &JsonValue,
        next: Next<'_>,
    ) -> SiteResult<()> {
        let config: RenderConfig = stage_config(STAGE_NAME, config)?;

        if ctx.response.is_empty() && !ctx.response.finished {
            if let Some(template) = ctx.template.clone().or(config.template) {
                let rendered = self.templates.render(&template, ctx.items()).await?;
                let status = ctx.response.status;
                ctx.response
                    .content(status, rendered.content_type, rendered.body);
            }
        }
        next.run(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use http::{header, Method, StatusCode};
    use serde_json::json;

    use super::*;
    use crate::{
        adapters::SimpleTemplateRenderer,
        core::SiteError,
        pipeline::{Outcome, Pipeline},
    };

    fn pipeline(renderer: SimpleTemplateRenderer, config: JsonValue) -> Pipeline {
        let pipeline = Pipeline::new("default");
        pipeline
            .add_state(STAGE_NAME, Arc::new(RenderStage::new(Arc::new(renderer))), 100, config)
            .unwrap();
        pipeline
    }

    #[tokio::test]
    async fn test_renders_route_template() {
        let renderer = SimpleTemplateRenderer::new();
        renderer.register("page", "<h1>{{ content.title }}</h1>");

        let mut ctx = RequestContext::new(Method::GET, "/");
        ctx.template = Some("page".to_string());
        ctx.set_item("content", json!({"title": "Intro"}));
        pipeline(renderer, JsonValue::Null).execute(&mut ctx).await;

        assert_eq!(ctx.response.status, StatusCode::OK);
        assert_eq!(ctx.response.body.as_ref(), b"<h1>Intro</h1>");
        assert_eq!(
            ctx.response.headers.get(header::CONTENT_TYPE).unwrap(),
            "text/html; charset=utf-8"
        );
    }

    #[tokio::test]
    async fn test_request_data_is_escaped() {
        let renderer = SimpleTemplateRenderer::new();
        renderer.register("greet", "<h1>Hello {{ name }}</h1>");

        let mut ctx = RequestContext::new(Method::POST, "/");
        ctx.template = Some("greet".to_string());
        ctx.set_item("name", json!("<script>alert(1)</script>"));
        pipeline(renderer, JsonValue::Null).execute(&mut ctx).await;

        let body = std::str::from_utf8(&ctx.response.body).unwrap();
        assert_eq!(body, "<h1>Hello &lt;script&gt;alert(1)&lt;/script&gt;</h1>");
    }

    #[tokio::test]
    async fn test_unknown_template_served_as_json() {
        let mut ctx = RequestContext::new(Method::GET, "/");
        ctx.template = Some("missing".to_string());
        ctx.set_item("name", json!("<b>"));
        pipeline(SimpleTemplateRenderer::new(), JsonValue::Null)
            .execute(&mut ctx)
            .await;

        assert_eq!(
            ctx.response.headers.get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        let body: JsonValue = serde_json::from_slice(&ctx.response.body).unwrap();
        assert_eq!(body["name"], json!("<b>"));
    }

    #[tokio::test]
    async fn test_config_template_and_existing_body() {
        let renderer = SimpleTemplateRenderer::new();
        renderer.register("fallback", "fallback");
        let pipeline = pipeline(renderer, json!({"template": "fallback"}));

        let mut ctx = RequestContext::new(Method::GET, "/");
        pipeline.execute(&mut ctx).await;
        assert_eq!(ctx.response.body.as_ref(), b"fallback");

        let mut ctx = RequestContext::new(Method::GET, "/");
        ctx.response.text(StatusCode::OK, "already");
        pipeline.execute(&mut ctx).await;
        assert_eq!(ctx.response.body.as_ref(), b"already");
    }

    #[tokio::test]
    async fn test_render_failure_reaches_error_handler() {
        let mut ctx = RequestContext::new(Method::GET, "/");
        ctx.template = Some("missing".to_string());
        let outcome = pipeline(SimpleTemplateRenderer::strict(), JsonValue::Null)
            .execute(&mut ctx)
            .await;
        assert!(matches!(outcome, Outcome::Failed(SiteError::NotFound(_))));
        assert_eq!(ctx.response.status, StatusCode::NOT_FOUND);
    }
}
