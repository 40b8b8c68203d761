//! Built-in stage handlers
//!
//! Each handler captures the collaborators it needs when it is registered, so
//! one process can host several independent sites.

pub mod access;
pub mod content;
pub mod forms;
pub mod render;
pub mod routing;
pub mod session;
pub mod terminal;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use crate::{
    core::{ContentProvider, SessionProvider, SiteError, SiteResult, TemplateRenderer},
    router::RouteTable,
};

use super::StageRegistry;

/// Collaborators shared by the built-in stages
#[derive(Clone)]
pub struct StageServices {
    pub routes: Arc<RouteTable>,
    pub content: Arc<dyn ContentProvider>,
    pub templates: Arc<dyn TemplateRenderer>,
    pub sessions: Arc<dyn SessionProvider>,
}

/// Register every built-in stage under its conventional name
pub fn register_builtin_stages(registry: &mut StageRegistry, services: &StageServices) {
    registry.register(
        session::STAGE_NAME,
        Arc::new(session::SessionStage::new(services.sessions.clone())),
    ); // 700
    registry.register(
        routing::STAGE_NAME,
        Arc::new(routing::RoutingStage::new(services.routes.clone())),
    ); // 600
    registry.register(access::STAGE_NAME, Arc::new(access::AccessStage)); // 500
    registry.register(forms::STAGE_NAME, Arc::new(forms::FormsStage)); // 400
    registry.register(
        content::STAGE_NAME,
        Arc::new(content::ContentStage::new(services.content.clone())),
    ); // 300
    registry.register(
        render::STAGE_NAME,
        Arc::new(render::RenderStage::new(services.templates.clone())),
    ); // 100
    registry.register(terminal::STAGE_NAME, Arc::new(terminal::TerminalStage)); // 0
}

/// Decode a stage's config value, treating `null` as all defaults
pub(crate) fn stage_config<T: DeserializeOwned + Default>(
    stage: &str,
    config: &JsonValue,
) -> SiteResult<T> {
    if config.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(config.clone())
        .map_err(|e| SiteError::Pipeline(format!("stage '{stage}' config: {e}")))
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use http::{header, Method, StatusCode};
    use serde_json::json;

    use super::*;
    use crate::{
        adapters::{MemoryContentStore, MemorySessionStore, SimpleTemplateRenderer},
        core::{container::default_stages, RequestContext},
        pipeline::Outcome,
        router::{Route, RouteHandler},
    };

    struct Greet;

    #[async_trait]
    impl RouteHandler for Greet {
        async fn handle(&self, ctx: &mut RequestContext) -> SiteResult<()> {
            let name = ctx.forms.get("name").cloned().unwrap_or_default();
            ctx.set_item("name", json!(name));
            Ok(())
        }
    }

    #[derive(Debug, Default, serde::Deserialize)]
    #[serde(default)]
    struct Sample {
        limit: u32,
    }

    #[test]
    fn test_stage_config_defaults() {
        let sample: Sample = stage_config("sample", &JsonValue::Null).unwrap();
        assert_eq!(sample.limit, 0);
        let sample: Sample = stage_config("sample", &json!({"limit": 3})).unwrap();
        assert_eq!(sample.limit, 3);
        assert!(matches!(
            stage_config::<Sample>("sample", &json!({"limit": "many"})),
            Err(SiteError::Pipeline(_))
        ));
    }

    #[tokio::test]
    async fn test_builtin_stages_serve_a_form_post() {
        let templates = Arc::new(SimpleTemplateRenderer::new());
        templates.register("greeting", "<h1>Hello {{ name }}</h1>");
        let services = StageServices {
            routes: Arc::new(RouteTable::new()),
            content: Arc::new(MemoryContentStore::new()),
            templates,
            sessions: Arc::new(MemorySessionStore::new()),
        };
        services
            .routes
            .add(
                Route::new("greet", "/greet")
                    .with_methods([Method::POST])
                    .with_handler(Arc::new(Greet))
                    .with_template("greeting"),
            )
            .unwrap();

        let mut registry = StageRegistry::new();
        register_builtin_stages(&mut registry, &services);
        assert_eq!(registry.names().len(), 7);
        let pipeline = registry.build("default", &default_stages()).unwrap();

        let mut ctx = RequestContext::new(Method::POST, "/greet")
            .with_header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .with_body("name=Ada+Lovelace");
        let outcome = pipeline.execute(&mut ctx).await;

        assert!(matches!(outcome, Outcome::Completed));
        assert_eq!(ctx.response.status, StatusCode::OK);
        assert_eq!(&ctx.response.body[..], b"<h1>Hello Ada Lovelace</h1>");
        assert!(ctx.response.finished);

        let mut ctx = RequestContext::new(Method::GET, "/greet");
        let outcome = pipeline.execute(&mut ctx).await;
        assert!(matches!(outcome, Outcome::ShortCircuited(ref stage) if stage == "routing"));
        assert_eq!(ctx.response.status, StatusCode::NOT_FOUND);
    }
}
