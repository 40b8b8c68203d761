use std::sync::Arc;

use async_trait::async_trait;
use http::StatusCode;
use log::debug;
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::{
    core::{RequestContext, SiteResult},
    pipeline::{Next, StageHandler},
    router::RouteTable,
};

use super::stage_config;

pub const STAGE_NAME: &str = "routing";

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RoutingConfig {
    /// Answer 404 and stop when nothing matches
    not_found: bool,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self { not_found: true }
    }
}

/// Resolves the request against the route table
pub struct RoutingStage {
    routes: Arc<RouteTable>,
}

impl RoutingStage {
    pub fn new(routes: Arc<RouteTable>) -> Self {
        Self { routes }
    }
}

#[async_trait]
impl StageHandler for RoutingStage {
    async fn run(
        &self,
        ctx: &mut RequestContext,
        config: &JsonValue,
        next: Next<'_>,
    ) -> SiteResult<()> {
        let config: RoutingConfig = stage_config(STAGE_NAME, config)?;

        match self.routes.match_route(&ctx.method, &ctx.path) {
            Some(matched) => {
                debug!("Request {} matched route {}", ctx.request_id, matched.route.name);
                if ctx.template.is_none() {
                    ctx.template = matched.route.template.clone();
                }
                ctx.route = Some(matched);
            }
            None if config.not_found => {
                ctx.response.text(StatusCode::NOT_FOUND, "404 Not Found");
                ctx.response.finished = true;
                return Ok(());
            }
            None => {}
        }
        next.run(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use http::Method;
    use serde_json::json;

    use super::*;
    use crate::{
        pipeline::{stages::terminal::TerminalStage, Outcome, Pipeline},
        router::Route,
    };

    fn pipeline(routes: Arc<RouteTable>, config: JsonValue) -> Pipeline {
        let pipeline = Pipeline::new("default");
        pipeline
            .add_state(STAGE_NAME, Arc::new(RoutingStage::new(routes)), 600, config)
            .unwrap();
        pipeline
            .add_state("terminal", Arc::new(TerminalStage), 0, JsonValue::Null)
            .unwrap();
        pipeline
    }

    #[tokio::test]
    async fn test_match_binds_route_and_template() {
        let routes = Arc::new(RouteTable::new());
        routes
            .add(Route::new("content", "/content/{alias}").with_template("content"))
            .unwrap();

        let pipeline = pipeline(routes, JsonValue::Null);
        let mut ctx = RequestContext::new(Method::GET, "/content/intro");
        pipeline.execute(&mut ctx).await;
        assert_eq!(ctx.param("alias"), Some("intro"));
        assert_eq!(ctx.template.as_deref(), Some("content"));
    }

    #[tokio::test]
    async fn test_unmatched_request() {
        let routes = Arc::new(RouteTable::new());
        let strict = pipeline(routes.clone(), JsonValue::Null);
        let mut ctx = RequestContext::new(Method::GET, "/nowhere");
        let outcome = strict.execute(&mut ctx).await;
        assert!(matches!(outcome, Outcome::ShortCircuited(ref s) if s == STAGE_NAME));
        assert_eq!(ctx.response.status, StatusCode::NOT_FOUND);

        let lenient = pipeline(routes, json!({"not_found": false}));
        let mut ctx = RequestContext::new(Method::GET, "/nowhere");
        let outcome = lenient.execute(&mut ctx).await;
        assert!(matches!(outcome, Outcome::Completed));
        assert!(ctx.route.is_none());
    }
}
