use async_trait::async_trait;
use http::StatusCode;
use log::debug;
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::{
    core::{RequestContext, SiteResult},
    pipeline::{Next, StageHandler},
};

use super::stage_config;

pub const STAGE_NAME: &str = "access";

#[derive(Debug, Deserialize)]
#[serde(default)]
struct AccessConfig {
    redirect: String,
    /// Session key holding the list of granted permissions
    permissions_key: String,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            redirect: "/login".to_string(),
            permissions_key: "permissions".to_string(),
        }
    }
}

/// Enforces the matched route's permission against the session.
///
/// A denied request is redirected and the chain stops here.
pub struct AccessStage;

fn granted(ctx: &RequestContext, key: &str, permission: &str) -> bool {
    ctx.session
        .as_ref()
        .and_then(|s| s.get(key))
        .and_then(|v| v.as_array())
        .is_some_and(|granted| granted.iter().any(|p| p.as_str() == Some(permission)))
}

#[async_trait]
impl StageHandler for AccessStage {
    async fn run(
        &self,
        ctx: &mut RequestContext,
        config: &JsonValue,
        next: Next<'_>,
    ) -> SiteResult<()> {
        let config: AccessConfig = stage_config(STAGE_NAME, config)?;

        let required = ctx
            .route
            .as_ref()
            .and_then(|m| m.route.permission.clone());
        if let Some(permission) = required {
            if !granted(ctx, &config.permissions_key, &permission) {
                debug!(
                    "Request {} lacks '{permission}', redirecting to {}",
                    ctx.request_id, config.redirect
                );
                ctx.response.redirect(StatusCode::FOUND, &config.redirect);
                return Ok(());
            }
        }
        next.run(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeMap, sync::Arc};

    use http::{header, Method};
    use serde_json::{json, Map as JsonMap};

    use super::*;
    use crate::{
        core::context::{MatchedRoute, Session},
        pipeline::{stages::terminal::TerminalStage, Outcome, Pipeline},
        router::Route,
    };

    fn request(permissions: JsonValue) -> RequestContext {
        let mut ctx = RequestContext::new(Method::GET, "/admin");
        ctx.route = Some(MatchedRoute {
            route: Arc::new(Route::new("admin", "/admin").with_permission("administer site")),
            params: BTreeMap::new(),
        });
        let mut data = JsonMap::new();
        data.insert("permissions".to_string(), permissions);
        ctx.session = Some(Session::new("s1", data, false));
        ctx
    }

    fn pipeline(config: JsonValue) -> Pipeline {
        let pipeline = Pipeline::new("admin");
        pipeline
            .add_state(STAGE_NAME, Arc::new(AccessStage), 500, config)
            .unwrap();
        pipeline
            .add_state("terminal", Arc::new(TerminalStage), 0, JsonValue::Null)
            .unwrap();
        pipeline
    }

    #[tokio::test]
    async fn test_denied_request_redirects() {
        let pipeline = pipeline(json!({"redirect": "/user/login"}));
        let mut ctx = request(json!(["access content"]));
        let outcome = pipeline.execute(&mut ctx).await;

        assert!(matches!(outcome, Outcome::ShortCircuited(ref s) if s == STAGE_NAME));
        assert_eq!(ctx.response.status, StatusCode::FOUND);
        assert_eq!(
            ctx.response.headers.get(header::LOCATION).unwrap(),
            "/user/login"
        );
    }

    #[tokio::test]
    async fn test_granted_request_continues() {
        let pipeline = pipeline(JsonValue::Null);
        let mut ctx = request(json!(["administer site"]));
        let outcome = pipeline.execute(&mut ctx).await;
        assert!(matches!(outcome, Outcome::Completed));
    }
}
