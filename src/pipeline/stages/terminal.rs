use async_trait::async_trait;
use http::{HeaderValue, StatusCode};
use serde_json::Value as JsonValue;

use crate::{
    core::{RequestContext, SiteResult},
    pipeline::{Next, StageHandler},
};

pub const STAGE_NAME: &str = "terminal";

/// Last stage of every path: finalises the response and never continues
pub struct TerminalStage;

#[async_trait]
impl StageHandler for TerminalStage {
    async fn run(
        &self,
        ctx: &mut RequestContext,
        _config: &JsonValue,
        _next: Next<'_>,
    ) -> SiteResult<()> {
        if ctx.response.is_empty() && !ctx.response.finished {
            ctx.response.text(StatusCode::NOT_FOUND, "404 Not Found");
        }
        if let Ok(value) = HeaderValue::from_str(&ctx.request_id) {
            ctx.response.headers.insert("x-request-id", value);
        }
        ctx.response.finished = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use http::Method;

    use super::*;
    use crate::pipeline::{Outcome, Pipeline};

    #[tokio::test]
    async fn test_empty_response_becomes_not_found() {
        let pipeline = Pipeline::new("default");
        pipeline
            .add_state(STAGE_NAME, Arc::new(TerminalStage), 0, JsonValue::Null)
            .unwrap();

        let mut ctx = RequestContext::new(Method::GET, "/");
        let outcome = pipeline.execute(&mut ctx).await;
        assert!(matches!(outcome, Outcome::Completed));
        assert_eq!(ctx.response.status, StatusCode::NOT_FOUND);
        assert!(ctx.response.finished);
        assert!(ctx.response.headers.contains_key("x-request-id"));

        let mut ctx = RequestContext::new(Method::GET, "/");
        ctx.response.text(StatusCode::OK, "hi");
        pipeline.execute(&mut ctx).await;
        assert_eq!(ctx.response.status, StatusCode::OK);
    }
}
