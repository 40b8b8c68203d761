use std::sync::Arc;

use async_trait::async_trait;
use http::StatusCode;
use log::debug;
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::{
    core::{ContentProvider, RequestContext, SiteResult},
    pipeline::{Next, StageHandler},
};

use super::stage_config;

pub const STAGE_NAME: &str = "content";

#[derive(Debug, Deserialize)]
#[serde(default)]
struct ContentConfig {
    collection: String,
    /// Route parameter naming the content key
    param: String,
    /// Item name the content is exposed under
    item: String,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            collection: "pages".to_string(),
            param: "alias".to_string(),
            item: "content".to_string(),
        }
    }
}

/// Loads the content addressed by the route and runs the route's handlers.
///
/// Routes without the configured parameter skip the fetch. A missing item
/// answers 404 and stops the chain, as does a handler that finishes the response.
pub struct ContentStage {
    content: Arc<dyn ContentProvider>,
}

impl ContentStage {
    pub fn new(content: Arc<dyn ContentProvider>) -> Self {
        Self { content }
    }
}

#[async_trait]
impl StageHandler for ContentStage {
    async fn run(
        &self,
        ctx: &mut RequestContext,
        config: &JsonValue,
        next: Next<'_>,
    ) -> SiteResult<()> {
        let config: ContentConfig = stage_config(STAGE_NAME, config)?;

        if let Some(key) = ctx.param(&config.param).map(str::to_string) {
            match self.content.fetch(&config.collection, &key).await? {
                Some(item) => ctx.set_item(config.item.clone(), item),
                None => {
                    debug!("No content {}/{key}", config.collection);
                    ctx.response.text(StatusCode::NOT_FOUND, "404 Not Found");
                    ctx.response.finished = true;
                    return Ok(());
                }
            }
        }

        let handlers = ctx
            .route
            .as_ref()
            .map(|m| m.route.handlers.clone())
            .unwrap_or_default();
        for handler in handlers {
            handler.handle(ctx).await?;
        }
        if ctx.response.finished {
            return Ok(());
        }

        next.run(ctx).await
    }
}
