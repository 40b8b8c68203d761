use async_trait::async_trait;
use http::Method;
use serde_json::Value as JsonValue;

use crate::{
    core::{RequestContext, SiteResult},
    pipeline::{Next, StageHandler},
};

pub const STAGE_NAME: &str = "forms";

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Parses urlencoded request bodies into `RequestContext::forms`
pub struct FormsStage;

fn has_form_body(ctx: &RequestContext) -> bool {
    matches!(ctx.method, Method::POST | Method::PUT | Method::PATCH)
        && ctx
            .header(http::header::CONTENT_TYPE.as_str())
            .is_some_and(|ct| ct.starts_with(FORM_CONTENT_TYPE))
}

#[async_trait]
impl StageHandler for FormsStage {
    async fn run(
        &self,
        ctx: &mut RequestContext,
        _config: &JsonValue,
        next: Next<'_>,
    ) -> SiteResult<()> {
        if has_form_body(ctx) {
            let fields: Vec<(String, String)> = url::form_urlencoded::parse(&ctx.body)
                .into_owned()
                .collect();
            ctx.forms.extend(fields);
        }
        next.run(ctx).await
    }
}
