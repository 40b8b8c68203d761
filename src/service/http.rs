use std::sync::Arc;

use async_trait::async_trait;
use http::{Method, StatusCode};
use pingora::modules::http::{compression::ResponseCompressionBuilder, HttpModules};
use pingora_core::upstreams::peer::HttpPeer;
use pingora_error::{Error, ErrorType, Result};
use pingora_proxy::{ProxyHttp, Session};

use crate::{
    core::{context::SiteResponse, RequestContext, SiteContainer, SiteError},
    pipeline::Outcome,
    router::Router,
    utils::{
        request::{read_request_body, request_context},
        response::send_site_response,
    },
};

/// Request bodies above this size are refused
pub const DEFAULT_MAX_BODY: usize = 1 << 20;

/// Per-request bookkeeping kept for the logging phase
#[derive(Debug, Default)]
pub struct SiteCtx {
    pub request_id: Option<String>,
    pub execution_path: Option<String>,
    pub outcome: Option<&'static str>,
}

/// Site front end.
///
/// Every request is answered locally by dispatching it through the router's
/// execution paths; nothing is ever proxied upstream.
pub struct SiteService {
    router: Arc<Router>,
    max_body: usize,
}

impl SiteService {
    pub fn new(router: Arc<Router>) -> Self {
        Self {
            router,
            max_body: DEFAULT_MAX_BODY,
        }
    }

    pub fn with_max_body(mut self, max_body: usize) -> Self {
        self.max_body = max_body;
        self
    }

    /// Run a request through the router and leave the response in the context
    pub async fn serve(&self, ctx: &mut RequestContext) -> &'static str {
        match self.router.dispatch(ctx).await {
            Ok(Outcome::Completed) => "completed",
            Ok(Outcome::ShortCircuited(stage)) => {
                log::debug!("Request {} stopped at stage {stage}", ctx.request_id);
                "short_circuited"
            }
            Ok(Outcome::Failed(e)) => {
                log::warn!("Request {} failed: {e}", ctx.request_id);
                "failed"
            }
            Err(e) => {
                let status = e.status_code();
                ctx.response.text(
                    status,
                    format!(
                        "{} {}",
                        status.as_u16(),
                        status.canonical_reason().unwrap_or_default()
                    ),
                );
                "unrouted"
            }
        }
    }
}

#[async_trait]
impl ProxyHttp for SiteService {
    type CTX = SiteCtx;

    fn new_ctx(&self) -> Self::CTX {
        Self::CTX::default()
    }

    async fn upstream_peer(
        &self,
        _session: &mut Session,
        _ctx: &mut Self::CTX,
    ) -> Result<Box<HttpPeer>> {
        Err(Error::explain(
            ErrorType::InternalError,
            "site requests are served locally",
        ))
    }

    /// Compression is available but disabled unless a stage turns it on
    fn init_downstream_modules(&self, modules: &mut HttpModules) {
        modules.add_module(ResponseCompressionBuilder::enable(0));
    }

    async fn request_filter(&self, session: &mut Session, ctx: &mut Self::CTX) -> Result<bool> {
        let mut request = request_context(session.req_header());
        ctx.request_id = Some(request.request_id.clone());

        match read_request_body(session, self.max_body).await {
            Ok(body) => {
                request.body = body;
                ctx.outcome = Some(self.serve(&mut request).await);
            }
            Err(e) => {
                log::warn!("Request {} rejected: {e}", request.request_id);
                reject_body(&mut request.response, &e);
                ctx.outcome = Some("rejected");
            }
        }
        ctx.execution_path = request.execution_path.clone();

        let head_only = request.method == Method::HEAD;
        send_site_response(session, &request.response, head_only).await?;
        Ok(true)
    }

    async fn logging(&self, session: &mut Session, e: Option<&Error>, ctx: &mut Self::CTX) {
        let status = session
            .response_written()
            .map_or(0, |resp| resp.status.as_u16());
        let req = session.req_header();
        log::info!(
            "{} {} {} {} path={} outcome={}",
            ctx.request_id.as_deref().unwrap_or("-"),
            req.method,
            req.uri.path(),
            status,
            ctx.execution_path.as_deref().unwrap_or("-"),
            ctx.outcome.unwrap_or("-"),
        );
        if let Some(e) = e {
            log::error!("Request {} error: {e}", ctx.request_id.as_deref().unwrap_or("-"));
        }
    }
}

/// Answer a request whose body could not be read: oversize bodies get 413,
/// anything else (broken or aborted uploads) 400
fn reject_body(response: &mut SiteResponse, e: &SiteError) {
    let status = match e {
        SiteError::Validation(_) => StatusCode::PAYLOAD_TOO_LARGE,
        _ => StatusCode::BAD_REQUEST,
    };
    response.text(
        status,
        format!(
            "{} {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or_default()
        ),
    );
}

/// Build the front end around a configured container
pub fn build_http_service(container: &SiteContainer) -> SiteService {
    SiteService::new(container.router().clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Config, core::SiteContainer};

    fn container() -> SiteContainer {
        let container = SiteContainer::in_memory();
        let config =
            Config::from_yaml("listeners:\n  - address: 127.0.0.1:8080\nmodules:\n  core-pages:\n    start: true\n")
                .unwrap();
        container.configure(&config).unwrap();
        container
    }

    #[tokio::test]
    async fn test_serve_home() {
        let container = container();
        container.converge().await;
        let service = build_http_service(&container);

        let mut ctx = RequestContext::new(Method::GET, "/");
        assert_eq!(service.serve(&mut ctx).await, "completed");
        assert_eq!(ctx.response.status, StatusCode::OK);
        assert!(ctx.response.finished);
    }

    #[tokio::test]
    async fn test_unknown_page_is_not_found() {
        let container = container();
        container.converge().await;
        let service = build_http_service(&container);

        let mut ctx = RequestContext::new(Method::GET, "/missing");
        assert_eq!(service.serve(&mut ctx).await, "short_circuited");
        assert_eq!(ctx.response.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_body_errors() {
        let mut response = SiteResponse::default();
        reject_body(
            &mut response,
            &SiteError::Validation("request body exceeds 16 bytes".into()),
        );
        assert_eq!(response.status, StatusCode::PAYLOAD_TOO_LARGE);

        let mut response = SiteResponse::default();
        reject_body(
            &mut response,
            &SiteError::Internal("reading request body: connection reset".into()),
        );
        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert_eq!(&response.body[..], b"400 Bad Request");
    }

    #[tokio::test]
    async fn test_no_execution_path() {
        let service = SiteService::new(Arc::new(Router::new())).with_max_body(16);
        assert_eq!(service.max_body, 16);

        let mut ctx = RequestContext::new(Method::GET, "/");
        assert_eq!(service.serve(&mut ctx).await, "unrouted");
        assert_eq!(ctx.response.status, StatusCode::NOT_FOUND);
        assert_eq!(&ctx.response.body[..], b"404 Not Found");
    }
}
