use std::sync::Arc;

use async_trait::async_trait;
use http::{Response, StatusCode};
use pingora::{
    apps::http_app::ServeHttp, protocols::http::ServerSession, services::listening::Service,
};
use serde::Serialize;

use crate::{
    config::Status,
    core::SiteContainer,
    graph::DependencyGraph,
    lifecycle::LifecycleOrchestrator,
    metrics,
    utils::response::{json_response, text_response},
};

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    /// Modules not yet at their target state
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pending: Vec<String>,
}

/// Introspection endpoints for the running site.
///
/// - `/status/ready`: 200 once every module sits at its target state, 503 otherwise
/// - `/status/modules`: lifecycle snapshot of every module
/// - `/status/components`: the dependency graph's components
/// - `/metrics`: prometheus text exposition
pub struct StatusHttpApp {
    lifecycle: Arc<LifecycleOrchestrator>,
    graph: Arc<DependencyGraph>,
}

impl StatusHttpApp {
    pub fn new(container: &SiteContainer) -> Self {
        Self {
            lifecycle: container.lifecycle().clone(),
            graph: container.graph().clone(),
        }
    }

    pub fn status_http_service(cfg: &Status, container: &SiteContainer) -> Service<Self> {
        let mut service = Service::new("Status HTTP".to_string(), Self::new(container));
        service.add_tcp(&cfg.address.to_string());
        service
    }

    /// Route a status request by path
    pub fn handle(&self, path: &str) -> Response<Vec<u8>> {
        match path {
            "/status/ready" => self.ready(),
            "/status/modules" => json_response(StatusCode::OK, &self.lifecycle.list_modules()),
            "/status/components" => json_response(StatusCode::OK, &self.graph.list_components()),
            "/metrics" => {
                let mut response = text_response(StatusCode::OK, &metrics::gather_text());
                response.headers_mut().insert(
                    http::header::CONTENT_TYPE,
                    http::HeaderValue::from_static("text/plain; version=0.0.4"),
                );
                response
            }
            _ => text_response(StatusCode::NOT_FOUND, "Not Found"),
        }
    }

    fn ready(&self) -> Response<Vec<u8>> {
        let pending: Vec<String> = self
            .lifecycle
            .list_modules()
            .into_iter()
            .filter(|m| m.state != m.target)
            .map(|m| m.name)
            .collect();

        if pending.is_empty() {
            json_response(
                StatusCode::OK,
                &ReadyResponse {
                    status: "ok",
                    pending,
                },
            )
        } else {
            json_response(
                StatusCode::SERVICE_UNAVAILABLE,
                &ReadyResponse {
                    status: "converging",
                    pending,
                },
            )
        }
    }
}

#[async_trait]
impl ServeHttp for StatusHttpApp {
    async fn response(&self, http_session: &mut ServerSession) -> Response<Vec<u8>> {
        http_session.set_keepalive(None);
        let path = http_session.req_header().uri.path().to_string();
        self.handle(&path)
    }
}
