use std::sync::Arc;

use async_trait::async_trait;
use http::Method;
use log::info;
use serde_json::Value as JsonValue;

use crate::{
    core::{RequestContext, SiteError, SiteResult},
    lifecycle::{config_str, ModuleContext, ModuleDescriptor, ModuleHandler},
    router::{Route, RouteHandler, RouteTable},
};

pub const MODULE_NAME: &str = "core-pages";

const HOME_ROUTE: &str = "home";

/// Exposes the site title to the home template
struct HomePage {
    title: String,
}

#[async_trait]
impl RouteHandler for HomePage {
    async fn handle(&self, ctx: &mut RequestContext) -> SiteResult<()> {
        ctx.set_item("title", JsonValue::from(self.title.as_str()));
        Ok(())
    }
}

/// Mounts the front page
pub struct CorePages {
    routes: Arc<RouteTable>,
}

impl CorePages {
    pub fn new(routes: Arc<RouteTable>) -> Self {
        Self { routes }
    }
}

#[async_trait]
impl ModuleHandler for CorePages {
    async fn initialise(&self, module: &ModuleContext<'_>) -> SiteResult<()> {
        match module.config.get("title") {
            None | Some(JsonValue::String(_)) => Ok(()),
            Some(other) => Err(SiteError::Validation(format!(
                "{}: title must be a string, got {other}",
                module.name
            ))),
        }
    }

    async fn start(&self, module: &ModuleContext<'_>) -> SiteResult<()> {
        let title = config_str(module.config, "title").unwrap_or("Home").to_string();
        let template = config_str(module.config, "template").unwrap_or("home");
        self.routes.add(
            Route::new(HOME_ROUTE, "/")
                .with_methods([Method::GET])
                .with_template(template)
                .with_handler(Arc::new(HomePage { title })),
        )?;
        info!("{} mounted /", module.name);
        Ok(())
    }

    async fn stop(&self, _module: &ModuleContext<'_>) -> SiteResult<()> {
        self.routes.remove(HOME_ROUTE);
        Ok(())
    }
}

pub fn descriptor(routes: Arc<RouteTable>) -> ModuleDescriptor {
    ModuleDescriptor::new(
        MODULE_NAME,
        env!("CARGO_PKG_VERSION"),
        Arc::new(CorePages::new(routes)),
    )
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_start_and_stop_manage_home_route() {
        let routes = Arc::new(RouteTable::new());
        let module = CorePages::new(routes.clone());
        let config = json!({"title": "Welcome"});
        let ctx = ModuleContext {
            name: MODULE_NAME,
            config: &config,
        };

        module.initialise(&ctx).await.unwrap();
        module.start(&ctx).await.unwrap();
        let matched = routes.match_route(&Method::GET, "/").unwrap();
        assert_eq!(matched.route.template.as_deref(), Some("home"));

        let mut request = RequestContext::new(Method::GET, "/");
        matched.route.handlers[0].handle(&mut request).await.unwrap();
        assert_eq!(request.item("title"), Some(&json!("Welcome")));

        module.stop(&ctx).await.unwrap();
        assert!(routes.match_route(&Method::GET, "/").is_none());
    }

    #[tokio::test]
    async fn test_rejects_bad_title() {
        let module = CorePages::new(Arc::new(RouteTable::new()));
        let config = json!({"title": 3});
        let ctx = ModuleContext {
            name: MODULE_NAME,
            config: &config,
        };
        assert!(module.initialise(&ctx).await.is_err());
    }
}
