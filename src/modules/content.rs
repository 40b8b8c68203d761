use std::sync::Arc;

use async_trait::async_trait;
use http::Method;
use log::info;
use serde_json::Value as JsonValue;

use crate::{
    core::{ContentProvider, RequestContext, SiteResult},
    graph::{DependencySpec, STATE_STARTED},
    lifecycle::{config_str, ModuleContext, ModuleDescriptor, ModuleHandler},
    router::{Route, RouteHandler, RouteTable},
};

use super::core_pages;

pub const MODULE_NAME: &str = "content";

const ITEM_ROUTE: &str = "content";
const INDEX_ROUTE: &str = "content-index";

/// Lists the keys of a collection under the `keys` item
struct ContentIndex {
    content: Arc<dyn ContentProvider>,
    collection: String,
}

#[async_trait]
impl RouteHandler for ContentIndex {
    async fn handle(&self, ctx: &mut RequestContext) -> SiteResult<()> {
        let keys = self.content.keys(&self.collection).await?;
        ctx.set_item("keys", JsonValue::from(keys));
        Ok(())
    }
}

/// Serves stored content at `/content/{alias}` and an index at `/content`
pub struct ContentModule {
    routes: Arc<RouteTable>,
    content: Arc<dyn ContentProvider>,
}

impl ContentModule {
    pub fn new(routes: Arc<RouteTable>, content: Arc<dyn ContentProvider>) -> Self {
        Self { routes, content }
    }
}

#[async_trait]
impl ModuleHandler for ContentModule {
    async fn start(&self, module: &ModuleContext<'_>) -> SiteResult<()> {
        let collection = config_str(module.config, "collection").unwrap_or("pages");
        let mut item = Route::new(ITEM_ROUTE, "/content/{alias}")
            .with_methods([Method::GET])
            .with_template(config_str(module.config, "template").unwrap_or("content"));
        if let Some(permission) = config_str(module.config, "permission") {
            item = item.with_permission(permission);
        }
        self.routes.add(item)?;

        let index = Route::new(INDEX_ROUTE, "/content")
            .with_methods([Method::GET])
            .with_template("content-index")
            .with_handler(Arc::new(ContentIndex {
                content: self.content.clone(),
                collection: collection.to_string(),
            }));
        if let Err(e) = self.routes.add(index) {
            self.routes.remove(ITEM_ROUTE);
            return Err(e);
        }
        info!("{} mounted /content for collection {collection}", module.name);
        Ok(())
    }

    async fn stop(&self, _module: &ModuleContext<'_>) -> SiteResult<()> {
        self.routes.remove(INDEX_ROUTE);
        self.routes.remove(ITEM_ROUTE);
        Ok(())
    }
}

pub fn descriptor(routes: Arc<RouteTable>, content: Arc<dyn ContentProvider>) -> ModuleDescriptor {
    ModuleDescriptor::new(
        MODULE_NAME,
        env!("CARGO_PKG_VERSION"),
        Arc::new(ContentModule::new(routes, content)),
    )
    .depends_on(DependencySpec::module(core_pages::MODULE_NAME, &[STATE_STARTED]))
}
