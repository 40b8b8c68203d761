//! Execution-path and route dispatch
//!
//! The router owns two tables. Execution paths are pipelines mounted at path
//! prefixes; an inbound request runs through the best matching one. Routes are
//! the application endpoints the `routing` stage resolves inside a pipeline.

use std::{collections::BTreeMap, sync::Arc};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use http::Method;
use log::{debug, info};
use matchit::Router as MatchRouter;
use parking_lot::Mutex;

use crate::{
    config_error,
    core::{context::MatchedRoute, RequestContext, SiteError, SiteResult},
    pipeline::{MountTable, Outcome, Pipeline, StageRegistry, StageSpec},
};

/// Application logic attached to a route
#[async_trait]
pub trait RouteHandler: Send + Sync {
    async fn handle(&self, ctx: &mut RequestContext) -> SiteResult<()>;
}

/// A named endpoint resolved by the `routing` stage
pub struct Route {
    pub name: String,
    pub priority: i32,
    /// matchit pattern, e.g. `/content/{alias}`
    pub pattern: String,
    /// Allowed methods, any method if empty
    pub methods: Vec<Method>,
    pub handlers: Vec<Arc<dyn RouteHandler>>,
    /// Session permission required by the `access` stage
    pub permission: Option<String>,
    /// Template chosen for the `render` stage
    pub template: Option<String>,
}

impl Route {
    pub fn new(name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority: 0,
            pattern: pattern.into(),
            methods: Vec::new(),
            handlers: Vec::new(),
            permission: None,
            template: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.methods = methods.into_iter().collect();
        self
    }

    pub fn with_handler(mut self, handler: Arc<dyn RouteHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.permission = Some(permission.into());
        self
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    fn allows(&self, method: &Method) -> bool {
        self.methods.is_empty()
            || self.methods.contains(method)
            || (*method == Method::HEAD && self.methods.contains(&Method::GET))
    }
}

#[derive(Default)]
struct RouteSet {
    /// Sorted by priority, highest first
    entries: Vec<Arc<Route>>,
    matcher: MatchRouter<Vec<Arc<Route>>>,
}

impl RouteSet {
    fn build(entries: Vec<Arc<Route>>) -> SiteResult<Self> {
        // Routes sharing a pattern share one matcher slot, in priority order
        let mut groups: Vec<(String, Vec<Arc<Route>>)> = Vec::new();
        for route in entries.iter() {
            match groups.iter_mut().find(|(pattern, _)| *pattern == route.pattern) {
                Some((_, routes)) => routes.push(route.clone()),
                None => groups.push((route.pattern.clone(), vec![route.clone()])),
            }
        }

        let mut matcher = MatchRouter::new();
        for (pattern, routes) in groups {
            let names: Vec<&str> = routes.iter().map(|r| r.name.as_str()).collect();
            let names = names.join(", ");
            matcher
                .insert(pattern.clone(), routes)
                .map_err(|e| config_error!("route '{}' pattern '{}': {}", names, pattern, e))?;
        }
        Ok(Self { entries, matcher })
    }
}

/// Route table shared between the router and the `routing` stage
#[derive(Default)]
pub struct RouteTable {
    set: ArcSwap<RouteSet>,
    writer: Mutex<()>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a route; the matcher is rebuilt so a conflicting pattern leaves the table unchanged
    pub fn add(&self, route: Route) -> SiteResult<()> {
        let _guard = self.writer.lock();
        let current = self.set.load();
        if current.entries.iter().any(|r| r.name == route.name) {
            return Err(config_error!("duplicate route '{}'", route.name));
        }

        let mut entries = current.entries.clone();
        let priority = route.priority;
        let pos = entries
            .iter()
            .position(|r| r.priority < priority)
            .unwrap_or(entries.len());
        debug!("Adding route {} at {}", route.name, route.pattern);
        entries.insert(pos, Arc::new(route));

        let set = RouteSet::build(entries)?;
        self.set.store(Arc::new(set));
        Ok(())
    }

    pub fn remove(&self, name: &str) -> bool {
        let _guard = self.writer.lock();
        let current = self.set.load();
        if !current.entries.iter().any(|r| r.name == name) {
            return false;
        }
        let entries: Vec<Arc<Route>> = current
            .entries
            .iter()
            .filter(|r| r.name != name)
            .cloned()
            .collect();

        match RouteSet::build(entries) {
            Ok(set) => {
                self.set.store(Arc::new(set));
                debug!("Removed route {name}");
                true
            }
            Err(e) => {
                log::error!("Failed to rebuild routes without {name}: {e}");
                false
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<Route>> {
        self.set
            .load()
            .entries
            .iter()
            .find(|r| r.name == name)
            .cloned()
    }

    /// Route names in match order
    pub fn names(&self) -> Vec<String> {
        self.set
            .load()
            .entries
            .iter()
            .map(|r| r.name.clone())
            .collect()
    }

    /// Highest-priority route whose pattern and method match
    pub fn match_route(&self, method: &Method, path: &str) -> Option<MatchedRoute> {
        let set = self.set.load();
        let matched = set.matcher.at(path).ok()?;
        let route = matched.value.iter().find(|r| r.allows(method))?;
        let params: BTreeMap<String, String> = matched
            .params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Some(MatchedRoute {
            route: route.clone(),
            params,
        })
    }
}

fn prefix_matches(prefix: &str, path: &str) -> bool {
    prefix == "/"
        || path == prefix
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Mounts execution paths and dispatches requests to them
pub struct Router {
    paths: ArcSwap<Vec<Arc<Pipeline>>>,
    routes: Arc<RouteTable>,
    mounts: Arc<MountTable>,
    writer: Mutex<()>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        Self::with_routes(Arc::new(RouteTable::new()))
    }

    pub fn with_routes(routes: Arc<RouteTable>) -> Self {
        Self {
            paths: ArcSwap::from_pointee(Vec::new()),
            routes,
            mounts: Arc::new(MountTable::new()),
            writer: Mutex::new(()),
        }
    }

    pub fn routes(&self) -> &Arc<RouteTable> {
        &self.routes
    }

    /// Build an execution path and mount it at `prefix`
    pub fn add_execution_path(
        &self,
        name: &str,
        prefix: &str,
        specs: &[StageSpec],
        registry: &StageRegistry,
    ) -> SiteResult<Arc<Pipeline>> {
        let pipeline = registry.build(name, specs)?;
        pipeline.set_path(prefix)?;
        self.mount(pipeline)
    }

    /// Mount an already built pipeline at its current prefix.
    ///
    /// Names and prefixes must be unique among the mounted paths.
    pub fn mount(&self, pipeline: Pipeline) -> SiteResult<Arc<Pipeline>> {
        let _guard = self.writer.lock();
        let name = pipeline.name();
        let current = self.paths.load();
        if current.iter().any(|p| p.name() == name) {
            return Err(config_error!("duplicate execution path '{}'", name));
        }
        pipeline.attach(self.mounts.clone())?;

        let pipeline = Arc::new(pipeline);
        let mut paths = Vec::clone(&current);
        paths.push(pipeline.clone());
        self.paths.store(Arc::new(paths));
        info!("Mounted execution path {name}");
        Ok(pipeline)
    }

    pub fn remove_execution_path(&self, name: &str) -> bool {
        let _guard = self.writer.lock();
        let current = self.paths.load();
        let Some(removed) = current.iter().find(|p| p.name() == name) else {
            return false;
        };
        removed.detach();
        let paths: Vec<Arc<Pipeline>> = current
            .iter()
            .filter(|p| p.name() != name)
            .cloned()
            .collect();
        self.paths.store(Arc::new(paths));
        info!("Removed execution path {name}");
        true
    }

    pub fn execution_path(&self, name: &str) -> Option<Arc<Pipeline>> {
        self.paths.load().iter().find(|p| p.name() == name).cloned()
    }

    pub fn execution_paths(&self) -> Vec<Arc<Pipeline>> {
        Vec::clone(&self.paths.load())
    }

    /// Pick the execution path for a request path: highest priority, then longest prefix
    pub fn select(&self, path: &str) -> Option<Arc<Pipeline>> {
        let paths = self.paths.load();
        let mut best: Option<(i32, usize, &Arc<Pipeline>)> = None;
        for pipeline in paths.iter() {
            let prefix = pipeline.path();
            if !prefix_matches(&prefix, path) {
                continue;
            }
            let rank = (pipeline.priority(), prefix.len());
            if best.map_or(true, |(p, l, _)| rank > (p, l)) {
                best = Some((rank.0, rank.1, pipeline));
            }
        }
        best.map(|(_, _, p)| p.clone())
    }

    /// Run a request through its execution path
    pub async fn dispatch(&self, ctx: &mut RequestContext) -> SiteResult<Outcome> {
        let pipeline = self
            .select(&ctx.path)
            .ok_or_else(|| SiteError::NotFound(format!("no execution path for {}", ctx.path)))?;
        debug!(
            "Request {} {} -> path {}",
            ctx.request_id,
            ctx.path,
            pipeline.name()
        );
        Ok(pipeline.execute(ctx).await)
    }

    pub fn add_route(&self, route: Route) -> SiteResult<()> {
        self.routes.add(route)
    }

    pub fn remove_route(&self, name: &str) -> bool {
        self.routes.remove(name)
    }

    pub fn match_route(&self, method: &Method, path: &str) -> Option<MatchedRoute> {
        self.routes.match_route(method, path)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value as JsonValue;

    use super::*;
    use crate::pipeline::{Next, StageHandler};

    struct Tag(&'static str);

    #[async_trait]
    impl StageHandler for Tag {
        async fn run(
            &self,
            ctx: &mut RequestContext,
            _config: &JsonValue,
            next: Next<'_>,
        ) -> SiteResult<()> {
            ctx.set_item("path", JsonValue::from(self.0));
            next.run(ctx).await
        }
    }

    fn router() -> Router {
        let mut registry = StageRegistry::new();
        registry.register("front", Arc::new(Tag("front")));
        registry.register("admin", Arc::new(Tag("admin")));
        registry.register("api", Arc::new(Tag("api")));

        let router = Router::new();
        let front = router
            .add_execution_path("default", "/", &[StageSpec::new("front", 0)], &registry)
            .unwrap();
        front.set_priority(-100);

        router
            .add_execution_path("admin", "/admin", &[StageSpec::new("admin", 0)], &registry)
            .unwrap();
        router
            .add_execution_path("api", "/admin/api/", &[StageSpec::new("api", 0)], &registry)
            .unwrap();
        router
    }

    fn selected(router: &Router, path: &str) -> Option<String> {
        router.select(path).map(|p| p.name())
    }

    #[test]
    fn test_select_most_specific_prefix() {
        let router = router();
        assert_eq!(selected(&router, "/").as_deref(), Some("default"));
        assert_eq!(selected(&router, "/about").as_deref(), Some("default"));
        assert_eq!(selected(&router, "/admin").as_deref(), Some("admin"));
        assert_eq!(selected(&router, "/admin/users").as_deref(), Some("admin"));
        assert_eq!(selected(&router, "/admin/api/x").as_deref(), Some("api"));
        // segment boundary
        assert_eq!(selected(&router, "/administrator").as_deref(), Some("default"));
    }

    #[test]
    fn test_priority_beats_prefix_length() {
        let router = router();
        router.execution_path("default").unwrap().set_priority(10);
        assert_eq!(selected(&router, "/admin/api/x").as_deref(), Some("default"));
    }

    #[tokio::test]
    async fn test_dispatch_and_removal() {
        let router = router();
        let mut ctx = RequestContext::new(Method::GET, "/admin/users?page=2");
        let outcome = router.dispatch(&mut ctx).await.unwrap();
        assert!(matches!(outcome, Outcome::Completed));
        assert_eq!(ctx.item("path"), Some(&JsonValue::from("admin")));

        assert!(router.remove_execution_path("admin"));
        assert!(!router.remove_execution_path("admin"));
        assert!(router.remove_execution_path("default"));

        let mut ctx = RequestContext::new(Method::GET, "/about");
        assert!(matches!(
            router.dispatch(&mut ctx).await,
            Err(SiteError::NotFound(_))
        ));
    }

    #[test]
    fn test_duplicate_execution_path() {
        let router = router();
        let err = router.mount(Pipeline::new("admin"));
        assert!(matches!(err, Err(SiteError::Configuration(_))));
        assert_eq!(router.execution_paths().len(), 3);
    }

    #[test]
    fn test_mount_prefixes_are_distinct() {
        let router = router();

        let shop = Pipeline::new("shop");
        shop.set_path("/admin/").unwrap();
        assert!(matches!(router.mount(shop), Err(SiteError::Configuration(_))));
        assert!(router.execution_path("shop").is_none());

        // moving a mounted path onto a taken prefix is refused
        let api = router.execution_path("api").unwrap();
        assert!(matches!(api.set_path("/admin"), Err(SiteError::Configuration(_))));
        assert_eq!(api.path(), "/admin/api");
        assert_eq!(selected(&router, "/admin/users").as_deref(), Some("admin"));

        // a removed path frees its prefix
        assert!(router.remove_execution_path("admin"));
        api.set_path("/admin").unwrap();
        assert_eq!(selected(&router, "/admin/users").as_deref(), Some("api"));
        let shop = Pipeline::new("shop");
        shop.set_path("/admin/api").unwrap();
        assert!(router.mount(shop).is_ok());
    }

    #[test]
    fn test_route_matching() {
        let router = Router::new();
        router
            .add_route(Route::new("home", "/").with_methods([Method::GET]))
            .unwrap();
        router
            .add_route(Route::new("content", "/content/{alias}").with_template("content"))
            .unwrap();
        router
            .add_route(
                Route::new("content-edit", "/content/{alias}")
                    .with_priority(5)
                    .with_methods([Method::POST])
                    .with_permission("edit content"),
            )
            .unwrap();

        assert_eq!(router.routes().names(), vec!["content-edit", "home", "content"]);

        let matched = router.match_route(&Method::GET, "/content/hello").unwrap();
        assert_eq!(matched.route.name, "content");
        assert_eq!(matched.params.get("alias").map(String::as_str), Some("hello"));

        let matched = router.match_route(&Method::POST, "/content/hello").unwrap();
        assert_eq!(matched.route.name, "content-edit");

        assert_eq!(
            router.match_route(&Method::HEAD, "/").unwrap().route.name,
            "home"
        );
        assert!(router.match_route(&Method::POST, "/").is_none());
        assert!(router.match_route(&Method::GET, "/missing").is_none());
    }

    #[test]
    fn test_route_add_remove() {
        let router = Router::new();
        router.add_route(Route::new("page", "/page/{id}")).unwrap();
        assert!(matches!(
            router.add_route(Route::new("page", "/other")),
            Err(SiteError::Configuration(_))
        ));
        // conflicting parameter name on the same segment
        assert!(router.add_route(Route::new("clash", "/page/{slug}")).is_err());
        assert_eq!(router.routes().names(), vec!["page"]);

        assert!(router.remove_route("page"));
        assert!(!router.remove_route("page"));
        assert!(router.match_route(&Method::GET, "/page/1").is_none());
        assert!(router.routes().get("page").is_none());
    }
}
