//! Dependency injection container
//!
//! Owns one site's registries: the component graph, the lifecycle
//! orchestrator, the router and the stage-handler table. Nothing here is
//! process-global, so tests can run any number of independent sites.

use std::sync::Arc;

use log::{error, info, warn};

use crate::{
    adapters::{MemoryContentStore, MemorySessionStore, SimpleTemplateRenderer},
    config::Config,
    graph::{Component, DependencyGraph, COLLECTION_CORE, COLLECTION_THEME, STATE_INSTALLED, STATE_STARTED},
    lifecycle::{ConvergenceReport, LifecycleOrchestrator, ModuleConfig, ModuleDescriptor},
    modules::builtin_modules,
    pipeline::{
        stages::{self, register_builtin_stages, StageServices},
        StageRegistry, StageSpec,
    },
    router::Router,
};

use super::error::SiteResult;

/// Main dependency injection container
pub struct SiteContainer {
    graph: Arc<DependencyGraph>,
    lifecycle: Arc<LifecycleOrchestrator>,
    router: Arc<Router>,
    stages: StageRegistry,
    services: StageServices,
}

impl SiteContainer {
    /// Create a container around the given collaborators with the built-in stages registered
    pub fn new(services: StageServices) -> Self {
        let graph = Arc::new(DependencyGraph::new());
        let lifecycle = Arc::new(LifecycleOrchestrator::new(graph.clone()));
        let router = Arc::new(Router::with_routes(services.routes.clone()));

        let mut stages = StageRegistry::new();
        register_builtin_stages(&mut stages, &services);

        Self {
            graph,
            lifecycle,
            router,
            stages,
            services,
        }
    }

    /// Container backed by the in-memory adapters
    pub fn in_memory() -> Self {
        Self::new(StageServices {
            routes: Default::default(),
            content: Arc::new(MemoryContentStore::new()),
            templates: Arc::new(SimpleTemplateRenderer::new()),
            sessions: Arc::new(MemorySessionStore::new()),
        })
    }

    pub fn graph(&self) -> &Arc<DependencyGraph> {
        &self.graph
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleOrchestrator> {
        &self.lifecycle
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn services(&self) -> &StageServices {
        &self.services
    }

    pub fn stages(&self) -> &StageRegistry {
        &self.stages
    }

    /// Register an additional stage handler; call before paths are built
    pub fn stages_mut(&mut self) -> &mut StageRegistry {
        &mut self.stages
    }

    /// Register the site, themes, built-in modules and execution paths from configuration.
    ///
    /// Any error here is fatal for startup. Modules only move once `converge` runs.
    pub fn configure(&self, config: &Config) -> SiteResult<()> {
        let site = Component::new(
            COLLECTION_CORE,
            &config.site.name,
            &config.site.version,
            STATE_STARTED,
        )?;
        self.graph.add_component(site);

        for theme in &config.themes {
            let component =
                Component::new(COLLECTION_THEME, &theme.name, &theme.version, STATE_INSTALLED)?;
            self.graph.add_component(component);
        }

        let builtin = builtin_modules(&self.services.routes, &self.services.content);
        for name in config.modules.keys() {
            if !builtin.iter().any(|d| &d.name == name) {
                warn!("Configuration for unknown module {name} ignored");
            }
        }
        for descriptor in builtin {
            let module_config = config
                .modules
                .get(&descriptor.name)
                .cloned()
                .unwrap_or_default();
            self.load_module(descriptor, module_config)?;
        }

        if config.paths.is_empty() {
            info!("No execution paths configured, mounting the default path");
            let pipeline =
                self.router
                    .add_execution_path("default", "/", &default_stages(), &self.stages)?;
            pipeline.describe();
        }
        for (name, path) in &config.paths {
            let pipeline = self
                .router
                .add_execution_path(name, &path.path, &path.stages, &self.stages)?;
            pipeline.set_priority(path.priority);
            pipeline.set_timeout(path.timeout());
            pipeline.describe();
        }
        Ok(())
    }

    pub fn load_module(&self, descriptor: ModuleDescriptor, config: ModuleConfig) -> SiteResult<()> {
        self.lifecycle.load_module(descriptor, config)
    }

    /// Drive every module to its target and report cycles and stragglers
    pub async fn converge(&self) -> ConvergenceReport {
        let report = self.lifecycle.converge().await;
        for name in &report.failed {
            error!("Module {name} failed to reach its target state");
        }
        report
    }
}

impl Default for SiteContainer {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// Every built-in stage at its conventional priority
pub fn default_stages() -> Vec<StageSpec> {
    vec![
        StageSpec::new(stages::session::STAGE_NAME, 700),
        StageSpec::new(stages::routing::STAGE_NAME, 600),
        StageSpec::new(stages::access::STAGE_NAME, 500),
        StageSpec::new(stages::forms::STAGE_NAME, 400),
        StageSpec::new(stages::content::STAGE_NAME, 300),
        StageSpec::new(stages::render::STAGE_NAME, 100),
        StageSpec::new(stages::terminal::STAGE_NAME, 0),
    ]
}
