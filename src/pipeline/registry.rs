use std::{collections::HashMap, sync::Arc};

use log::debug;
use validator::Validate;

use crate::{
    config_error,
    core::{SiteError, SiteResult},
};

use super::{Pipeline, StageHandler, StageSpec};

/// Table of stage handlers addressable by name.
///
/// Execution-path definitions name their stages; the registry turns those
/// names into handlers when a path is built.
#[derive(Default, Clone)]
pub struct StageRegistry {
    handlers: HashMap<String, Arc<dyn StageHandler>>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, returning the one it replaced
    pub fn register(
        &mut self,
        name: impl Into<String>,
        handler: Arc<dyn StageHandler>,
    ) -> Option<Arc<dyn StageHandler>> {
        let name = name.into();
        debug!("Registered stage handler {name}");
        self.handlers.insert(name, handler)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn StageHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Build a pipeline from an ordered stage list.
    ///
    /// Fails with a configuration error on an unknown stage name, a duplicate
    /// stage or an invalid entry; nothing is built in that case.
    pub fn build(&self, name: &str, specs: &[StageSpec]) -> SiteResult<Pipeline> {
        let pipeline = Pipeline::new(name);
        for spec in specs {
            spec.validate()
                .map_err(|e| config_error!("path '{}' stage '{}': {}", name, spec.name, e))?;

            let handler = self
                .get(&spec.name)
                .ok_or_else(|| config_error!("path '{}' uses unknown stage '{}'", name, spec.name))?;

            pipeline
                .add_state(&spec.name, handler, spec.priority, spec.config.clone())
                .map_err(|e| match e {
                    SiteError::Validation(msg) => SiteError::Configuration(msg),
                    other => other,
                })?;
        }
        Ok(pipeline)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::Value as JsonValue;

    use super::*;
    use crate::{core::RequestContext, pipeline::Next};

    struct Pass;

    #[async_trait]
    impl StageHandler for Pass {
        async fn run(
            &self,
            ctx: &mut RequestContext,
            _config: &JsonValue,
            next: Next<'_>,
        ) -> SiteResult<()> {
            next.run(ctx).await
        }
    }

    fn registry() -> StageRegistry {
        let mut registry = StageRegistry::new();
        registry.register("session", Arc::new(Pass));
        registry.register("render", Arc::new(Pass));
        registry
    }

    #[test]
    fn test_build_orders_stages() {
        let specs: Vec<StageSpec> = serde_yaml::from_str(
            r#"
- name: render
  priority: 100
- name: session
  priority: 700
  config:
    cookie: sid
            "#,
        )
        .unwrap();

        let pipeline = registry().build("default", &specs).unwrap();
        assert_eq!(pipeline.name(), "default");
        assert_eq!(pipeline.stage_names(), vec!["session", "render"]);
    }

    #[test]
    fn test_build_failures_are_configuration_errors() {
        let registry = registry();
        let unknown = registry.build("default", &[StageSpec::new("missing", 1)]);
        assert!(matches!(unknown, Err(SiteError::Configuration(_))));

        let duplicate = registry.build(
            "default",
            &[StageSpec::new("render", 1), StageSpec::new("render", 2)],
        );
        assert!(matches!(duplicate, Err(SiteError::Configuration(_))));

        let negative = registry.build("default", &[StageSpec::new("render", -5)]);
        assert!(matches!(negative, Err(SiteError::Configuration(_))));
    }

    #[test]
    fn test_register_replaces() {
        let mut registry = registry();
        assert!(registry.register("render", Arc::new(Pass)).is_some());
        assert_eq!(registry.names(), vec!["render", "session"]);
        assert!(registry.contains("session"));
        assert!(registry.get("forms").is_none());
    }
}
