use std::{fmt, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::{
    core::SiteResult,
    graph::{DependencySpec, STATE_INITIALISED, STATE_INSTALLED, STATE_STARTED},
};

/// Lifecycle states of a module, strictly ordered
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Loaded,
    Initialised,
    Started,
}

impl LifecycleState {
    /// State recorded on the module's component in the dependency graph
    pub fn component_state(&self) -> &'static str {
        match self {
            LifecycleState::Loaded => STATE_INSTALLED,
            LifecycleState::Initialised => STATE_INITIALISED,
            LifecycleState::Started => STATE_STARTED,
        }
    }

    pub fn next(&self) -> Option<Self> {
        match self {
            LifecycleState::Loaded => Some(LifecycleState::Initialised),
            LifecycleState::Initialised => Some(LifecycleState::Started),
            LifecycleState::Started => None,
        }
    }

    pub fn previous(&self) -> Option<Self> {
        match self {
            LifecycleState::Loaded => None,
            LifecycleState::Initialised => Some(LifecycleState::Loaded),
            LifecycleState::Started => Some(LifecycleState::Initialised),
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Loaded => "loaded",
            LifecycleState::Initialised => "initialised",
            LifecycleState::Started => "started",
        };
        write!(f, "{name}")
    }
}

/// Single-step transitions between adjacent states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Transition {
    Initialise,
    Start,
    Stop,
    Remove,
}

impl Transition {
    pub fn between(from: LifecycleState, to: LifecycleState) -> Option<Self> {
        match (from, to) {
            (LifecycleState::Loaded, LifecycleState::Initialised) => Some(Transition::Initialise),
            (LifecycleState::Initialised, LifecycleState::Started) => Some(Transition::Start),
            (LifecycleState::Started, LifecycleState::Initialised) => Some(Transition::Stop),
            (LifecycleState::Initialised, LifecycleState::Loaded) => Some(Transition::Remove),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Transition::Initialise => "initialise",
            Transition::Start => "start",
            Transition::Stop => "stop",
            Transition::Remove => "remove",
        }
    }

    pub fn is_upward(&self) -> bool {
        matches!(self, Transition::Initialise | Transition::Start)
    }
}

/// Desired lifecycle configuration of a module
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleConfig {
    #[serde(default)]
    pub initialise: bool,
    #[serde(default)]
    pub start: bool,
    #[serde(default)]
    pub config: JsonValue,
}

impl ModuleConfig {
    pub fn started() -> Self {
        Self {
            initialise: true,
            start: true,
            config: JsonValue::Null,
        }
    }

    pub fn initialised() -> Self {
        Self {
            initialise: true,
            start: false,
            config: JsonValue::Null,
        }
    }

    pub fn with_config(mut self, config: JsonValue) -> Self {
        self.config = config;
        self
    }

    /// Target state; `start` implies `initialise`
    pub fn target(&self) -> LifecycleState {
        if self.start {
            LifecycleState::Started
        } else if self.initialise {
            LifecycleState::Initialised
        } else {
            LifecycleState::Loaded
        }
    }
}

/// What a handler sees of its own module during a transition
pub struct ModuleContext<'a> {
    pub name: &'a str,
    pub config: &'a JsonValue,
}

/// Transition hooks implemented by an extension module.
///
/// Returning an error leaves the module at its prior state.
#[async_trait]
pub trait ModuleHandler: Send + Sync {
    async fn initialise(&self, _module: &ModuleContext<'_>) -> SiteResult<()> {
        Ok(())
    }

    async fn start(&self, _module: &ModuleContext<'_>) -> SiteResult<()> {
        Ok(())
    }

    async fn stop(&self, _module: &ModuleContext<'_>) -> SiteResult<()> {
        Ok(())
    }

    async fn remove(&self, _module: &ModuleContext<'_>) -> SiteResult<()> {
        Ok(())
    }
}

/// Handler for modules that only take part in dependency tracking
pub struct NoopModule;

#[async_trait]
impl ModuleHandler for NoopModule {}

/// Declared identity of a module as handed to `load_module`
#[derive(Clone)]
pub struct ModuleDescriptor {
    pub name: String,
    pub version: String,
    pub dependencies: Vec<DependencySpec>,
    pub handler: Arc<dyn ModuleHandler>,
}

impl ModuleDescriptor {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        handler: Arc<dyn ModuleHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            dependencies: Vec::new(),
            handler,
        }
    }

    pub fn depends_on(mut self, dependency: DependencySpec) -> Self {
        self.dependencies.push(dependency);
        self
    }
}

/// Introspection snapshot of a module
#[derive(Debug, Clone, Serialize)]
pub struct ModuleInfo {
    pub name: String,
    pub version: String,
    pub dependencies: Vec<String>,
    pub config: ModuleConfig,
    pub state: LifecycleState,
    pub target: LifecycleState,
    pub initialised: bool,
    pub started: bool,
    pub resolved: bool,
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_order() {
        assert!(LifecycleState::Loaded < LifecycleState::Initialised);
        assert!(LifecycleState::Initialised < LifecycleState::Started);
        assert_eq!(LifecycleState::Loaded.next(), Some(LifecycleState::Initialised));
        assert_eq!(LifecycleState::Started.next(), None);
        assert_eq!(LifecycleState::Loaded.previous(), None);
        assert_eq!(LifecycleState::Started.component_state(), "started");
    }

    #[test]
    fn test_transitions() {
        use LifecycleState::*;
        assert_eq!(Transition::between(Loaded, Initialised), Some(Transition::Initialise));
        assert_eq!(Transition::between(Started, Initialised), Some(Transition::Stop));
        assert_eq!(Transition::between(Loaded, Started), None);
        assert!(Transition::Start.is_upward());
        assert!(!Transition::Remove.is_upward());
    }

    #[test]
    fn test_config_target() {
        let cfg: ModuleConfig = serde_yaml::from_str("start: true").unwrap();
        assert_eq!(cfg.target(), LifecycleState::Started);
        let cfg: ModuleConfig = serde_yaml::from_str("initialise: true").unwrap();
        assert_eq!(cfg.target(), LifecycleState::Initialised);
        assert_eq!(ModuleConfig::default().target(), LifecycleState::Loaded);
    }
}
