use std::{collections::BTreeSet, fmt};

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::core::{
    error::{SiteError, SiteResult},
    version::{format_version, parse_version},
};

pub const COLLECTION_CORE: &str = "core";
pub const COLLECTION_MODULE: &str = "module";
pub const COLLECTION_THEME: &str = "theme";

pub const STATE_INSTALLED: &str = "installed";
pub const STATE_INITIALISED: &str = "initialised";
pub const STATE_STARTED: &str = "started";

/// Registry identity of a component
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentKey {
    pub collection: String,
    pub name: String,
}

impl ComponentKey {
    pub fn new(collection: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            name: name.into(),
        }
    }

    pub fn module(name: impl Into<String>) -> Self {
        Self::new(COLLECTION_MODULE, name)
    }
}

impl fmt::Display for ComponentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.name)
    }
}

/// A requirement one component places on another
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dependency {
    pub target: ComponentKey,
    pub min_version: Option<u32>,
    pub max_version: Option<u32>,
    /// Target states that satisfy the dependency, any state if `None`
    pub states: Option<BTreeSet<String>>,
    /// Outcome of the most recent resolution pass
    pub satisfied: bool,
}

impl Dependency {
    pub fn new(collection: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            target: ComponentKey::new(collection, name),
            min_version: None,
            max_version: None,
            states: None,
            satisfied: false,
        }
    }

    pub fn with_min_version(mut self, version: &str) -> SiteResult<Self> {
        self.min_version = Some(parse_version(version)?);
        Ok(self)
    }

    pub fn with_max_version(mut self, version: &str) -> SiteResult<Self> {
        self.max_version = Some(parse_version(version)?);
        Ok(self)
    }

    pub fn with_states<I, S>(mut self, states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let states: BTreeSet<String> = states.into_iter().map(Into::into).collect();
        self.states = (!states.is_empty()).then_some(states);
        self
    }

    /// Check the dependency against the target's version and state, `None` if absent
    pub fn is_met_by(&self, target: Option<(u32, &str)>) -> bool {
        let Some((version, state)) = target else {
            return false;
        };

        if self.min_version.is_some_and(|min| version < min) {
            return false;
        }
        if self.max_version.is_some_and(|max| version > max) {
            return false;
        }
        if let Some(states) = &self.states {
            if !states.contains(state) {
                return false;
            }
        }
        true
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.target)?;
        if let Some(min) = self.min_version {
            write!(f, " >={}", format_version(min))?;
        }
        if let Some(max) = self.max_version {
            write!(f, " <={}", format_version(max))?;
        }
        if let Some(states) = &self.states {
            let states: Vec<&str> = states.iter().map(|s| s.as_str()).collect();
            write!(f, " [{}]", states.join("|"))?;
        }
        Ok(())
    }
}

/// Declarative form of a dependency as written in descriptors and configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct DependencySpec {
    #[serde(default = "DependencySpec::default_collection")]
    #[validate(length(min = 1))]
    pub collection: String,
    #[validate(length(min = 1))]
    pub name: String,
    pub min_version: Option<String>,
    pub max_version: Option<String>,
    #[serde(default)]
    pub states: Vec<String>,
}

impl DependencySpec {
    fn default_collection() -> String {
        COLLECTION_MODULE.to_string()
    }

    /// Dependency on another module reaching one of `states`
    pub fn module(name: impl Into<String>, states: &[&str]) -> Self {
        Self {
            collection: COLLECTION_MODULE.to_string(),
            name: name.into(),
            min_version: None,
            max_version: None,
            states: states.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl TryFrom<&DependencySpec> for Dependency {
    type Error = SiteError;

    fn try_from(spec: &DependencySpec) -> SiteResult<Self> {
        spec.validate()
            .map_err(|e| SiteError::Validation(format!("invalid dependency: {e}")))?;

        let mut dependency = Dependency::new(&spec.collection, &spec.name);
        if let Some(min) = &spec.min_version {
            dependency = dependency.with_min_version(min)?;
        }
        if let Some(max) = &spec.max_version {
            dependency = dependency.with_max_version(max)?;
        }
        Ok(dependency.with_states(spec.states.iter().cloned()))
    }
}

/// A named, versioned, stateful registry entry
#[derive(Debug, Clone, Serialize)]
pub struct Component {
    key: ComponentKey,
    version: u32,
    state: String,
    dependencies: Vec<Dependency>,
    resolved: bool,
}

impl Component {
    /// Validate and build a component; fails on empty fields or a malformed version
    pub fn new(collection: &str, name: &str, version: &str, state: &str) -> SiteResult<Self> {
        for (field, value) in [("collection", collection), ("name", name), ("state", state)] {
            if value.trim().is_empty() {
                return Err(SiteError::Validation(format!(
                    "component {field} must not be empty"
                )));
            }
        }

        Ok(Self {
            key: ComponentKey::new(collection, name),
            version: parse_version(version)?,
            state: state.to_string(),
            dependencies: Vec::new(),
            resolved: false,
        })
    }

    pub fn with_dependency(mut self, dependency: Dependency) -> Self {
        self.add_dependency(dependency);
        self
    }

    /// Add or replace the dependency on the same target
    pub fn add_dependency(&mut self, dependency: Dependency) {
        self.dependencies.retain(|d| d.target != dependency.target);
        self.dependencies.push(dependency);
    }

    pub fn key(&self) -> &ComponentKey {
        &self.key
    }

    pub fn collection(&self) -> &str {
        &self.key.collection
    }

    pub fn name(&self) -> &str {
        &self.key.name
    }

    pub fn version_number(&self) -> u32 {
        self.version
    }

    pub fn version(&self) -> String {
        format_version(self.version)
    }

    pub fn state(&self) -> &str {
        &self.state
    }

    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    /// Resolution as of the last pass of the owning graph
    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    pub(super) fn set_state(&mut self, state: &str) {
        self.state = state.to_string();
    }

    pub(super) fn dependencies_mut(&mut self) -> &mut [Dependency] {
        &mut self.dependencies
    }

    pub(super) fn set_resolved(&mut self, resolved: bool) {
        self.resolved = resolved;
    }
}
