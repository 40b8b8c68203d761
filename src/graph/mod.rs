//! Component dependency graph
//!
//! Tracks which named, versioned components satisfy each other's declared
//! requirements. Every mutation triggers a full resolution pass over the
//! registry; the pass runs under the registry's write lock so concurrent
//! mutations never observe a half-resolved graph.

pub mod component;

use std::collections::{BTreeMap, HashMap, HashSet};

use log::{debug, info};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;

pub use component::{
    Component, ComponentKey, Dependency, DependencySpec, COLLECTION_CORE, COLLECTION_MODULE,
    COLLECTION_THEME, STATE_INITIALISED, STATE_INSTALLED, STATE_STARTED,
};

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentEventKind {
    Resolved,
    Unresolved,
}

/// Emitted when a component's resolution flips
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentEvent {
    pub key: ComponentKey,
    pub kind: ComponentEventKind,
}

/// Registry of components keyed by (collection, name)
pub struct DependencyGraph {
    components: RwLock<BTreeMap<ComponentKey, Component>>,
    events: broadcast::Sender<ComponentEvent>,
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl DependencyGraph {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            components: RwLock::new(BTreeMap::new()),
            events,
        }
    }

    /// Receive resolved/unresolved transitions from subsequent mutations
    pub fn subscribe(&self) -> broadcast::Receiver<ComponentEvent> {
        self.events.subscribe()
    }

    /// Insert or replace a component and re-resolve the registry.
    ///
    /// Returns the transitions the mutation caused. A component that was not
    /// registered before has no prior status and never reports a transition itself.
    pub fn add_component(&self, component: Component) -> Vec<ComponentEvent> {
        let mut components = self.components.write();
        let key = component.key().clone();
        debug!("Registering component {key} at {}", component.version());

        let mut component = component;
        let fresh = match components.get(&key) {
            Some(previous) => {
                component.set_resolved(previous.is_resolved());
                None
            }
            None => Some(key.clone()),
        };
        components.insert(key, component);

        let events = Self::resolve(&mut components, fresh.as_ref());
        drop(components);
        self.publish(&events);
        events
    }

    /// Remove a component; dependents re-resolve against its absence
    pub fn remove_component(&self, collection: &str, name: &str) -> bool {
        let mut components = self.components.write();
        let key = ComponentKey::new(collection, name);
        if components.remove(&key).is_none() {
            return false;
        }
        debug!("Removed component {key}");

        let events = Self::resolve(&mut components, None);
        drop(components);
        self.publish(&events);
        true
    }

    /// Change a component's state and re-resolve the registry
    pub fn update_component_state(&self, collection: &str, name: &str, state: &str) -> bool {
        if state.trim().is_empty() {
            return false;
        }

        let mut components = self.components.write();
        let key = ComponentKey::new(collection, name);
        match components.get_mut(&key) {
            Some(component) => {
                debug!("Component {key} state {} -> {state}", component.state());
                component.set_state(state);
            }
            None => return false,
        }

        let events = Self::resolve(&mut components, None);
        drop(components);
        self.publish(&events);
        true
    }

    pub fn get_component(&self, collection: &str, name: &str) -> Option<Component> {
        self.components
            .read()
            .get(&ComponentKey::new(collection, name))
            .cloned()
    }

    /// All components ordered by collection then name
    pub fn list_components(&self) -> Vec<Component> {
        self.components.read().values().cloned().collect()
    }

    /// Whether the component exists and all its dependencies are satisfied
    pub fn is_resolved(&self, collection: &str, name: &str) -> bool {
        self.components
            .read()
            .get(&ComponentKey::new(collection, name))
            .is_some_and(|c| c.is_resolved())
    }

    /// Dependencies that kept the component unresolved on the last pass
    pub fn unsatisfied_dependencies(&self, collection: &str, name: &str) -> Vec<Dependency> {
        self.components
            .read()
            .get(&ComponentKey::new(collection, name))
            .map(|c| {
                c.dependencies()
                    .iter()
                    .filter(|d| !d.satisfied)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Components declaring a dependency on `collection/name`
    pub fn dependents_of(&self, collection: &str, name: &str) -> Vec<ComponentKey> {
        let target = ComponentKey::new(collection, name);
        self.components
            .read()
            .values()
            .filter(|c| c.dependencies().iter().any(|d| d.target == target))
            .map(|c| c.key().clone())
            .collect()
    }

    /// Resolved components that would become unresolved if `collection/name`
    /// moved to `state`, evaluated without mutating the registry
    pub fn impacted_by_state(&self, collection: &str, name: &str, state: &str) -> Vec<ComponentKey> {
        let components = self.components.read();
        let target = ComponentKey::new(collection, name);
        let Some(current) = components.get(&target) else {
            return Vec::new();
        };
        let hypothetical = Some((current.version_number(), state));

        components
            .values()
            .filter(|c| c.is_resolved())
            .filter(|c| {
                c.dependencies()
                    .iter()
                    .any(|d| d.target == target && !d.is_met_by(hypothetical))
            })
            .map(|c| c.key().clone())
            .collect()
    }

    /// Find one dependency cycle among registered components.
    ///
    /// The returned path starts and ends with the same component.
    pub fn find_cycle(&self) -> Option<Vec<ComponentKey>> {
        let components = self.components.read();
        let mut finished: HashSet<&ComponentKey> = HashSet::new();

        for start in components.keys() {
            if finished.contains(start) {
                continue;
            }
            let mut stack: Vec<&ComponentKey> = Vec::new();
            if let Some(cycle) = Self::visit(&components, start, &mut stack, &mut finished) {
                return Some(cycle);
            }
        }
        None
    }

    fn visit<'a>(
        components: &'a BTreeMap<ComponentKey, Component>,
        key: &'a ComponentKey,
        stack: &mut Vec<&'a ComponentKey>,
        finished: &mut HashSet<&'a ComponentKey>,
    ) -> Option<Vec<ComponentKey>> {
        if let Some(pos) = stack.iter().position(|k| *k == key) {
            let mut cycle: Vec<ComponentKey> = stack[pos..].iter().map(|k| (*k).clone()).collect();
            cycle.push(key.clone());
            return Some(cycle);
        }
        if finished.contains(key) {
            return None;
        }

        stack.push(key);
        if let Some(component) = components.get(key) {
            for dependency in component.dependencies() {
                if let Some((target, _)) = components.get_key_value(&dependency.target) {
                    if let Some(cycle) = Self::visit(components, target, stack, finished) {
                        return Some(cycle);
                    }
                }
            }
        }
        stack.pop();
        finished.insert(key);
        None
    }

    /// Recompute every dependency's `satisfied` flag and every component's
    /// resolution, returning the components whose resolution flipped
    fn resolve(
        components: &mut BTreeMap<ComponentKey, Component>,
        fresh: Option<&ComponentKey>,
    ) -> Vec<ComponentEvent> {
        let lookup: HashMap<ComponentKey, (u32, String)> = components
            .iter()
            .map(|(k, c)| (k.clone(), (c.version_number(), c.state().to_string())))
            .collect();

        let mut events = Vec::new();
        for (key, component) in components.iter_mut() {
            let was_resolved = component.is_resolved();

            let mut resolved = true;
            for dependency in component.dependencies_mut() {
                let target = lookup
                    .get(&dependency.target)
                    .map(|(version, state)| (*version, state.as_str()));
                dependency.satisfied = dependency.is_met_by(target);
                resolved &= dependency.satisfied;
            }
            component.set_resolved(resolved);

            if fresh == Some(key) || was_resolved == resolved {
                continue;
            }

            let kind = if resolved {
                ComponentEventKind::Resolved
            } else {
                ComponentEventKind::Unresolved
            };
            info!("Component {key} is now {kind:?}");
            events.push(ComponentEvent {
                key: key.clone(),
                kind,
            });
        }
        events
    }

    fn publish(&self, events: &[ComponentEvent]) {
        for event in events {
            // No subscribers is fine
            let _ = self.events.send(event.clone());
        }
    }
}
