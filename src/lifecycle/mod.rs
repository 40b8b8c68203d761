//! Module lifecycle orchestration
//!
//! Drives registered modules through Loaded -> Initialised -> Started using the
//! dependency graph as a gate. All transitions, whether requested one at a time
//! or by the convergence loop, are serialized by a single async mutex.

pub mod module;

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Arc,
};

use log::{debug, error, info, warn};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::sync::{broadcast, Mutex};

use crate::{
    core::{SiteError, SiteResult},
    graph::{Component, Dependency, DependencyGraph, COLLECTION_MODULE, STATE_INSTALLED},
    metrics,
};

pub use module::{
    LifecycleState, ModuleConfig, ModuleContext, ModuleDescriptor, ModuleHandler, ModuleInfo,
    NoopModule, Transition,
};

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleEventKind {
    Loaded,
    Initialised,
    Started,
    Stopped,
    Removed,
    Unloaded,
    Failed,
}

impl LifecycleEventKind {
    fn after(transition: Transition) -> Self {
        match transition {
            Transition::Initialise => LifecycleEventKind::Initialised,
            Transition::Start => LifecycleEventKind::Started,
            Transition::Stop => LifecycleEventKind::Stopped,
            Transition::Remove => LifecycleEventKind::Removed,
        }
    }
}

/// Named lifecycle event emitted after each transition attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LifecycleEvent {
    pub module: String,
    pub kind: LifecycleEventKind,
    /// Transition that failed, for `Failed` events
    pub transition: Option<Transition>,
}

impl LifecycleEvent {
    /// Event name in `module:<kind>` form
    pub fn name(&self) -> String {
        let kind = serde_json::to_value(self.kind)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        format!("{}:{kind}", self.module)
    }
}

/// Outcome of one run of the convergence loop
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConvergenceReport {
    pub passes: usize,
    /// Successful transitions in the order they happened
    pub transitions: Vec<(String, Transition)>,
    /// Modules whose handler reported failure during this run
    pub failed: Vec<String>,
    /// Modules left away from their target without a failure of their own
    pub stalled: Vec<String>,
    /// Dependency cycle among components, if one exists
    pub cycle: Option<Vec<String>>,
}

impl ConvergenceReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.stalled.is_empty()
    }
}

struct ModuleEntry {
    version: String,
    dependencies: Vec<String>,
    config: ModuleConfig,
    state: LifecycleState,
    handler: Arc<dyn ModuleHandler>,
    last_error: Option<String>,
}

/// Drives modules toward their configured lifecycle state
pub struct LifecycleOrchestrator {
    graph: Arc<DependencyGraph>,
    modules: RwLock<BTreeMap<String, ModuleEntry>>,
    transitions: Mutex<()>,
    events: broadcast::Sender<LifecycleEvent>,
}

impl LifecycleOrchestrator {
    pub fn new(graph: Arc<DependencyGraph>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            graph,
            modules: RwLock::new(BTreeMap::new()),
            transitions: Mutex::new(()),
            events,
        }
    }

    pub fn graph(&self) -> &Arc<DependencyGraph> {
        &self.graph
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    /// Register a module in the Loaded state and add its component to the graph
    pub fn load_module(&self, descriptor: ModuleDescriptor, config: ModuleConfig) -> SiteResult<()> {
        let ModuleDescriptor {
            name,
            version,
            dependencies,
            handler,
        } = descriptor;

        let mut component = Component::new(COLLECTION_MODULE, &name, &version, STATE_INSTALLED)?;
        let mut declared = Vec::with_capacity(dependencies.len());
        for spec in &dependencies {
            let dependency = Dependency::try_from(spec)?;
            declared.push(dependency.to_string());
            component.add_dependency(dependency);
        }

        {
            let mut modules = self.modules.write();
            if modules.contains_key(&name) {
                return Err(SiteError::Validation(format!(
                    "module '{name}' is already loaded"
                )));
            }
            modules.insert(
                name.clone(),
                ModuleEntry {
                    version: component.version(),
                    dependencies: declared,
                    config,
                    state: LifecycleState::Loaded,
                    handler,
                    last_error: None,
                },
            );
        }

        self.graph.add_component(component);
        info!("Loaded module {name} {version}");
        self.emit(&name, LifecycleEventKind::Loaded, None);
        Ok(())
    }

    /// Replace a module's target configuration; takes effect on the next `converge`
    pub fn configure_module(&self, name: &str, config: ModuleConfig) -> bool {
        match self.modules.write().get_mut(name) {
            Some(entry) => {
                debug!("Module {name} target -> {}", config.target());
                entry.config = config;
                true
            }
            None => false,
        }
    }

    /// Drop a module that is back in the Loaded state
    pub async fn unload_module(&self, name: &str) -> bool {
        let _guard = self.transitions.lock().await;
        {
            let mut modules = self.modules.write();
            match modules.get(name) {
                Some(entry) if entry.state == LifecycleState::Loaded => {
                    modules.remove(name);
                }
                Some(entry) => {
                    warn!("Cannot unload module {name} while {}", entry.state);
                    return false;
                }
                None => return false,
            }
        }
        self.graph.remove_component(COLLECTION_MODULE, name);
        info!("Unloaded module {name}");
        self.emit(name, LifecycleEventKind::Unloaded, None);
        true
    }

    pub async fn initialise_module(&self, name: &str) -> bool {
        self.step_once(name, LifecycleState::Loaded, LifecycleState::Initialised)
            .await
    }

    pub async fn start_module(&self, name: &str) -> bool {
        self.step_once(name, LifecycleState::Initialised, LifecycleState::Started)
            .await
    }

    pub async fn stop_module(&self, name: &str) -> bool {
        self.step_once(name, LifecycleState::Started, LifecycleState::Initialised)
            .await
    }

    pub async fn remove_module(&self, name: &str) -> bool {
        self.step_once(name, LifecycleState::Initialised, LifecycleState::Loaded)
            .await
    }

    pub fn get_module(&self, name: &str) -> Option<ModuleInfo> {
        let modules = self.modules.read();
        modules.get(name).map(|entry| self.info(name, entry))
    }

    /// All modules ordered by name
    pub fn list_modules(&self) -> Vec<ModuleInfo> {
        let modules = self.modules.read();
        modules
            .iter()
            .map(|(name, entry)| self.info(name, entry))
            .collect()
    }

    /// Whether every module sits at its configured target
    pub fn is_converged(&self) -> bool {
        self.modules
            .read()
            .values()
            .all(|entry| entry.state == entry.config.target())
    }

    /// Fail with `CycleDetected` if the component graph contains a dependency cycle
    pub fn check_cycles(&self) -> SiteResult<()> {
        match self.graph.find_cycle() {
            Some(cycle) => Err(SiteError::CycleDetected(
                cycle.iter().map(|k| k.to_string()).collect(),
            )),
            None => Ok(()),
        }
    }

    /// Run the convergence loop until no module changes state.
    ///
    /// Each pass visits every module and attempts at most one transition per
    /// module. Upward steps need a resolved component. Before a module steps
    /// down, dependents the lower state would break are unwound first. A module
    /// whose handler fails is not retried for the rest of the run, and the
    /// dependents unwound on its behalf return to their targets.
    pub async fn converge(&self) -> ConvergenceReport {
        let _guard = self.transitions.lock().await;
        let mut report = ConvergenceReport::default();
        let mut failed: HashSet<String> = HashSet::new();
        // dependent -> modules waiting for it to unwind
        let mut unwinding: HashMap<String, HashSet<String>> = HashMap::new();

        let max_passes = 4 * (self.modules.read().len() + 1) + 8;
        loop {
            report.passes += 1;
            let mut changed = false;

            let names: Vec<String> = self.modules.read().keys().cloned().collect();
            for name in names {
                if failed.contains(&name) {
                    continue;
                }
                let Some((current, target)) = self.position(&name) else {
                    continue;
                };

                let resolved = self.graph.is_resolved(COLLECTION_MODULE, &name);
                let goal = if !resolved || unwinding.contains_key(&name) {
                    LifecycleState::Loaded
                } else {
                    target
                };

                let next = if current < goal {
                    current.next()
                } else if current > goal {
                    current.previous()
                } else {
                    None
                };
                let Some(next) = next else {
                    continue;
                };

                if next < current {
                    let blockers = self.active_dependents_broken_by(&name, next);
                    if !blockers.is_empty() {
                        debug!("Module {name} waits for dependents {blockers:?} to unwind");
                        for blocker in blockers {
                            changed |= unwinding.entry(blocker).or_default().insert(name.clone());
                        }
                        continue;
                    }
                }

                let Some(transition) = Transition::between(current, next) else {
                    continue;
                };
                if self.apply(&name, current, next).await {
                    report.transitions.push((name, transition));
                    changed = true;
                } else {
                    // dependents torn down for this step may climb back
                    unwinding.retain(|_, waiting| {
                        changed |= waiting.remove(&name);
                        !waiting.is_empty()
                    });
                    failed.insert(name.clone());
                    report.failed.push(name);
                }
            }

            if !changed {
                break;
            }
            if report.passes >= max_passes {
                warn!("Convergence stopped after {} passes without settling", report.passes);
                break;
            }
        }

        report.stalled = {
            let modules = self.modules.read();
            modules
                .iter()
                .filter(|(name, entry)| {
                    entry.state != entry.config.target() && !failed.contains(*name)
                })
                .map(|(name, _)| name.clone())
                .collect()
        };

        if let Err(SiteError::CycleDetected(cycle)) = self.check_cycles() {
            error!("Dependency cycle detected: {}", cycle.join(" -> "));
            report.cycle = Some(cycle);
        }
        if !report.stalled.is_empty() {
            for name in &report.stalled {
                let unmet: Vec<String> = self
                    .graph
                    .unsatisfied_dependencies(COLLECTION_MODULE, name)
                    .iter()
                    .map(|d| d.to_string())
                    .collect();
                warn!("Module {name} is stalled, unmet dependencies: {unmet:?}");
            }
        }

        info!(
            "Convergence finished after {} passes: {} transitions, {} failed, {} stalled",
            report.passes,
            report.transitions.len(),
            report.failed.len(),
            report.stalled.len()
        );
        report
    }

    /// One explicitly requested transition, gated like the convergence loop
    async fn step_once(&self, name: &str, from: LifecycleState, to: LifecycleState) -> bool {
        let _guard = self.transitions.lock().await;
        let Some((current, _)) = self.position(name) else {
            warn!("Unknown module {name}");
            return false;
        };

        if current == to {
            return true;
        }
        if current != from {
            warn!("Module {name} is {current}, cannot move to {to}");
            return false;
        }

        if to > from {
            if !self.graph.is_resolved(COLLECTION_MODULE, name) {
                warn!("Module {name} has unresolved dependencies, not moving to {to}");
                return false;
            }
        } else {
            let blockers = self.active_dependents_broken_by(name, to);
            if !blockers.is_empty() {
                warn!("Module {name} is required by {blockers:?}, not moving to {to}");
                return false;
            }
        }

        self.apply(name, from, to).await
    }

    /// Invoke the handler for `from -> to` and record the outcome
    async fn apply(&self, name: &str, from: LifecycleState, to: LifecycleState) -> bool {
        let Some(transition) = Transition::between(from, to) else {
            return false;
        };
        let Some((handler, config)) = ({
            let modules = self.modules.read();
            modules
                .get(name)
                .map(|entry| (entry.handler.clone(), entry.config.config.clone()))
        }) else {
            return false;
        };

        let ctx = ModuleContext {
            name,
            config: &config,
        };
        let result = match transition {
            Transition::Initialise => handler.initialise(&ctx).await,
            Transition::Start => handler.start(&ctx).await,
            Transition::Stop => handler.stop(&ctx).await,
            Transition::Remove => handler.remove(&ctx).await,
        };

        match result {
            Ok(()) => {
                if let Some(entry) = self.modules.write().get_mut(name) {
                    entry.state = to;
                    entry.last_error = None;
                }
                self.graph
                    .update_component_state(COLLECTION_MODULE, name, to.component_state());
                metrics::record_transition(name, transition.as_str(), true);
                info!("Module {name} {from} -> {to}");
                self.emit(name, LifecycleEventKind::after(transition), None);
                true
            }
            Err(e) => {
                let err = SiteError::Lifecycle(format!("{name}: {} failed: {e}", transition.as_str()));
                warn!("{err}");
                if let Some(entry) = self.modules.write().get_mut(name) {
                    entry.last_error = Some(e.to_string());
                }
                metrics::record_transition(name, transition.as_str(), false);
                self.emit(name, LifecycleEventKind::Failed, Some(transition));
                false
            }
        }
    }

    fn position(&self, name: &str) -> Option<(LifecycleState, LifecycleState)> {
        self.modules
            .read()
            .get(name)
            .map(|entry| (entry.state, entry.config.target()))
    }

    /// Modules above Loaded that would lose resolution if `name` moved to `state`
    fn active_dependents_broken_by(&self, name: &str, state: LifecycleState) -> Vec<String> {
        let impacted =
            self.graph
                .impacted_by_state(COLLECTION_MODULE, name, state.component_state());
        let modules = self.modules.read();
        impacted
            .into_iter()
            .filter(|key| key.collection == COLLECTION_MODULE)
            .filter(|key| {
                modules
                    .get(&key.name)
                    .is_some_and(|entry| entry.state > LifecycleState::Loaded)
            })
            .map(|key| key.name)
            .collect()
    }

    fn info(&self, name: &str, entry: &ModuleEntry) -> ModuleInfo {
        ModuleInfo {
            name: name.to_string(),
            version: entry.version.clone(),
            dependencies: entry.dependencies.clone(),
            config: entry.config.clone(),
            state: entry.state,
            target: entry.config.target(),
            initialised: entry.state >= LifecycleState::Initialised,
            started: entry.state == LifecycleState::Started,
            resolved: self.graph.is_resolved(COLLECTION_MODULE, name),
            last_error: entry.last_error.clone(),
        }
    }

    fn emit(&self, module: &str, kind: LifecycleEventKind, transition: Option<Transition>) {
        let _ = self.events.send(LifecycleEvent {
            module: module.to_string(),
            kind,
            transition,
        });
    }
}

/// Handler config accessor used by modules that read their own settings
pub fn config_str<'a>(config: &'a JsonValue, key: &str) -> Option<&'a str> {
    config.get(key).and_then(|v| v.as_str())
}
