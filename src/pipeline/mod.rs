//! Priority-ordered, suspendable request pipeline
//!
//! A pipeline ("execution path") runs its stages from highest to lowest
//! priority. Each stage receives a [`Next`] continuation; a stage that returns
//! without running it ends the request there. Errors and panics raised by a
//! stage or one of its callbacks abort the rest of the chain and reach the
//! pipeline's error handler exactly once.

pub mod registry;
pub mod stages;

use std::{
    any::Any,
    collections::HashMap,
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use futures::{future::BoxFuture, FutureExt};
use log::{debug, error, info};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use validator::Validate;

use crate::{
    config_error,
    core::{RequestContext, SiteError, SiteResult},
    metrics,
};

pub use registry::StageRegistry;

/// A named unit of request processing
#[async_trait]
pub trait StageHandler: Send + Sync {
    /// Process the request; call `next.run(ctx)` to continue the chain.
    async fn run(&self, ctx: &mut RequestContext, config: &JsonValue, next: Next<'_>)
        -> SiteResult<()>;
}

/// Hook run before or after a stage
#[async_trait]
pub trait StateCallback: Send + Sync {
    async fn call(&self, ctx: &mut RequestContext, stage: &str) -> SiteResult<()>;
}

#[async_trait]
impl<F> StateCallback for F
where
    F: Fn(&mut RequestContext, &str) -> SiteResult<()> + Send + Sync,
{
    async fn call(&self, ctx: &mut RequestContext, stage: &str) -> SiteResult<()> {
        self(ctx, stage)
    }
}

/// Produces the user-visible response for a failed request
#[async_trait]
pub trait ErrorHandler: Send + Sync {
    async fn handle(&self, ctx: &mut RequestContext, error: &SiteError);
}

/// Writes the error's status code and message as a plain-text response
pub struct DefaultErrorHandler;

#[async_trait]
impl ErrorHandler for DefaultErrorHandler {
    async fn handle(&self, ctx: &mut RequestContext, error: &SiteError) {
        let status = error.status_code();
        let reason = status.canonical_reason().unwrap_or("Error");
        ctx.response.headers.clear();
        ctx.response.text(status, format!("{} {reason}", status.as_u16()));
    }
}

/// One entry of an execution-path definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct StageSpec {
    #[validate(length(min = 1))]
    pub name: String,
    #[validate(range(min = 0))]
    pub priority: i32,
    #[serde(default)]
    pub config: JsonValue,
}

impl StageSpec {
    pub fn new(name: impl Into<String>, priority: i32) -> Self {
        Self {
            name: name.into(),
            priority,
            config: JsonValue::Null,
        }
    }

    pub fn with_config(mut self, config: JsonValue) -> Self {
        self.config = config;
        self
    }
}

#[derive(Clone)]
pub struct Stage {
    pub name: String,
    pub priority: i32,
    pub config: JsonValue,
    handler: Arc<dyn StageHandler>,
}

#[derive(Clone)]
struct Callback {
    name: String,
    priority: i32,
    handler: Arc<dyn StateCallback>,
}

/// How a pipeline run ended
#[derive(Debug)]
pub enum Outcome {
    /// Every stage continued to the end of the chain
    Completed,
    /// The named stage returned without continuing
    ShortCircuited(String),
    /// The error handler was invoked with this error
    Failed(SiteError),
}

impl Outcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }
}

/// Immutable snapshot of a pipeline's configuration
#[derive(Clone)]
struct Chain {
    name: String,
    path: String,
    priority: i32,
    timeout: Option<Duration>,
    stages: Vec<Stage>,
    before: HashMap<String, Vec<Callback>>,
    after: HashMap<String, Vec<Callback>>,
    error_handler: Arc<dyn ErrorHandler>,
}

/// Continuation handed to each stage
pub struct Next<'a> {
    chain: &'a Chain,
    index: usize,
    continued: &'a AtomicBool,
    stopped: &'a OnceCell<String>,
}

impl Next<'_> {
    /// Run the remaining stages of the chain
    pub async fn run(self, ctx: &mut RequestContext) -> SiteResult<()> {
        self.continued.store(true, Ordering::Release);
        self.chain.run_stage(self.index, ctx, self.stopped).await
    }

    /// Name of the stage that would run next, if any
    pub fn stage(&self) -> Option<&str> {
        self.chain.stages.get(self.index).map(|s| s.name.as_str())
    }
}

impl Chain {
    fn position(&self, stage: &str) -> Option<usize> {
        self.stages.iter().position(|s| s.name == stage)
    }

    fn run_stage<'b>(
        &'b self,
        index: usize,
        ctx: &'b mut RequestContext,
        stopped: &'b OnceCell<String>,
    ) -> BoxFuture<'b, SiteResult<()>> {
        async move {
            let Some(stage) = self.stages.get(index) else {
                return Ok(());
            };

            if let Some(callbacks) = self.before.get(&stage.name) {
                for callback in callbacks {
                    callback.handler.call(ctx, &stage.name).await?;
                }
            }

            let continued = AtomicBool::new(false);
            let next = Next {
                chain: self,
                index: index + 1,
                continued: &continued,
                stopped,
            };
            stage.handler.run(ctx, &stage.config, next).await?;

            if !continued.load(Ordering::Acquire) && index + 1 < self.stages.len() {
                debug!(
                    "Path {} short-circuited at stage {}",
                    self.name, stage.name
                );
                let _ = stopped.set(stage.name.clone());
            }

            if let Some(callbacks) = self.after.get(&stage.name) {
                for callback in callbacks {
                    callback.handler.call(ctx, &stage.name).await?;
                }
            }
            Ok(())
        }
        .boxed()
    }
}

fn insert_by_priority<T>(list: &mut Vec<T>, item: T, priority: i32, priority_of: impl Fn(&T) -> i32) {
    let pos = list
        .iter()
        .position(|existing| priority_of(existing) < priority)
        .unwrap_or(list.len());
    list.insert(pos, item);
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Validate and normalise a mount prefix: leading slash, no trailing slash
pub fn normalize_path(path: &str) -> SiteResult<String> {
    if !path.starts_with('/') {
        return Err(config_error!("mount path '{}' must start with '/'", path));
    }
    if path.contains(['?', '#', '*', '{']) {
        return Err(config_error!("mount path '{}' must be a plain prefix", path));
    }
    let trimmed = path.trim_end_matches('/');
    Ok(if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    })
}

/// Mount prefixes claimed by the execution paths of one router.
///
/// A prefix belongs to at most one path; lookups use normalized prefixes.
#[derive(Debug, Default)]
pub struct MountTable {
    prefixes: parking_lot::Mutex<HashMap<String, String>>,
}

impl MountTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `prefix` for path `name`, releasing the prefix `name` held before
    pub fn claim(&self, name: &str, prefix: &str) -> SiteResult<()> {
        let mut prefixes = self.prefixes.lock();
        match prefixes.get(prefix) {
            Some(owner) if owner == name => return Ok(()),
            Some(owner) => {
                return Err(config_error!(
                    "mount path '{}' is already used by execution path '{}'",
                    prefix,
                    owner
                ))
            }
            None => {}
        }
        prefixes.retain(|_, owner| owner != name);
        prefixes.insert(prefix.to_string(), name.to_string());
        Ok(())
    }

    pub fn release(&self, name: &str) {
        self.prefixes.lock().retain(|_, owner| owner != name);
    }

    /// Path currently mounted at `prefix`
    pub fn owner(&self, prefix: &str) -> Option<String> {
        self.prefixes.lock().get(prefix).cloned()
    }
}

/// A named execution path
pub struct Pipeline {
    chain: ArcSwap<Chain>,
    writer: parking_lot::Mutex<()>,
    /// Set while mounted on a router; path changes are checked against it
    mounts: parking_lot::Mutex<Option<Arc<MountTable>>>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            chain: ArcSwap::from_pointee(Chain {
                name: name.into(),
                path: "/".to_string(),
                priority: 0,
                timeout: None,
                stages: Vec::new(),
                before: HashMap::new(),
                after: HashMap::new(),
                error_handler: Arc::new(DefaultErrorHandler),
            }),
            writer: parking_lot::Mutex::new(()),
            mounts: parking_lot::Mutex::new(None),
        }
    }

    pub fn name(&self) -> String {
        self.chain.load().name.clone()
    }

    pub fn path(&self) -> String {
        self.chain.load().path.clone()
    }

    pub fn priority(&self) -> i32 {
        self.chain.load().priority
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.chain.load().timeout
    }

    /// Stage names in execution order
    pub fn stage_names(&self) -> Vec<String> {
        self.chain
            .load()
            .stages
            .iter()
            .map(|s| s.name.clone())
            .collect()
    }

    pub fn has_state(&self, name: &str) -> bool {
        self.chain.load().position(name).is_some()
    }

    fn update<R>(&self, f: impl FnOnce(&mut Chain) -> SiteResult<R>) -> SiteResult<R> {
        let _guard = self.writer.lock();
        let mut chain = Chain::clone(&self.chain.load());
        let result = f(&mut chain)?;
        self.chain.store(Arc::new(chain));
        Ok(result)
    }

    /// Insert a stage in priority order; equal priorities keep insertion order
    pub fn add_state(
        &self,
        name: &str,
        handler: Arc<dyn StageHandler>,
        priority: i32,
        config: JsonValue,
    ) -> SiteResult<()> {
        if name.trim().is_empty() {
            return Err(SiteError::Validation("stage name must not be empty".to_string()));
        }
        if priority < 0 {
            return Err(SiteError::Validation(format!(
                "stage '{name}' has invalid priority {priority}"
            )));
        }

        self.update(|chain| {
            if chain.position(name).is_some() {
                return Err(config_error!(
                    "duplicate stage '{}' in path '{}'",
                    name,
                    chain.name
                ));
            }
            let stage = Stage {
                name: name.to_string(),
                priority,
                config,
                handler,
            };
            insert_by_priority(&mut chain.stages, stage, priority, |s| s.priority);
            debug!("Path {} added stage {name} ({priority})", chain.name);
            Ok(())
        })
    }

    /// Remove a stage; its callbacks stay registered under the stage name
    pub fn remove_state(&self, name: &str) -> bool {
        self.update(|chain| match chain.position(name) {
            Some(pos) => {
                chain.stages.remove(pos);
                Ok(())
            }
            None => Err(SiteError::NotFound(name.to_string())),
        })
        .is_ok()
    }

    pub fn add_before_state_callback(
        &self,
        stage: &str,
        name: &str,
        callback: Arc<dyn StateCallback>,
        priority: i32,
    ) -> SiteResult<()> {
        self.update(|chain| {
            Self::add_callback(chain.before.entry(stage.to_string()).or_default(), stage, name, callback, priority)
        })
    }

    pub fn add_after_state_callback(
        &self,
        stage: &str,
        name: &str,
        callback: Arc<dyn StateCallback>,
        priority: i32,
    ) -> SiteResult<()> {
        self.update(|chain| {
            Self::add_callback(chain.after.entry(stage.to_string()).or_default(), stage, name, callback, priority)
        })
    }

    /// Remove a before or after callback by name
    pub fn remove_state_callback(&self, stage: &str, name: &str) -> bool {
        self.update(|chain| {
            let mut removed = false;
            for table in [&mut chain.before, &mut chain.after] {
                if let Some(list) = table.get_mut(stage) {
                    let before = list.len();
                    list.retain(|c| c.name != name);
                    removed |= list.len() != before;
                }
            }
            if removed {
                Ok(())
            } else {
                Err(SiteError::NotFound(name.to_string()))
            }
        })
        .is_ok()
    }

    fn add_callback(
        list: &mut Vec<Callback>,
        stage: &str,
        name: &str,
        handler: Arc<dyn StateCallback>,
        priority: i32,
    ) -> SiteResult<()> {
        if list.iter().any(|c| c.name == name) {
            return Err(config_error!(
                "duplicate callback '{}' on stage '{}'",
                name,
                stage
            ));
        }
        let callback = Callback {
            name: name.to_string(),
            priority,
            handler,
        };
        insert_by_priority(list, callback, priority, |c| c.priority);
        Ok(())
    }

    pub fn set_error_handler(&self, handler: Arc<dyn ErrorHandler>) {
        let _ = self.update(|chain| {
            chain.error_handler = handler;
            Ok(())
        });
    }

    /// Set the mount prefix used by the router.
    ///
    /// Once mounted, a prefix already used by another path of the same router
    /// is a configuration error and the current prefix is kept.
    pub fn set_path(&self, prefix: &str) -> SiteResult<()> {
        let path = normalize_path(prefix)?;
        let mounts = self.mounts.lock();
        if let Some(table) = mounts.as_ref() {
            table.claim(&self.name(), &path)?;
        }
        self.update(|chain| {
            chain.path = path;
            Ok(())
        })
    }

    /// Router priority; ties are broken by the longer prefix
    pub fn set_priority(&self, priority: i32) {
        let _ = self.update(|chain| {
            chain.priority = priority;
            Ok(())
        });
    }

    /// Claim the current prefix in a router's mount table
    pub(crate) fn attach(&self, table: Arc<MountTable>) -> SiteResult<()> {
        let mut mounts = self.mounts.lock();
        table.claim(&self.name(), &self.path())?;
        *mounts = Some(table);
        Ok(())
    }

    pub(crate) fn detach(&self) {
        if let Some(table) = self.mounts.lock().take() {
            table.release(&self.name());
        }
    }

    /// Per-request deadline covering the whole chain
    pub fn set_timeout(&self, timeout: Option<Duration>) {
        let _ = self.update(|chain| {
            chain.timeout = timeout;
            Ok(())
        });
    }

    /// Run the chain from its highest-priority stage
    pub async fn execute(&self, ctx: &mut RequestContext) -> Outcome {
        let chain = self.chain.load_full();
        self.run(chain, 0, ctx).await
    }

    /// Run the chain starting at a named stage
    pub async fn execute_from(&self, ctx: &mut RequestContext, stage: &str) -> SiteResult<Outcome> {
        let chain = self.chain.load_full();
        let start = chain.position(stage).ok_or_else(|| {
            SiteError::NotFound(format!("stage '{stage}' in path '{}'", chain.name))
        })?;
        Ok(self.run(chain, start, ctx).await)
    }

    async fn run(&self, chain: Arc<Chain>, start: usize, ctx: &mut RequestContext) -> Outcome {
        ctx.execution_path = Some(chain.name.clone());
        let stopped = OnceCell::new();

        let result = {
            let run = AssertUnwindSafe(chain.run_stage(start, ctx, &stopped)).catch_unwind();
            let finished = match chain.timeout {
                Some(deadline) => match tokio::time::timeout(deadline, run).await {
                    Ok(finished) => finished,
                    Err(_) => Ok(Err(SiteError::Timeout(format!(
                        "path '{}' exceeded {}ms",
                        chain.name,
                        deadline.as_millis()
                    )))),
                },
                None => run.await,
            };
            finished.unwrap_or_else(|panic| {
                Err(SiteError::Pipeline(format!(
                    "stage panicked: {}",
                    panic_message(panic)
                )))
            })
        };

        let elapsed = ctx.request_start.elapsed().as_secs_f64() * 1000.0;
        metrics::record_request(&chain.name, elapsed);

        match result {
            Ok(()) => match stopped.into_inner() {
                Some(stage) => {
                    metrics::record_short_circuit(&chain.name, &stage);
                    Outcome::ShortCircuited(stage)
                }
                None => Outcome::Completed,
            },
            Err(e) => {
                error!(
                    "Request {} failed on path {}: {e}",
                    ctx.request_id, chain.name
                );
                metrics::record_error(&chain.name);
                chain.error_handler.handle(ctx, &e).await;
                ctx.response.finished = true;
                Outcome::Failed(e)
            }
        }
    }

    /// Log the mounted stages once at startup
    pub fn describe(&self) {
        let chain = self.chain.load();
        let stages: Vec<String> = chain
            .stages
            .iter()
            .map(|s| format!("{}({})", s.name, s.priority))
            .collect();
        info!(
            "Execution path {} at {} [{}]",
            chain.name,
            chain.path,
            stages.join(", ")
        );
    }
}
