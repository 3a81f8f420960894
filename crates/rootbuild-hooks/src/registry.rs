//! Stage-keyed callback registry.

use crate::HookError;
use std::collections::HashMap;
use std::error::Error;
use std::rc::Rc;
use tracing::{debug, trace};

/// What a hook returns.
pub type HookResult = Result<(), Box<dyn Error + Send + Sync>>;

/// A registered callback. Identity is the allocation, so the same `Rc`
/// added twice to a stage is stored once.
pub type Hook<S> = Rc<dyn Fn(&mut S) -> HookResult>;

/// Maps stage names to the callbacks registered for them.
///
/// The registry has no idea which stages exist: callers invoke whatever
/// names they agreed on with the extensions.
pub struct HookRegistry<S> {
    hooks: HashMap<String, Vec<Hook<S>>>,
    order: Vec<String>,
}

impl<S> Default for HookRegistry<S> {
    fn default() -> Self {
        Self {
            hooks: HashMap::new(),
            order: Vec::new(),
        }
    }
}

impl<S> HookRegistry<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `hook` for `stage` unless that exact callback is already
    /// there. Returns whether it was added.
    pub fn add_hook(&mut self, stage: &str, hook: Hook<S>) -> bool {
        if !self.hooks.contains_key(stage) {
            self.order.push(stage.to_string());
        }
        let list = self.hooks.entry(stage.to_string()).or_default();
        if list.iter().any(|h| Rc::ptr_eq(h, &hook)) {
            trace!(stage, "hook already registered");
            return false;
        }
        list.push(hook);
        debug!(stage, count = list.len(), "hook registered");
        true
    }

    /// Wrap `f` in a [`Hook`], register it and hand it back.
    pub fn add_fn<F>(&mut self, stage: &str, f: F) -> Hook<S>
    where
        F: Fn(&mut S) -> HookResult + 'static,
    {
        let hook: Hook<S> = Rc::new(f);
        self.add_hook(stage, Rc::clone(&hook));
        hook
    }

    /// Run every hook of `stage` in registration order.
    ///
    /// The first failure stops the stage and is returned; the remaining hooks
    /// do not run.
    pub fn call_hooks(&self, stage: &str, state: &mut S) -> Result<(), HookError> {
        let Some(list) = self.hooks.get(stage) else {
            trace!(stage, "no hooks");
            return Ok(());
        };
        debug!(stage, count = list.len(), "calling hooks");
        for hook in list {
            hook(state).map_err(|source| HookError::Callback {
                stage: stage.to_string(),
                source,
            })?;
        }
        Ok(())
    }

    /// Like [`call_hooks`](Self::call_hooks), but the stage must have at
    /// least one hook.
    pub fn call_required(&self, stage: &str, state: &mut S) -> Result<(), HookError> {
        if self.hook_count(stage) == 0 {
            return Err(HookError::NotProvided(stage.to_string()));
        }
        self.call_hooks(stage, state)
    }

    /// Stages with at least one hook, in the order they first appeared.
    pub fn stages(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn hook_count(&self, stage: &str) -> usize {
        self.hooks.get(stage).map_or(0, Vec::len)
    }
}

impl<S> std::fmt::Debug for HookRegistry<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: Vec<(&str, usize)> = self
            .order
            .iter()
            .map(|stage| (stage.as_str(), self.hook_count(stage)))
            .collect();
        f.debug_struct("HookRegistry").field("stages", &counts).finish()
    }
}
