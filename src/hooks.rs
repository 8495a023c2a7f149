//! Hook callbacks around sync steps
//!
//! Hosts register named [`Hook`] implementations in a [`HookRegistry`] at
//! startup; the configuration refers to them by name. The engine resolves the
//! names once at construction, so a dangling reference fails before any
//! request is served.
//!
//! A before-hook may decline its step by returning [`HookOutcome::Abort`];
//! that is a controlled cancellation, distinct from the hook returning an
//! error. After-hooks can do neither: their failures are logged and swallowed.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::config::RepositoryConfig;
use crate::error::{CapstanError, CapstanResult};

/// What a hook observed and where in the run it fired.
#[derive(Debug)]
pub enum HookEvent<'a> {
    /// Before anything else, with the raw request body
    BeforeAll { body: &'a [u8] },
    /// Before one repository's sync step
    BeforeRepository {
        body: &'a [u8],
        repository: &'a RepositoryConfig,
    },
    /// After one repository's sync step, regardless of its outcome
    AfterRepository { repository: &'a RepositoryConfig },
    /// After every repository has been processed
    AfterAll,
}

/// A before-hook's verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookOutcome {
    /// Carry on with the step
    Continue,
    /// Stop the enclosing step; remaining before-hooks are skipped
    Abort,
}

/// User-supplied callable invoked around sync steps.
///
/// The error type is opaque to the engine; a returned error isolates to the
/// current step exactly like an abort, but is reported as a failure rather
/// than a cancellation.
pub trait Hook: Send + Sync {
    fn call(&self, event: &HookEvent<'_>) -> anyhow::Result<HookOutcome>;
}

impl<F> Hook for F
where
    F: Fn(&HookEvent<'_>) -> anyhow::Result<HookOutcome> + Send + Sync,
{
    fn call(&self, event: &HookEvent<'_>) -> anyhow::Result<HookOutcome> {
        self(event)
    }
}

/// A hook paired with the name it was registered under, for logging.
#[derive(Clone)]
pub struct NamedHook {
    name: String,
    hook: Arc<dyn Hook>,
}

impl NamedHook {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for NamedHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedHook").field("name", &self.name).finish()
    }
}

/// Name → hook bindings, populated by the host before the engine is built.
#[derive(Default)]
pub struct HookRegistry {
    hooks: HashMap<String, Arc<dyn Hook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook under a name. Re-registering a name replaces the
    /// previous binding.
    pub fn register(&mut self, name: impl Into<String>, hook: impl Hook + 'static) {
        self.hooks.insert(name.into(), Arc::new(hook));
    }

    /// Resolve an ordered list of configured names into callable hooks.
    pub fn resolve(&self, names: &[String]) -> CapstanResult<Vec<NamedHook>> {
        names
            .iter()
            .map(|name| {
                self.hooks
                    .get(name)
                    .cloned()
                    .map(|hook| NamedHook {
                        name: name.clone(),
                        hook,
                    })
                    .ok_or_else(|| CapstanError::MissingHook { name: name.clone() })
            })
            .collect()
    }
}

/// Run before-hooks in declared order.
///
/// The first abort or error stops the list; the caller treats either as the
/// failure of the enclosing step named by `step`.
pub fn run_before(step: &str, hooks: &[NamedHook], event: &HookEvent<'_>) -> CapstanResult<()> {
    for named in hooks {
        match named.hook.call(event) {
            Ok(HookOutcome::Continue) => {}
            Ok(HookOutcome::Abort) => {
                return Err(CapstanError::HookAborted {
                    step: step.to_string(),
                })
            }
            Err(source) => {
                return Err(CapstanError::HookFailed {
                    step: step.to_string(),
                    message: format!("{} ({})", source, named.name),
                })
            }
        }
    }
    Ok(())
}

/// Run after-hooks in declared order, swallowing failures.
///
/// After-hooks observe the step outcome and must all get their turn; an abort
/// verdict has no meaning here and is ignored.
pub fn run_after(step: &str, hooks: &[NamedHook], event: &HookEvent<'_>) {
    for named in hooks {
        if let Err(source) = named.hook.call(event) {
            warn!(step, hook = named.name(), error = %source, "after-hook failed");
        }
    }
}
