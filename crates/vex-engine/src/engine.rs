//! The engine: registry handle, value store, scratch store, and hooks.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use vex_core::errors::{ErrorInfo, VexError};
use vex_core::hash::stable_hash_string;
use vex_core::provenance::detect_git_hash;

use crate::registry::Registry;
use crate::resolve::resolve_var;
use crate::runner::{ExperimentDef, RunOutcome};

/// Raw assignments: variable name to its current argument value.
pub type VarStore = BTreeMap<String, Value>;

/// Hook invoked before the experiment body. May raise the
/// `AlreadyCompleted` signal to short-circuit the run.
pub type BeforeHook = dyn Fn(&mut Engine) -> Result<(), VexError> + Send + Sync;

/// Hook invoked after the experiment body with the run's outcome.
pub type AfterHook = dyn Fn(&mut Engine, &RunOutcome) -> Result<(), VexError> + Send + Sync;

/// Engine-level settings consumed by the bundled persistence hooks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Directory where result-persistence hooks write their files.
    #[serde(default)]
    pub result_dir: Option<PathBuf>,
}

/// Variable-registry and experiment-dispatch engine.
///
/// The registry is shared by reference across deep copies (read-only after
/// registration); the value store, scratch store, and lock flag are per-copy,
/// so parallel grid workers never observe each other's in-flight state.
#[derive(Clone)]
pub struct Engine {
    registry: Arc<Registry>,
    pub(crate) var_value: VarStore,
    pub(crate) inter_var: VarStore,
    pub(crate) read_only: bool,
    pub(crate) before_hooks: Vec<Arc<BeforeHook>>,
    pub(crate) after_hooks: Vec<Arc<AfterHook>>,
    pub(crate) experiments: Vec<ExperimentDef>,
    settings: Settings,
}

impl Engine {
    /// Builds an engine over a populated registry. Seeds the value store with
    /// a `git_hash` entry when a source-control root is detected (best
    /// effort, absence is non-fatal).
    pub fn new(registry: Registry, settings: Settings) -> Self {
        let mut var_value = VarStore::new();
        if let Some(hash) = detect_git_hash() {
            var_value.insert("git_hash".to_string(), Value::String(hash));
        }
        Self {
            registry: Arc::new(registry),
            var_value,
            inter_var: VarStore::new(),
            read_only: false,
            before_hooks: Vec::new(),
            after_hooks: Vec::new(),
            experiments: Vec::new(),
            settings,
        }
    }

    /// The shared registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Shared handle to the registry, for collaborators that outlive a
    /// borrow of the engine (e.g. CLI value parsers).
    pub fn registry_arc(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Engine settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Registers a before-experiment hook; hooks run in registration order.
    pub fn add_before_hook<F>(&mut self, hook: F)
    where
        F: Fn(&mut Engine) -> Result<(), VexError> + Send + Sync + 'static,
    {
        self.before_hooks.push(Arc::new(hook));
    }

    /// Registers an after-experiment hook; hooks run in registration order.
    pub fn add_after_hook<F>(&mut self, hook: F)
    where
        F: Fn(&mut Engine, &RunOutcome) -> Result<(), VexError> + Send + Sync + 'static,
    {
        self.after_hooks.push(Arc::new(hook));
    }

    /// True while a run holds the value store read-only.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Assigns a raw value to a variable after validating it against the
    /// registry. Fails while a run is in flight.
    pub fn set_variable_value(
        &mut self,
        name: &str,
        value: impl Into<Value>,
    ) -> Result<(), VexError> {
        if self.read_only {
            return Err(VexError::StoreLocked(
                ErrorInfo::new("store-locked", "value store is read-only during a run")
                    .with_context("variable", name),
            ));
        }
        let value = value.into();
        self.registry.validate(name, &value)?;
        self.var_value.insert(name.to_string(), value);
        Ok(())
    }

    /// Bulk assignment; the first invalid entry aborts with its error.
    pub fn set_variable_value_by_map(&mut self, values: &VarStore) -> Result<(), VexError> {
        for (name, value) in values {
            self.set_variable_value(name, value.clone())?;
        }
        Ok(())
    }

    /// Raw assignment for a variable.
    pub fn get_variable_value(&self, name: &str) -> Result<&Value, VexError> {
        self.var_value.get(name).ok_or_else(|| {
            VexError::ValueNotSet(
                ErrorInfo::new("value-not-set", "variable has no assignment")
                    .with_context("variable", name),
            )
        })
    }

    /// Read view of the whole value store.
    pub fn var_values(&self) -> &VarStore {
        &self.var_value
    }

    /// Stores a scratch value for the duration of the current run.
    pub fn set_scratch(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.inter_var.insert(name.into(), value.into());
    }

    /// Reads a scratch value produced earlier in the current run.
    pub fn get_scratch(&self, name: &str) -> Option<&Value> {
        self.inter_var.get(name)
    }

    /// Read view of the scratch store.
    pub fn scratch_values(&self) -> &VarStore {
        &self.inter_var
    }

    /// Deterministic run name derived from the ordered value-store contents.
    pub fn generate_name(&self) -> Result<String, VexError> {
        let hash = stable_hash_string(&self.var_value)?;
        Ok(hash[..16].to_string())
    }

    /// Resolves the current assignment of `name` into its runtime value.
    ///
    /// `value`-kind variables return their raw assignment; `choice`-kind
    /// variables dispatch through the pattern table to a resolver.
    pub fn get_var(&mut self, name: &str) -> Result<Value, VexError> {
        resolve_var(&self.registry, &self.var_value, &mut self.inter_var, name, None)
    }

    /// Resolves `name` against an explicit argument instead of the stored
    /// assignment, leaving the value store untouched.
    pub fn get_var_with_argument(
        &mut self,
        name: &str,
        argument: impl Into<Value>,
    ) -> Result<Value, VexError> {
        let argument = argument.into();
        resolve_var(
            &self.registry,
            &self.var_value,
            &mut self.inter_var,
            name,
            Some(&argument),
        )
    }

    /// Display name of the row the variable's current assignment dispatches
    /// to.
    pub fn get_var_shown_name(&self, name: &str) -> Result<String, VexError> {
        let value = self.get_variable_value(name)?;
        let argument = value.as_str().ok_or_else(|| {
            VexError::ArgumentMismatch(
                ErrorInfo::new("argument-not-string", "choice arguments must be strings")
                    .with_context("variable", name),
            )
        })?;
        self.registry.shown_name(name, argument)
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("var_value", &self.var_value)
            .field("inter_var", &self.inter_var)
            .field("read_only", &self.read_only)
            .field("before_hooks", &self.before_hooks.len())
            .field("after_hooks", &self.after_hooks.len())
            .finish_non_exhaustive()
    }
}
