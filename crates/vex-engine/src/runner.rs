//! Single-experiment lifecycle: lock, hooks, body, timing, cleanup.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info, warn};
use vex_core::errors::{ErrorInfo, VexError};

use crate::engine::{Engine, VarStore};
use crate::grid::{GridOpts, GridReport, GridSpec};

/// Experiment body signature.
pub type ExperimentFn = dyn Fn(&mut Engine) -> Result<Value, VexError> + Send + Sync;

/// Result of one experiment run.
///
/// `Skipped` is the sentinel for a before-hook's already-completed
/// short-circuit; it is also what sweeps record under the continue-on-failure
/// policy (as a `None` slot rather than a `Skipped` value).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "lowercase")]
pub enum RunOutcome {
    /// The body ran to completion with the attached return value.
    Completed(Value),
    /// A before-hook signalled the run's output already exists.
    Skipped,
}

impl RunOutcome {
    /// True for the already-completed short-circuit.
    pub fn is_skipped(&self) -> bool {
        matches!(self, RunOutcome::Skipped)
    }

    /// The completed value, when there is one.
    pub fn value(&self) -> Option<&Value> {
        match self {
            RunOutcome::Completed(value) => Some(value),
            RunOutcome::Skipped => None,
        }
    }
}

/// A pre-registered named experiment with its default configuration overlay.
#[derive(Clone)]
pub struct ExperimentDef {
    pub(crate) name: String,
    pub(crate) body: Arc<ExperimentFn>,
    pub(crate) default_params: VarStore,
    pub(crate) grids: Vec<GridSpec>,
}

impl ExperimentDef {
    /// Declares a named experiment.
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&mut Engine) -> Result<Value, VexError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            body: Arc::new(body),
            default_params: VarStore::new(),
            grids: Vec::new(),
        }
    }

    /// Adds one default assignment applied for the run's duration when the
    /// variable carries no explicit assignment.
    pub fn default_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.default_params.insert(name.into(), value.into());
        self
    }

    /// Attaches a parameter grid used when sweeping this experiment.
    pub fn grid(mut self, spec: GridSpec) -> Self {
        self.grids.push(spec);
        self
    }

    /// Experiment name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attached parameter grids.
    pub fn grids(&self) -> &[GridSpec] {
        &self.grids
    }
}

impl fmt::Debug for ExperimentDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExperimentDef")
            .field("name", &self.name)
            .field("default_params", &self.default_params)
            .field("grids", &self.grids.len())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Executes one experiment against the current assignment.
    ///
    /// The value store is read-only for the run's duration. The scratch store
    /// is cleared and the lock released on every exit path, including hook
    /// and body failures.
    pub fn run_single_experiment<F>(
        &mut self,
        body: F,
        with_hooks: bool,
    ) -> Result<RunOutcome, VexError>
    where
        F: Fn(&mut Engine) -> Result<Value, VexError>,
    {
        self.read_only = true;
        info!(assignment = ?self.var_value, "running experiment");
        let outcome = self.execute_run(&body, with_hooks);
        self.inter_var.clear();
        self.read_only = false;
        outcome
    }

    fn execute_run(
        &mut self,
        body: &dyn Fn(&mut Engine) -> Result<Value, VexError>,
        with_hooks: bool,
    ) -> Result<RunOutcome, VexError> {
        if with_hooks {
            match self.run_before_hooks() {
                Ok(()) => {}
                Err(err) if err.is_already_completed() => {
                    warn!("assignment already ran, skipping");
                    return Ok(RunOutcome::Skipped);
                }
                Err(err) => return Err(err),
            }
        }
        let started = Instant::now();
        let mut value = body(self)?;
        let elapsed = started.elapsed().as_secs_f64();
        if let Value::Object(map) = &mut value {
            map.insert("running_time".to_string(), json!(elapsed));
        }
        let outcome = RunOutcome::Completed(value);
        if with_hooks {
            self.run_after_hooks(&outcome)?;
        }
        Ok(outcome)
    }

    fn run_before_hooks(&mut self) -> Result<(), VexError> {
        let hooks = self.before_hooks.clone();
        for hook in hooks {
            match (*hook)(self) {
                Ok(()) => {}
                Err(err) if err.is_already_completed() => return Err(err),
                Err(err) => {
                    error!(error = %err, "before-hook failed");
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    fn run_after_hooks(&mut self, outcome: &RunOutcome) -> Result<(), VexError> {
        let hooks = self.after_hooks.clone();
        for hook in hooks {
            (*hook)(self, outcome)?;
        }
        Ok(())
    }

    /// Registers a named experiment. Duplicate names fail.
    pub fn register_experiment(&mut self, def: ExperimentDef) -> Result<(), VexError> {
        if self.experiments.iter().any(|entry| entry.name == def.name) {
            return Err(VexError::DuplicateRegistration(
                ErrorInfo::new("experiment-registered-twice", "experiment name already taken")
                    .with_context("experiment", def.name),
            ));
        }
        self.experiments.push(def);
        Ok(())
    }

    /// Names of all registered experiments, in registration order.
    pub fn experiment_names(&self) -> Vec<&str> {
        self.experiments
            .iter()
            .map(|entry| entry.name.as_str())
            .collect()
    }

    /// Looks up a registered experiment.
    pub fn experiment(&self, name: &str) -> Option<&ExperimentDef> {
        self.experiments.iter().find(|entry| entry.name == name)
    }

    /// Runs a named experiment. Its default-parameter overlay is applied for
    /// the run's duration (only for variables without an assignment) and the
    /// prior value store is restored afterward.
    pub fn run_named(&mut self, name: &str, with_hooks: bool) -> Result<RunOutcome, VexError> {
        let def = self
            .experiments
            .iter()
            .find(|entry| entry.name == name)
            .cloned()
            .ok_or_else(|| {
                VexError::NotRegistered(
                    ErrorInfo::new("unknown-experiment", "no experiment under this name")
                        .with_context("experiment", name),
                )
            })?;
        let prior = self.var_value.clone();
        for (key, value) in &def.default_params {
            if !self.var_value.contains_key(key) {
                if let Err(err) = self.set_variable_value(key, value.clone()) {
                    self.var_value = prior;
                    return Err(err);
                }
            }
        }
        let body = def.body.clone();
        let outcome = self.run_single_experiment(move |engine| (*body)(engine), with_hooks);
        self.var_value = prior;
        outcome
    }

    /// Sweeps a named experiment over its attached parameter grids, with the
    /// default-parameter overlay applied for the sweep's duration.
    pub fn run_named_grid(&mut self, name: &str, opts: &GridOpts) -> Result<GridReport, VexError> {
        let def = self
            .experiments
            .iter()
            .find(|entry| entry.name == name)
            .cloned()
            .ok_or_else(|| {
                VexError::NotRegistered(
                    ErrorInfo::new("unknown-experiment", "no experiment under this name")
                        .with_context("experiment", name),
                )
            })?;
        let prior = self.var_value.clone();
        for (key, value) in &def.default_params {
            if !self.var_value.contains_key(key) {
                if let Err(err) = self.set_variable_value(key, value.clone()) {
                    self.var_value = prior;
                    return Err(err);
                }
            }
        }
        let body = def.body.clone();
        let report = self.run_grid(move |engine: &mut Engine| (*body)(engine), &def.grids, opts);
        self.var_value = prior;
        report
    }
}
