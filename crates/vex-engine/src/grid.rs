//! Parameter-grid expansion and sweep dispatch.

use std::collections::BTreeMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use vex_core::errors::{ErrorInfo, VexError};
use vex_core::provenance::checkpoint_commit;

use crate::engine::{Engine, VarStore};
use crate::registry::Registry;
use crate::runner::RunOutcome;

/// Candidate values per variable. Expansion enumerates the cartesian product
/// in key order with values in list order.
pub type GridSpec = BTreeMap<String, Vec<Value>>;

/// Policy for a single assignment's failure during a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// The first failure aborts the whole sweep.
    Abort,
    /// Failures are logged and recorded as null results; siblings continue.
    Continue,
}

/// Options governing a grid sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridOpts {
    /// Cap on the number of assignments executed (front of expansion order).
    #[serde(default)]
    pub max_runs: Option<usize>,
    /// Whether before/after hooks run for each assignment.
    #[serde(default = "GridOpts::default_with_hooks")]
    pub with_hooks: bool,
    /// Failure containment policy.
    #[serde(default = "GridOpts::default_on_failure")]
    pub on_failure: FailurePolicy,
    /// Worker count: 1 runs sequentially in place, 0 uses the pool default.
    #[serde(default = "GridOpts::default_parallelism")]
    pub parallelism: usize,
    /// Record a source-control checkpoint commit before the sweep starts.
    #[serde(default)]
    pub checkpoint: bool,
}

impl GridOpts {
    fn default_with_hooks() -> bool {
        true
    }

    fn default_on_failure() -> FailurePolicy {
        FailurePolicy::Abort
    }

    fn default_parallelism() -> usize {
        1
    }
}

impl Default for GridOpts {
    fn default() -> Self {
        Self {
            max_runs: None,
            with_hooks: Self::default_with_hooks(),
            on_failure: Self::default_on_failure(),
            parallelism: Self::default_parallelism(),
            checkpoint: false,
        }
    }
}

/// Sweep output: assignments and their outcomes, index-aligned with the
/// expansion order regardless of completion order. A `None` result records a
/// contained failure under [`FailurePolicy::Continue`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridReport {
    /// Expanded assignments in enumeration order.
    pub params: Vec<VarStore>,
    /// Per-assignment outcomes, parallel to `params`.
    pub results: Vec<Option<RunOutcome>>,
}

/// Expands one or more grid specs into a flat ordered assignment list.
///
/// Every candidate value is validated against the registry before any
/// assignment is produced; the first invalid value aborts the expansion.
pub fn expand(registry: &Registry, specs: &[GridSpec]) -> Result<Vec<VarStore>, VexError> {
    for spec in specs {
        for (name, values) in spec {
            for value in values {
                registry.validate(name, value)?;
            }
        }
    }
    let mut assignments = Vec::new();
    for spec in specs {
        expand_one(spec, 0, VarStore::new(), &mut assignments);
    }
    Ok(assignments)
}

fn expand_one(spec: &GridSpec, depth: usize, current: VarStore, out: &mut Vec<VarStore>) {
    if depth == spec.len() {
        out.push(current);
        return;
    }
    if let Some((name, values)) = spec.iter().nth(depth) {
        for value in values {
            let mut next = current.clone();
            next.insert(name.clone(), value.clone());
            expand_one(spec, depth + 1, next, out);
        }
    }
}

impl Engine {
    /// Runs `body` over every assignment of the expanded grids.
    ///
    /// With `parallelism == 1` the sweep runs in place and the prior value
    /// store is restored afterward. Otherwise each assignment runs on an
    /// isolated deep copy of the engine dispatched across a worker pool.
    pub fn run_grid<F>(
        &mut self,
        body: F,
        specs: &[GridSpec],
        opts: &GridOpts,
    ) -> Result<GridReport, VexError>
    where
        F: Fn(&mut Engine) -> Result<Value, VexError> + Send + Sync,
    {
        if opts.checkpoint {
            let head = checkpoint_commit("experiment sweep checkpoint")?;
            self.var_value
                .insert("git_hash".to_string(), Value::String(head));
        }
        let mut assignments = expand(self.registry(), specs)?;
        if let Some(cap) = opts.max_runs {
            assignments.truncate(cap);
        }
        let results = if opts.parallelism == 1 {
            self.run_grid_sequential(&body, &assignments, opts)?
        } else {
            self.run_grid_parallel(&body, &assignments, opts)?
        };
        Ok(GridReport {
            params: assignments,
            results,
        })
    }

    fn run_grid_sequential<F>(
        &mut self,
        body: &F,
        assignments: &[VarStore],
        opts: &GridOpts,
    ) -> Result<Vec<Option<RunOutcome>>, VexError>
    where
        F: Fn(&mut Engine) -> Result<Value, VexError>,
    {
        let prior = self.var_value.clone();
        let mut results = Vec::with_capacity(assignments.len());
        for params in assignments {
            if let Err(err) = self.set_variable_value_by_map(params) {
                self.var_value = prior;
                return Err(err);
            }
            match self.run_single_experiment(body, opts.with_hooks) {
                Ok(outcome) => results.push(Some(outcome)),
                Err(err) => match opts.on_failure {
                    FailurePolicy::Abort => {
                        self.var_value = prior;
                        return Err(err);
                    }
                    FailurePolicy::Continue => {
                        warn!(error = %err, "assignment failed, recording null result");
                        results.push(None);
                    }
                },
            }
        }
        self.var_value = prior;
        Ok(results)
    }

    fn run_grid_parallel<F>(
        &self,
        body: &F,
        assignments: &[VarStore],
        opts: &GridOpts,
    ) -> Result<Vec<Option<RunOutcome>>, VexError>
    where
        F: Fn(&mut Engine) -> Result<Value, VexError> + Send + Sync,
    {
        let mut builder = rayon::ThreadPoolBuilder::new();
        if opts.parallelism > 0 {
            builder = builder.num_threads(opts.parallelism);
        }
        let pool = builder.build().map_err(|err| {
            VexError::Io(
                ErrorInfo::new("thread-pool", "failed to build worker pool")
                    .with_hint(err.to_string()),
            )
        })?;
        let collected: Result<Vec<(usize, Option<RunOutcome>)>, VexError> = pool.install(|| {
            assignments
                .par_iter()
                .enumerate()
                .map(|(index, params)| -> Result<(usize, Option<RunOutcome>), VexError> {
                    let mut worker = self.clone();
                    worker.set_variable_value_by_map(params)?;
                    match worker.run_single_experiment(|engine| body(engine), opts.with_hooks) {
                        Ok(outcome) => Ok((index, Some(outcome))),
                        Err(err) => match opts.on_failure {
                            FailurePolicy::Abort => Err(err),
                            FailurePolicy::Continue => {
                                warn!(error = %err, "assignment failed, recording null result");
                                Ok((index, None))
                            }
                        },
                    }
                })
                .collect()
        });
        let mut ordered = collected?;
        ordered.sort_by_key(|(index, _)| *index);
        Ok(ordered.into_iter().map(|(_, result)| result).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cartesian_order_is_key_major() {
        let spec: GridSpec = [
            ("a".to_string(), vec![json!(1), json!(2)]),
            ("b".to_string(), vec![json!(3), json!(4)]),
        ]
        .into_iter()
        .collect();
        let mut out = Vec::new();
        expand_one(&spec, 0, VarStore::new(), &mut out);
        let pairs: Vec<(i64, i64)> = out
            .iter()
            .map(|assignment| {
                (
                    assignment["a"].as_i64().expect("a"),
                    assignment["b"].as_i64().expect("b"),
                )
            })
            .collect();
        assert_eq!(pairs, vec![(1, 3), (1, 4), (2, 3), (2, 4)]);
    }

    #[test]
    fn multiple_specs_concatenate() {
        let first: GridSpec = [("a".to_string(), vec![json!(1)])].into_iter().collect();
        let second: GridSpec = [("a".to_string(), vec![json!(2), json!(3)])]
            .into_iter()
            .collect();
        let mut out = Vec::new();
        expand_one(&first, 0, VarStore::new(), &mut out);
        expand_one(&second, 0, VarStore::new(), &mut out);
        assert_eq!(out.len(), 3);
    }
}
