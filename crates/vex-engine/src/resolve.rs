//! Dispatch from raw assignments to resolver invocations.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde_json::Value;
use tracing::debug;
use vex_core::errors::{ErrorInfo, VexError};
use vex_core::hash::stable_hash_string;
use vex_core::serde::{from_json_slice, to_canonical_json_bytes};

use crate::engine::VarStore;
use crate::registry::{Registry, VarKind};

/// Context handed to every resolver invocation: the named regex captures for
/// the matched pattern, a read view of the value store, the mutable scratch
/// store, and re-entrant resolution for resolvers that need other variables.
pub struct ResolveCtx<'a> {
    registry: &'a Registry,
    vars: &'a VarStore,
    scratch: &'a mut VarStore,
    captures: BTreeMap<String, String>,
}

impl ResolveCtx<'_> {
    /// Raw text of a named capture group from the matched pattern.
    pub fn capture(&self, name: &str) -> Result<&str, VexError> {
        self.captures.get(name).map(String::as_str).ok_or_else(|| {
            VexError::ArgumentMismatch(
                ErrorInfo::new("missing-capture", "pattern has no such capture group")
                    .with_context("capture", name),
            )
        })
    }

    /// Parses a named capture group into the requested type.
    pub fn capture_parsed<T>(&self, name: &str) -> Result<T, VexError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let raw = self.capture(name)?;
        raw.parse().map_err(|err: T::Err| {
            VexError::ArgumentMismatch(
                ErrorInfo::new("capture-parse", "capture group failed to parse")
                    .with_context("capture", name)
                    .with_context("raw", raw)
                    .with_hint(err.to_string()),
            )
        })
    }

    /// All named captures for the matched pattern.
    pub fn captures(&self) -> &BTreeMap<String, String> {
        &self.captures
    }

    /// Raw assignment for a variable, without resolving it.
    pub fn var(&self, name: &str) -> Result<&Value, VexError> {
        self.vars.get(name).ok_or_else(|| {
            VexError::ValueNotSet(
                ErrorInfo::new("value-not-set", "variable has no assignment")
                    .with_context("variable", name),
            )
        })
    }

    /// Read view of the whole value store.
    pub fn vars(&self) -> &VarStore {
        self.vars
    }

    /// Resolves another variable with the same rules the engine applies.
    pub fn get_var(&mut self, name: &str) -> Result<Value, VexError> {
        resolve_var(self.registry, self.vars, self.scratch, name, None)
    }

    /// Resolves another variable against an explicit argument.
    pub fn get_var_with_argument(
        &mut self,
        name: &str,
        argument: impl Into<Value>,
    ) -> Result<Value, VexError> {
        let argument = argument.into();
        resolve_var(self.registry, self.vars, self.scratch, name, Some(&argument))
    }

    /// Reads a scratch-store entry produced earlier in this run.
    pub fn scratch(&self, name: &str) -> Option<&Value> {
        self.scratch.get(name)
    }

    /// Stores a scratch value for reuse by later resolutions in this run.
    pub fn set_scratch(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.scratch.insert(name.into(), value.into());
    }
}

/// Resolves `name` against the value store (or an explicit `argument`),
/// dispatching choice variables through the registry's pattern table.
pub(crate) fn resolve_var(
    registry: &Registry,
    vars: &VarStore,
    scratch: &mut VarStore,
    name: &str,
    argument: Option<&Value>,
) -> Result<Value, VexError> {
    let spec = registry.spec(name).ok_or_else(|| {
        VexError::NotRegistered(
            ErrorInfo::new("unknown-variable", "variable is not registered")
                .with_context("variable", name),
        )
    })?;
    let raw = match argument {
        Some(value) => value.clone(),
        None => vars.get(name).cloned().ok_or_else(|| {
            VexError::ValueNotSet(
                ErrorInfo::new("value-not-set", "variable has no assignment")
                    .with_context("variable", name),
            )
        })?,
    };
    match spec.kind() {
        VarKind::Value(ty) => {
            if !ty.matches(&raw) {
                return Err(VexError::TypeMismatch(
                    ErrorInfo::new("wrong-type", "assignment has the wrong primitive type")
                        .with_context("variable", name)
                        .with_context("expected", ty.name()),
                ));
            }
            Ok(raw)
        }
        VarKind::Choice => {
            let text = raw.as_str().ok_or_else(|| {
                VexError::ArgumentMismatch(
                    ErrorInfo::new("argument-not-string", "choice arguments must be strings")
                        .with_context("variable", name)
                        .with_context("value", raw.to_string()),
                )
            })?;
            let (row, captures) = registry.dispatch(name, text)?;
            for required in &row.required_vars {
                resolve_var(registry, vars, scratch, required, None).map_err(|err| {
                    VexError::MissingRequirement(
                        ErrorInfo::new("requirement-failed", "required variable did not resolve")
                            .with_context("variable", name)
                            .with_context("required", required)
                            .with_hint(err.to_string()),
                    )
                })?;
            }
            let cache_path = match &row.cache_dir {
                Some(dir) => {
                    let path = cache_entry_path(dir, row.pattern.text(), vars)?;
                    if let Some(hit) = read_cached(&path) {
                        debug!(path = %path.display(), "resolver cache hit");
                        return Ok(hit);
                    }
                    Some(path)
                }
                None => None,
            };
            let resolver = row.resolver.clone();
            let mut ctx = ResolveCtx {
                registry,
                vars,
                scratch,
                captures,
            };
            let value = (*resolver)(&mut ctx)?;
            if let Some(path) = cache_path {
                write_cached(&path, &value)?;
                debug!(path = %path.display(), "resolver output cached");
            }
            Ok(value)
        }
    }
}

fn sanitize_pattern(pattern: &str) -> String {
    pattern
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Cache layout: one subdirectory per pattern, one file per distinct full
/// variable-value context. The key hashes the ordered value-store contents
/// together with the pattern text.
fn cache_entry_path(dir: &Path, pattern: &str, vars: &VarStore) -> Result<PathBuf, VexError> {
    let key = stable_hash_string(&(vars, pattern))?;
    Ok(dir
        .join(sanitize_pattern(pattern))
        .join(format!("{}.json", &key[..32])))
}

fn read_cached(path: &Path) -> Option<Value> {
    let bytes = fs::read(path).ok()?;
    from_json_slice(&bytes).ok()
}

fn write_cached(path: &Path, value: &Value) -> Result<(), VexError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| cache_io_error(path, err))?;
    }
    let bytes = to_canonical_json_bytes(value)?;
    fs::write(path, bytes).map_err(|err| cache_io_error(path, err))
}

fn cache_io_error(path: &Path, err: impl ToString) -> VexError {
    VexError::Io(
        ErrorInfo::new("cache-write", "failed to persist resolver cache entry")
            .with_context("path", path.display().to_string())
            .with_hint(err.to_string()),
    )
}
