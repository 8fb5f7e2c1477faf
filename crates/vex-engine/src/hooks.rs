//! Bundled persistence hooks: skip-if-already-run and result/parameter files.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;
use vex_core::errors::{ErrorInfo, VexError};
use vex_core::serde::to_canonical_json_bytes;

use crate::engine::Engine;
use crate::runner::RunOutcome;

/// Closure deriving a run's file stem from the engine state.
pub type NamerFn = dyn Fn(&Engine) -> Result<String, VexError> + Send + Sync;

/// Default file stem: the engine's deterministic run name.
pub fn default_file_name(engine: &Engine) -> Result<String, VexError> {
    engine.generate_name()
}

fn result_path(engine: &Engine, stem: &str) -> PathBuf {
    let dir = engine
        .settings()
        .result_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("."));
    dir.join(format!("{stem}.json"))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), VexError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| write_error(path, err))?;
    }
    let bytes = to_canonical_json_bytes(value)?;
    fs::write(path, bytes).map_err(|err| write_error(path, err))
}

fn write_error(path: &Path, err: impl ToString) -> VexError {
    VexError::Io(
        ErrorInfo::new("result-write", "failed to write result file")
            .with_context("path", path.display().to_string())
            .with_hint(err.to_string()),
    )
}

/// Before-hook: raises the already-completed signal when the run's result
/// file is already on disk.
pub fn check_result_file_exists(engine: &mut Engine) -> Result<(), VexError> {
    let stem = default_file_name(engine)?;
    let path = result_path(engine, &stem);
    if path.exists() {
        return Err(VexError::AlreadyCompleted(
            ErrorInfo::new("result-exists", "result file already on disk")
                .with_context("path", path.display().to_string()),
        ));
    }
    Ok(())
}

/// Variant of [`check_result_file_exists`] with a custom file namer.
pub fn check_result_file_exists_named<F>(
    namer: F,
) -> impl Fn(&mut Engine) -> Result<(), VexError> + Send + Sync
where
    F: Fn(&Engine) -> Result<String, VexError> + Send + Sync,
{
    move |engine: &mut Engine| {
        let stem = namer(engine)?;
        let path = result_path(engine, &stem);
        if path.exists() {
            return Err(VexError::AlreadyCompleted(
                ErrorInfo::new("result-exists", "result file already on disk")
                    .with_context("path", path.display().to_string()),
            ));
        }
        Ok(())
    }
}

/// After-hook: serializes a completed result to
/// `<result_dir>/<run name>.json`. Skipped runs are not persisted.
pub fn save_result_to_file(engine: &mut Engine, outcome: &RunOutcome) -> Result<(), VexError> {
    let RunOutcome::Completed(value) = outcome else {
        return Ok(());
    };
    let stem = default_file_name(engine)?;
    let path = result_path(engine, &stem);
    write_json(&path, value)?;
    info!(path = %path.display(), "wrote result file");
    Ok(())
}

/// Variant of [`save_result_to_file`] with a custom file namer.
pub fn save_result_to_file_named<F>(
    namer: F,
) -> impl Fn(&mut Engine, &RunOutcome) -> Result<(), VexError> + Send + Sync
where
    F: Fn(&Engine) -> Result<String, VexError> + Send + Sync,
{
    move |engine: &mut Engine, outcome: &RunOutcome| {
        let RunOutcome::Completed(value) = outcome else {
            return Ok(());
        };
        let stem = namer(engine)?;
        let path = result_path(engine, &stem);
        write_json(&path, value)?;
        info!(path = %path.display(), "wrote result file");
        Ok(())
    }
}

/// After-hook: serializes the run's full assignment to
/// `<result_dir>/<run name>_params.json`.
pub fn save_params_to_file(engine: &mut Engine, outcome: &RunOutcome) -> Result<(), VexError> {
    if outcome.is_skipped() {
        return Ok(());
    }
    let stem = default_file_name(engine)?;
    let path = result_path(engine, &format!("{stem}_params"));
    write_json(&path, engine.var_values())?;
    info!(path = %path.display(), "wrote parameter file");
    Ok(())
}
