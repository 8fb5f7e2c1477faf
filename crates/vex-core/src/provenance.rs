//! Source-control and timestamp provenance helpers.

use std::process::Command;

use chrono::{SecondsFormat, Utc};

use crate::errors::{ErrorInfo, VexError};

fn git_output(args: &[&str]) -> Option<String> {
    Command::new("git").args(args).output().ok().and_then(|out| {
        if out.status.success() {
            Some(String::from_utf8_lossy(&out.stdout).trim().to_string())
        } else {
            None
        }
    })
}

/// Returns the current HEAD commit hash when the working directory sits
/// inside a git repository. Absence of git or a repository is not an error.
pub fn detect_git_hash() -> Option<String> {
    git_output(&["rev-parse", "HEAD"]).filter(|hash| !hash.is_empty())
}

/// Stages the working tree and records a checkpoint commit, returning the new
/// HEAD hash. Used by grid sweeps that opt into a pre-sweep checkpoint.
pub fn checkpoint_commit(message: &str) -> Result<String, VexError> {
    let run = |args: &[&str]| -> Result<(), VexError> {
        let out = Command::new("git").args(args).output().map_err(|err| {
            VexError::Io(
                ErrorInfo::new("git-spawn", "failed to invoke git")
                    .with_context("args", args.join(" "))
                    .with_hint(err.to_string()),
            )
        })?;
        if !out.status.success() {
            return Err(VexError::Io(
                ErrorInfo::new("git-status", "git command failed")
                    .with_context("args", args.join(" "))
                    .with_hint(String::from_utf8_lossy(&out.stderr).trim().to_string()),
            ));
        }
        Ok(())
    };
    run(&["add", "-A"])?;
    // --allow-empty keeps the checkpoint meaningful when the tree is clean.
    run(&["commit", "--allow-empty", "-m", message])?;
    detect_git_hash().ok_or_else(|| {
        VexError::Io(ErrorInfo::new(
            "git-head",
            "committed but could not read HEAD",
        ))
    })
}

/// ISO-8601 UTC timestamp for run provenance.
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}
