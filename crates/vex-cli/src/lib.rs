//! Command-line surface generated from a populated engine.
//!
//! One flag per registered variable: choice flags take a string validated
//! against the registry's pattern tables, value flags use a parser typed to
//! the declared primitive. Variables carrying a registry default become
//! optional; everything else is required and missing flags fail parsing with
//! clap's usage error.

use clap::builder::PossibleValuesParser;
use clap::{Arg, ArgAction, ArgMatches, Command};
use serde_json::{json, Value};
use vex_core::errors::{ErrorInfo, VexError};
use vex_engine::{Engine, PrimitiveType, VarKind};

/// Selections parsed from the generated flags that are not variable
/// assignments.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CliSelection {
    /// `--no-hooks` was passed: run without before/after hooks.
    pub no_hooks: bool,
    /// `--experiment <name>` selection, when named experiments exist.
    pub experiment: Option<String>,
}

/// Builds a `clap` command with one flag per registered variable, a
/// `--no-hooks` flag, and an `--experiment` flag when the engine carries
/// named experiments.
pub fn build_command(engine: &Engine, bin_name: &str) -> Command {
    let mut cmd = Command::new(bin_name.to_string()).about("parameterized experiment runner");
    for (name, spec) in engine.registry().variables() {
        let mut arg = Arg::new(name.clone())
            .long(name.clone())
            .value_name(name.to_uppercase());
        match spec.kind() {
            VarKind::Choice => {
                let registry = engine.registry_arc();
                let variable = name.clone();
                arg = arg.value_parser(move |raw: &str| -> Result<String, String> {
                    let candidate = Value::String(raw.to_string());
                    if registry.matches(&variable, &candidate) {
                        Ok(raw.to_string())
                    } else {
                        let patterns = registry
                            .spec(&variable)
                            .map(|spec| spec.pattern_texts().join(", "))
                            .unwrap_or_default();
                        Err(format!(
                            "\"{raw}\" matches no registered pattern for --{variable} \
                             (patterns: {patterns})"
                        ))
                    }
                });
                let mut help = spec
                    .doc()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("choice variable {name}"));
                let patterns = spec.pattern_texts();
                if !patterns.is_empty() {
                    help.push_str(&format!(" [patterns: {}]", patterns.join(", ")));
                }
                arg = arg.help(help);
                match spec.default().and_then(Value::as_str) {
                    Some(default) => arg = arg.default_value(default.to_string()),
                    None => arg = arg.required(true),
                }
            }
            VarKind::Value(ty) => {
                arg = match ty {
                    PrimitiveType::Int => arg.value_parser(clap::value_parser!(i64)),
                    PrimitiveType::Float => arg.value_parser(clap::value_parser!(f64)),
                    PrimitiveType::Bool => arg.value_parser(clap::value_parser!(bool)),
                    PrimitiveType::Str => arg.value_parser(clap::value_parser!(String)),
                };
                arg = arg
                    .help(
                        spec.doc()
                            .map(str::to_string)
                            .unwrap_or_else(|| format!("{} variable {name}", ty.name())),
                    )
                    .required(true);
            }
        }
        cmd = cmd.arg(arg);
    }
    cmd = cmd.arg(
        Arg::new("no-hooks")
            .long("no-hooks")
            .action(ArgAction::SetTrue)
            .help("disable before/after experiment hooks for this run"),
    );
    let experiments = engine.experiment_names();
    if !experiments.is_empty() {
        let names: Vec<String> = experiments.iter().map(|name| name.to_string()).collect();
        cmd = cmd.arg(
            Arg::new("experiment")
                .long("experiment")
                .value_name("NAME")
                .value_parser(PossibleValuesParser::new(names))
                .help("named experiment to run"),
        );
    }
    cmd
}

/// Applies parsed matches to the engine as bulk assignment and returns the
/// non-variable selections.
pub fn apply_matches(engine: &mut Engine, matches: &ArgMatches) -> Result<CliSelection, VexError> {
    let variables: Vec<(String, VarKind)> = engine
        .registry()
        .variables()
        .map(|(name, spec)| (name.clone(), spec.kind()))
        .collect();
    for (name, kind) in variables {
        let value = match kind {
            VarKind::Choice => matches
                .get_one::<String>(&name)
                .map(|raw| Value::String(raw.clone())),
            VarKind::Value(PrimitiveType::Int) => {
                matches.get_one::<i64>(&name).map(|raw| json!(raw))
            }
            VarKind::Value(PrimitiveType::Float) => {
                matches.get_one::<f64>(&name).map(|raw| json!(raw))
            }
            VarKind::Value(PrimitiveType::Bool) => {
                matches.get_one::<bool>(&name).map(|raw| json!(raw))
            }
            VarKind::Value(PrimitiveType::Str) => matches
                .get_one::<String>(&name)
                .map(|raw| Value::String(raw.clone())),
        };
        if let Some(value) = value {
            engine.set_variable_value(&name, value)?;
        }
    }
    let experiment = matches
        .try_get_one::<String>("experiment")
        .ok()
        .flatten()
        .cloned();
    Ok(CliSelection {
        no_hooks: matches.get_flag("no-hooks"),
        experiment,
    })
}

/// Builds the command, parses `argv`, and applies the matches. Parse failures
/// (unknown flags, missing required flags, pattern mismatches) surface as
/// `ArgumentMismatch` with clap's rendered diagnostic.
pub fn try_parse<I, T>(
    engine: &mut Engine,
    bin_name: &str,
    argv: I,
) -> Result<CliSelection, VexError>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let cmd = build_command(engine, bin_name);
    let matches = cmd.try_get_matches_from(argv).map_err(|err| {
        VexError::ArgumentMismatch(
            ErrorInfo::new("cli-parse", "argument parsing failed").with_hint(err.to_string()),
        )
    })?;
    apply_matches(engine, &matches)
}

/// Installs a stderr `tracing` subscriber honoring `RUST_LOG`. Safe to call
/// more than once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
