//! Variable definitions and pattern-keyed resolver tables.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use vex_core::errors::{ErrorInfo, VexError};

use crate::resolve::ResolveCtx;

/// Resolver signature: turns the dispatch context (captured groups, value
/// store, scratch store) into a concrete runtime value.
pub type Resolver = dyn Fn(&mut ResolveCtx<'_>) -> Result<Value, VexError> + Send + Sync;

/// Primitive types accepted for `value`-kind variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveType {
    /// Signed integer.
    Int,
    /// Floating point number; integer literals are accepted.
    Float,
    /// Boolean.
    Bool,
    /// UTF-8 string.
    Str,
}

impl PrimitiveType {
    /// Stable lowercase name used in diagnostics and CLI help.
    pub fn name(&self) -> &'static str {
        match self {
            PrimitiveType::Int => "int",
            PrimitiveType::Float => "float",
            PrimitiveType::Bool => "bool",
            PrimitiveType::Str => "str",
        }
    }

    /// Checks whether a raw JSON value inhabits this primitive type.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            PrimitiveType::Int => value.is_i64() || value.is_u64(),
            PrimitiveType::Float => value.is_number(),
            PrimitiveType::Bool => value.is_boolean(),
            PrimitiveType::Str => value.is_string(),
        }
    }
}

const REGEX_META: &[char] = &[
    '\\', '.', '+', '*', '?', '(', ')', '|', '[', ']', '{', '}', '^', '$',
];

/// A registered argument pattern: either a literal key or a compiled regular
/// expression matched against the full argument string.
#[derive(Clone)]
pub struct ArgPattern {
    text: String,
    regex: Option<Regex>,
}

impl ArgPattern {
    /// Compiles a pattern string. Strings without regex metacharacters stay
    /// literal keys; everything else is anchored and compiled.
    pub fn compile(text: &str) -> Result<Self, VexError> {
        if text.chars().any(|c| REGEX_META.contains(&c)) {
            let anchored = format!("^(?:{text})$");
            let regex = Regex::new(&anchored).map_err(|err| {
                VexError::ArgumentMismatch(
                    ErrorInfo::new("invalid-pattern", "pattern failed to compile")
                        .with_context("pattern", text)
                        .with_hint(err.to_string()),
                )
            })?;
            Ok(Self {
                text: text.to_string(),
                regex: Some(regex),
            })
        } else {
            Ok(Self {
                text: text.to_string(),
                regex: None,
            })
        }
    }

    /// The pattern source text as registered.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// True when the pattern is a plain literal key.
    pub fn is_literal(&self) -> bool {
        self.regex.is_none()
    }

    /// Full-string match. Returns the named capture groups on success; a
    /// literal pattern matches by equality with no captures.
    pub fn full_match(&self, argument: &str) -> Option<BTreeMap<String, String>> {
        match &self.regex {
            None => (self.text == argument).then(BTreeMap::new),
            Some(regex) => regex.captures(argument).map(|caps| {
                regex
                    .capture_names()
                    .flatten()
                    .filter_map(|name| {
                        caps.name(name)
                            .map(|m| (name.to_string(), m.as_str().to_string()))
                    })
                    .collect()
            }),
        }
    }
}

impl fmt::Debug for ArgPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArgPattern")
            .field("text", &self.text)
            .field("literal", &self.is_literal())
            .finish()
    }
}

impl PartialEq for ArgPattern {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

/// Declaration of one (pattern, resolver) row inside a [`VariableClass`].
#[derive(Clone)]
pub struct ChoiceSpec {
    pub(crate) variable: Option<String>,
    pub(crate) pattern: String,
    pub(crate) shown_name: Option<String>,
    pub(crate) required_vars: Vec<String>,
    pub(crate) cache_dir: Option<PathBuf>,
    pub(crate) resolver: Arc<Resolver>,
}

impl ChoiceSpec {
    /// Declares a resolver under the given argument pattern.
    pub fn new<F>(pattern: impl Into<String>, resolver: F) -> Self
    where
        F: Fn(&mut ResolveCtx<'_>) -> Result<Value, VexError> + Send + Sync + 'static,
    {
        Self::from_shared(pattern, Arc::new(resolver))
    }

    /// Declares a row sharing an already-wrapped resolver. Used to register
    /// one resolver under several alias patterns.
    pub fn from_shared(pattern: impl Into<String>, resolver: Arc<Resolver>) -> Self {
        Self {
            variable: None,
            pattern: pattern.into(),
            shown_name: None,
            required_vars: Vec::new(),
            cache_dir: None,
            resolver,
        }
    }

    /// Registers the row under another variable name instead of the class's.
    pub fn variable(mut self, name: impl Into<String>) -> Self {
        self.variable = Some(name.into());
        self
    }

    /// Sets the human readable display name (defaults to the pattern text).
    pub fn shown_name(mut self, name: impl Into<String>) -> Self {
        self.shown_name = Some(name.into());
        self
    }

    /// Declares variables that must be resolvable before this row runs.
    pub fn requires<I, S>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_vars = vars.into_iter().map(Into::into).collect();
        self
    }

    /// Enables durable memoization of resolver output under the directory.
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// Shared handle to the resolver, for alias rows.
    pub fn resolver(&self) -> Arc<Resolver> {
        self.resolver.clone()
    }
}

impl fmt::Debug for ChoiceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChoiceSpec")
            .field("variable", &self.variable)
            .field("pattern", &self.pattern)
            .finish_non_exhaustive()
    }
}

/// Declarative bundle of resolver rows registered under one variable name.
#[derive(Debug, Clone)]
pub struct VariableClass {
    pub(crate) name: String,
    pub(crate) doc: Option<String>,
    pub(crate) default: Option<Value>,
    pub(crate) choices: Vec<ChoiceSpec>,
}

impl VariableClass {
    /// Starts a class declaration for the given variable name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            doc: None,
            default: None,
            choices: Vec::new(),
        }
    }

    /// One-line description surfaced in CLI help.
    pub fn doc(mut self, text: impl Into<String>) -> Self {
        self.doc = Some(text.into());
        self
    }

    /// Default argument used when no assignment is supplied.
    pub fn default_argument(mut self, argument: impl Into<Value>) -> Self {
        self.default = Some(argument.into());
        self
    }

    /// Adds a resolver row.
    pub fn choice(mut self, spec: ChoiceSpec) -> Self {
        self.choices.push(spec);
        self
    }
}

/// One compiled (pattern, resolver) row.
pub(crate) struct ChoiceRow {
    pub(crate) pattern: ArgPattern,
    pub(crate) shown_name: String,
    pub(crate) required_vars: Vec<String>,
    pub(crate) cache_dir: Option<PathBuf>,
    pub(crate) resolver: Arc<Resolver>,
}

/// Kind of a registered variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    /// Free scalar of a declared primitive type; resolves to itself.
    Value(PrimitiveType),
    /// String argument dispatched through the pattern table.
    Choice,
}

/// Registered definition of one variable.
pub struct VariableSpec {
    kind: VarKind,
    rows: Vec<ChoiceRow>,
    doc: Option<String>,
    default: Option<Value>,
}

impl VariableSpec {
    fn choice() -> Self {
        Self {
            kind: VarKind::Choice,
            rows: Vec::new(),
            doc: None,
            default: None,
        }
    }

    fn value(ty: PrimitiveType) -> Self {
        Self {
            kind: VarKind::Value(ty),
            rows: Vec::new(),
            doc: None,
            default: None,
        }
    }

    /// Kind of this variable.
    pub fn kind(&self) -> VarKind {
        self.kind
    }

    /// One-line description, when the registering class declared one.
    pub fn doc(&self) -> Option<&str> {
        self.doc.as_deref()
    }

    /// Default argument, when the registering class declared one.
    pub fn default(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    /// Pattern texts in registration order.
    pub fn pattern_texts(&self) -> Vec<&str> {
        self.rows.iter().map(|row| row.pattern.text()).collect()
    }

    pub(crate) fn rows(&self) -> &[ChoiceRow] {
        &self.rows
    }
}

impl fmt::Debug for VariableSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VariableSpec")
            .field("kind", &self.kind)
            .field("patterns", &self.pattern_texts())
            .finish_non_exhaustive()
    }
}

/// Registry of variable definitions, populated once at registration time and
/// immutable afterward apart from additive registration.
#[derive(Debug, Default)]
pub struct Registry {
    variables: BTreeMap<String, VariableSpec>,
    classes: BTreeSet<String>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs every row of a [`VariableClass`]. Registering the same class
    /// name twice fails with `DuplicateRegistration`.
    pub fn register(&mut self, class: VariableClass) -> Result<(), VexError> {
        if !self.classes.insert(class.name.clone()) {
            return Err(VexError::DuplicateRegistration(
                ErrorInfo::new("class-registered-twice", "variable class already registered")
                    .with_context("class", class.name),
            ));
        }
        self.ensure_choice(&class.name, class.doc, class.default)?;
        for choice in class.choices {
            let target = choice.variable.clone().unwrap_or_else(|| class.name.clone());
            if target != class.name {
                self.ensure_choice(&target, None, None)?;
            }
            let pattern = ArgPattern::compile(&choice.pattern)?;
            let shown_name = choice.shown_name.unwrap_or_else(|| choice.pattern.clone());
            let spec = self
                .variables
                .get_mut(&target)
                .ok_or_else(|| unknown_variable(&target))?;
            spec.rows.push(ChoiceRow {
                pattern,
                shown_name,
                required_vars: choice.required_vars,
                cache_dir: choice.cache_dir,
                resolver: choice.resolver,
            });
        }
        Ok(())
    }

    fn ensure_choice(
        &mut self,
        name: &str,
        doc: Option<String>,
        default: Option<Value>,
    ) -> Result<(), VexError> {
        match self.variables.get_mut(name) {
            None => {
                let mut spec = VariableSpec::choice();
                spec.doc = doc;
                spec.default = default;
                self.variables.insert(name.to_string(), spec);
                Ok(())
            }
            Some(spec) if spec.kind == VarKind::Choice => {
                if doc.is_some() {
                    spec.doc = doc;
                }
                if default.is_some() {
                    spec.default = default;
                }
                Ok(())
            }
            Some(_) => Err(VexError::DuplicateRegistration(
                ErrorInfo::new("kind-conflict", "variable already registered with another kind")
                    .with_context("variable", name),
            )),
        }
    }

    /// Registers a `value`-kind variable whose resolved value is its raw
    /// assignment after a type check. Re-adding the same (name, type) pair is
    /// a no-op.
    pub fn add_variable(&mut self, name: impl Into<String>, ty: PrimitiveType) -> Result<(), VexError> {
        let name = name.into();
        match self.variables.get(&name) {
            None => {
                self.variables.insert(name, VariableSpec::value(ty));
                Ok(())
            }
            Some(spec) if spec.kind == VarKind::Value(ty) => Ok(()),
            Some(_) => Err(VexError::DuplicateRegistration(
                ErrorInfo::new("kind-conflict", "variable already registered with another kind")
                    .with_context("variable", name),
            )),
        }
    }

    /// True when the variable name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    /// Definition for the given variable name.
    pub fn spec(&self, name: &str) -> Option<&VariableSpec> {
        self.variables.get(name)
    }

    /// Iterates all registered (name, definition) pairs in name order.
    pub fn variables(&self) -> impl Iterator<Item = (&String, &VariableSpec)> {
        self.variables.iter()
    }

    /// Whether `value` is an acceptable assignment for the variable: non-null
    /// for `value` kind, exact or full regex pattern match for `choice` kind.
    /// Unknown names are false.
    pub fn matches(&self, name: &str, value: &Value) -> bool {
        let Some(spec) = self.variables.get(name) else {
            return false;
        };
        match spec.kind {
            VarKind::Value(_) => !value.is_null(),
            VarKind::Choice => value
                .as_str()
                .is_some_and(|argument| dispatch_row(spec, argument).is_some()),
        }
    }

    /// Validates an assignment, surfacing the taxonomy error for the failure.
    pub fn validate(&self, name: &str, value: &Value) -> Result<(), VexError> {
        let spec = self
            .variables
            .get(name)
            .ok_or_else(|| unknown_variable(name))?;
        match spec.kind {
            VarKind::Value(ty) => {
                if ty.matches(value) {
                    Ok(())
                } else {
                    Err(VexError::TypeMismatch(
                        ErrorInfo::new("wrong-type", "assignment has the wrong primitive type")
                            .with_context("variable", name)
                            .with_context("expected", ty.name())
                            .with_context("value", value.to_string()),
                    ))
                }
            }
            VarKind::Choice => {
                let argument = value.as_str().ok_or_else(|| {
                    VexError::ArgumentMismatch(
                        ErrorInfo::new("argument-not-string", "choice arguments must be strings")
                            .with_context("variable", name)
                            .with_context("value", value.to_string()),
                    )
                })?;
                if dispatch_row(spec, argument).is_some() {
                    Ok(())
                } else {
                    Err(no_pattern(name, argument, spec))
                }
            }
        }
    }

    /// Dispatches an argument to its row: exact literal lookup first, then
    /// full regex matches in registration order.
    pub(crate) fn dispatch<'a>(
        &'a self,
        name: &str,
        argument: &str,
    ) -> Result<(&'a ChoiceRow, BTreeMap<String, String>), VexError> {
        let spec = self
            .variables
            .get(name)
            .ok_or_else(|| unknown_variable(name))?;
        dispatch_row(spec, argument).ok_or_else(|| no_pattern(name, argument, spec))
    }

    /// Display name of the row the argument dispatches to.
    pub fn shown_name(&self, name: &str, argument: &str) -> Result<String, VexError> {
        let (row, _) = self.dispatch(name, argument)?;
        Ok(row.shown_name.clone())
    }
}

fn dispatch_row<'a>(
    spec: &'a VariableSpec,
    argument: &str,
) -> Option<(&'a ChoiceRow, BTreeMap<String, String>)> {
    for row in spec.rows() {
        if row.pattern.is_literal() && row.pattern.text() == argument {
            return Some((row, BTreeMap::new()));
        }
    }
    for row in spec.rows() {
        if row.pattern.is_literal() {
            continue;
        }
        if let Some(captures) = row.pattern.full_match(argument) {
            return Some((row, captures));
        }
    }
    None
}

fn unknown_variable(name: &str) -> VexError {
    VexError::NotRegistered(
        ErrorInfo::new("unknown-variable", "variable is not registered")
            .with_context("variable", name),
    )
}

fn no_pattern(name: &str, argument: &str, spec: &VariableSpec) -> VexError {
    VexError::ArgumentMismatch(
        ErrorInfo::new("no-pattern", "argument matched no registered pattern")
            .with_context("variable", name)
            .with_context("argument", argument)
            .with_hint(format!(
                "registered patterns: {}",
                spec.pattern_texts().join(", ")
            )),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_patterns_stay_literal() {
        let pattern = ArgPattern::compile("halfmoon_300").expect("compile");
        assert!(pattern.is_literal());
        assert!(pattern.full_match("halfmoon_300").is_some());
        assert!(pattern.full_match("halfmoon_3000").is_none());
    }

    #[test]
    fn regex_patterns_match_full_string_only() {
        let pattern = ArgPattern::compile(r"moon_(?P<n>\d+)").expect("compile");
        assert!(!pattern.is_literal());
        let captures = pattern.full_match("moon_10").expect("match");
        assert_eq!(captures.get("n").map(String::as_str), Some("10"));
        assert!(pattern.full_match("moon_10x").is_none());
        assert!(pattern.full_match("xmoon_10").is_none());
    }

    #[test]
    fn invalid_regex_is_reported() {
        let err = ArgPattern::compile(r"moon_(?P<n>\d+").expect_err("must fail");
        assert_eq!(err.info().code, "invalid-pattern");
    }
}
