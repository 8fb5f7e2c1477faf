use vex_core::{ErrorInfo, VexError};

fn sample_info(code: &str, message: &str) -> ErrorInfo {
    ErrorInfo::new(code, message)
        .with_context("variable", "dataset")
        .with_context("argument", "halfmoon_300")
}

#[test]
fn not_registered_surface() {
    let err = VexError::NotRegistered(sample_info("unknown-variable", "no such variable"));
    assert_eq!(err.info().code, "unknown-variable");
    assert!(err.info().context.contains_key("variable"));
}

#[test]
fn argument_mismatch_surface() {
    let err = VexError::ArgumentMismatch(sample_info("no-pattern", "no pattern matched"));
    assert_eq!(err.info().code, "no-pattern");
    assert!(err.info().context.contains_key("argument"));
}

#[test]
fn type_mismatch_surface() {
    let err = VexError::TypeMismatch(sample_info("wrong-type", "expected int"));
    assert_eq!(err.info().code, "wrong-type");
}

#[test]
fn already_completed_is_a_signal() {
    let err = VexError::AlreadyCompleted(ErrorInfo::new("result-exists", "output already on disk"));
    assert!(err.is_already_completed());
    let err = VexError::Hook(ErrorInfo::new("hook-failed", "hook raised"));
    assert!(!err.is_already_completed());
}

#[test]
fn display_includes_context_and_hint() {
    let err = VexError::MissingRequirement(
        ErrorInfo::new("requirement-failed", "could not resolve requirement")
            .with_context("required", "ord")
            .with_hint("assign a value for ord first"),
    );
    let rendered = err.to_string();
    assert!(rendered.contains("requirement-failed"));
    assert!(rendered.contains("required=ord"));
    assert!(rendered.contains("assign a value for ord first"));
}
