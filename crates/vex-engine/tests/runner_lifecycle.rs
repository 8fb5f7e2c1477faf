use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::json;
use vex_core::errors::{ErrorInfo, VexError};
use vex_engine::{
    ChoiceSpec, Engine, ExperimentDef, GridOpts, GridSpec, Registry, ResolveCtx, RunOutcome,
    Settings, VariableClass,
};

fn ord_engine() -> Engine {
    let class = VariableClass::new("ord")
        .choice(ChoiceSpec::new("2", |_ctx: &mut ResolveCtx<'_>| Ok(json!(2))))
        .choice(ChoiceSpec::new("1", |_ctx: &mut ResolveCtx<'_>| Ok(json!(1))));
    let mut registry = Registry::new();
    registry.register(class).expect("register");
    Engine::new(registry, Settings::default())
}

#[test]
fn hooks_and_body_run_in_order() {
    let mut engine = ord_engine();
    engine.set_variable_value("ord", "1").expect("assign");
    let trace = Arc::new(Mutex::new(Vec::new()));

    let t = trace.clone();
    engine.add_before_hook(move |_engine| {
        t.lock().expect("lock").push("before");
        Ok(())
    });
    let t = trace.clone();
    engine.add_after_hook(move |_engine, _outcome| {
        t.lock().expect("lock").push("after");
        Ok(())
    });

    let t = trace.clone();
    let outcome = engine
        .run_single_experiment(
            move |engine: &mut Engine| {
                t.lock().expect("lock").push("body");
                engine.get_var("ord")
            },
            true,
        )
        .expect("run");
    assert_eq!(outcome, RunOutcome::Completed(json!(1)));
    assert_eq!(*trace.lock().expect("lock"), vec!["before", "body", "after"]);
}

#[test]
fn already_completed_signal_skips_body_and_after_hooks() {
    let mut engine = ord_engine();
    engine.set_variable_value("ord", "1").expect("assign");
    let body_calls = Arc::new(AtomicUsize::new(0));
    let after_calls = Arc::new(AtomicUsize::new(0));

    engine.add_before_hook(|_engine| {
        Err(VexError::AlreadyCompleted(ErrorInfo::new(
            "result-exists",
            "already ran",
        )))
    });
    let after = after_calls.clone();
    engine.add_after_hook(move |_engine, _outcome| {
        after.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let body = body_calls.clone();
    let outcome = engine
        .run_single_experiment(
            move |_engine: &mut Engine| {
                body.fetch_add(1, Ordering::SeqCst);
                Ok(json!(null))
            },
            true,
        )
        .expect("skip is not an error");
    assert!(outcome.is_skipped());
    assert_eq!(body_calls.load(Ordering::SeqCst), 0);
    assert_eq!(after_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn hook_opt_out_bypasses_hooks() {
    let mut engine = ord_engine();
    engine.set_variable_value("ord", "2").expect("assign");
    let hook_calls = Arc::new(AtomicUsize::new(0));

    let calls = hook_calls.clone();
    engine.add_before_hook(move |_engine| {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let outcome = engine
        .run_single_experiment(|engine: &mut Engine| engine.get_var("ord"), false)
        .expect("run");
    assert_eq!(outcome, RunOutcome::Completed(json!(2)));
    assert_eq!(hook_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn structured_results_get_a_running_time() {
    let mut engine = ord_engine();
    engine.set_variable_value("ord", "1").expect("assign");
    let outcome = engine
        .run_single_experiment(
            |_engine: &mut Engine| Ok(json!({ "accuracy": 0.9 })),
            true,
        )
        .expect("run");
    let value = outcome.value().expect("completed");
    assert!(value["running_time"].as_f64().expect("timed") >= 0.0);
    assert_eq!(value["accuracy"], json!(0.9));

    // Non-object results pass through untouched.
    let outcome = engine
        .run_single_experiment(|_engine: &mut Engine| Ok(json!(17)), true)
        .expect("run");
    assert_eq!(outcome, RunOutcome::Completed(json!(17)));
}

#[test]
fn store_is_locked_while_running() {
    let mut engine = ord_engine();
    engine.set_variable_value("ord", "1").expect("assign");
    let err = engine
        .run_single_experiment(
            |engine: &mut Engine| {
                engine.set_variable_value("ord", "2")?;
                Ok(json!(null))
            },
            true,
        )
        .expect_err("mutation must fail");
    assert_eq!(err.info().code, "store-locked");
    // The lock is released again after the failed run.
    assert!(!engine.is_read_only());
    engine.set_variable_value("ord", "2").expect("unlocked");
}

#[test]
fn cleanup_runs_on_every_exit_path() {
    let mut engine = ord_engine();
    engine.set_variable_value("ord", "1").expect("assign");

    let err = engine
        .run_single_experiment(
            |engine: &mut Engine| {
                engine.set_scratch("partial", json!(1));
                Err(VexError::Hook(ErrorInfo::new("boom", "body failed")))
            },
            true,
        )
        .expect_err("body fails");
    assert_eq!(err.info().code, "boom");
    assert!(engine.scratch_values().is_empty());
    assert!(!engine.is_read_only());

    // Success path clears the scratch store too.
    engine
        .run_single_experiment(
            |engine: &mut Engine| {
                engine.set_scratch("partial", json!(2));
                Ok(json!(null))
            },
            true,
        )
        .expect("run");
    assert!(engine.scratch_values().is_empty());
}

#[test]
fn failing_before_hook_propagates() {
    let mut engine = ord_engine();
    engine.set_variable_value("ord", "1").expect("assign");
    engine.add_before_hook(|_engine| Err(VexError::Hook(ErrorInfo::new("hook-boom", "no"))));
    let err = engine
        .run_single_experiment(|_engine: &mut Engine| Ok(json!(null)), true)
        .expect_err("propagates");
    assert_eq!(err.info().code, "hook-boom");
    assert!(!engine.is_read_only());
}

#[test]
fn named_experiment_overlay_is_restored() {
    let mut engine = ord_engine();
    engine
        .register_experiment(
            ExperimentDef::new("baseline", |engine: &mut Engine| engine.get_var("ord"))
                .default_param("ord", "2"),
        )
        .expect("register experiment");

    // No assignment: the overlay supplies the default for the run.
    let outcome = engine.run_named("baseline", false).expect("run");
    assert_eq!(outcome, RunOutcome::Completed(json!(2)));
    assert!(engine.get_variable_value("ord").is_err());

    // An explicit assignment wins over the overlay.
    engine.set_variable_value("ord", "1").expect("assign");
    let outcome = engine.run_named("baseline", false).expect("run");
    assert_eq!(outcome, RunOutcome::Completed(json!(1)));
    assert_eq!(engine.get_variable_value("ord").expect("kept"), &json!("1"));
}

#[test]
fn experiment_registration_is_unique() {
    let mut engine = ord_engine();
    engine
        .register_experiment(ExperimentDef::new("baseline", |_engine: &mut Engine| {
            Ok(json!(null))
        }))
        .expect("first");
    let err = engine
        .register_experiment(ExperimentDef::new("baseline", |_engine: &mut Engine| {
            Ok(json!(null))
        }))
        .expect_err("duplicate");
    assert_eq!(err.info().code, "experiment-registered-twice");

    let err = engine.run_named("missing", false).expect_err("unknown");
    assert_eq!(err.info().code, "unknown-experiment");
}

#[test]
fn named_experiment_sweeps_its_attached_grid() {
    let mut engine = ord_engine();
    let spec: GridSpec = [("ord".to_string(), vec![json!("1"), json!("2")])]
        .into_iter()
        .collect();
    engine
        .register_experiment(
            ExperimentDef::new("sweep", |engine: &mut Engine| engine.get_var("ord")).grid(spec),
        )
        .expect("register");
    let report = engine
        .run_named_grid("sweep", &GridOpts::default())
        .expect("sweep");
    assert_eq!(report.results.len(), 2);
    assert_eq!(report.results[0], Some(RunOutcome::Completed(json!(1))));
    assert_eq!(report.results[1], Some(RunOutcome::Completed(json!(2))));
    assert!(engine.get_variable_value("ord").is_err());
}
