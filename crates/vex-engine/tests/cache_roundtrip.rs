use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::json;
use vex_engine::{ChoiceSpec, Engine, Registry, ResolveCtx, Settings, VariableClass};

fn cached_engine(cache_dir: &std::path::Path, calls: Arc<AtomicUsize>) -> Engine {
    let class = VariableClass::new("dataset").choice(
        ChoiceSpec::new(r"halfmoon_(?P<n_samples>\d+)", move |ctx: &mut ResolveCtx<'_>| {
            calls.fetch_add(1, Ordering::SeqCst);
            let n: i64 = ctx.capture_parsed("n_samples")?;
            Ok(json!({ "name": "halfmoon", "n_samples": n }))
        })
        .cache_dir(cache_dir),
    );
    let mut registry = Registry::new();
    registry.register(class).expect("register");
    Engine::new(registry, Settings::default())
}

#[test]
fn second_resolution_reads_durable_storage() {
    let temp = tempfile::tempdir().expect("tmp dir");
    let calls = Arc::new(AtomicUsize::new(0));
    let mut engine = cached_engine(temp.path(), calls.clone());
    engine
        .set_variable_value("dataset", "halfmoon_5")
        .expect("assign");

    let first = engine.get_var("dataset").expect("first");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let second = engine.get_var("dataset").expect("second");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(first, second);
}

#[test]
fn cache_layout_is_one_directory_per_pattern() {
    let temp = tempfile::tempdir().expect("tmp dir");
    let calls = Arc::new(AtomicUsize::new(0));
    let mut engine = cached_engine(temp.path(), calls);
    engine
        .set_variable_value("dataset", "halfmoon_5")
        .expect("assign");
    engine.get_var("dataset").expect("resolve");

    let subdirs: Vec<_> = fs::read_dir(temp.path())
        .expect("read cache dir")
        .map(|entry| entry.expect("entry").file_name())
        .collect();
    assert_eq!(subdirs.len(), 1);
    let pattern_dir = temp.path().join(&subdirs[0]);
    assert!(pattern_dir.is_dir());
    let files: Vec<_> = fs::read_dir(&pattern_dir)
        .expect("read pattern dir")
        .map(|entry| entry.expect("entry").path())
        .collect();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].extension().and_then(|ext| ext.to_str()), Some("json"));
}

#[test]
fn distinct_contexts_get_distinct_entries() {
    let temp = tempfile::tempdir().expect("tmp dir");
    let calls = Arc::new(AtomicUsize::new(0));
    let mut engine = cached_engine(temp.path(), calls.clone());

    engine
        .set_variable_value("dataset", "halfmoon_5")
        .expect("assign");
    engine.get_var("dataset").expect("first context");
    engine
        .set_variable_value("dataset", "halfmoon_9")
        .expect("reassign");
    engine.get_var("dataset").expect("second context");
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let pattern_dir = fs::read_dir(temp.path())
        .expect("read cache dir")
        .next()
        .expect("one subdir")
        .expect("entry")
        .path();
    assert_eq!(fs::read_dir(&pattern_dir).expect("entries").count(), 2);

    // Back to the first context: served from disk, no third invocation.
    engine
        .set_variable_value("dataset", "halfmoon_5")
        .expect("reassign");
    let replayed = engine.get_var("dataset").expect("replayed");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(replayed["n_samples"], json!(5));
}
