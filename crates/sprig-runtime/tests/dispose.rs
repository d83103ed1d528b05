//! Integration tests for disposal cascades.
//!
//! Nested plugins register their side effects on the scope of the fork that
//! installed them, so tearing down an outer fork must take every inner
//! listener with it and leave nothing behind.

use std::sync::{Arc, Mutex, OnceLock};

use serde_json::Value;
use sprig_runtime::{App, Fork, Plugin};
use sprig_test::{CallCounter, EventProbe, hook_snapshot, listener_plugin};

const EVENT: &str = "test-event";

fn emit(app: &App) -> usize {
    app.emit(sprig_runtime::Event::custom(EVENT, Value::Null))
}

/// Outer body registers one listener and installs a child that registers one
/// listener and installs a grandchild with one more.
fn nested(calls: &CallCounter) -> Plugin {
    let outer = calls.clone();
    let grandchild = listener_plugin("grandchild", EVENT, calls);
    let middle_calls = calls.clone();
    let child = Plugin::function("child", move |ctx, _| {
        let calls = middle_calls.clone();
        ctx.on(EVENT, move |_| calls.increment());
        ctx.plugin(&grandchild, Value::Null)?;
        Ok(())
    });
    Plugin::function("outer", move |ctx, _| {
        let calls = outer.clone();
        ctx.on(EVENT, move |_| calls.increment());
        ctx.plugin(&child, Value::Null)?;
        Ok(())
    })
}

#[test]
fn test_outer_fork_dispose_removes_nested_listeners() {
    let app = App::new();
    let calls = CallCounter::new();
    let root_calls = calls.clone();
    app.on(EVENT, move |_| root_calls.increment());

    let fork = app.plugin(nested(&calls), Value::Null).unwrap().unwrap();
    assert_eq!(app.hook_count(EVENT), 4);
    assert_eq!(emit(&app), 4);
    assert_eq!(app.registry().len(), 3);

    assert!(fork.dispose());
    assert_eq!(app.hook_count(EVENT), 1);
    assert_eq!(emit(&app), 1);
    assert!(app.registry().is_empty());
}

#[test]
fn test_inner_dispose_only_affects_subtree() {
    let app = App::new();
    let calls = CallCounter::new();
    let outer = nested(&calls);
    app.plugin(&outer, Value::Null).unwrap();
    assert_eq!(app.hook_count(EVENT), 3);

    let child = app
        .registry()
        .runtimes()
        .into_iter()
        .find(|runtime| runtime.name() == "child")
        .unwrap();
    let child_fork: Arc<Fork> = child.forks().pop().unwrap();

    assert!(child_fork.dispose());
    // Child and grandchild listeners are gone, the outer one stays.
    assert_eq!(app.hook_count(EVENT), 1);
    assert!(app.registry().contains(&outer));
    assert_eq!(app.registry().len(), 1);
}

#[test]
fn test_install_and_dispose_leaves_no_hooks() {
    let app = App::new();
    let before = hook_snapshot(&app);

    let calls = CallCounter::new();
    let using = Plugin::using("watcher", ["never"], |ctx, _| {
        ctx.on("ready", |_| {});
        Ok(())
    });
    let a = app.plugin(nested(&calls), Value::Null).unwrap().unwrap();
    let b = app.plugin(&using, Value::Null).unwrap().unwrap();
    assert_ne!(hook_snapshot(&app), before);

    a.dispose();
    b.dispose();
    assert_eq!(hook_snapshot(&app), before);
    assert_eq!(app.disposable_count(), 0);
}

#[test]
fn test_dispose_twice_runs_teardown_once() {
    let app = App::new();
    let disposed = CallCounter::new();
    let counter = disposed.clone();
    let plugin = Plugin::function("teardown", move |ctx, _| {
        let counter = counter.clone();
        ctx.on_dispose(move || counter.increment());
        Ok(())
    });
    let probe = EventProbe::attach(&app, &["plugin-removed"]);

    let fork = app.plugin(&plugin, Value::Null).unwrap().unwrap();
    assert!(fork.dispose());
    assert!(!fork.dispose());

    assert_eq!(disposed.count(), 1);
    assert_eq!(probe.count("plugin-removed"), 1);
}

#[test]
fn test_root_stop_start_cycle_has_no_net_growth() {
    let app = App::new();
    let calls = CallCounter::new();
    let before = app.disposable_count();

    app.on(EVENT, |_| {});
    app.plugin(nested(&calls), Value::Null).unwrap();
    app.start();
    let installed = app.hook_count(EVENT);
    let pending = app.disposable_count();

    app.stop();
    assert_eq!(app.disposable_count(), before);
    assert_eq!(app.hook_count(EVENT), 0);
    assert!(app.registry().is_empty());

    app.on(EVENT, |_| {});
    app.plugin(nested(&calls), Value::Null).unwrap();
    app.start();
    assert_eq!(app.hook_count(EVENT), installed);
    assert_eq!(app.disposable_count(), pending);
}

#[test]
fn test_body_may_dispose_its_own_runtime() {
    let app = App::new();
    let plugin = Plugin::function("suicidal", |ctx, _| {
        ctx.on(EVENT, |_| {});
        if let Some(runtime) = ctx.runtime() {
            runtime.dispose();
        }
        Ok(())
    });

    let fork = app.plugin(&plugin, Value::Null).unwrap().unwrap();
    assert!(fork.is_disposed());
    assert!(app.registry().is_empty());
    assert_eq!(app.hook_count(EVENT), 0);
    assert_eq!(app.disposable_count(), 0);
}

#[test]
fn test_body_may_dispose_another_plugin() {
    let app = App::new();
    let calls = CallCounter::new();
    let victim = listener_plugin("victim", EVENT, &calls);
    app.plugin(&victim, Value::Null).unwrap();

    let target = victim.clone();
    let killer = Plugin::function("killer", move |ctx, _| {
        ctx.dispose_plugin(&target)?;
        Ok(())
    });
    app.plugin(&killer, Value::Null).unwrap();

    assert!(!app.registry().contains(&victim));
    assert!(app.registry().contains(&killer));
    assert_eq!(app.hook_count(EVENT), 0);
}

#[test]
fn test_teardown_may_register_the_same_plugin_again() {
    let app = App::new();
    let root = app.context().clone();
    let handle: Arc<OnceLock<Plugin>> = Arc::new(OnceLock::new());
    let revived: Arc<Mutex<Option<Arc<Fork>>>> = Arc::new(Mutex::new(None));
    let runs = CallCounter::new();

    let plugin = {
        let handle = Arc::clone(&handle);
        let revived = Arc::clone(&revived);
        let runs = runs.clone();
        Plugin::function("phoenix", move |ctx, _| {
            runs.increment();
            ctx.on(EVENT, |_| {});
            if runs.count() > 1 {
                return Ok(());
            }
            let root = root.clone();
            let handle = Arc::clone(&handle);
            let revived = Arc::clone(&revived);
            ctx.on_dispose(move || {
                if let Some(plugin) = handle.get() {
                    *revived.lock().unwrap() = root.plugin(plugin, Value::Null).unwrap();
                }
            });
            Ok(())
        })
    };
    handle.set(plugin.clone()).unwrap();

    let fork = app.plugin(&plugin, Value::Null).unwrap().unwrap();
    let first = fork.runtime().unwrap();
    assert!(fork.dispose());
    assert!(first.is_disposed());

    let again = revived.lock().unwrap().clone().unwrap();
    assert!(!again.is_disposed());
    let runtime = app.registry().get(&plugin).unwrap();
    assert!(!runtime.is_disposed());
    assert!(Arc::ptr_eq(&runtime, &again.runtime().unwrap()));
    assert_eq!(runs.count(), 2);
    assert_eq!(app.hook_count(EVENT), 1);
}

#[test]
fn test_dropping_app_tears_down_plugins() {
    let disposed = CallCounter::new();
    let counter = disposed.clone();
    {
        let app = App::new();
        let plugin = Plugin::function("dropped", move |ctx, _| {
            let counter = counter.clone();
            ctx.on_dispose(move || counter.increment());
            Ok(())
        });
        app.plugin(&plugin, Value::Null).unwrap();
    }
    assert_eq!(disposed.count(), 1);
}
