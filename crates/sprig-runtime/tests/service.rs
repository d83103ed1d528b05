//! Integration tests for services bound as capabilities.

use serde_json::{Map, Value, json};
use sprig_runtime::{App, BindOptions, Capability, Plugin, PluginError, bind_invocable};
use sprig_test::{CallCounter, EventProbe, MockService, settle};

fn service_plugin(service: &MockService, immediate: bool) -> Plugin {
    let service = service.clone();
    Plugin::service::<MockService, _>(immediate, move |_, _| Ok(service.clone()))
}

#[tokio::test]
async fn test_deferred_service_published_after_start() {
    let app = App::new();
    let service = MockService::new();
    app.plugin(service_plugin(&service, false), Value::Null).unwrap();

    assert!(app.is_provided("mock"));
    assert!(!app.has("mock"));

    app.start();
    // Start is deferred by a tick.
    assert!(!app.has("mock"));
    assert_eq!(service.starts.count(), 0);

    settle().await;
    assert_eq!(service.starts.count(), 1);
    assert!(app.get::<Capability<MockService>>("mock").is_some());
    assert!(!app.capability("mock").immediate);
}

#[tokio::test]
async fn test_immediate_service_published_at_bind() {
    let app = App::new();
    let service = MockService::new();
    app.plugin(service_plugin(&service, true), Value::Null).unwrap();

    assert!(app.has("mock"));
    assert!(app.capability("mock").immediate);

    app.start();
    settle().await;
    assert_eq!(service.starts.count(), 1);
    assert!(app.has("mock"));
}

#[tokio::test]
async fn test_failing_start_never_publishes() {
    let app = App::new();
    let probe = EventProbe::attach(&app, &["internal/error"]);
    let service = MockService::new().failing();
    app.plugin(service_plugin(&service, false), Value::Null).unwrap();

    app.start();
    settle().await;

    assert_eq!(service.starts.count(), 1);
    assert!(!app.has("mock"));
    assert_eq!(probe.error_sources(), vec!["mock".to_owned()]);
}

#[tokio::test]
async fn test_stop_runs_on_dispose() {
    let app = App::new();
    let service = MockService::new();
    let fork = app
        .plugin(service_plugin(&service, false), Value::Null)
        .unwrap()
        .unwrap();
    app.start();
    settle().await;
    assert!(app.has("mock"));

    fork.dispose();
    settle().await;
    assert_eq!(service.stops.count(), 1);
    assert!(!app.has("mock"));
}

#[tokio::test]
async fn test_dispose_before_start_cancels_publish() {
    let app = App::new();
    let service = MockService::new();
    let fork = app
        .plugin(service_plugin(&service, false), Value::Null)
        .unwrap()
        .unwrap();
    app.start();
    fork.dispose();
    settle().await;

    assert_eq!(service.starts.count(), 0);
    assert_eq!(service.stops.count(), 1);
    assert!(!app.has("mock"));
}

#[tokio::test]
async fn test_dependent_waits_for_service() {
    let app = App::new();
    let calls = CallCounter::new();
    let counter = calls.clone();
    app.using(["mock"], move |ctx, _| {
        let mock = ctx.get::<Capability<MockService>>("mock");
        assert!(mock.is_some());
        counter.increment();
        Ok(())
    })
    .unwrap();

    let service = MockService::new();
    app.plugin(service_plugin(&service, false), Value::Null).unwrap();
    assert_eq!(calls.count(), 0);

    app.start();
    settle().await;
    assert_eq!(calls.count(), 1);
}

#[tokio::test]
async fn test_forkable_service_runs_per_fork() {
    let app = App::new();
    let service = MockService::new();
    let plugin = service_plugin(&service, true);

    app.plugin(&plugin, json!({ "a": 1 })).unwrap();
    app.plugin(&plugin, json!({ "a": 2 })).unwrap();
    assert_eq!(service.forks.count(), 2);
}

#[tokio::test]
async fn test_extend_does_not_restart() {
    let app = App::new();
    let service = MockService::new();
    app.plugin(service_plugin(&service, false), Value::Null).unwrap();
    app.start();
    settle().await;

    let cap = app.get::<Capability<MockService>>("mock").unwrap();
    let child_ctx = app.isolate("mock");
    let mut overrides = Map::new();
    overrides.insert("tenant".into(), json!("blue"));
    let child = cap.extend(&child_ctx, overrides);
    let _published = child_ctx.set("mock", std::sync::Arc::new(child.clone()));
    settle().await;

    assert_eq!(service.starts.count(), 1);
    assert_eq!(child.attr("tenant"), Some(&json!("blue")));
    assert!(cap.attr("tenant").is_none());
    let seen = child_ctx.get::<Capability<MockService>>("mock").unwrap();
    assert_eq!(seen.attr("tenant"), Some(&json!("blue")));
}

#[tokio::test]
async fn test_invocable_service_plugin_can_be_called() {
    let app = App::new();
    app.plugin(
        Plugin::invocable_service::<MockService, _>(true, |_, _| Ok(MockService::new())),
        Value::Null,
    )
    .unwrap();

    let mock = app.get::<Capability<MockService>>("mock").unwrap();
    assert_eq!(mock.call(json!([1, 2])).unwrap(), json!([1, 2]));

    app.plugin(service_plugin(&MockService::new(), true), Value::Null)
        .unwrap();
    let plain = app.get::<Capability<MockService>>("mock").unwrap();
    assert!(matches!(
        plain.call(json!(1)),
        Err(PluginError::NotInvocable(name)) if name == "mock"
    ));
}

#[tokio::test]
async fn test_invocable_service_calls_and_derefs() {
    let app = App::new();
    let plugin = Plugin::function("invocable", |ctx, _| {
        bind_invocable(ctx, MockService::new(), BindOptions::default().named("echo").immediate(true))?;
        Ok(())
    });
    app.plugin(&plugin, Value::Null).unwrap();

    let echo = app.get::<Capability<MockService>>("echo").unwrap();
    assert_eq!(echo.call(json!({ "ping": 1 })).unwrap(), json!({ "ping": 1 }));
    // Member access reaches the instance.
    assert_eq!(echo.starts.count(), 0);
    app.start();
    settle().await;
    assert_eq!(echo.starts.count(), 1);
}
