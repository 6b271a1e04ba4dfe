// File: tests/registry.rs
mod common;

use common::{harness, push_block, FakeAdapter};
use notesync::config::{Config, SourceConfig};
use notesync::context::TestContext;
use notesync::error::SyncError;
use notesync::source::{
    AdapterError, Capabilities, Registry, RegistryError, SourceDescriptor,
};
use notesync::sync::CycleStatus;
use std::sync::Arc;
use std::sync::atomic::Ordering;

#[test]
fn test_names_are_unique_case_insensitively() {
    let mut registry = Registry::new();
    registry
        .register_adapter(Arc::new(FakeAdapter::new("Calendar", Capabilities::full())))
        .unwrap();
    let err = registry
        .register_adapter(Arc::new(FakeAdapter::new("calendar", Capabilities::full())))
        .unwrap_err();
    assert!(matches!(err, RegistryError::Duplicate(_)));
    assert_eq!(registry.resolve("CALENDAR").unwrap().name, "Calendar");
    assert!(matches!(registry.resolve("tasks"), Err(SyncError::NotFound(_))));
}

#[test]
fn test_inconsistent_descriptors_are_refused() {
    let mut registry = Registry::new();

    let bad_name = FakeAdapter::new("my source", Capabilities::full());
    assert!(matches!(
        registry.register_adapter(Arc::new(bad_name)),
        Err(RegistryError::InvalidName(_))
    ));

    let nothing = FakeAdapter::new("Nothing", Capabilities::default());
    assert!(matches!(
        registry.register_adapter(Arc::new(nothing)),
        Err(RegistryError::Inconsistent { .. })
    ));

    // Declaring more than the adapter implements.
    let pull_only = Arc::new(FakeAdapter::new("Feed", Capabilities::pull_only()));
    let overclaimed = SourceDescriptor::new(pull_only.clone()).with_capabilities(Capabilities::full());
    assert!(matches!(
        registry.register(overclaimed),
        Err(RegistryError::Inconsistent { .. })
    ));

    // Conflict checks only make sense for pushing sources.
    let odd = Capabilities {
        supports_pull: true,
        supports_conflict_check: true,
        ..Capabilities::default()
    };
    let full = Arc::new(FakeAdapter::new("Odd", Capabilities::full()));
    assert!(registry
        .register(SourceDescriptor::new(full.clone()).with_capabilities(odd))
        .is_err());

    // Narrowing is fine.
    assert!(registry
        .register(SourceDescriptor::new(full).with_capabilities(Capabilities::pull_only()))
        .is_ok());
    assert_eq!(registry.names(), vec!["Odd".to_string()]);
}

#[test]
fn test_list_enabled_requires_a_config_block() {
    let ctx = TestContext::new();
    let mut registry = Registry::new();
    for name in ["Alpha", "Beta", "Gamma"] {
        registry
            .register_adapter(Arc::new(FakeAdapter::new(name, Capabilities::pull_only())))
            .unwrap();
    }
    let mut config = Config {
        notes_dir: Some(ctx.path("notes")),
        ..Config::default()
    };
    config.sources.insert("alpha".into(), SourceConfig::default());
    config.sources.insert(
        "Beta".into(),
        SourceConfig {
            enabled: Some(false),
            ..SourceConfig::default()
        },
    );

    let enabled: Vec<&str> = registry
        .list_enabled(&config)
        .iter()
        .map(|d| d.name.as_str())
        .collect();
    assert_eq!(enabled, vec!["Alpha"]);

    let settings = registry.settings("ALPHA", &config, &ctx).unwrap();
    assert_eq!(settings.target_file, ctx.path("notes").join("alpha.md"));
    assert_eq!(settings.push_tag, "alpha");
    assert!(matches!(
        registry.settings("Beta", &config, &ctx),
        Err(SyncError::Disabled { .. })
    ));
    assert!(matches!(
        registry.settings("Gamma", &config, &ctx),
        Err(SyncError::NotLoaded(_))
    ));
}

#[tokio::test]
async fn test_setup_false_disables_for_the_process() {
    let adapter = Arc::new(FakeAdapter::new("Foo", Capabilities::pull_only()));
    *adapter.setup_result.lock().unwrap() = Ok(false);
    let h = harness(vec![adapter.clone()], vec![("Foo", SourceConfig::default())]);

    let err = h.manager.sync("Foo").await.unwrap_err();
    assert!(matches!(err, SyncError::Disabled { .. }));
    assert_eq!(adapter.pull_calls.load(Ordering::SeqCst), 0);

    // Remembered: even a fixed setup is not retried in this process.
    *adapter.setup_result.lock().unwrap() = Ok(true);
    assert!(matches!(h.manager.sync("Foo").await, Err(SyncError::Disabled { .. })));
    assert!(h.manager.enabled_sources().is_empty());
    assert_eq!(h.notifier.count(), 0);
}

#[tokio::test]
async fn test_setup_error_fails_the_cycle_and_is_retried() {
    let adapter = Arc::new(FakeAdapter::new("Foo", Capabilities::pull_only()));
    *adapter.setup_result.lock().unwrap() = Err(AdapterError::Config("missing token".into()));
    let h = harness(vec![adapter.clone()], vec![("Foo", SourceConfig::default())]);

    let err = h.manager.sync("Foo").await.unwrap_err();
    assert_eq!(err.kind(), "config");
    let (_, status, summary) = h.notifier.last().unwrap();
    assert_eq!(status, CycleStatus::Failed);
    assert!(summary.contains("missing token"));

    *adapter.setup_result.lock().unwrap() = Ok(true);
    assert!(h.manager.sync("Foo").await.is_ok());
    assert_eq!(h.notifier.count(), 2);
    assert_eq!(
        h.manager.status("foo").unwrap().unwrap().status,
        CycleStatus::Success
    );
}

#[tokio::test]
async fn test_user_block_overrides_adapter_defaults() {
    let adapter = Arc::new(FakeAdapter::new("Foo", Capabilities::full()));
    let block = SourceConfig {
        target_file: Some("agenda/work.md".into()),
        push_tag: Some("outbox".into()),
        ..push_block()
    };
    let h = harness(vec![adapter], vec![("Foo", block)]);

    let settings = h.manager.settings("foo").unwrap();
    assert_eq!(settings.target_file, h.note("agenda/work.md"));
    assert_eq!(settings.push_tag, "outbox");
    assert!(settings.push);
    assert_eq!(settings.interval_mins, 15);
}
