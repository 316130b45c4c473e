//! Integration tests for the persistence orchestrator
//!
//! Save flushes, loads, deletes and notifications, against in-memory and
//! gated storage.

mod common;

use common::{
    orchestrator_with, register_game_modules, GameProgress, GatedStorage, Note, PlayerStats,
    Settings,
};
use module_persistence::{
    DeleteOutcome, JsonSerializer, LoadOutcome, MemoryStorage, PersistenceError,
    PersistenceEvent, PersistenceOrchestrator, StorageBackend,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_flush_writes_in_save_priority_order() {
    let storage = MemoryStorage::new();
    let orchestrator = orchestrator_with(Arc::new(storage.clone()));
    register_game_modules(&orchestrator).await;

    orchestrator.request_save("Settings").await.unwrap();
    orchestrator.request_save("GameProgress").await.unwrap();
    orchestrator.request_save("PlayerStats").await.unwrap();

    let report = orchestrator
        .force_flush()
        .await
        .unwrap()
        .expect("flush should start")
        .wait()
        .await
        .unwrap();

    // PlayerStats has save priority 10, the others the default; ties keep request order.
    assert_eq!(report.saved, vec!["PlayerStats", "Settings", "GameProgress"]);
    assert!(report.is_success());
    assert_eq!(
        storage.keys().await,
        vec!["GameProgress", "PlayerStats", "Settings"]
    );
    assert!(orchestrator.pending_saves().await.is_empty());
}

#[tokio::test]
async fn test_request_save_rejects_unregistered_module() {
    let orchestrator = orchestrator_with(Arc::new(MemoryStorage::new()));
    register_game_modules(&orchestrator).await;

    let err = orchestrator.request_save("Inventory").await.unwrap_err();
    assert!(matches!(err, PersistenceError::NotRegistered(ref id) if id == "Inventory"));
    assert!(orchestrator.pending_saves().await.is_empty());
}

#[tokio::test]
async fn test_repeated_requests_save_once_per_flush() {
    let storage = GatedStorage::open();
    let orchestrator = orchestrator_with(storage.clone());
    orchestrator.register_module(Note::new("A", &[])).await.unwrap();
    orchestrator.register_module(Note::new("B", &[])).await.unwrap();

    assert!(orchestrator.request_save("A").await.unwrap());
    assert!(orchestrator.request_save("B").await.unwrap());
    assert!(!orchestrator.request_save("A").await.unwrap());
    assert_eq!(orchestrator.pending_saves().await, vec!["A", "B"]);

    let report = orchestrator
        .force_flush()
        .await
        .unwrap()
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(report.saved, vec!["A", "B"]);
    assert_eq!(storage.writes(), 2);
}

#[tokio::test]
async fn test_request_save_all_queues_every_module() {
    let orchestrator = orchestrator_with(Arc::new(MemoryStorage::new()));
    register_game_modules(&orchestrator).await;
    orchestrator.request_save("PlayerStats").await.unwrap();

    assert_eq!(orchestrator.request_save_all().await, 2);
    assert_eq!(
        orchestrator.pending_saves().await,
        vec!["PlayerStats", "Settings", "GameProgress"]
    );
}

#[tokio::test]
async fn test_second_trigger_during_flush_is_ignored() {
    let storage = GatedStorage::closed();
    let orchestrator = orchestrator_with(storage.clone());
    orchestrator.register_module(Note::new("A", &[])).await.unwrap();
    orchestrator.register_module(Note::new("B", &[])).await.unwrap();

    orchestrator.request_save("A").await.unwrap();
    let first = orchestrator.force_flush().await.unwrap().expect("first flush starts");
    storage.wait_for_write().await;

    assert!(orchestrator.is_flushing());
    assert!(orchestrator.force_flush().await.unwrap().is_none());

    // Requests made mid-flush wait for the next flush.
    orchestrator.request_save("B").await.unwrap();
    assert!(orchestrator.force_flush().await.unwrap().is_none());

    storage.release();
    let report = first.wait().await.unwrap();

    assert_eq!(report.saved, vec!["A"]);
    assert_eq!(storage.writes(), 1);
    assert!(!orchestrator.is_flushing());
    assert_eq!(orchestrator.pending_saves().await, vec!["B"]);

    let report = orchestrator
        .force_flush()
        .await
        .unwrap()
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(report.saved, vec!["B"]);
    assert_eq!(storage.writes(), 2);
}

#[tokio::test]
async fn test_round_trip_through_load_all() {
    let storage: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());

    let writer = orchestrator_with(storage.clone());
    register_game_modules(&writer).await;
    {
        let settings = writer.get_module::<Settings>().await.unwrap();
        let mut settings = settings.write().await;
        settings.volume = 20;
        settings.language = "fr".to_string();
    }
    {
        let stats = writer.get_module::<PlayerStats>().await.unwrap();
        let mut stats = stats.write().await;
        stats.level = 7;
        stats.experience = 6420;
    }
    writer.request_save_all().await;
    writer.force_flush().await.unwrap().unwrap().wait().await.unwrap();

    // Fresh process: defaults registered, then loaded from storage.
    let reader = orchestrator_with(storage);
    register_game_modules(&reader).await;
    let report = reader.load_all().await.unwrap();

    assert_eq!(report.order, vec!["Settings", "PlayerStats", "GameProgress"]);
    assert_eq!(report.loaded.len(), 3);
    assert!(report.is_success());

    let settings = reader.get_module::<Settings>().await.unwrap();
    assert_eq!(
        *settings.read().await,
        Settings {
            volume: 20,
            language: "fr".to_string()
        }
    );

    let stats = reader.get_module::<PlayerStats>().await.unwrap();
    let stats = stats.read().await;
    assert_eq!(stats.level, 7);
    assert_eq!(stats.experience, 6420);
    // Settings loaded first, so the hook saw the stored volume.
    assert_eq!(stats.observed_volume, Some(20));

    let progress = reader.get_module::<GameProgress>().await.unwrap();
    assert_eq!(progress.read().await.saves, 1);
}

#[tokio::test]
async fn test_load_without_payload_keeps_instance() {
    let orchestrator = orchestrator_with(Arc::new(MemoryStorage::new()));
    let registered = orchestrator.register_module(Settings::default()).await.unwrap();
    registered.write().await.volume = 99;

    let outcome = orchestrator.load_module("Settings").await.unwrap();
    assert_eq!(outcome, LoadOutcome::NotFound);

    let current = orchestrator.get_module::<Settings>().await.unwrap();
    assert!(Arc::ptr_eq(&registered, &current));
    assert_eq!(current.read().await.volume, 99);
}

#[tokio::test]
async fn test_load_replaces_registered_instance() {
    let storage = MemoryStorage::new();
    storage
        .write("Settings", br#"{"volume":5,"language":"de"}"#)
        .await
        .unwrap();

    let orchestrator = orchestrator_with(Arc::new(storage));
    let before = orchestrator.register_module(Settings::default()).await.unwrap();

    let outcome = orchestrator.load_module("Settings").await.unwrap();
    assert_eq!(outcome, LoadOutcome::Loaded);

    let after = orchestrator.get_module_by_id::<Settings>("Settings").await.unwrap();
    assert!(!Arc::ptr_eq(&before, &after));
    assert_eq!(after.read().await.language, "de");
    // The old handle is stale, not updated in place.
    assert_eq!(before.read().await.language, "en");
}

#[tokio::test]
async fn test_load_unregistered_module_fails() {
    let orchestrator = orchestrator_with(Arc::new(MemoryStorage::new()));
    let err = orchestrator.load_module("Ghost").await.unwrap_err();
    assert!(matches!(err, PersistenceError::NotRegistered(_)));
}

#[tokio::test]
async fn test_corrupt_payload_is_reported_and_instance_kept() {
    let storage = MemoryStorage::new();
    storage.write("Settings", b"{\"volume\":\"loud\"}").await.unwrap();
    storage.write("PlayerStats", b"not json").await.unwrap();

    let orchestrator = orchestrator_with(Arc::new(storage));
    register_game_modules(&orchestrator).await;
    let settings_before = orchestrator.get_module::<Settings>().await.unwrap();

    let err = orchestrator.load_module("Settings").await.unwrap_err();
    assert!(matches!(err, PersistenceError::Serialization { .. }));
    assert_eq!(err.module_id(), Some("Settings"));

    let report = orchestrator.load_all().await.unwrap();
    assert!(!report.is_success());
    let failed: Vec<&str> = report.failed.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(failed, vec!["Settings", "PlayerStats"]);
    assert_eq!(report.not_found, vec!["GameProgress"]);

    let settings_after = orchestrator.get_module::<Settings>().await.unwrap();
    assert!(Arc::ptr_eq(&settings_before, &settings_after));
}

#[tokio::test]
async fn test_missing_serializer_is_configuration_error() {
    let orchestrator = PersistenceOrchestrator::new(Arc::new(MemoryStorage::new()));
    register_game_modules(&orchestrator).await;
    orchestrator.request_save("Settings").await.unwrap();

    let err = orchestrator.force_flush().await.unwrap_err();
    assert!(matches!(err, PersistenceError::Configuration(_)));
    // Nothing was drained.
    assert_eq!(orchestrator.pending_saves().await, vec!["Settings"]);
    assert!(!orchestrator.is_flushing());

    assert!(matches!(
        orchestrator.load_all().await,
        Err(PersistenceError::Configuration(_))
    ));
    assert!(matches!(
        orchestrator.load_module("Settings").await,
        Err(PersistenceError::Configuration(_))
    ));

    orchestrator.set_serializer(Arc::new(JsonSerializer::new())).await;
    let report = orchestrator
        .force_flush()
        .await
        .unwrap()
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(report.saved, vec!["Settings"]);
}

#[tokio::test]
async fn test_cyclic_dependencies_still_load_everything() {
    let orchestrator = orchestrator_with(Arc::new(MemoryStorage::new()));
    orchestrator.register_module(Note::new("A", &["B"])).await.unwrap();
    orchestrator.register_module(Note::new("B", &["A"])).await.unwrap();

    let order = orchestrator.resolve_load_order().await;
    let mut ids = order.order.clone();
    ids.sort();
    assert_eq!(ids, vec!["A", "B"]);
    assert_eq!(order.cycles.len(), 1);

    let report = orchestrator.load_all().await.unwrap();
    assert_eq!(report.not_found.len(), 2);
    assert_eq!(report.cycles.len(), 1);
}

#[tokio::test]
async fn test_load_order_follows_dependencies_changed_after_registration() {
    let orchestrator = orchestrator_with(Arc::new(MemoryStorage::new()));
    let b = orchestrator.register_module(Note::new("B", &[])).await.unwrap();
    orchestrator.register_module(Note::new("A", &[])).await.unwrap();
    assert_eq!(orchestrator.resolve_load_order().await.order, vec!["B", "A"]);

    b.write().await.depends_on = vec!["A".to_string()];

    assert_eq!(orchestrator.resolve_load_order().await.order, vec!["A", "B"]);
    let report = orchestrator.load_all().await.unwrap();
    assert_eq!(report.order, vec!["A", "B"]);
}

#[tokio::test]
async fn test_unregistered_before_flush_is_dropped() {
    let orchestrator = orchestrator_with(Arc::new(MemoryStorage::new()));
    register_game_modules(&orchestrator).await;
    orchestrator.request_save("Settings").await.unwrap();
    orchestrator.request_save("GameProgress").await.unwrap();

    assert!(orchestrator.unregister_module("GameProgress").await);

    let report = orchestrator
        .force_flush()
        .await
        .unwrap()
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(report.saved, vec!["Settings"]);
    assert_eq!(report.dropped, vec!["GameProgress"]);
    assert!(report.is_success());
}

#[tokio::test]
async fn test_failed_write_does_not_abort_batch() {
    let storage = MemoryStorage::new();
    let orchestrator = orchestrator_with(Arc::new(storage.clone()));
    orchestrator.register_module(Note::new("bad/name", &[])).await.unwrap();
    orchestrator.register_module(Note::new("good", &[])).await.unwrap();
    orchestrator.request_save_all().await;

    let report = orchestrator
        .force_flush()
        .await
        .unwrap()
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(report.saved, vec!["good"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].module_id, "bad/name");
    assert_eq!(storage.keys().await, vec!["good"]);
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let storage = MemoryStorage::new();
    let orchestrator = orchestrator_with(Arc::new(storage));
    register_game_modules(&orchestrator).await;
    orchestrator.request_save("Settings").await.unwrap();
    orchestrator.force_flush().await.unwrap().unwrap().wait().await.unwrap();

    assert!(orchestrator.has_saved_data("Settings").await.unwrap());
    assert_eq!(
        orchestrator.delete_module_data("Settings").await.unwrap(),
        DeleteOutcome::Deleted
    );
    assert!(!orchestrator.has_saved_data("Settings").await.unwrap());
    assert_eq!(
        orchestrator.delete_module_data("Settings").await.unwrap(),
        DeleteOutcome::NothingToDelete
    );
}

#[tokio::test]
async fn test_notifications_for_flush_and_load() {
    let orchestrator = orchestrator_with(Arc::new(MemoryStorage::new()));
    register_game_modules(&orchestrator).await;
    let mut events = orchestrator.subscribe();

    orchestrator.request_save("Settings").await.unwrap();
    let handle = orchestrator.force_flush().await.unwrap().unwrap();
    let flush_id = handle.flush_id();
    handle.wait().await.unwrap();

    match events.recv().await.unwrap() {
        PersistenceEvent::BatchSaved(report) => {
            assert_eq!(report.flush_id, flush_id);
            assert_eq!(report.saved, vec!["Settings"]);
        }
        other => panic!("unexpected event: {:?}", other.kind()),
    }

    orchestrator.load_module("Settings").await.unwrap();
    match events.recv().await.unwrap() {
        PersistenceEvent::ModuleLoaded { module } => {
            assert_eq!(module.id(), "Settings");
            assert!(module.is::<Settings>());
        }
        other => panic!("unexpected event: {:?}", other.kind()),
    }
}

#[tokio::test]
async fn test_shutdown_flushes_pending_saves() {
    let storage = MemoryStorage::new();
    let orchestrator = orchestrator_with(Arc::new(storage.clone()));
    register_game_modules(&orchestrator).await;

    assert!(orchestrator
        .shutdown(Duration::from_secs(1))
        .await
        .unwrap()
        .is_none());

    orchestrator.request_save("GameProgress").await.unwrap();
    let report = orchestrator
        .shutdown(Duration::from_secs(5))
        .await
        .unwrap()
        .expect("final flush runs");
    assert_eq!(report.saved, vec!["GameProgress"]);
    assert!(storage.keys().await.contains(&"GameProgress".to_string()));
}

#[tokio::test]
async fn test_shutdown_waits_for_in_flight_flush() {
    let storage = GatedStorage::closed();
    let orchestrator = orchestrator_with(storage.clone());
    orchestrator.register_module(Note::new("A", &[])).await.unwrap();
    orchestrator.register_module(Note::new("B", &[])).await.unwrap();

    orchestrator.request_save("A").await.unwrap();
    let _first = orchestrator.force_flush().await.unwrap().unwrap();
    storage.wait_for_write().await;
    orchestrator.request_save("B").await.unwrap();

    let releaser = {
        let storage = storage.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            storage.release();
        })
    };

    let report = orchestrator
        .shutdown(Duration::from_secs(5))
        .await
        .unwrap()
        .expect("final flush runs after the in-flight one");
    releaser.await.unwrap();

    assert_eq!(report.saved, vec!["B"]);
    assert_eq!(storage.writes(), 2);
    assert!(!orchestrator.is_flushing());
}

#[tokio::test]
async fn test_shutdown_gives_up_after_timeout() {
    let storage = GatedStorage::closed();
    let orchestrator = orchestrator_with(storage.clone());
    orchestrator.register_module(Note::new("A", &[])).await.unwrap();
    orchestrator.request_save("A").await.unwrap();

    let result = orchestrator.shutdown(Duration::from_millis(50)).await.unwrap();
    assert!(result.is_none());
    assert_eq!(storage.writes(), 0);

    storage.release();
    orchestrator.wait_idle().await;
}
