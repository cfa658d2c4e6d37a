use anyhow::Result;
use intruder::intruder::clock::SystemClock;
use intruder::storage::{RecordStore, SqliteBackend};
use intruder::{
    DelaySettings, IntruderConfig, IntruderHooks, IntruderManager, RecordType,
    RecordTypeSettings, StorageSettings,
};
use std::sync::Arc;
use std::time::Duration;

fn config() -> IntruderConfig {
    IntruderConfig::new()
        .with_record_type(
            RecordType::Username,
            RecordTypeSettings::new(3, Duration::from_secs(60), Duration::from_secs(600)),
        )
        .with_delay(DelaySettings::none())
}

async fn manager_at(path: &std::path::Path) -> Result<IntruderManager> {
    let backend = SqliteBackend::open(path.to_path_buf()).await?;
    Ok(IntruderManager::new(
        config(),
        Some(RecordStore::new(Arc::new(backend))),
        IntruderHooks::default(),
        Arc::new(SystemClock),
    ))
}

#[tokio::test]
async fn lockout_survives_restart() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("intruder.db");

    {
        let manager = manager_at(&path).await?;
        manager.mark(RecordType::Username, "alice").await?;
        manager.mark(RecordType::Username, "alice").await?;
        manager.close().await;
    }

    let manager = manager_at(&path).await?;
    let attempts = manager
        .record(RecordType::Username, "alice")
        .await?
        .map(|report| report.record.attempts);
    assert_eq!(attempts, Some(2));

    let third = manager.mark(RecordType::Username, "alice").await;
    assert!(matches!(third, Err(err) if err.is_locked()));
    manager.close().await;

    // The alerted flag persists, so a restart does not alert again.
    let manager = manager_at(&path).await?;
    let report = manager.record(RecordType::Username, "alice").await?;
    assert!(report.is_some_and(|report| report.record.alerted));
    manager.close().await;
    Ok(())
}

#[tokio::test]
async fn clear_removes_persisted_record() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("intruder.db");

    let manager = manager_at(&path).await?;
    manager.mark(RecordType::Username, "bob").await?;
    manager.clear(RecordType::Username, "bob").await?;
    manager.close().await;

    let manager = manager_at(&path).await?;
    assert!(manager.records(None, 10).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn open_from_settings_uses_sqlite() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let storage = StorageSettings::Sqlite {
        path: dir.path().join("intruder.db"),
    };
    let manager = IntruderManager::open(config(), &storage, IntruderHooks::default()).await;
    assert_eq!(manager.backend_name(), Some("sqlite"));

    manager.mark(RecordType::Username, "carol").await?;
    let reports = manager.records(Some(RecordType::Username), 10).await?;
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].record.subject, "carol");

    let outcome = manager.purge_now().await?;
    assert_eq!(outcome.removed, 0);
    manager.close().await;
    Ok(())
}
