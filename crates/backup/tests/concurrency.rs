use gymvault_backup::{BackupCoordinator, ScheduleTiming};
use gymvault_config::BackupConfig;
use gymvault_store::MockSource;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::Instant;

fn setup() -> (TempDir, Arc<MockSource>, BackupCoordinator) {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(MockSource::with_contents(dir.path().join("gym.db"), b"version one").unwrap());
    let config = BackupConfig { directory: dir.path().join("backups"), ..Default::default() };
    let backups = BackupCoordinator::new(source.clone(), config).unwrap();
    (dir, source, backups)
}

/// Snapshot artifacts in the backup directory, ignoring the catalog and any
/// hidden temporary files.
fn snapshot_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir.join("backups"))
        .unwrap()
        .map(|entry| entry.unwrap().file_name().into_string().unwrap())
        .filter(|name| name.starts_with("gym_backup_"))
        .collect();
    names.sort();
    names
}

async fn wait_until(what: &str, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stopping_scheduler_lets_running_backup_finish() {
    let (dir, source, backups) = setup();
    let backups = Arc::new(backups.with_schedule_timing(ScheduleTiming {
        interval: Duration::from_millis(100),
        tick: Duration::from_millis(10),
        backoff: Duration::from_secs(1),
        stop_timeout: Duration::from_millis(200),
    }));
    source.delay_snapshots(Duration::from_millis(1500));

    assert!(backups.start_scheduled_backups());
    wait_until("the scheduled snapshot to start", || !snapshot_files(dir.path()).is_empty()).await;

    let stopping = Instant::now();
    assert!(backups.stop_scheduled_backups().await);
    assert!(stopping.elapsed() < Duration::from_millis(1500));
    assert!(!backups.is_scheduler_running());

    let mut listed = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(10);
    while listed.is_empty() {
        assert!(Instant::now() < deadline, "the interrupted backup was never catalogued");
        tokio::time::sleep(Duration::from_millis(50)).await;
        listed = backups.list_backups().await;
    }
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].description, "Automatic backup");
    assert_eq!(snapshot_files(dir.path()), [listed[0].filename.clone()]);
    assert!(backups.verify_backup(&listed[0].filename).await.unwrap());

    // Stopped means no further runs once the last one is done.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(source.snapshot_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_retention_waits_for_restore() {
    let (dir, source, backups) = setup();
    let backups = Arc::new(backups);
    let old = backups.create_backup("v1").await.unwrap();
    // Old enough that the next retention pass compresses it.
    backups
        .store()
        .update_catalog(|catalog| catalog.get_mut(&old.filename).unwrap().created_at -= time::Duration::days(10))
        .await
        .unwrap();
    std::fs::write(dir.path().join("gym.db"), b"version two").unwrap();

    // Hold the restore in its safety backup while another backup comes and goes.
    source.delay_snapshots(Duration::from_millis(500));
    let restoring = tokio::spawn({
        let backups = backups.clone();
        let filename = old.filename.clone();
        async move { backups.restore_backup(&filename).await }
    });
    wait_until("the safety backup to start", || snapshot_files(dir.path()).len() == 2).await;
    source.delay_snapshots(Duration::ZERO);
    let during = backups.create_backup("during restore").await.unwrap();

    let restored = restoring.await.unwrap().unwrap();
    assert_eq!(restored.filename, old.filename);
    assert_eq!(std::fs::read(dir.path().join("gym.db")).unwrap(), b"version one");

    // Retention still ran, after the restore.
    let record = backups.get_backup(&old.filename).await.unwrap().unwrap();
    assert!(record.compressed);
    let listed: Vec<_> = backups.list_backups().await.into_iter().map(|record| record.filename).collect();
    assert!(listed.contains(&restored.safety_backup));
    assert!(listed.contains(&during.filename));
    assert_eq!(listed.len(), 3);
}
