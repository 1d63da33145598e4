use gymvault_backup::BackupCoordinator;
use gymvault_backup::error::ErrorKind;
use gymvault_compress::Compression;
use gymvault_config::BackupConfig;
use gymvault_store::MockSource;
use rstest::rstest;
use std::sync::Arc;
use tempfile::TempDir;

fn setup(configure: impl FnOnce(&mut BackupConfig)) -> (TempDir, Arc<MockSource>, BackupCoordinator) {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(MockSource::with_contents(dir.path().join("gym.db"), b"version one").unwrap());
    let mut config = BackupConfig { directory: dir.path().join("backups"), ..Default::default() };
    configure(&mut config);
    let backups = BackupCoordinator::new(source.clone(), config).unwrap();
    (dir, source, backups)
}

fn live(dir: &TempDir) -> Vec<u8> {
    std::fs::read(dir.path().join("gym.db")).unwrap()
}

#[tokio::test]
async fn test_failed_snapshot_leaves_nothing_behind() {
    let (dir, source, backups) = setup(|_| {});
    source.fail_snapshots(true);

    let err = backups.create_backup("doomed").await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::Snapshot));
    let files: Vec<_> = std::fs::read_dir(dir.path().join("backups")).unwrap().collect();
    assert!(files.is_empty());
    assert!(backups.list_backups().await.is_empty());
}

#[tokio::test]
async fn test_restore_aborts_when_safety_backup_fails() {
    let (dir, source, backups) = setup(|_| {});
    let created = backups.create_backup("v1").await.unwrap();
    std::fs::write(dir.path().join("gym.db"), b"version two").unwrap();

    source.fail_snapshots(true);
    let err = backups.restore_backup(&created.filename).await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::SafetyBackup));
    assert_eq!(source.restore_count(), 0);
    assert_eq!(live(&dir), b"version two");
}

#[tokio::test]
async fn test_failed_restore_names_safety_backup() {
    let (dir, source, backups) = setup(|_| {});
    let created = backups.create_backup("v1").await.unwrap();
    std::fs::write(dir.path().join("gym.db"), b"version two").unwrap();

    source.fail_restores(true);
    let err = backups.restore_backup(&created.filename).await.unwrap_err();
    let ErrorKind::Restore { safety_backup } = &*err else {
        panic!("expected a restore error, got {err:?}");
    };

    // The safety backup is a regular, verifiable backup of the pre-restore state.
    assert!(backups.verify_backup(safety_backup).await.unwrap());
    source.fail_restores(false);
    backups.restore_backup(safety_backup).await.unwrap();
    assert_eq!(live(&dir), b"version two");
}

#[rstest]
#[case(Compression::Gzip)]
#[case(Compression::Bzip2)]
#[tokio::test]
async fn test_restore_from_each_compression_format(#[case] format: Compression) {
    let (dir, source, backups) = setup(|config| config.compression = format);
    let created = backups.create_backup("v1").await.unwrap();
    backups
        .store()
        .update_catalog(|catalog| catalog.get_mut(&created.filename).unwrap().created_at -= time::Duration::days(10))
        .await
        .unwrap();
    std::fs::write(dir.path().join("gym.db"), b"version two").unwrap();
    backups.create_backup("v2").await.unwrap();
    assert!(backups.get_backup(&created.filename).await.unwrap().unwrap().compressed);

    backups.restore_backup(&created.filename).await.unwrap();
    assert_eq!(live(&dir), b"version one");
    assert_eq!(source.restore_count(), 1);
}

#[tokio::test]
async fn test_compressed_record_without_digest_is_checked_by_content() {
    let (dir, _source, backups) = setup(|_| {});
    let created = backups.create_backup("v1").await.unwrap();
    // A compression pass interrupted before its catalog update.
    Compression::Gzip.compress_file(&created.path).unwrap();
    assert!(backups.verify_backup(&created.filename).await.unwrap());

    std::fs::write(dir.path().join("gym.db"), b"version two").unwrap();
    backups.restore_backup(&created.filename).await.unwrap();
    assert_eq!(live(&dir), b"version one");
}

#[tokio::test]
async fn test_retention_recovers_interrupted_compression() {
    let (_dir, _source, backups) = setup(|_| {});
    let created = backups.create_backup("v1").await.unwrap();
    Compression::Gzip.compress_file(&created.path).unwrap();
    backups
        .store()
        .update_catalog(|catalog| catalog.get_mut(&created.filename).unwrap().created_at -= time::Duration::days(10))
        .await
        .unwrap();

    backups.create_backup("v2").await.unwrap();
    let record = backups.get_backup(&created.filename).await.unwrap().unwrap();
    assert!(record.compressed);
    assert_eq!(record.compression, Some(Compression::Gzip));
    assert!(record.compressed_hash.is_some());
}
