//! Snapshot isolation through the engine context.

use tempfile::TempDir;

use ferrolog::config::EngineConfig;
use ferrolog::context::LogEngineContext;
use ferrolog::mvcc::MVCCID_NULL;
use ferrolog::recovery::NoopApplier;

#[test]
fn test_snapshot_excludes_uncommitted_writer() {
    let dir = TempDir::new().unwrap();
    let ctx = LogEngineContext::open(EngineConfig::new(dir.path())).unwrap();

    let writer = ctx.begin_transaction().unwrap();
    ctx.log_update(writer, 0, 1, 0, b"v0", b"v1").unwrap();
    let writer_id = ctx
        .enumerate_transactions()
        .iter()
        .find(|t| t.trid == writer.trid)
        .unwrap()
        .mvccid;
    assert_ne!(writer_id, MVCCID_NULL);

    let reader = ctx.begin_transaction().unwrap();
    let snap = ctx.mvcc_snapshot(reader);
    assert!(!snap.is_visible(writer_id, MVCCID_NULL));
    assert!(snap.is_active(writer_id));
}

#[test]
fn test_snapshot_taken_before_commit_stays_stable() {
    let dir = TempDir::new().unwrap();
    let ctx = LogEngineContext::open(EngineConfig::new(dir.path())).unwrap();

    let writer = ctx.begin_transaction().unwrap();
    ctx.log_update(writer, 0, 1, 0, b"v0", b"v1").unwrap();
    let writer_id = ctx.enumerate_transactions()[0].mvccid;

    let reader = ctx.begin_transaction().unwrap();
    let before = ctx.mvcc_snapshot(reader);

    ctx.commit_transaction(writer, &mut NoopApplier).unwrap();

    // The old snapshot still excludes the writer; a fresh one sees it.
    assert!(!before.is_visible(writer_id, MVCCID_NULL));
    let after = ctx.mvcc_snapshot(reader);
    assert!(after.is_visible(writer_id, MVCCID_NULL));
}

#[test]
fn test_own_changes_always_visible() {
    let dir = TempDir::new().unwrap();
    let ctx = LogEngineContext::open(EngineConfig::new(dir.path())).unwrap();

    let writer = ctx.begin_transaction().unwrap();
    ctx.log_update(writer, 0, 1, 0, b"v0", b"v1").unwrap();
    let writer_id = ctx.enumerate_transactions()[0].mvccid;

    let snap = ctx.mvcc_snapshot(writer);
    assert!(snap.is_visible(writer_id, writer_id));
}

#[test]
fn test_aborted_writer_leaves_active_set() {
    let dir = TempDir::new().unwrap();
    let ctx = LogEngineContext::open(EngineConfig::new(dir.path())).unwrap();

    let writer = ctx.begin_transaction().unwrap();
    ctx.log_update(writer, 0, 1, 0, b"v0", b"v1").unwrap();
    let writer_id = ctx.enumerate_transactions()[0].mvccid;
    ctx.abort_transaction(writer, &mut NoopApplier).unwrap();

    let reader = ctx.begin_transaction().unwrap();
    let snap = ctx.mvcc_snapshot(reader);
    // No longer active; the log's abort record is what voids its
    // effects, not the status bit.
    assert!(!snap.is_active(writer_id));
}

#[test]
fn test_oldest_active_advances_after_release() {
    let dir = TempDir::new().unwrap();
    let ctx = LogEngineContext::open(EngineConfig::new(dir.path())).unwrap();

    let writer = ctx.begin_transaction().unwrap();
    ctx.log_update(writer, 0, 1, 0, b"v0", b"v1").unwrap();
    let writer_id = ctx.enumerate_transactions()[0].mvccid;
    assert!(ctx.oldest_active_mvccid() <= writer_id);

    ctx.commit_transaction(writer, &mut NoopApplier).unwrap();
    assert!(ctx.oldest_active_mvccid() > writer_id);
}

#[test]
fn test_mvccid_space_continues_after_restart() {
    let dir = TempDir::new().unwrap();
    let first_id;
    {
        let ctx = LogEngineContext::open(EngineConfig::new(dir.path())).unwrap();
        let writer = ctx.begin_transaction().unwrap();
        ctx.log_update(writer, 0, 1, 0, b"v0", b"v1").unwrap();
        first_id = ctx.enumerate_transactions()[0].mvccid;
        ctx.commit_transaction(writer, &mut NoopApplier).unwrap();
        ctx.checkpoint().unwrap();
    }

    let (ctx, _) =
        LogEngineContext::recover(EngineConfig::new(dir.path()), &mut NoopApplier).unwrap();
    let writer = ctx.begin_transaction().unwrap();
    ctx.log_update(writer, 0, 2, 0, b"w0", b"w1").unwrap();
    let second_id = ctx.enumerate_transactions()[0].mvccid;
    assert!(second_id > first_id);
}
