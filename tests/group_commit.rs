//! Commit durability through the engine context, with and without
//! group commit.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tempfile::TempDir;

use ferrolog::config::EngineConfig;
use ferrolog::context::LogEngineContext;
use ferrolog::recovery::NoopApplier;

#[test]
fn test_commits_are_durable_when_acknowledged() {
    let dir = TempDir::new().unwrap();
    let ctx = LogEngineContext::open(EngineConfig::new(dir.path())).unwrap();

    let handle = ctx.begin_transaction().unwrap();
    ctx.log_update(handle, 0, 1, 0, b"old", b"new").unwrap();
    let commit_lsa = ctx.commit_transaction(handle, &mut NoopApplier).unwrap();
    assert!(ctx.durability_boundary() > commit_lsa);
}

#[test]
fn test_concurrent_commits_under_group_commit() {
    let dir = TempDir::new().unwrap();
    let config =
        EngineConfig::new(dir.path()).with_group_commit(Duration::from_millis(10));
    let ctx = Arc::new(LogEngineContext::open(config).unwrap());

    let threads = 8;
    let mut handles = Vec::new();
    for t in 0..threads {
        let ctx = Arc::clone(&ctx);
        handles.push(thread::spawn(move || {
            let handle = ctx.begin_transaction().unwrap();
            ctx.log_update(handle, 0, t as i64, 0, b"old", b"new")
                .unwrap();
            let lsa = ctx.commit_transaction(handle, &mut NoopApplier).unwrap();
            assert!(ctx.durability_boundary() > lsa);
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    // Every transaction finished and released its slot.
    assert!(ctx.enumerate_transactions().is_empty());
}

#[test]
fn test_commit_order_versus_durability_boundary() {
    let dir = TempDir::new().unwrap();
    let ctx = LogEngineContext::open(EngineConfig::new(dir.path())).unwrap();

    let mut last = None;
    for i in 0..10 {
        let handle = ctx.begin_transaction().unwrap();
        ctx.log_update(handle, 0, i, 0, b"a", b"b").unwrap();
        let lsa = ctx.commit_transaction(handle, &mut NoopApplier).unwrap();
        if let Some(prev) = last {
            assert!(lsa > prev);
        }
        last = Some(lsa);
    }
}
