//! Crash and restart: committed work survives, unfinished work is
//! rolled back, and repeating recovery changes nothing.

use std::collections::HashMap;

use tempfile::TempDir;

use ferrolog::config::EngineConfig;
use ferrolog::context::LogEngineContext;
use ferrolog::log::Lsa;
use ferrolog::recovery::PageApplier;

#[derive(Default, Clone)]
struct MemPages {
    values: HashMap<i64, Vec<u8>>,
}

impl PageApplier for MemPages {
    fn page_lsa(&self, _page_id: i64) -> Lsa {
        Lsa::NULL
    }

    fn apply_redo(&mut self, _rcv: u32, page_id: i64, _offset: i32, data: &[u8], _lsa: Lsa) {
        self.values.insert(page_id, data.to_vec());
    }

    fn apply_undo(&mut self, _rcv: u32, page_id: i64, _offset: i32, data: &[u8], _lsa: Lsa) {
        self.values.insert(page_id, data.to_vec());
    }
}

#[test]
fn test_committed_survives_active_rolled_back() {
    let dir = TempDir::new().unwrap();
    let mut pages = MemPages::default();

    {
        let ctx = LogEngineContext::open(EngineConfig::new(dir.path())).unwrap();

        let committed = ctx.begin_transaction().unwrap();
        ctx.log_update(committed, 0, 1, 0, b"c0", b"c1").unwrap();
        pages.values.insert(1, b"c1".to_vec());

        let active = ctx.begin_transaction().unwrap();
        ctx.log_update(active, 0, 2, 0, b"a0", b"a1").unwrap();
        pages.values.insert(2, b"a1".to_vec());

        // The commit's flush makes the active transaction's record
        // durable too; then the process dies.
        ctx.commit_transaction(committed, &mut pages).unwrap();
    }

    let (ctx, report) =
        LogEngineContext::recover(EngineConfig::new(dir.path()), &mut pages).unwrap();
    assert_eq!(report.trans_analyzed, 1);
    assert_eq!(report.trans_undone, 1);
    assert_eq!(report.loose_ends, 0);
    assert!(report.records_redone > 0);

    assert_eq!(pages.values[&1], b"c1");
    assert_eq!(pages.values[&2], b"a0");
    assert!(ctx.enumerate_transactions().is_empty());
}

#[test]
fn test_recovery_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let mut pages = MemPages::default();

    {
        let ctx = LogEngineContext::open(EngineConfig::new(dir.path())).unwrap();
        let committed = ctx.begin_transaction().unwrap();
        ctx.log_update(committed, 0, 1, 0, b"c0", b"c1").unwrap();
        pages.values.insert(1, b"c1".to_vec());
        let active = ctx.begin_transaction().unwrap();
        ctx.log_update(active, 0, 2, 0, b"a0", b"a1").unwrap();
        pages.values.insert(2, b"a1".to_vec());
        ctx.commit_transaction(committed, &mut pages).unwrap();
    }

    let (ctx, _) =
        LogEngineContext::recover(EngineConfig::new(dir.path()), &mut pages).unwrap();
    let after_first = pages.values.clone();
    drop(ctx);

    // A second restart finds the rollback already logged and repeats
    // nothing destructive.
    let (_, report) =
        LogEngineContext::recover(EngineConfig::new(dir.path()), &mut pages).unwrap();
    assert_eq!(report.trans_undone, 0);
    assert_eq!(pages.values, after_first);
}

#[test]
fn test_recovery_from_checkpoint() {
    let dir = TempDir::new().unwrap();
    let mut pages = MemPages::default();

    {
        let ctx = LogEngineContext::open(EngineConfig::new(dir.path())).unwrap();
        let early = ctx.begin_transaction().unwrap();
        ctx.log_update(early, 0, 1, 0, b"e0", b"e1").unwrap();
        pages.values.insert(1, b"e1".to_vec());
        ctx.commit_transaction(early, &mut pages).unwrap();

        ctx.checkpoint().unwrap();

        let late = ctx.begin_transaction().unwrap();
        ctx.log_update(late, 0, 2, 0, b"l0", b"l1").unwrap();
        pages.values.insert(2, b"l1".to_vec());
        ctx.commit_transaction(late, &mut pages).unwrap();

        let open = ctx.begin_transaction().unwrap();
        ctx.log_update(open, 0, 3, 0, b"o0", b"o1").unwrap();
        pages.values.insert(3, b"o1".to_vec());
        ctx.flush().unwrap();
    }

    let (_, report) =
        LogEngineContext::recover(EngineConfig::new(dir.path()), &mut pages).unwrap();
    assert_eq!(report.trans_undone, 1);
    assert_eq!(pages.values[&1], b"e1");
    assert_eq!(pages.values[&2], b"l1");
    assert_eq!(pages.values[&3], b"o0");
}

#[test]
fn test_postpone_actions_survive_restart() {
    let dir = TempDir::new().unwrap();
    let mut pages = MemPages::default();

    {
        let ctx = LogEngineContext::open(EngineConfig::new(dir.path())).unwrap();
        let handle = ctx.begin_transaction().unwrap();
        ctx.log_update(handle, 0, 1, 0, b"d0", b"d1").unwrap();
        pages.values.insert(1, b"d1".to_vec());
        ctx.log_postpone(handle, 0, 9, 0, b"deferred").unwrap();
        ctx.commit_transaction(handle, &mut pages).unwrap();
        // The deferred action ran at commit.
        assert_eq!(pages.values[&9], b"deferred");
    }

    let (_, report) =
        LogEngineContext::recover(EngineConfig::new(dir.path()), &mut pages).unwrap();
    assert_eq!(report.trans_undone, 0);
    assert_eq!(pages.values[&1], b"d1");
    assert_eq!(pages.values[&9], b"deferred");
}

#[test]
fn test_restart_without_prior_log_is_fresh() {
    let dir = TempDir::new().unwrap();
    let mut pages = MemPages::default();
    let (ctx, report) =
        LogEngineContext::recover(EngineConfig::new(dir.path()), &mut pages).unwrap();
    assert_eq!(report.trans_analyzed, 0);
    assert_eq!(report.records_redone, 0);
    let handle = ctx.begin_transaction().unwrap();
    ctx.log_update(handle, 0, 1, 0, b"f0", b"f1").unwrap();
    ctx.commit_transaction(handle, &mut pages).unwrap();
}
