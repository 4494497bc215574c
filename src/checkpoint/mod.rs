//! Checkpoints
//!
//! A checkpoint bounds how much log recovery must replay. It writes a
//! marker record whose redo horizon is the oldest address any live
//! transaction still needs, plus a side record carrying JSON summaries
//! of every live transaction and open system operation. Analysis seeds
//! its table rebuild from those summaries and starts its scan at the
//! horizon instead of the start of the log.

use serde::{Deserialize, Serialize};

use crate::log::{Lsa, Trid};
use crate::mvcc::Mvccid;
use crate::txn::{TransactionState, TransactionSummary};

/// One live transaction as captured by a checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointTransSummary {
    pub trid: Trid,
    pub state: TransactionState,
    pub head_lsa: Lsa,
    pub tail_lsa: Lsa,
    pub undo_nxlsa: Lsa,
    pub posp_nxlsa: Lsa,
    pub mvccid: Mvccid,
    pub num_log_records: u64,
}

impl From<TransactionSummary> for CheckpointTransSummary {
    fn from(s: TransactionSummary) -> Self {
        Self {
            trid: s.trid,
            state: s.state,
            head_lsa: s.head_lsa,
            tail_lsa: s.tail_lsa,
            undo_nxlsa: s.undo_nxlsa,
            posp_nxlsa: s.posp_nxlsa,
            mvccid: s.mvccid,
            num_log_records: s.num_log_records,
        }
    }
}

/// One open system operation as captured by a checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointSysopSummary {
    pub trid: Trid,
    pub lastparent_lsa: Lsa,
    pub posp_lsa: Lsa,
}

/// Everything a checkpoint's side record carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointPayload {
    pub redo_lsa: Lsa,
    pub next_mvccid: Mvccid,
    pub trans: Vec<CheckpointTransSummary>,
    pub sysops: Vec<CheckpointSysopSummary>,
}

impl CheckpointPayload {
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn decode(data: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(data)
    }
}

/// The redo horizon: the oldest address the next restart must replay
/// from. No live transaction's chain may start after it, and nothing
/// beyond the durability boundary can be claimed.
pub fn compute_redo_horizon(min_live_head: Lsa, durability_boundary: Lsa) -> Lsa {
    if min_live_head.is_null() {
        durability_boundary
    } else {
        min_live_head.min(durability_boundary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_horizon_without_live_transactions() {
        let boundary = Lsa::new(40, 0);
        assert_eq!(compute_redo_horizon(Lsa::NULL, boundary), boundary);
    }

    #[test]
    fn test_horizon_bounded_by_oldest_live_head() {
        let head = Lsa::new(10, 64);
        let boundary = Lsa::new(40, 0);
        assert_eq!(compute_redo_horizon(head, boundary), head);
    }

    #[test]
    fn test_payload_roundtrip() {
        let payload = CheckpointPayload {
            redo_lsa: Lsa::new(10, 64),
            next_mvccid: 77,
            trans: vec![CheckpointTransSummary {
                trid: 3,
                state: TransactionState::Active,
                head_lsa: Lsa::new(10, 64),
                tail_lsa: Lsa::new(12, 0),
                undo_nxlsa: Lsa::new(12, 0),
                posp_nxlsa: Lsa::NULL,
                mvccid: 76,
                num_log_records: 5,
            }],
            sysops: vec![CheckpointSysopSummary {
                trid: 3,
                lastparent_lsa: Lsa::new(11, 0),
                posp_lsa: Lsa::NULL,
            }],
        };
        let bytes = payload.encode().unwrap();
        let decoded = CheckpointPayload::decode(&bytes).unwrap();
        assert_eq!(decoded.redo_lsa, payload.redo_lsa);
        assert_eq!(decoded.trans.len(), 1);
        assert_eq!(decoded.trans[0].trid, 3);
        assert_eq!(decoded.sysops[0].lastparent_lsa, Lsa::new(11, 0));
    }
}
