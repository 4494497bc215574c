//! Global unique-index statistics
//!
//! Transactions accumulate per-index deltas privately and reflect them
//! here at commit (or while committing a logical sysop). The table is
//! sharded: each shard is an independent mutex over a hash map, so
//! commits touching different indexes rarely contend. Capacity is fixed
//! at construction; exhaustion is an error, not a reallocation.

use std::collections::HashMap;
use std::sync::Mutex;

use thiserror::Error;

use crate::log::Lsa;

/// B-tree index identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct BtreeId(pub i64);

/// Signed change to one index's counters, accumulated per transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UniqueStatsDelta {
    pub num_keys: i64,
    pub num_nulls: i64,
    pub num_objects: i64,
}

/// Global counters for one unique index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UniqueStats {
    pub num_keys: i64,
    pub num_nulls: i64,
    pub num_objects: i64,
    /// Address of the last record whose commit updated these counters.
    pub last_log_lsa: Lsa,
}

#[derive(Debug, Error)]
pub enum StatsError {
    #[error("unique statistics table full ({capacity} indexes)")]
    TableFull { capacity: usize },
}

const SHARD_COUNT: usize = 16;

/// Sharded table of global unique-index statistics.
pub struct UniqueStatsTable {
    shards: Vec<Mutex<HashMap<BtreeId, UniqueStats>>>,
    capacity_per_shard: usize,
}

impl UniqueStatsTable {
    pub fn new(capacity: usize) -> Self {
        let capacity_per_shard = capacity.div_ceil(SHARD_COUNT);
        let shards = (0..SHARD_COUNT)
            .map(|_| Mutex::new(HashMap::with_capacity(capacity_per_shard)))
            .collect();
        Self {
            shards,
            capacity_per_shard,
        }
    }

    fn shard(&self, btid: BtreeId) -> &Mutex<HashMap<BtreeId, UniqueStats>> {
        &self.shards[(btid.0 as u64 as usize) % SHARD_COUNT]
    }

    /// Apply one transaction's accumulated delta for `btid`, stamping the
    /// commit record's address.
    pub fn update_by_delta(
        &self,
        btid: BtreeId,
        delta: UniqueStatsDelta,
        commit_lsa: Lsa,
    ) -> Result<(), StatsError> {
        let mut shard = self.shard(btid).lock().unwrap();
        if !shard.contains_key(&btid) && shard.len() == self.capacity_per_shard {
            return Err(StatsError::TableFull {
                capacity: self.capacity_per_shard * SHARD_COUNT,
            });
        }
        let entry = shard.entry(btid).or_default();
        entry.num_keys += delta.num_keys;
        entry.num_nulls += delta.num_nulls;
        entry.num_objects += delta.num_objects;
        entry.last_log_lsa = commit_lsa;
        Ok(())
    }

    pub fn get(&self, btid: BtreeId) -> Option<UniqueStats> {
        self.shard(btid).lock().unwrap().get(&btid).copied()
    }

    /// Drop an index's counters (index deleted).
    pub fn remove(&self, btid: BtreeId) -> Option<UniqueStats> {
        self.shard(btid).lock().unwrap().remove(&btid)
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().unwrap().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deltas_accumulate_across_commits() {
        let table = UniqueStatsTable::new(64);
        let btid = BtreeId(3);
        table
            .update_by_delta(
                btid,
                UniqueStatsDelta {
                    num_keys: 5,
                    num_nulls: 1,
                    num_objects: 5,
                },
                Lsa::new(1, 0),
            )
            .unwrap();
        table
            .update_by_delta(
                btid,
                UniqueStatsDelta {
                    num_keys: -2,
                    num_nulls: 0,
                    num_objects: -2,
                },
                Lsa::new(2, 64),
            )
            .unwrap();

        let stats = table.get(btid).unwrap();
        assert_eq!(stats.num_keys, 3);
        assert_eq!(stats.num_nulls, 1);
        assert_eq!(stats.num_objects, 3);
        assert_eq!(stats.last_log_lsa, Lsa::new(2, 64));
    }

    #[test]
    fn test_missing_index_is_none() {
        let table = UniqueStatsTable::new(64);
        assert!(table.get(BtreeId(99)).is_none());
    }

    #[test]
    fn test_remove_deleted_index() {
        let table = UniqueStatsTable::new(64);
        let btid = BtreeId(1);
        table
            .update_by_delta(btid, UniqueStatsDelta::default(), Lsa::new(0, 0))
            .unwrap();
        assert!(table.remove(btid).is_some());
        assert!(table.get(btid).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn test_capacity_exhaustion() {
        let table = UniqueStatsTable::new(16); // one entry per shard
        let mut full = false;
        for id in 0..64 {
            if table
                .update_by_delta(BtreeId(id), UniqueStatsDelta::default(), Lsa::new(0, 0))
                .is_err()
            {
                full = true;
                break;
            }
        }
        assert!(full);
    }
}
