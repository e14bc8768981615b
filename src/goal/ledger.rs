use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;

use crate::crawler::run::RunId;
use crate::extract::ItemKey;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("dedup ledger unavailable for {0}")]
    Unavailable(RunId),
}

type Shard = Arc<Mutex<HashSet<ItemKey>>>;

/// Items already credited, keyed by (run, item key).
///
/// Sharded by run: runs never contend on each other's entries, and within a
/// run [`DedupLedger::insert_if_absent`] is atomic. Entries are never removed.
#[derive(Debug, Default)]
pub struct DedupLedger {
    shards: RwLock<HashMap<RunId, Shard>>,
}

impl DedupLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `run` has already been credited for `key`
    pub fn seen(&self, run: &RunId, key: &ItemKey) -> Result<bool, LedgerError> {
        let Some(shard) = self.existing_shard(run)? else {
            return Ok(false);
        };
        let keys = shard.lock().map_err(|_| LedgerError::Unavailable(run.clone()))?;
        Ok(keys.contains(key))
    }

    /// Record a credit; recording an existing pair is a no-op
    pub fn record(&self, run: &RunId, key: &ItemKey) -> Result<(), LedgerError> {
        self.insert_if_absent(run, key).map(|_| ())
    }

    /// Record a credit, returning `true` if the pair was new
    pub fn insert_if_absent(&self, run: &RunId, key: &ItemKey) -> Result<bool, LedgerError> {
        let shard = self.shard(run)?;
        let mut keys = shard.lock().map_err(|_| LedgerError::Unavailable(run.clone()))?;
        Ok(keys.insert(key.clone()))
    }

    /// Number of items credited to `run`
    pub fn run_len(&self, run: &RunId) -> Result<usize, LedgerError> {
        let Some(shard) = self.existing_shard(run)? else {
            return Ok(0);
        };
        let keys = shard.lock().map_err(|_| LedgerError::Unavailable(run.clone()))?;
        Ok(keys.len())
    }

    fn existing_shard(&self, run: &RunId) -> Result<Option<Shard>, LedgerError> {
        let shards = self.shards.read().map_err(|_| LedgerError::Unavailable(run.clone()))?;
        Ok(shards.get(run).cloned())
    }

    fn shard(&self, run: &RunId) -> Result<Shard, LedgerError> {
        if let Some(shard) = self.existing_shard(run)? {
            return Ok(shard);
        }
        let mut shards = self.shards.write().map_err(|_| LedgerError::Unavailable(run.clone()))?;
        Ok(shards.entry(run.clone()).or_default().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_record_is_idempotent() {
        let ledger = DedupLedger::new();
        let run = RunId::for_index(0);
        let key = ItemKey::from("thread:1");

        assert!(!ledger.seen(&run, &key).unwrap());
        ledger.record(&run, &key).unwrap();
        ledger.record(&run, &key).unwrap();

        assert!(ledger.seen(&run, &key).unwrap());
        assert_eq!(ledger.run_len(&run).unwrap(), 1);
    }

    #[test]
    fn test_runs_are_isolated() {
        let ledger = DedupLedger::new();
        let key = ItemKey::from("a");

        assert!(ledger.insert_if_absent(&RunId::for_index(0), &key).unwrap());
        assert!(!ledger.seen(&RunId::for_index(1), &key).unwrap());
        assert!(ledger.insert_if_absent(&RunId::for_index(1), &key).unwrap());
        assert!(!ledger.insert_if_absent(&RunId::for_index(0), &key).unwrap());
    }

    #[test]
    fn test_concurrent_inserts_credit_once() {
        let ledger = Arc::new(DedupLedger::new());
        let run = RunId::for_index(0);
        let key = ItemKey::from("post:42");

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let ledger = ledger.clone();
                let run = run.clone();
                let key = key.clone();
                thread::spawn(move || ledger.insert_if_absent(&run, &key).unwrap())
            })
            .collect();

        let credited = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|new| *new)
            .count();
        assert_eq!(credited, 1);
    }

    #[test]
    fn test_concurrent_runs_keep_all_entries() {
        let ledger = Arc::new(DedupLedger::new());

        let handles: Vec<_> = (0..8)
            .map(|index| {
                let ledger = ledger.clone();
                thread::spawn(move || {
                    let run = RunId::for_index(index);
                    for item in 0..100 {
                        ledger.record(&run, &ItemKey::new(format!("item-{}", item))).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        for index in 0..8 {
            assert_eq!(ledger.run_len(&RunId::for_index(index)).unwrap(), 100);
        }
    }
}
