//! In-memory ordered store implementation for testing and embedded use.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use crate::error::{QuarryError, Result};
use crate::store::{BatchOp, Store, WriteBatch};

/// An in-memory [`Store`] backed by an ordered map.
///
/// Prefix scans iterate the underlying `BTreeMap` range, so keys come back
/// in ascending byte order just like an on-disk ordered engine.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
    closed: AtomicBool,
}

impl MemoryStore {
    /// Create a new, empty store.
    pub fn new() -> Self {
        MemoryStore {
            entries: RwLock::new(BTreeMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// The number of keys currently stored.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn check_closed(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(QuarryError::internal("Store is closed."))
        } else {
            Ok(())
        }
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.check_closed()?;
        Ok(self.entries.read().get(key).cloned())
    }

    fn insert(&self, key: &str, value: &[u8]) -> Result<()> {
        self.check_closed()?;
        self.entries.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.check_closed()?;
        self.entries.write().remove(key);
        Ok(())
    }

    fn batch_write(&self, batch: WriteBatch) -> Result<()> {
        self.check_closed()?;
        let mut entries = self.entries.write();
        for op in batch.ops() {
            match op {
                BatchOp::Put { key, value } => {
                    entries.insert(key.clone(), value.clone());
                }
                BatchOp::Remove { key } => {
                    entries.remove(key);
                }
            }
        }
        Ok(())
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        self.check_closed()?;
        let entries = self.entries.read();
        let pairs = entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        Ok(pairs)
    }

    fn contains(&self, key: &str) -> Result<bool> {
        self.check_closed()?;
        Ok(self.entries.read().contains_key(key))
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
