//! Per-document serialization of read-modify-write sequences.
//!
//! Mutators fetch a whole document, change its users list in memory and
//! write the list back. Writers in this process take the document's lock
//! first; writers in other processes still race and the last write wins.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use crate::store::StoreError;

type Key = (String, String);

#[derive(Debug, Default)]
pub struct DocumentLocks {
    locks: Mutex<HashMap<Key, Weak<Mutex<()>>>>,
}

impl DocumentLocks {
    /// The lock shared by every writer of `entity_type/id`. Callers lock it
    /// for the duration of their read-modify-write.
    pub fn handle(&self, entity_type: &str, id: &str) -> Result<Arc<Mutex<()>>, StoreError> {
        let mut locks = self.locks.lock().map_err(|e| StoreError::LockPoisoned {
            context: e.to_string(),
        })?;
        locks.retain(|_, weak| weak.strong_count() > 0);

        let key = (entity_type.to_string(), id.to_string());
        if let Some(existing) = locks.get(&key).and_then(Weak::upgrade) {
            return Ok(existing);
        }
        let fresh = Arc::new(Mutex::new(()));
        locks.insert(key, Arc::downgrade(&fresh));
        Ok(fresh)
    }

    /// Number of documents with a writer in flight.
    pub fn in_flight(&self) -> Result<usize, StoreError> {
        self.locks
            .lock()
            .map(|l| l.values().filter(|w| w.strong_count() > 0).count())
            .map_err(|e| StoreError::LockPoisoned {
                context: e.to_string(),
            })
    }
}
