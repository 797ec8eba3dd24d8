//! In-memory session backend.
//!
//! A process-wide map guarded by a single mutex. Entries are lost on restart.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use super::{SessionBackend, SessionData, SessionError};

#[derive(Debug, Clone)]
struct Entry {
    touched: SystemTime,
    data: SessionData,
}

/// Session snapshots held in process memory.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions currently stored.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        // A panic elsewhere cannot leave the map itself half-updated.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    pub(super) fn store_at(&self, id: &str, data: &SessionData, touched: SystemTime) {
        self.lock().insert(
            id.to_owned(),
            Entry {
                touched,
                data: data.clone(),
            },
        );
    }
}

impl SessionBackend for MemoryBackend {
    fn load(&self, id: &str) -> Result<Option<SessionData>, SessionError> {
        Ok(self.lock().get(id).map(|entry| entry.data.clone()))
    }

    fn store(&self, id: &str, data: &SessionData) -> Result<(), SessionError> {
        self.lock().insert(
            id.to_owned(),
            Entry {
                touched: SystemTime::now(),
                data: data.clone(),
            },
        );
        Ok(())
    }

    fn garbage_collect(&self, cutoff: SystemTime) -> Result<usize, SessionError> {
        // Snapshot the candidates, then evict one at a time so request-time
        // reads and writes are never held off for a whole sweep.
        let candidates: Vec<String> = self
            .lock()
            .iter()
            .filter(|(_, entry)| entry.touched < cutoff)
            .map(|(id, _)| id.clone())
            .collect();

        let mut removed = 0;
        for id in candidates {
            let mut entries = self.lock();
            // Re-check: the session may have been touched since the snapshot.
            if entries.get(&id).is_some_and(|entry| entry.touched < cutoff) {
                entries.remove(&id);
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn data(value: i64) -> SessionData {
        let mut data = SessionData::new();
        data.insert("n".to_owned(), json!(value));
        data
    }

    #[test]
    fn store_and_load() {
        let backend = MemoryBackend::new();
        assert!(backend.load("a").unwrap().is_none());
        backend.store("a", &data(1)).unwrap();
        assert_eq!(backend.load("a").unwrap(), Some(data(1)));
        backend.store("a", &data(2)).unwrap();
        assert_eq!(backend.load("a").unwrap(), Some(data(2)));
        assert_eq!(backend.len(), 1);
    }

    #[test]
    fn gc_removes_only_entries_older_than_cutoff() {
        let backend = MemoryBackend::new();
        let now = SystemTime::now();
        let cutoff = now - Duration::from_secs(100);

        backend.store_at("old", &data(1), cutoff - Duration::from_secs(1));
        backend.store_at("edge", &data(2), cutoff);
        backend.store_at("fresh", &data(3), now);

        assert_eq!(backend.garbage_collect(cutoff).unwrap(), 1);
        assert!(backend.load("old").unwrap().is_none());
        assert!(backend.load("edge").unwrap().is_some());
        assert!(backend.load("fresh").unwrap().is_some());
    }

    #[test]
    fn concurrent_writers_do_not_corrupt_the_map() {
        let backend = std::sync::Arc::new(MemoryBackend::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let backend = std::sync::Arc::clone(&backend);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        backend.store(&format!("s{t}x{i}"), &data(i)).unwrap();
                        backend.store("shared", &data(t)).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(backend.len(), 801);
        assert!(backend.load("shared").unwrap().is_some());
    }
}
