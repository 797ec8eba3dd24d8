//! File session backend: one JSON snapshot per session ID.
//!
//! File I/O is synchronous and runs on the connection task that owns the
//! request. The last-touch time of an entry is its file modification time.
//!
//! Snapshots are written to a staging file and renamed over the target, so
//! a concurrent reader sees either the previous snapshot or the new one.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use super::{SessionBackend, SessionData, SessionError, is_valid_session_id};

const FILE_PREFIX: &str = "session_";
const FILE_SUFFIX: &str = ".json";

/// Session snapshots stored as `session_<id>.json` files in one directory.
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    /// Uses `dir`, creating it (and its parents) when missing.
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self, SessionError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the snapshot file for `id`.
    pub fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{FILE_PREFIX}{id}{FILE_SUFFIX}"))
    }

    /// Unique per write; never mistaken for a snapshot by the collector.
    fn staging_path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!(
            "{FILE_PREFIX}{id}{FILE_SUFFIX}.tmp.{:016x}",
            rand::random::<u64>()
        ))
    }

    fn session_id_of(file_name: &str) -> Option<&str> {
        file_name
            .strip_prefix(FILE_PREFIX)?
            .strip_suffix(FILE_SUFFIX)
            .filter(|id| is_valid_session_id(id))
    }
}

impl SessionBackend for FileBackend {
    fn load(&self, id: &str) -> Result<Option<SessionData>, SessionError> {
        let path = self.path_for(id);
        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            // Collected between the two calls.
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&raw)?))
    }

    fn store(&self, id: &str, data: &SessionData) -> Result<(), SessionError> {
        let raw = serde_json::to_vec(data)?;
        let target = self.path_for(id);
        let staging = self.staging_path_for(id);
        if let Err(e) = fs::write(&staging, raw).and_then(|()| fs::rename(&staging, &target)) {
            let _ = fs::remove_file(&staging);
            return Err(e.into());
        }
        Ok(())
    }

    fn garbage_collect(&self, cutoff: SystemTime) -> Result<usize, SessionError> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if Self::session_id_of(name).is_none() {
                continue;
            }
            let meta = match entry.metadata() {
                Ok(meta) => meta,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            if !meta.is_file() || meta.modified()? >= cutoff {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                // Another sweep got there first.
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    fn set_mtime(path: &Path, at: SystemTime) {
        fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(at)
            .unwrap();
    }

    #[test]
    fn file_name_is_derived_from_id() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::create(dir.path()).unwrap();
        assert_eq!(backend.path_for("k3x9"), dir.path().join("session_k3x9.json"));
        assert_eq!(FileBackend::session_id_of("session_k3x9.json"), Some("k3x9"));
        assert_eq!(FileBackend::session_id_of("notes.json"), None);
        let staging = backend.staging_path_for("k3x9");
        let staging = staging.file_name().unwrap().to_str().unwrap();
        assert!(staging.starts_with("session_k3x9.json.tmp."));
        assert_eq!(FileBackend::session_id_of(staging), None);
    }

    #[test]
    fn readers_never_see_a_partial_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::create(dir.path()).unwrap();

        let snapshot = |fill: &str| {
            let mut data = SessionData::new();
            data.insert("blob".to_owned(), json!(fill.repeat(256 * 1024)));
            data
        };
        let small = snapshot("a");
        let large = snapshot("bb");
        backend.store("abc", &small).unwrap();

        let stop = Arc::new(AtomicBool::new(false));
        let writer = {
            let backend = backend.clone();
            let stop = Arc::clone(&stop);
            let (small, large) = (small.clone(), large.clone());
            thread::spawn(move || {
                let mut flip = false;
                while !stop.load(Ordering::Relaxed) {
                    let data = if flip { &small } else { &large };
                    backend.store("abc", data).unwrap();
                    flip = !flip;
                }
            })
        };

        for _ in 0..300 {
            let loaded = backend.load("abc").unwrap().expect("snapshot present");
            assert!(loaded == small || loaded == large);
        }
        stop.store(true, Ordering::Relaxed);
        writer.join().unwrap();

        let leftovers = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn store_and_load_preserve_unknown_keys() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::create(dir.path()).unwrap();

        let mut data = SessionData::new();
        data.insert("cart".to_owned(), json!([1, 2, 3]));
        data.insert("profile".to_owned(), json!({"name": "ada", "age": 36}));
        backend.store("abc", &data).unwrap();

        assert_eq!(backend.load("abc").unwrap(), Some(data));
        assert!(backend.load("missing").unwrap().is_none());
    }

    #[test]
    fn corrupt_snapshot_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::create(dir.path()).unwrap();
        fs::write(backend.path_for("bad"), b"{not json").unwrap();
        assert!(matches!(
            backend.load("bad"),
            Err(SessionError::Serialization(_))
        ));
    }

    #[test]
    fn gc_removes_only_stale_session_files() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::create(dir.path()).unwrap();
        let now = SystemTime::now();
        let cutoff = now - Duration::from_secs(3600);

        backend.store("old", &SessionData::new()).unwrap();
        backend.store("fresh", &SessionData::new()).unwrap();
        set_mtime(&backend.path_for("old"), cutoff - Duration::from_secs(10));

        let unrelated = dir.path().join("keep.json");
        fs::write(&unrelated, b"{}").unwrap();
        set_mtime(&unrelated, cutoff - Duration::from_secs(10));

        assert_eq!(backend.garbage_collect(cutoff).unwrap(), 1);
        assert!(!backend.path_for("old").exists());
        assert!(backend.path_for("fresh").exists());
        assert!(unrelated.exists());
    }
}
