/// Local filesystem key-value backend.
///
/// Stores each key as one JSON file in a directory with:
/// - Percent-encoded file names (any key maps to a safe, reversible name)
/// - Atomic writes (write to .tmp, fsync, rename, fsync directory)
/// - Mutex-guarded writes per key to prevent interleaved renames
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use super::{BackendError, KeyValueBackend};

/// Characters kept verbatim in file names; everything else is %XX encoded.
const KEY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_');

const VALUE_EXTENSION: &str = "json";
const TMP_EXTENSION: &str = "taskboard.tmp";

pub struct FileBackend {
    dir: PathBuf,
    /// Per-key write mutex
    write_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl FileBackend {
    /// Open (creating if needed) a backend rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, BackendError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            write_locks: Mutex::new(HashMap::new()),
        })
    }

    /// File that holds `key`.
    pub fn path_for_key(&self, key: &str) -> PathBuf {
        let encoded = utf8_percent_encode(key, KEY_ENCODE_SET).to_string();
        self.dir.join(format!("{}.{}", encoded, VALUE_EXTENSION))
    }

    /// All keys currently stored, decoded from their file names.
    pub fn keys(&self) -> Result<Vec<String>, BackendError> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(VALUE_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                keys.push(percent_decode_str(stem).decode_utf8_lossy().to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn get_write_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.write_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Atomic write with fsync: write to .tmp, fsync, rename, fsync directory.
    /// Refuses to write empty content over a non-empty file (data safety).
    fn atomic_write(path: &Path, content: &str) -> Result<(), std::io::Error> {
        if content.trim().is_empty() {
            if let Ok(existing) = fs::read_to_string(path) {
                if !existing.trim().is_empty() {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        "Refusing to overwrite non-empty file with empty content",
                    ));
                }
            }
        }

        let tmp_path = path.with_extension(TMP_EXTENSION);
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)?;

        if let Some(dir) = path.parent() {
            if let Ok(d) = fs::File::open(dir) {
                let _ = d.sync_all();
            }
        }
        Ok(())
    }
}

impl KeyValueBackend for FileBackend {
    fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        match fs::read_to_string(self.path_for_key(key)) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, key: &str, value: &str) -> Result<(), BackendError> {
        let lock = self.get_write_lock(key);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        let path = self.path_for_key(key);
        Self::atomic_write(&path, value).map_err(|e| {
            log::warn!(
                "[taskboard.storage.file] Failed to write {:?}: {}",
                path,
                e
            );
            BackendError::from(e)
        })
    }

    fn remove(&self, key: &str) -> Result<(), BackendError> {
        let lock = self.get_write_lock(key);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        match fs::remove_file(self.path_for_key(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_and_get_round_trip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();

        backend.put("snapshot", r#"{"version":1}"#).unwrap();
        assert_eq!(
            backend.get("snapshot").unwrap().as_deref(),
            Some(r#"{"version":1}"#)
        );

        let on_disk = fs::read_to_string(dir.path().join("snapshot.json")).unwrap();
        assert!(on_disk.contains("version"));
    }

    #[test]
    fn test_missing_key_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();
        assert_eq!(backend.get("trash").unwrap(), None);
        backend.remove("trash").unwrap();
    }

    #[test]
    fn test_keys_are_percent_encoded() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();

        backend.put("boards/../escape", "{}").unwrap();
        let path = backend.path_for_key("boards/../escape");
        assert_eq!(path.parent().unwrap(), dir.path());
        assert_eq!(backend.keys().unwrap(), vec!["boards/../escape".to_string()]);
    }

    #[test]
    fn test_refuses_empty_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();

        backend.put("lock-registry", r#"{"1":{}}"#).unwrap();
        assert!(backend.put("lock-registry", "  ").is_err());
        assert_eq!(
            backend.get("lock-registry").unwrap().as_deref(),
            Some(r#"{"1":{}}"#)
        );
    }

    #[test]
    fn test_no_tmp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();
        backend.put("unlock-sessions", "[]").unwrap();

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().to_string_lossy().ends_with(TMP_EXTENSION))
            .collect();
        assert!(leftovers.is_empty());
    }
}
