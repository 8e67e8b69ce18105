use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use tracing::{debug, warn};

use crate::error::StoreError;

/// Abstract durable key-value store. Values are opaque bytes.
pub trait KeyValueStore: Send + Sync {
    /// Short label used in log lines.
    fn name(&self) -> &str;
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;
    fn delete(&self, key: &str) -> Result<(), StoreError>;
    fn keys(&self) -> Result<Vec<String>, StoreError>;
}

/// Map a store key onto a safe file stem.
fn file_stem(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

// ============================================================================
// DIRECTORY STORE - one file per key
// ============================================================================

/// Primary store: each value lives in `<root>/<key>.bin`. Writes go to a
/// temporary file first and are renamed into place.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.bin", file_stem(key)))
    }
}

impl KeyValueStore for DirectoryStore {
    fn name(&self) -> &str {
        "directory"
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(key);
        let tmp = path.with_extension("bin.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(value)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        debug!(key, bytes = value.len(), "directory store write");
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("bin") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                keys.push(stem.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }
}

// ============================================================================
// FLAT FILE STORE - single JSON document
// ============================================================================

/// Simple fallback store: the whole map is one JSON object of
/// `key -> base64(value)`, rewritten on every change.
#[derive(Debug)]
pub struct FlatFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FlatFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn read_map(&self) -> Result<BTreeMap<String, String>, StoreError> {
        match fs::read(&self.path) {
            Ok(bytes) if bytes.is_empty() => Ok(BTreeMap::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_map(&self, map: &BTreeMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(map)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn guard(&self) -> Result<std::sync::MutexGuard<'_, ()>, StoreError> {
        self.lock
            .lock()
            .map_err(|_| StoreError::Unavailable("flat file store lock poisoned".into()))
    }
}

impl KeyValueStore for FlatFileStore {
    fn name(&self) -> &str {
        "flat-file"
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let _guard = self.guard()?;
        match self.read_map()?.get(key) {
            Some(encoded) => Ok(Some(STANDARD.decode(encoded)?)),
            None => Ok(None),
        }
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let _guard = self.guard()?;
        let mut map = self.read_map()?;
        map.insert(key.to_string(), STANDARD.encode(value));
        self.write_map(&map)
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let _guard = self.guard()?;
        let mut map = self.read_map()?;
        if map.remove(key).is_some() {
            self.write_map(&map)?;
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let _guard = self.guard()?;
        Ok(self.read_map()?.into_keys().collect())
    }
}

// ============================================================================
// MEMORY STORE
// ============================================================================

/// In-process store. Can be switched to "unavailable" to simulate a
/// disabled or over-quota backend.
#[derive(Debug)]
pub struct MemoryStore {
    map: Mutex<BTreeMap<String, Vec<u8>>>,
    available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            map: Mutex::new(BTreeMap::new()),
            available: AtomicBool::new(true),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unavailable() -> Self {
        let store = Self::default();
        store.set_available(false);
        store
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn map(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>>, StoreError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store disabled".into()));
        }
        self.map
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
    }
}

impl KeyValueStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.map()?.get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.map()?.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.map()?.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.map()?.keys().cloned().collect())
    }
}

// ============================================================================
// FALLBACK STORE - primary with a simpler store behind it
// ============================================================================

/// Routes every call to the primary store and falls back to the secondary
/// when the primary is missing or errors. Reads that miss in the primary
/// also consult the fallback, since earlier writes may have landed there.
pub struct FallbackStore {
    primary: Option<Arc<dyn KeyValueStore>>,
    fallback: Arc<dyn KeyValueStore>,
}

impl FallbackStore {
    pub fn new(primary: Option<Arc<dyn KeyValueStore>>, fallback: Arc<dyn KeyValueStore>) -> Self {
        if primary.is_none() {
            warn!(fallback = fallback.name(), "primary store unavailable, using fallback only");
        }
        Self { primary, fallback }
    }

    fn primary_failed(&self, op: &str, key: &str, primary: &dyn KeyValueStore, e: &StoreError) {
        warn!(
            op,
            key,
            primary = primary.name(),
            fallback = self.fallback.name(),
            "primary store failed, falling back: {}",
            e
        );
    }
}

impl KeyValueStore for FallbackStore {
    fn name(&self) -> &str {
        "fallback"
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        if let Some(primary) = &self.primary {
            match primary.get(key) {
                Ok(Some(value)) => return Ok(Some(value)),
                Ok(None) => {}
                Err(e) => self.primary_failed("get", key, primary.as_ref(), &e),
            }
        }
        self.fallback.get(key)
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        if let Some(primary) = &self.primary {
            match primary.put(key, value) {
                Ok(()) => return Ok(()),
                Err(e) => self.primary_failed("put", key, primary.as_ref(), &e),
            }
        }
        self.fallback.put(key, value)
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut first_err = None;
        if let Some(primary) = &self.primary
            && let Err(e) = primary.delete(key)
        {
            self.primary_failed("delete", key, primary.as_ref(), &e);
            first_err = Some(e);
        }
        match self.fallback.delete(key) {
            Ok(()) => Ok(()),
            Err(e) => Err(first_err.unwrap_or(e)),
        }
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let mut keys = BTreeSet::new();
        let mut primary_ok = false;
        if let Some(primary) = &self.primary {
            match primary.keys() {
                Ok(k) => {
                    keys.extend(k);
                    primary_ok = true;
                }
                Err(e) => self.primary_failed("keys", "*", primary.as_ref(), &e),
            }
        }
        match self.fallback.keys() {
            Ok(k) => keys.extend(k),
            Err(e) if primary_ok => {
                warn!(fallback = self.fallback.name(), "fallback key listing failed: {}", e)
            }
            Err(e) => return Err(e),
        }
        Ok(keys.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_store_round_trips_and_lists_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::open(dir.path().join("snapshots")).unwrap();
        assert_eq!(store.get("snapshot-1").unwrap(), None);
        store.put("snapshot-1", b"one").unwrap();
        store.put("snapshot-2", b"two").unwrap();
        store.put("snapshot-1", b"uno").unwrap();
        assert_eq!(store.get("snapshot-1").unwrap().as_deref(), Some(&b"uno"[..]));
        assert_eq!(store.keys().unwrap(), vec!["snapshot-1", "snapshot-2"]);
        store.delete("snapshot-1").unwrap();
        store.delete("snapshot-1").unwrap();
        assert_eq!(store.keys().unwrap(), vec!["snapshot-2"]);
    }

    #[test]
    fn flat_file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("colorings.json");
        FlatFileStore::new(&path).put("kpop-colorings", &[0, 1, 2, 255]).unwrap();
        let reopened = FlatFileStore::new(&path);
        assert_eq!(reopened.get("kpop-colorings").unwrap(), Some(vec![0, 1, 2, 255]));
        assert_eq!(reopened.keys().unwrap(), vec!["kpop-colorings"]);
    }

    #[test]
    fn memory_store_reports_unavailable() {
        let store = MemoryStore::unavailable();
        assert!(matches!(store.put("k", b"v"), Err(StoreError::Unavailable(_))));
        store.set_available(true);
        store.put("k", b"v").unwrap();
        assert_eq!(store.get("k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn fallback_store_absorbs_primary_failure() {
        let primary = Arc::new(MemoryStore::unavailable());
        let fallback = Arc::new(MemoryStore::new());
        let store = FallbackStore::new(Some(primary.clone()), fallback.clone());

        store.put("snapshot-7", b"data").unwrap();
        assert_eq!(fallback.get("snapshot-7").unwrap(), Some(b"data".to_vec()));
        assert_eq!(store.get("snapshot-7").unwrap(), Some(b"data".to_vec()));
        assert_eq!(store.keys().unwrap(), vec!["snapshot-7"]);

        // Once the primary recovers, older fallback writes stay readable.
        primary.set_available(true);
        assert_eq!(store.get("snapshot-7").unwrap(), Some(b"data".to_vec()));
        store.put("snapshot-8", b"more").unwrap();
        assert_eq!(primary.get("snapshot-8").unwrap(), Some(b"more".to_vec()));
    }

    #[test]
    fn fallback_store_without_primary() {
        let store = FallbackStore::new(None, Arc::new(MemoryStore::new()));
        store.put("a", b"1").unwrap();
        assert_eq!(store.get("a").unwrap(), Some(b"1".to_vec()));
        store.delete("a").unwrap();
        assert_eq!(store.get("a").unwrap(), None);
    }

    #[test]
    fn keys_are_sanitized_into_file_names() {
        assert_eq!(file_stem("snapshot-42"), "snapshot-42");
        assert_eq!(file_stem("../etc/passwd"), "___etc_passwd");
    }
}
