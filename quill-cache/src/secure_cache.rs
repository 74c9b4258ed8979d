//! The secure correction cache
//!
//! Entries live in memory behind one mutex; every mutation re-encrypts and
//! rewrites the whole map. The in-memory map stays authoritative when a save
//! fails, and the next successful save catches the file up.
//!
//! A rotated salt reaches the salt file only after a blob sealed under it has
//! been written. If the salt file still lags (the process died between the two
//! writes), opening the cache adopts the salt recorded in the blob header.

use crate::crypto::{self, EncryptionContext, MasterKey, Salt, MASTER_KEY_LEN, SALT_LEN};
use crate::entry::CacheEntry;
use chrono::{DateTime, Utc};
use quill_core::{CacheConfig, Correction, QuillError, QuillResult, StorageError, Timestamp};
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Files backing one cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePaths {
    pub blob: PathBuf,
    pub key: PathBuf,
    pub salt: PathBuf,
}

impl CachePaths {
    pub fn for_config(config: &CacheConfig) -> Self {
        let blob = config.blob_path();
        Self {
            key: blob.with_extension("key"),
            salt: blob.with_extension("salt"),
            blob,
        }
    }
}

/// Snapshot of cache occupancy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub entry_count: usize,
    pub max_size: usize,
    /// `entry_count / max_size * 100`
    pub usage_percent: f64,
    pub oldest_entry: Option<Timestamp>,
    pub newest_entry: Option<Timestamp>,
    pub last_rotation: Timestamp,
}

struct CacheState {
    entries: HashMap<String, CacheEntry>,
    crypto: EncryptionContext,
    /// The active salt is not yet in the salt file.
    salt_dirty: bool,
    writes_since_cleanup: u32,
}

struct LoadedBlob {
    entries: HashMap<String, CacheEntry>,
    crypto: EncryptionContext,
    salt_dirty: bool,
}

/// Encrypted, integrity-checked, size- and TTL-bounded correction cache.
pub struct SecureCache {
    config: CacheConfig,
    paths: CachePaths,
    state: Mutex<CacheState>,
}

impl SecureCache {
    /// Open (or create) the cache described by `config`.
    ///
    /// Missing key or salt files are generated. An unreadable or
    /// undecryptable blob yields an empty cache; only failing to create the
    /// directory or key files is an error.
    pub fn open(config: CacheConfig) -> QuillResult<Self> {
        fs::create_dir_all(&config.directory)
            .map_err(|e| StorageError::io(&config.directory, &e))?;

        let paths = CachePaths::for_config(&config);
        let master_key = load_or_create_master_key(&paths.key)?;
        let (salt, last_rotation) = load_or_create_salt(&paths.salt)?;
        let crypto = EncryptionContext::new(master_key, salt, config.kdf_iterations, last_rotation)?;
        let loaded = load_entries(&paths.blob, crypto, &config, Utc::now());

        tracing::info!(
            path = %paths.blob.display(),
            entries = loaded.entries.len(),
            last_rotation = %last_rotation,
            "Secure cache opened"
        );

        Ok(Self {
            config,
            paths,
            state: Mutex::new(CacheState {
                entries: loaded.entries,
                crypto: loaded.crypto,
                salt_dirty: loaded.salt_dirty,
                writes_since_cleanup: 0,
            }),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn paths(&self) -> &CachePaths {
        &self.paths
    }

    /// Look up the correction stored for `word` in `context`.
    ///
    /// Expired entries and entries whose digest does not match
    /// (word, context) are misses.
    pub fn get(&self, word: &str, context: &str) -> Option<Correction> {
        self.get_at(word, context, Utc::now())
    }

    pub(crate) fn get_at(&self, word: &str, context: &str, now: Timestamp) -> Option<Correction> {
        let state = match self.lock() {
            Ok(state) => state,
            Err(e) => {
                tracing::error!(error = %e, "Cache lookup skipped");
                return None;
            }
        };
        let entry = state.entries.get(word)?;
        if entry.is_expired(self.config.ttl, now) {
            tracing::trace!(word = %word, "Cache entry expired");
            return None;
        }
        if !entry.verifies(word, context) {
            let violation = QuillError::IntegrityViolation {
                word: word.to_string(),
            };
            tracing::warn!(error = %violation, "Cache digest mismatch, treating as miss");
            return None;
        }
        Some(entry.to_correction())
    }

    /// Store a correction, evicting the oldest entry when full.
    ///
    /// Also runs the periodic cleanup and the key rotation check. Persistence
    /// failures are logged, not returned.
    pub fn add(
        &self,
        word: &str,
        context: &str,
        correction: &str,
        was_corrected: bool,
    ) -> QuillResult<()> {
        self.add_at(word, context, correction, was_corrected, Utc::now())
    }

    pub(crate) fn add_at(
        &self,
        word: &str,
        context: &str,
        correction: &str,
        was_corrected: bool,
        now: Timestamp,
    ) -> QuillResult<()> {
        let mut state = self.lock()?;

        if !state.entries.contains_key(word) && state.entries.len() >= self.config.max_size {
            evict_oldest(&mut state.entries);
        }
        state.entries.insert(
            word.to_string(),
            CacheEntry::new(word, context, correction, was_corrected, now),
        );

        state.writes_since_cleanup += 1;
        if state.writes_since_cleanup >= self.config.cleanup_every {
            state.writes_since_cleanup = 0;
            let removed = purge_expired(&mut state.entries, &self.config, now);
            if removed > 0 {
                tracing::debug!(removed, "Periodic cache cleanup");
            }
        }

        if state.crypto.rotation_due(self.config.rotation_interval, now) {
            if let Err(e) = self.rotate_locked(&mut state, now) {
                tracing::error!(error = %e, "Key rotation failed, keeping current key");
            }
        }

        if let Err(e) = self.save_locked(&mut state) {
            tracing::error!(error = %e, path = %self.paths.blob.display(), "Failed to persist cache");
        }
        Ok(())
    }

    /// Remove every expired entry, persisting only if something was removed.
    pub fn cleanup(&self) -> usize {
        self.cleanup_at(Utc::now())
    }

    pub(crate) fn cleanup_at(&self, now: Timestamp) -> usize {
        let mut state = match self.lock() {
            Ok(state) => state,
            Err(e) => {
                tracing::error!(error = %e, "Cache cleanup skipped");
                return 0;
            }
        };
        let removed = purge_expired(&mut state.entries, &self.config, now);
        if removed > 0 {
            tracing::info!(removed, "Removed expired cache entries");
            if let Err(e) = self.save_locked(&mut state) {
                tracing::error!(error = %e, "Failed to persist cache after cleanup");
            }
        }
        removed
    }

    /// Drop every entry and persist the empty map.
    pub fn clear(&self) -> QuillResult<()> {
        let mut state = self.lock()?;
        state.entries.clear();
        self.save_locked(&mut state)?;
        tracing::info!("Secure cache cleared");
        Ok(())
    }

    /// Rotate the derived key now, regardless of the rotation interval.
    pub fn rotate_key(&self) -> QuillResult<()> {
        let mut state = self.lock()?;
        self.rotate_locked(&mut state, Utc::now())?;
        self.save_locked(&mut state)?;
        Ok(())
    }

    /// Whether the next write will rotate the key.
    pub fn rotation_due(&self) -> bool {
        self.lock()
            .map(|state| state.crypto.rotation_due(self.config.rotation_interval, Utc::now()))
            .unwrap_or(false)
    }

    /// Override the recorded rotation time (maintenance and tests).
    pub fn set_last_rotation(&self, at: Timestamp) -> QuillResult<()> {
        self.lock()?.crypto.set_last_rotation(at);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.lock().map(|state| state.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> QuillResult<CacheStats> {
        let state = self.lock()?;
        let entry_count = state.entries.len();
        let usage_percent = if self.config.max_size == 0 {
            0.0
        } else {
            entry_count as f64 / self.config.max_size as f64 * 100.0
        };
        Ok(CacheStats {
            entry_count,
            max_size: self.config.max_size,
            usage_percent,
            oldest_entry: state.entries.values().map(|e| e.created_at).min(),
            newest_entry: state.entries.values().map(|e| e.created_at).max(),
            last_rotation: state.crypto.last_rotation(),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, CacheState>, StorageError> {
        self.state.lock().map_err(|_| StorageError::LockPoisoned)
    }

    /// Switch to a fresh salt in memory. The salt file follows on the next
    /// successful save.
    fn rotate_locked(&self, state: &mut CacheState, now: Timestamp) -> Result<(), StorageError> {
        state.crypto = state.crypto.rotated(now)?;
        state.salt_dirty = true;
        tracing::info!(entries = state.entries.len(), "Cache encryption key rotated");
        Ok(())
    }

    /// Write the blob, then the salt file if the salt changed since the last save.
    fn save_locked(&self, state: &mut CacheState) -> Result<(), StorageError> {
        let plaintext = serde_json::to_vec(&state.entries).map_err(|e| StorageError::Serialization {
            reason: e.to_string(),
        })?;
        let blob = state.crypto.encrypt(&plaintext)?;
        write_atomic(&self.paths.blob, &blob)?;
        if state.salt_dirty {
            write_atomic(&self.paths.salt, state.crypto.salt())?;
            state.salt_dirty = false;
        }
        Ok(())
    }
}

impl std::fmt::Debug for SecureCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureCache")
            .field("paths", &self.paths)
            .field("max_size", &self.config.max_size)
            .field("entries", &self.len())
            .finish()
    }
}

fn evict_oldest(entries: &mut HashMap<String, CacheEntry>) {
    let oldest = entries
        .iter()
        .min_by_key(|(_, entry)| entry.created_at)
        .map(|(word, _)| word.clone());
    if let Some(word) = oldest {
        entries.remove(&word);
        tracing::debug!(word = %word, "Evicted oldest cache entry");
    }
}

fn purge_expired(entries: &mut HashMap<String, CacheEntry>, config: &CacheConfig, now: Timestamp) -> usize {
    let before = entries.len();
    entries.retain(|_, entry| !entry.is_expired(config.ttl, now));
    before - entries.len()
}

fn load_entries(
    blob_path: &Path,
    context: EncryptionContext,
    config: &CacheConfig,
    now: Timestamp,
) -> LoadedBlob {
    let mut loaded = LoadedBlob {
        entries: HashMap::new(),
        crypto: context,
        salt_dirty: false,
    };
    let blob = match fs::read(blob_path) {
        Ok(blob) => blob,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return loaded,
        Err(e) => {
            tracing::warn!(
                error = %StorageError::io(blob_path, &e),
                "Could not read cache, starting empty"
            );
            return loaded;
        }
    };

    if let Ok(salt) = crypto::blob_salt(&blob) {
        if salt != *loaded.crypto.salt() {
            match loaded.crypto.with_salt(salt) {
                Ok(adopted) => {
                    tracing::warn!(
                        path = %blob_path.display(),
                        "Salt file is behind the cache blob, using the blob salt"
                    );
                    loaded.crypto = adopted;
                    loaded.salt_dirty = true;
                }
                Err(e) => tracing::warn!(error = %e, "Could not derive key for blob salt"),
            }
        }
    }

    let decoded = loaded
        .crypto
        .decrypt(&blob)
        .and_then(|plaintext| {
            serde_json::from_slice::<HashMap<String, CacheEntry>>(&plaintext).map_err(|e| {
                StorageError::Serialization {
                    reason: e.to_string(),
                }
            })
        });

    match decoded {
        Ok(mut entries) => {
            purge_expired(&mut entries, config, now);
            loaded.entries = entries;
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                path = %blob_path.display(),
                "Could not load cache, starting empty"
            );
        }
    }
    loaded
}

fn load_or_create_master_key(path: &Path) -> Result<MasterKey, StorageError> {
    if let Some(bytes) = read_fixed::<MASTER_KEY_LEN>(path)? {
        return Ok(bytes);
    }
    let key = crypto::generate_master_key();
    write_atomic(path, &key)?;
    tracing::info!(path = %path.display(), "Generated cache master key");
    Ok(key)
}

/// Existing salt and its modification time, or a fresh salt stamped now.
fn load_or_create_salt(path: &Path) -> Result<(Salt, Timestamp), StorageError> {
    if let Some(salt) = read_fixed::<SALT_LEN>(path)? {
        let rotated_at = fs::metadata(path)
            .and_then(|m| m.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        return Ok((salt, rotated_at));
    }
    let salt = crypto::generate_salt();
    write_atomic(path, &salt)?;
    Ok((salt, Utc::now()))
}

/// Read a key file of exactly `N` bytes. Absent or malformed files yield `None`.
fn read_fixed<const N: usize>(path: &Path) -> Result<Option<[u8; N]>, StorageError> {
    match fs::read(path) {
        Ok(bytes) => match <[u8; N]>::try_from(bytes.as_slice()) {
            Ok(array) => Ok(Some(array)),
            Err(_) => {
                tracing::warn!(
                    path = %path.display(),
                    len = bytes.len(),
                    expected = N,
                    "Malformed key material, regenerating"
                );
                Ok(None)
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StorageError::io(path, &e)),
    }
}

/// Write via a sibling temp file and rename.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!("{}.tmp", file_name));

    let mut file = fs::File::create(&tmp).map_err(|e| StorageError::io(&tmp, &e))?;
    restrict_permissions(&file, &tmp)?;
    file.write_all(bytes).map_err(|e| StorageError::io(&tmp, &e))?;
    file.sync_all().map_err(|e| StorageError::io(&tmp, &e))?;
    drop(file);
    fs::rename(&tmp, path).map_err(|e| StorageError::io(path, &e))
}

#[cfg(unix)]
fn restrict_permissions(file: &fs::File, path: &Path) -> Result<(), StorageError> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(0o600))
        .map_err(|e| StorageError::io(path, &e))
}

#[cfg(not(unix))]
fn restrict_permissions(_file: &fs::File, _path: &Path) -> Result<(), StorageError> {
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> CacheConfig {
        CacheConfig {
            kdf_iterations: 1_000,
            ..CacheConfig::in_dir(dir.path())
        }
    }

    #[test]
    fn test_add_then_get() {
        let dir = TempDir::new().unwrap();
        let cache = SecureCache::open(test_config(&dir)).unwrap();

        cache.add("test", "ctx", "fixed", true).unwrap();
        assert_eq!(cache.get("test", "ctx"), Some(Correction::new("fixed", true)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_context_mismatch_is_miss() {
        let dir = TempDir::new().unwrap();
        let cache = SecureCache::open(test_config(&dir)).unwrap();

        cache.add("test", "ctx", "fixed", true).unwrap();
        assert_eq!(cache.get("test", "other-ctx"), None);
        assert_eq!(cache.get("absent", "ctx"), None);
    }

    #[test]
    fn test_ttl_expiry() {
        let dir = TempDir::new().unwrap();
        let config = CacheConfig {
            ttl: Duration::from_secs(60),
            ..test_config(&dir)
        };
        let cache = SecureCache::open(config).unwrap();

        let now = Utc::now();
        cache.add_at("test", "ctx", "fixed", true, now).unwrap();
        assert!(cache.get_at("test", "ctx", now + chrono::Duration::seconds(59)).is_some());
        assert!(cache.get_at("test", "ctx", now + chrono::Duration::seconds(61)).is_none());
    }

    #[test]
    fn test_tampered_entry_is_miss() {
        let dir = TempDir::new().unwrap();
        let cache = SecureCache::open(test_config(&dir)).unwrap();
        cache.add("test", "ctx", "fixed", true).unwrap();

        {
            let mut state = cache.state.lock().unwrap();
            let entry = state.entries.get_mut("test").unwrap();
            entry.digest = crate::entry::digest_of("test", "forged");
        }
        assert_eq!(cache.get("test", "ctx"), None);
    }

    #[test]
    fn test_eviction_removes_single_oldest() {
        let dir = TempDir::new().unwrap();
        let config = CacheConfig {
            max_size: 3,
            ..test_config(&dir)
        };
        let cache = SecureCache::open(config).unwrap();

        let base = Utc::now();
        for (i, word) in ["a", "b", "c", "d"].iter().enumerate() {
            let at = base + chrono::Duration::milliseconds(i as i64);
            cache.add_at(word, "ctx", word, false, at).unwrap();
        }

        assert_eq!(cache.len(), 3);
        assert!(cache.get("a", "ctx").is_none());
        for word in ["b", "c", "d"] {
            assert!(cache.get(word, "ctx").is_some(), "{} should survive", word);
        }
    }

    #[test]
    fn test_replacement_does_not_evict() {
        let dir = TempDir::new().unwrap();
        let config = CacheConfig {
            max_size: 2,
            ..test_config(&dir)
        };
        let cache = SecureCache::open(config).unwrap();

        cache.add("a", "ctx", "a", false).unwrap();
        cache.add("b", "ctx", "b", false).unwrap();
        cache.add("a", "new ctx", "A", true).unwrap();

        assert_eq!(cache.len(), 2);
        assert!(cache.get("b", "ctx").is_some());
        assert_eq!(cache.get("a", "new ctx"), Some(Correction::new("A", true)));
    }

    #[test]
    fn test_cleanup_removes_expired() {
        let dir = TempDir::new().unwrap();
        let config = CacheConfig {
            ttl: Duration::from_secs(60),
            ..test_config(&dir)
        };
        let cache = SecureCache::open(config).unwrap();

        let now = Utc::now();
        cache.add_at("old", "ctx", "old", false, now - chrono::Duration::seconds(120)).unwrap();
        cache.add_at("fresh", "ctx", "fresh", false, now).unwrap();

        assert_eq!(cache.cleanup_at(now), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.cleanup_at(now), 0);
    }

    #[test]
    fn test_periodic_cleanup_runs_on_writes() {
        let dir = TempDir::new().unwrap();
        let config = CacheConfig {
            ttl: Duration::from_secs(60),
            cleanup_every: 2,
            ..test_config(&dir)
        };
        let cache = SecureCache::open(config).unwrap();

        let now = Utc::now();
        cache.add_at("old", "ctx", "old", false, now - chrono::Duration::seconds(120)).unwrap();
        cache.add_at("fresh", "ctx", "fresh", false, now).unwrap();

        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_rotation_on_add_changes_salt_keeps_entries() {
        let dir = TempDir::new().unwrap();
        let cache = SecureCache::open(test_config(&dir)).unwrap();
        cache.add("before", "ctx", "antes", true).unwrap();

        let salt_before = fs::read(&cache.paths().salt).unwrap();
        let key_before = fs::read(&cache.paths().key).unwrap();

        cache
            .set_last_rotation(Utc::now() - chrono::Duration::days(8))
            .unwrap();
        assert!(cache.rotation_due());
        cache.add("after", "ctx", "despues", true).unwrap();
        assert!(!cache.rotation_due());

        assert_ne!(fs::read(&cache.paths().salt).unwrap(), salt_before);
        assert_eq!(fs::read(&cache.paths().key).unwrap(), key_before);
        assert_eq!(cache.get("before", "ctx"), Some(Correction::new("antes", true)));
        assert_eq!(cache.get("after", "ctx"), Some(Correction::new("despues", true)));
    }

    #[test]
    fn test_clear_persists_empty_map() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let cache = SecureCache::open(config.clone()).unwrap();
        cache.add("a", "ctx", "b", true).unwrap();
        cache.clear().unwrap();
        assert!(cache.is_empty());
        drop(cache);

        let reopened = SecureCache::open(config).unwrap();
        assert!(reopened.is_empty());
    }

    #[test]
    fn test_stats() {
        let dir = TempDir::new().unwrap();
        let config = CacheConfig {
            max_size: 4,
            ..test_config(&dir)
        };
        let cache = SecureCache::open(config).unwrap();

        let empty = cache.stats().unwrap();
        assert_eq!(empty.entry_count, 0);
        assert_eq!(empty.oldest_entry, None);

        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::seconds(1);
        cache.add_at("a", "ctx", "a", false, t0).unwrap();
        cache.add_at("b", "ctx", "b", false, t1).unwrap();

        let stats = cache.stats().unwrap();
        assert_eq!(stats.entry_count, 2);
        assert_eq!(stats.max_size, 4);
        assert!((stats.usage_percent - 50.0).abs() < f64::EPSILON);
        assert_eq!(stats.oldest_entry, Some(t0));
        assert_eq!(stats.newest_entry, Some(t1));
    }

    #[test]
    fn test_blob_is_not_plaintext() {
        let dir = TempDir::new().unwrap();
        let cache = SecureCache::open(test_config(&dir)).unwrap();
        cache.add("kiero", "kiero ir", "quiero", true).unwrap();

        let blob = fs::read(&cache.paths().blob).unwrap();
        assert!(blob.starts_with(crypto::BLOB_MAGIC));
        let haystack = String::from_utf8_lossy(&blob);
        assert!(!haystack.contains("quiero"));
        assert!(!haystack.contains("kiero"));
    }

    #[test]
    fn test_paths_share_stem() {
        let config = CacheConfig::in_dir("/var/lib/quill");
        let paths = CachePaths::for_config(&config);
        assert_eq!(paths.blob, PathBuf::from("/var/lib/quill/secure_cache.dat"));
        assert_eq!(paths.key, PathBuf::from("/var/lib/quill/secure_cache.key"));
        assert_eq!(paths.salt, PathBuf::from("/var/lib/quill/secure_cache.salt"));
    }
}
