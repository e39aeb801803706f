//! Content-addressable cache for derived assets.
//!
//! Expensive per-asset computations (reading image dimensions, resizing and
//! re-encoding) are memoized in a [`DerivedAssetCache`]. The cache is generic
//! over its key and value types; the image pipeline is one user of it.
//!
//! # Keys
//!
//! Keys are computed from a computation's **inputs**, never from its output.
//! A key is serialized to JSON and digested with SHA-256; identical inputs
//! always produce the same digest, so two requests issued at different times
//! land on the same entry. Key types must therefore be pure values: no
//! timestamps, no random components.
//!
//! # Tiers
//!
//! - **Heap**: a bounded LRU of deserialized values, capped by entry count.
//! - **Disk**: an index of serialized entries persisted next to the artifact
//!   directory, capped by total size in bytes. An entry's size is the length
//!   of its serialized value plus the length of its artifact file.
//!
//! Evicting from the disk tier deletes the entry's artifact as well. Evicting
//! from the heap tier only forgets the deserialized copy.
//!
//! # Layout
//!
//! ```text
//! <root>/
//! +-- <name>.index.json     # {version, tick, entries: digest -> entry}
//! +-- <name>/               # artifact files, one flat namespace
//!     +-- Cover_100x50_webp_hero_3f2a….webp
//! ```
//!
//! On open, index entries whose artifact has disappeared are dropped and
//! artifact files no index entry refers to are deleted. A version mismatch or
//! an unreadable index starts the cache empty.
//!
//! # Concurrency
//!
//! All operations take `&self` and are safe to call from many threads.
//! [`DerivedAssetCache::get_or_compute`] additionally guarantees at most one
//! concurrent computation per key: concurrent misses on the same key wait for
//! the first caller and then observe its result.

use lru::LruCache;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Version of the on-disk index format. Bump this to invalidate all
/// existing caches when the format or key computation changes.
const INDEX_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Cache serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Cache capacity must be positive: {0}")]
    Capacity(&'static str),
}

/// A value stored in a [`DerivedAssetCache`].
pub trait CacheValue: Serialize + DeserializeOwned + Clone + Send + Sync {
    /// File name of the artifact this value describes, relative to the
    /// cache's artifact directory. Values without an artifact return `None`.
    fn artifact(&self) -> Option<&str> {
        None
    }
}

/// Independent bounds for the two tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheCapacity {
    pub heap_entries: NonZeroUsize,
    pub disk_bytes: u64,
}

impl CacheCapacity {
    pub fn new(heap_entries: usize, disk_bytes: u64) -> Result<Self, CacheError> {
        let heap_entries =
            NonZeroUsize::new(heap_entries).ok_or(CacheError::Capacity("heap_entries"))?;
        if disk_bytes == 0 {
            return Err(CacheError::Capacity("disk_bytes"));
        }
        Ok(Self {
            heap_entries,
            disk_bytes,
        })
    }
}

impl Default for CacheCapacity {
    /// 50 entries in memory, 50 MB on disk.
    fn default() -> Self {
        Self {
            heap_entries: NonZeroUsize::MIN.saturating_add(49),
            disk_bytes: 50 * 1024 * 1024,
        }
    }
}

/// Summary of cache activity since the cache was opened.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Misses that ran a computation through `get_or_compute`.
    pub computed: u64,
}

impl CacheStats {
    pub fn total(&self) -> u64 {
        self.hits + self.misses
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hits > 0 {
            write!(
                f,
                "{} cached, {} computed ({} total)",
                self.hits,
                self.computed,
                self.total()
            )
        } else {
            write!(f, "{} computed", self.computed)
        }
    }
}

#[derive(Debug, Clone, Serialize, serde::Deserialize)]
struct DiskEntry {
    key: serde_json::Value,
    value: serde_json::Value,
    artifact: Option<String>,
    size: u64,
    last_access: u64,
}

#[derive(Debug, Serialize, serde::Deserialize)]
struct DiskIndex {
    version: u32,
    /// Logical clock for `last_access`.
    tick: u64,
    entries: HashMap<String, DiskEntry>,
}

impl DiskIndex {
    fn empty() -> Self {
        Self {
            version: INDEX_VERSION,
            tick: 0,
            entries: HashMap::new(),
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn total_size(&self) -> u64 {
        self.entries.values().map(|e| e.size).sum()
    }
}

struct CacheState<V> {
    heap: LruCache<String, V>,
    disk: DiskIndex,
}

#[derive(Default)]
struct AtomicStats {
    hits: AtomicU64,
    misses: AtomicU64,
    computed: AtomicU64,
}

/// Two-tier LRU cache from a deterministic key to a computed value and an
/// optional artifact file.
pub struct DerivedAssetCache<K, V> {
    name: String,
    artifact_dir: PathBuf,
    index_path: PathBuf,
    capacity: CacheCapacity,
    state: Mutex<CacheState<V>>,
    in_flight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    stats: AtomicStats,
    _key: std::marker::PhantomData<fn(&K)>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<K: Serialize, V: CacheValue> DerivedAssetCache<K, V> {
    /// Open (or create) the cache `name` under `root`.
    pub fn open(root: &Path, name: &str, capacity: CacheCapacity) -> Result<Self, CacheError> {
        let artifact_dir = root.join(name);
        let index_path = root.join(format!("{name}.index.json"));
        fs::create_dir_all(&artifact_dir)?;

        let mut disk = load_index(&index_path);
        disk.entries.retain(|digest, entry| match &entry.artifact {
            Some(artifact) if !artifact_dir.join(artifact).is_file() => {
                tracing::debug!(
                    cache = name,
                    digest,
                    artifact,
                    "dropping entry with missing artifact"
                );
                false
            }
            _ => true,
        });
        sweep_orphans(&artifact_dir, &disk);

        let cache = Self {
            name: name.to_string(),
            artifact_dir,
            index_path,
            capacity,
            state: Mutex::new(CacheState {
                heap: LruCache::new(capacity.heap_entries),
                disk,
            }),
            in_flight: Mutex::new(HashMap::new()),
            stats: AtomicStats::default(),
            _key: std::marker::PhantomData,
        };
        {
            let mut state = lock(&cache.state);
            cache.evict_disk(&mut state, None);
            cache.persist(&state.disk)?;
        }
        Ok(cache)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory holding this cache's artifact files.
    pub fn artifact_dir(&self) -> &Path {
        &self.artifact_dir
    }

    pub fn artifact_path(&self, artifact: &str) -> PathBuf {
        self.artifact_dir.join(artifact)
    }

    pub fn capacity(&self) -> CacheCapacity {
        self.capacity
    }

    /// Digest identifying `key`: SHA-256 of its JSON serialization.
    pub fn digest(key: &K) -> Result<String, CacheError> {
        let bytes = serde_json::to_vec(key)?;
        Ok(format!("{:x}", Sha256::digest(&bytes)))
    }

    /// Look up a value. Counts a hit or a miss.
    pub fn get(&self, key: &K) -> Result<Option<V>, CacheError> {
        let digest = Self::digest(key)?;
        let found = self.lookup(&digest);
        self.record(found.is_some());
        Ok(found)
    }

    /// Store a value under `key`. Storing again under an equal key replaces
    /// the entry; a replaced artifact file is deleted unless the new value
    /// refers to the same file.
    pub fn put(&self, key: &K, value: V) -> Result<(), CacheError> {
        let digest = Self::digest(key)?;
        let json_key = serde_json::to_value(key)?;
        self.insert(digest, json_key, value)
    }

    /// Return the cached value for `key`, or run `compute` exactly once
    /// across concurrent callers and cache its result.
    ///
    /// `compute` receives the artifact directory; a value with an artifact
    /// must have written that file into it before returning. A failed
    /// computation is not cached and is returned to the caller that ran it;
    /// callers waiting on the same key then retry the computation themselves.
    pub fn get_or_compute<E, F>(&self, key: &K, compute: F) -> Result<V, E>
    where
        E: From<CacheError>,
        F: FnOnce(&Path) -> Result<V, E>,
    {
        let digest = Self::digest(key)?;
        if let Some(found) = self.lookup(&digest) {
            self.record(true);
            return Ok(found);
        }

        let slot = lock(&self.in_flight)
            .entry(digest.clone())
            .or_default()
            .clone();
        let _guard = lock(&slot);

        if let Some(found) = self.lookup(&digest) {
            self.record(true);
            return Ok(found);
        }
        self.record(false);
        self.stats.computed.fetch_add(1, Ordering::Relaxed);
        tracing::info!(cache = %self.name, digest = %digest, "cache miss, computing");

        let result = compute(&self.artifact_dir).and_then(|value| {
            let json_key = serde_json::to_value(key).map_err(CacheError::from)?;
            self.insert(digest.clone(), json_key, value.clone())?;
            Ok(value)
        });
        lock(&self.in_flight).remove(&digest);
        result
    }

    /// Number of entries (disk tier; every entry lives there).
    pub fn len(&self) -> usize {
        lock(&self.state).disk.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of deserialized values held in memory.
    pub fn heap_len(&self) -> usize {
        lock(&self.state).heap.len()
    }

    /// Bytes accounted against the disk bound.
    pub fn disk_usage(&self) -> u64 {
        lock(&self.state).disk.total_size()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            computed: self.stats.computed.load(Ordering::Relaxed),
        }
    }

    /// Write the index, including access times updated by lookups.
    pub fn flush(&self) -> Result<(), CacheError> {
        let state = lock(&self.state);
        self.persist(&state.disk)
    }

    /// Remove every entry and artifact.
    pub fn clear(&self) -> Result<(), CacheError> {
        let mut state = lock(&self.state);
        state.heap.clear();
        for entry in state.disk.entries.values() {
            if let Some(artifact) = &entry.artifact {
                remove_artifact(&self.artifact_dir.join(artifact));
            }
        }
        state.disk = DiskIndex::empty();
        self.persist(&state.disk)
    }

    fn record(&self, hit: bool) {
        let counter = if hit {
            &self.stats.hits
        } else {
            &self.stats.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn lookup(&self, digest: &str) -> Option<V> {
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        let tick = state.disk.next_tick();

        let entry = state.disk.entries.get_mut(digest)?;
        if let Some(artifact) = &entry.artifact
            && !self.artifact_dir.join(artifact).is_file()
        {
            tracing::warn!(cache = %self.name, artifact = %artifact, "cached artifact vanished");
            state.disk.entries.remove(digest);
            state.heap.pop(digest);
            return None;
        }
        entry.last_access = tick;

        if let Some(value) = state.heap.get(digest) {
            return Some(value.clone());
        }

        let raw = entry.value.clone();
        match serde_json::from_value::<V>(raw) {
            Ok(value) => {
                state.heap.put(digest.to_string(), value.clone());
                Some(value)
            }
            Err(e) => {
                tracing::warn!(cache = %self.name, error = %e, "unreadable cache entry");
                if let Some(removed) = state.disk.entries.remove(digest)
                    && let Some(artifact) = removed.artifact
                {
                    remove_artifact(&self.artifact_dir.join(artifact));
                }
                None
            }
        }
    }

    fn insert(&self, digest: String, key: serde_json::Value, value: V) -> Result<(), CacheError> {
        let json = serde_json::to_value(&value)?;
        let mut size = serde_json::to_vec(&json)?.len() as u64;
        let artifact = value.artifact().map(str::to_string);
        if let Some(name) = &artifact {
            size += fs::metadata(self.artifact_dir.join(name))?.len();
        }

        let mut state = lock(&self.state);
        let tick = state.disk.next_tick();
        let previous = state.disk.entries.insert(
            digest.clone(),
            DiskEntry {
                key,
                value: json,
                artifact: artifact.clone(),
                size,
                last_access: tick,
            },
        );
        if let Some(old) = previous
            && let Some(old_artifact) = old.artifact
            && Some(&old_artifact) != artifact.as_ref()
        {
            remove_artifact(&self.artifact_dir.join(old_artifact));
        }
        state.heap.put(digest.clone(), value);

        self.evict_disk(&mut state, Some(&digest));
        self.persist(&state.disk)
    }

    /// Drop least recently used entries until the disk bound holds. The
    /// entry named by `keep` survives even if it alone exceeds the bound.
    fn evict_disk(&self, state: &mut CacheState<V>, keep: Option<&str>) {
        while state.disk.total_size() > self.capacity.disk_bytes {
            let victim = state
                .disk
                .entries
                .iter()
                .filter(|(digest, _)| Some(digest.as_str()) != keep)
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(digest, _)| digest.clone());
            let Some(victim) = victim else {
                break;
            };
            if let Some(entry) = state.disk.entries.remove(&victim) {
                tracing::debug!(
                    cache = %self.name,
                    digest = %victim,
                    size = entry.size,
                    "evicting"
                );
                if let Some(artifact) = entry.artifact {
                    remove_artifact(&self.artifact_dir.join(artifact));
                }
            }
            state.heap.pop(&victim);
        }
    }

    fn persist(&self, index: &DiskIndex) -> Result<(), CacheError> {
        let json = serde_json::to_vec(index)?;
        let tmp = self.index_path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.index_path)?;
        Ok(())
    }
}

/// Load the index. A missing, unreadable or outdated index yields an empty one.
fn load_index(path: &Path) -> DiskIndex {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return DiskIndex::empty(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to read cache index");
            return DiskIndex::empty();
        }
    };
    match serde_json::from_str::<DiskIndex>(&content) {
        Ok(index) if index.version == INDEX_VERSION => index,
        Ok(index) => {
            tracing::info!(
                stored = index.version,
                current = INDEX_VERSION,
                "cache index version mismatch, starting empty"
            );
            DiskIndex::empty()
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "corrupt cache index, starting empty"
            );
            DiskIndex::empty()
        }
    }
}

/// Delete artifact files no index entry refers to.
fn sweep_orphans(artifact_dir: &Path, index: &DiskIndex) {
    let referenced: std::collections::HashSet<&str> = index
        .entries
        .values()
        .filter_map(|e| e.artifact.as_deref())
        .collect();
    for entry in walkdir::WalkDir::new(artifact_dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let name = entry.file_name().to_string_lossy();
        if !referenced.contains(name.as_ref()) {
            tracing::debug!(artifact = %name, "removing orphaned artifact");
            remove_artifact(entry.path());
        }
    }
}

fn remove_artifact(path: &Path) {
    if let Err(e) = fs::remove_file(path)
        && e.kind() != io::ErrorKind::NotFound
    {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove cached artifact");
    }
}
