//! Sharded block store with dual-bound LRU eviction
//!
//! Entries live on disk under `<media>/<blob digest hex>/<index>.blk`,
//! written temp-file + rename so a crash never leaves a partial entry
//! visible. The in-memory index is partitioned by key hash so the hot
//! `get` path never serializes behind a single lock; only the
//! evict-and-reserve step of `put` is serialized, through a dedicated
//! admission mutex.

use crate::error::{Result, StoreError};
use crate::metrics::{CACHE_BYTES_USED, CACHE_ENTRIES, CACHE_EVICTIONS, CACHE_HITS, CACHE_MISSES};
use bytes::Bytes;
use lru::LruCache;
use peercache_types::{BlobDigest, BlockKey};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const SHARD_COUNT: usize = 16;

/// Block store configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// On-disk media root for cached blocks
    pub media: PathBuf,
    /// Total byte bound across all entries
    pub cache_bytes: u64,
    /// Entry count bound across all entries
    pub max_entries: u64,
}

/// Index entry for one cached block
struct Entry {
    path: PathBuf,
    size: u64,
    /// Logical access stamp; globally comparable across shards
    stamp: u64,
}

struct Shard {
    entries: LruCache<BlockKey, Entry>,
}

/// Snapshot of the store's aggregate state
#[derive(Debug, Clone)]
pub struct StoreStats {
    pub bytes_used: u64,
    pub entry_count: u64,
    pub cache_bytes: u64,
    pub max_entries: u64,
}

/// Bounded on-disk block store
pub struct BlockStore {
    config: StoreConfig,
    shards: Vec<Mutex<Shard>>,
    /// Serializes evict-and-reserve so bounds are checked and restored
    /// as one atomic unit. Never taken by `get`.
    admission: Mutex<()>,
    bytes_used: AtomicU64,
    entry_count: AtomicU64,
    clock: AtomicU64,
}

impl BlockStore {
    /// Open the store, creating the media root if needed and rebuilding
    /// the index from whatever entries survived on disk.
    pub async fn open(config: StoreConfig) -> Result<Self> {
        if config.cache_bytes == 0 {
            return Err(StoreError::Config("cache_bytes must be > 0".to_string()));
        }
        if config.max_entries == 0 {
            return Err(StoreError::Config("max_entries must be > 0".to_string()));
        }

        fs::create_dir_all(&config.media).await?;

        let shards = (0..SHARD_COUNT)
            .map(|_| {
                Mutex::new(Shard {
                    entries: LruCache::unbounded(),
                })
            })
            .collect();

        let store = Self {
            config,
            shards,
            admission: Mutex::new(()),
            bytes_used: AtomicU64::new(0),
            entry_count: AtomicU64::new(0),
            clock: AtomicU64::new(0),
        };

        store.recover().await?;

        info!(
            media = %store.config.media.display(),
            bytes_used = store.bytes_used.load(Ordering::Relaxed),
            entries = store.entry_count.load(Ordering::Relaxed),
            "block store opened"
        );

        Ok(store)
    }

    /// Look up one block. Touches recency on hit; read failures degrade
    /// to a miss and drop the index entry.
    pub async fn get(&self, key: &BlockKey) -> Option<Bytes> {
        let path = {
            let mut shard = self.shards[self.shard_for(key)].lock().await;
            match shard.entries.get_mut(key) {
                Some(entry) => {
                    entry.stamp = self.next_stamp();
                    entry.path.clone()
                }
                None => {
                    CACHE_MISSES.inc();
                    return None;
                }
            }
        };

        match fs::read(&path).await {
            Ok(data) => {
                CACHE_HITS.inc();
                Some(Bytes::from(data))
            }
            Err(e) => {
                warn!(key = %key, error = %e, "cached block unreadable, dropping entry");
                self.remove(key).await;
                CACHE_MISSES.inc();
                None
            }
        }
    }

    /// Admit one block, evicting least-recently-used entries first if
    /// either bound would be violated. An entry larger than the whole
    /// byte bound is rejected, never admitted.
    pub async fn put(&self, key: BlockKey, data: Bytes) -> Result<()> {
        let size = data.len() as u64;
        if size > self.config.cache_bytes {
            return Err(StoreError::OversizedEntry {
                size,
                capacity: self.config.cache_bytes,
            });
        }

        // Re-admitting an existing key is a replace; retire the old
        // entry first so the accounting below is exact.
        self.remove(&key).await;

        {
            let _admit = self.admission.lock().await;
            while self.bytes_used.load(Ordering::Relaxed) + size > self.config.cache_bytes
                || self.entry_count.load(Ordering::Relaxed) + 1 > self.config.max_entries
            {
                if !self.evict_one().await {
                    // Nothing left to evict; cannot happen while the
                    // oversized check above holds and max_entries > 0.
                    return Err(StoreError::Config(
                        "eviction stalled with empty cache".to_string(),
                    ));
                }
            }
            self.bytes_used.fetch_add(size, Ordering::Relaxed);
            self.entry_count.fetch_add(1, Ordering::Relaxed);
            self.sync_gauges();
        }

        let path = self.block_path(&key);
        if let Err(e) = write_atomic(&path, &data).await {
            self.bytes_used.fetch_sub(size, Ordering::Relaxed);
            self.entry_count.fetch_sub(1, Ordering::Relaxed);
            self.sync_gauges();
            return Err(e.into());
        }

        let entry = Entry {
            path,
            size,
            stamp: self.next_stamp(),
        };

        let replaced = {
            let mut shard = self.shards[self.shard_for(&key)].lock().await;
            shard.entries.put(key, entry)
        };
        // A racing put for the same key can land between our remove and
        // insert; the replaced entry's reservation is returned here.
        if let Some(old) = replaced {
            self.bytes_used.fetch_sub(old.size, Ordering::Relaxed);
            self.entry_count.fetch_sub(1, Ordering::Relaxed);
            self.sync_gauges();
        }

        Ok(())
    }

    /// Drop one entry from the index and accounting, deleting its file
    /// best-effort.
    pub async fn remove(&self, key: &BlockKey) {
        let popped = {
            let mut shard = self.shards[self.shard_for(key)].lock().await;
            shard.entries.pop(key)
        };
        if let Some(entry) = popped {
            self.bytes_used.fetch_sub(entry.size, Ordering::Relaxed);
            self.entry_count.fetch_sub(1, Ordering::Relaxed);
            self.sync_gauges();
            if let Err(e) = fs::remove_file(&entry.path).await {
                debug!(key = %key, error = %e, "failed to delete removed block file");
            }
        }
    }

    /// Aggregate state snapshot.
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            bytes_used: self.bytes_used.load(Ordering::Relaxed),
            entry_count: self.entry_count.load(Ordering::Relaxed),
            cache_bytes: self.config.cache_bytes,
            max_entries: self.config.max_entries,
        }
    }

    /// Evict the least-recently-used entry across all shards.
    ///
    /// Picks the shard whose LRU tail carries the globally oldest
    /// access stamp; ties fall to the lowest shard index. Returns false
    /// when every shard is empty. Caller holds the admission mutex.
    async fn evict_one(&self) -> bool {
        let mut victim: Option<(usize, u64)> = None;
        for (i, shard) in self.shards.iter().enumerate() {
            let shard = shard.lock().await;
            if let Some((_, entry)) = shard.entries.peek_lru() {
                if victim.map_or(true, |(_, stamp)| entry.stamp < stamp) {
                    victim = Some((i, entry.stamp));
                }
            }
        }

        let Some((idx, _)) = victim else {
            return false;
        };

        let popped = {
            let mut shard = self.shards[idx].lock().await;
            shard.entries.pop_lru()
        };
        let Some((key, entry)) = popped else {
            // Shard drained between peek and pop; retry from the top.
            return true;
        };

        self.bytes_used.fetch_sub(entry.size, Ordering::Relaxed);
        self.entry_count.fetch_sub(1, Ordering::Relaxed);
        self.sync_gauges();
        CACHE_EVICTIONS.inc();
        debug!(key = %key, size = entry.size, "evicted block");

        if let Err(e) = fs::remove_file(&entry.path).await {
            warn!(key = %key, error = %e, "failed to delete evicted block file");
        }

        true
    }

    /// Rebuild the index from the media root. Unreadable or foreign
    /// files are skipped; recovered entries are inserted oldest-first
    /// (by mtime) so eviction order survives the restart.
    async fn recover(&self) -> Result<()> {
        let mut found: Vec<(BlockKey, PathBuf, u64, std::time::SystemTime)> = Vec::new();

        let mut dirs = fs::read_dir(&self.config.media).await?;
        while let Ok(Some(dir)) = dirs.next_entry().await {
            let Some(digest) = dir
                .file_name()
                .to_str()
                .and_then(BlobDigest::from_hex)
            else {
                continue;
            };
            let Ok(meta) = dir.metadata().await else {
                continue;
            };
            if !meta.is_dir() {
                continue;
            }

            let Ok(mut files) = fs::read_dir(dir.path()).await else {
                continue;
            };
            while let Ok(Some(file)) = files.next_entry().await {
                let name = file.file_name();
                let Some(index) = name
                    .to_str()
                    .and_then(|n| n.strip_suffix(".blk"))
                    .and_then(|n| n.parse::<u64>().ok())
                else {
                    continue;
                };
                let Ok(meta) = file.metadata().await else {
                    continue;
                };
                if !meta.is_file() {
                    continue;
                }
                let mtime = meta.modified().unwrap_or(std::time::UNIX_EPOCH);
                found.push((
                    BlockKey::new(digest.clone(), index),
                    file.path(),
                    meta.len(),
                    mtime,
                ));
            }
        }

        found.sort_by_key(|(_, _, _, mtime)| *mtime);
        let recovered = found.len();

        for (key, path, size, _) in found {
            let entry = Entry {
                path,
                size,
                stamp: self.next_stamp(),
            };
            let shard_idx = self.shard_for(&key);
            self.shards[shard_idx].lock().await.entries.put(key, entry);
            self.bytes_used.fetch_add(size, Ordering::Relaxed);
            self.entry_count.fetch_add(1, Ordering::Relaxed);
        }

        // The disk may hold more than the configured bounds admit.
        let _admit = self.admission.lock().await;
        while self.bytes_used.load(Ordering::Relaxed) > self.config.cache_bytes
            || self.entry_count.load(Ordering::Relaxed) > self.config.max_entries
        {
            if !self.evict_one().await {
                break;
            }
        }
        self.sync_gauges();

        if recovered > 0 {
            info!(
                recovered,
                kept = self.entry_count.load(Ordering::Relaxed),
                "recovered cache entries from disk"
            );
        }

        Ok(())
    }

    fn shard_for(&self, key: &BlockKey) -> usize {
        // First digest byte mixed with the block index; the digest is
        // already uniform.
        let byte = u8::from_str_radix(&key.digest.as_str()[..2], 16).unwrap_or(0);
        (byte as u64 ^ key.index) as usize % SHARD_COUNT
    }

    fn block_path(&self, key: &BlockKey) -> PathBuf {
        self.config
            .media
            .join(key.digest.as_str())
            .join(key.file_name())
    }

    fn next_stamp(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn sync_gauges(&self) {
        CACHE_BYTES_USED.set(self.bytes_used.load(Ordering::Relaxed) as f64);
        CACHE_ENTRIES.set(self.entry_count.load(Ordering::Relaxed) as f64);
    }
}

/// Write `data` to `path` via a temp file and rename, creating parent
/// directories as needed. A crash mid-write leaves only the temp file,
/// which recovery ignores.
async fn write_atomic(path: &PathBuf, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let temp = path.with_extension("tmp");
    fs::write(&temp, data).await?;
    fs::rename(&temp, path).await?;
    Ok(())
}
