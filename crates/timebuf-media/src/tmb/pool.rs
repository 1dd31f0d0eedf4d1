// crates/timebuf-media/src/tmb/pool.rs
//
// Reader pool keyed by (track_id, path) (spec §4.3 "Reader pool", §3
// invariant 4). Keying on the track as well as the path is deliberate: two
// tracks that reference the same file get independent Readers so a seek on
// one track's playhead never contends with another track's decode.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use timebuf_core::MediaFileInfo;

use crate::reader::Reader;

pub type PoolKey = (u64, PathBuf);

pub struct PoolEntry {
    pub media_file: MediaFileInfo,
    pub reader: Arc<Mutex<Reader>>,
    last_used: u64,
}

pub struct ReaderPool {
    entries: HashMap<PoolKey, PoolEntry>,
    max_readers: usize,
    clock: u64,
}

impl ReaderPool {
    pub fn new(max_readers: usize) -> Self {
        Self { entries: HashMap::new(), max_readers: max_readers.max(1), clock: 0 }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Bump `last_used` and return the entry if present (spec §4.3 "Hit:
    /// bump `last_used`").
    pub fn touch(&mut self, key: &PoolKey) -> Option<(Arc<Mutex<Reader>>, MediaFileInfo)> {
        self.clock += 1;
        let clock = self.clock;
        self.entries.get_mut(key).map(|e| {
            e.last_used = clock;
            (e.reader.clone(), e.media_file.clone())
        })
    }

    /// Insert a freshly opened reader, evicting the LRU entry if this puts
    /// the pool over `max_readers` (spec §3 invariant 5, §4.3 "Miss").
    /// Returns the evicted key, if any.
    pub fn insert(&mut self, key: PoolKey, media_file: MediaFileInfo, reader: Arc<Mutex<Reader>>) -> Option<PoolKey> {
        self.clock += 1;
        self.entries.insert(key, PoolEntry { media_file, reader, last_used: self.clock });
        self.evict_over_capacity()
    }

    fn evict_over_capacity(&mut self) -> Option<PoolKey> {
        if self.entries.len() <= self.max_readers {
            return None;
        }
        let lru_key = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.last_used)
            .map(|(k, _)| k.clone())?;
        self.entries.remove(&lru_key);
        Some(lru_key)
    }

    /// Shrinks the pool immediately to the new limit, same synchronous
    /// contract as `Reader::set_max_cache_frames` (spec §4.2 supplementary
    /// note): a tool that just lowered `max_readers` to relieve memory
    /// pressure should not have to wait for the next `insert` to see effect.
    pub fn set_max_readers(&mut self, n: usize) {
        self.max_readers = n.max(1);
        while self.evict_over_capacity().is_some() {}
    }

    pub fn remove_track(&mut self, track_id: u64) {
        self.entries.retain(|(tid, _), _| *tid != track_id);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Best-effort canonicalization for the pool key: a path that does not
/// exist (an offline clip) cannot be canonicalized, so fall back to the
/// path as given rather than failing the lookup.
pub fn canonical_key_path(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}
