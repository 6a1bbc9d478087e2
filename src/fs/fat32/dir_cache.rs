//! The directory cache.
//!
//! Maps absolute paths onto the coordinates needed to rebuild a directory
//! object without walking the volume: entry kind, first cluster, entry
//! address and compact 8.3 name. The cache is bounded with LRU eviction and
//! is additionally indexed by first cluster so rename and remove can
//! invalidate entries without knowing the cached path.

use alloc::string::String;

use hashbrown::HashMap;

use crate::fs::fat32::cluster::EntryAddress;
use crate::fs::fat32::filenames::Compact8Dot3Filename;
use crate::fs::fat32::ClusterIndex;

/// What a cached path resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryCacheEntryType {
    Directory,
}

/// One cached directory.
#[derive(Debug, Clone)]
pub struct DirectoryCacheEntry {
    entry_type: DirectoryCacheEntryType,
    entry_address: EntryAddress,
    first_cluster: ClusterIndex,
    compact_name: Compact8Dot3Filename,
    absolute_path: String,
    last_used: u64,
}

impl DirectoryCacheEntry {
    pub fn entry_type(&self) -> DirectoryCacheEntryType {
        self.entry_type
    }

    pub fn entry_address(&self) -> EntryAddress {
        self.entry_address
    }

    pub fn first_cluster(&self) -> ClusterIndex {
        self.first_cluster
    }

    pub fn compact_name(&self) -> &Compact8Dot3Filename {
        &self.compact_name
    }

    pub fn absolute_path(&self) -> &str {
        &self.absolute_path
    }
}

/// Bounded LRU cache of resolved directories, indexed by absolute path and
/// by first cluster.
pub struct DirectoryCache {
    max_size: usize,
    entries_by_path: HashMap<String, DirectoryCacheEntry>,
    paths_by_cluster: HashMap<ClusterIndex, String>,

    use_counter: u64,

    hits: u64,
    misses: u64,
}

impl DirectoryCache {
    /// Creates a cache bounded at `max_size` entries.
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            entries_by_path: HashMap::new(),
            paths_by_cluster: HashMap::new(),
            use_counter: 0,
            hits: 0,
            misses: 0,
        }
    }

    /// Inserts a resolved directory.
    ///
    /// Re-inserting an already cached path with the same first cluster is a
    /// no-op; a genuine collision (same path, different cluster) is refused
    /// so the first resolution wins. The least recently used entry is
    /// evicted when the cache is full.
    pub fn add_entry(
        &mut self,
        entry_type: DirectoryCacheEntryType,
        entry_address: EntryAddress,
        first_cluster: ClusterIndex,
        compact_name: Compact8Dot3Filename,
        absolute_path: &str,
    ) {
        if self.entries_by_path.contains_key(absolute_path) {
            return;
        }

        if self.paths_by_cluster.contains_key(&first_cluster) {
            return;
        }

        if self.entries_by_path.len() >= self.max_size {
            self.evict_least_recently_used();
        }

        self.use_counter += 1;

        self.entries_by_path.insert(
            String::from(absolute_path),
            DirectoryCacheEntry {
                entry_type,
                entry_address,
                first_cluster,
                compact_name,
                absolute_path: String::from(absolute_path),
                last_used: self.use_counter,
            },
        );

        self.paths_by_cluster
            .insert(first_cluster, String::from(absolute_path));
    }

    /// Looks a directory up by absolute path, refreshing its recency.
    pub fn find_entry(&mut self, absolute_path: &str) -> Option<DirectoryCacheEntry> {
        self.use_counter += 1;
        let use_counter = self.use_counter;

        match self.entries_by_path.get_mut(absolute_path) {
            Some(entry) => {
                entry.last_used = use_counter;
                self.hits += 1;
                Some(entry.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Looks a directory up by first cluster, refreshing its recency.
    pub fn find_entry_by_cluster(
        &mut self,
        first_cluster: ClusterIndex,
    ) -> Option<DirectoryCacheEntry> {
        let path = self.paths_by_cluster.get(&first_cluster)?.clone();

        self.find_entry(&path)
    }

    /// Returns the first cluster cached for an absolute path, refreshing
    /// the entry's recency. Used by the longest-cached-prefix search.
    pub fn find_first_cluster(&mut self, absolute_path: &str) -> Option<ClusterIndex> {
        self.find_entry(absolute_path)
            .map(|entry| entry.first_cluster())
    }

    /// Invalidates the entry holding `first_cluster`, if any. Removing an
    /// uncached cluster is a no-op.
    pub fn remove_entry(&mut self, first_cluster: ClusterIndex) {
        if let Some(path) = self.paths_by_cluster.remove(&first_cluster) {
            self.entries_by_path.remove(&path);
        }
    }

    /// Drops every cached entry. The statistics survive.
    pub fn clear(&mut self) {
        self.entries_by_path.clear();
        self.paths_by_cluster.clear();
    }

    /// The configured bound.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// The number of cached entries.
    pub fn current_size(&self) -> usize {
        self.entries_by_path.len()
    }

    /// Lookups that found an entry.
    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Lookups that missed.
    pub fn misses(&self) -> u64 {
        self.misses
    }

    fn evict_least_recently_used(&mut self) {
        let victim = self
            .entries_by_path
            .values()
            .min_by_key(|entry| entry.last_used)
            .map(|entry| (entry.absolute_path.clone(), entry.first_cluster));

        if let Some((path, first_cluster)) = victim {
            self.entries_by_path.remove(&path);
            self.paths_by_cluster.remove(&first_cluster);
        }
    }
}
