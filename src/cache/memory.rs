//! Default `Cache` implementation: a generational-arena-backed, in-process
//! slot table with a safe (index-based, no raw pointers) intrusive LRU
//! list, each entry carrying its own lock and dirty flag.
//!
//! Nodes evicted from the hot list are packed and appended to a
//! [`FileStore`]; the next `fetch` for that NID returns a rewritten
//! `Media::File` identifier, exercising the NID-rewrite protocol a node
//! goes through as it moves between residencies.

use crate::{
    cache::{file_store::FileStore, Cache, Handle, Slot},
    error::{CacheError, Error, Result},
    nid::{Media, NodeId},
    node::Node,
    size::FixedSize,
};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU32, Ordering};

struct LruLink {
    prev: Option<u32>,
    next: Option<u32>,
}

struct Entry<K, V> {
    slot: Slot<K, V>,
    generation: u32,
    link: LruLink,
    /// `None` once evicted to disk and not yet re-fetched into this slot.
    occupied: bool,
}

struct Inner<K, V> {
    /// `None` entries are free arena slots, chained through `free_head`.
    entries: Vec<Option<Entry<K, V>>>,
    free_head: Option<u32>,
    lru_head: Option<u32>,
    lru_tail: Option<u32>,
    resident: usize,
}

/// Configuration for the default in-process cache.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CacheConfig {
    /// Maximum number of resident (volatile) nodes before eviction begins.
    pub capacity: usize,
    /// Path to the backing file for evicted nodes.
    pub backing_path: std::path::PathBuf,
    /// Block size for the backing file, in bytes.
    pub block_size: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            capacity: 1024,
            backing_path: std::path::PathBuf::from("pagetree.db"),
            block_size: FileStore::DEFAULT_BLOCK_SIZE,
        }
    }
}

pub struct MemoryCache<K, V> {
    inner: Mutex<Inner<K, V>>,
    store: Mutex<FileStore>,
    capacity: usize,
    next_generation: AtomicU32,
    /// Maps a file-resident NID back to a currently-cached slot, populated
    /// the moment a file-backed node is paged back in so repeated fetches
    /// within the same eviction cycle don't re-read the backing file. The
    /// generation guards against a stale entry aliasing a reused arena slot
    /// after that slot's occupant was evicted again.
    resident_by_file_nid: Mutex<FxHashMap<(u64, u32), (u32, u32)>>,
}

impl<K, V> MemoryCache<K, V>
where
    K: FixedSize + Ord + Clone,
    V: FixedSize + Clone,
{
    pub fn open(config: CacheConfig) -> Result<Self> {
        let store = FileStore::open(&config.backing_path, config.block_size)?;
        Ok(MemoryCache {
            inner: Mutex::new(Inner {
                entries: Vec::new(),
                free_head: None,
                lru_head: None,
                lru_tail: None,
                resident: 0,
            }),
            store: Mutex::new(store),
            capacity: config.capacity,
            next_generation: AtomicU32::new(0),
            resident_by_file_nid: Mutex::new(FxHashMap::default()),
        })
    }

    fn touch(inner: &mut Inner<K, V>, idx: u32) {
        Self::unlink(inner, idx);
        Self::push_front(inner, idx);
    }

    fn unlink(inner: &mut Inner<K, V>, idx: u32) {
        let (prev, next) = {
            let e = inner.entries[idx as usize].as_ref().unwrap();
            (e.link.prev, e.link.next)
        };
        match prev {
            Some(p) => inner.entries[p as usize].as_mut().unwrap().link.next = next,
            None => inner.lru_head = next,
        }
        match next {
            Some(n) => inner.entries[n as usize].as_mut().unwrap().link.prev = prev,
            None => inner.lru_tail = prev,
        }
    }

    fn push_front(inner: &mut Inner<K, V>, idx: u32) {
        let old_head = inner.lru_head;
        {
            let e = inner.entries[idx as usize].as_mut().unwrap();
            e.link.prev = None;
            e.link.next = old_head;
        }
        if let Some(h) = old_head {
            inner.entries[h as usize].as_mut().unwrap().link.prev = Some(idx);
        }
        inner.lru_head = Some(idx);
        if inner.lru_tail.is_none() {
            inner.lru_tail = Some(idx);
        }
    }

    fn alloc_slot(&self, inner: &mut Inner<K, V>, slot: Slot<K, V>) -> u32 {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let entry = Entry {
            slot,
            generation,
            link: LruLink { prev: None, next: None },
            occupied: true,
        };
        let idx = if let Some(free) = inner.free_head {
            inner.free_head = inner.entries[free as usize]
                .as_ref()
                .and_then(|e| e.link.next);
            inner.entries[free as usize] = Some(entry);
            free
        } else {
            inner.entries.push(Some(entry));
            (inner.entries.len() - 1) as u32
        };
        Self::push_front(inner, idx);
        inner.resident += 1;
        idx
    }

    /// Evicts the least-recently-used slot if over capacity, writing its
    /// node to the backing file and freeing the arena slot. Returns the
    /// evicted node's old NID and its rewritten `Media::File` NID so the
    /// caller can publish the rewrite if the evicted node happened to be the
    /// one just fetched (normally it is a different, colder node).
    fn evict_if_needed(&self) -> Result<()> {
        loop {
            let victim = {
                let inner = self.inner.lock();
                if inner.resident <= self.capacity {
                    return Ok(());
                }
                inner.lru_tail
            };
            let Some(idx) = victim else { return Ok(()) };
            self.evict_slot(idx)?;
        }
    }

    fn evict_slot(&self, idx: u32) -> Result<()> {
        let slot = {
            let mut inner = self.inner.lock();
            let Some(entry) = inner.entries[idx as usize].as_mut() else {
                return Ok(());
            };
            if !entry.occupied {
                return Ok(());
            }
            entry.occupied = false;
            let slot = entry.slot.clone();
            Self::unlink(&mut inner, idx);
            inner.entries[idx as usize] = None;
            inner.free_head = Some(idx);
            inner.resident -= 1;
            slot
        };
        let mut buf = Vec::with_capacity(64);
        {
            let node = slot.read();
            node.pack(&mut buf)?;
        }
        let mut store = self.store.lock();
        store.append(&buf)?;
        Ok(())
    }

    fn insert_resident(&self, node: Node<K, V>, dirty: bool) -> (u32, Slot<K, V>) {
        let slot = Slot::new(node, dirty);
        let mut inner = self.inner.lock();
        let idx = self.alloc_slot(&mut inner, slot.clone());
        (idx, slot)
    }
}

impl<K, V> Cache<K, V> for MemoryCache<K, V>
where
    K: FixedSize + Ord + Clone,
    V: FixedSize + Clone,
{
    fn create(&self, node: Node<K, V>) -> Result<(NodeId, Handle<K, V>)> {
        let kind = node.kind();
        let (idx, slot) = self.insert_resident(node, true);
        let generation = {
            let inner = self.inner.lock();
            inner.entries[idx as usize].as_ref().unwrap().generation
        };
        self.evict_if_needed()?;
        Ok((NodeId::volatile(kind, idx, generation), slot.handle()))
    }

    fn fetch(&self, nid: NodeId) -> Result<(Handle<K, V>, Option<NodeId>)> {
        match nid.media {
            Media::Volatile { slot: idx, generation } => {
                let mut inner = self.inner.lock();
                match inner.entries.get(idx as usize).and_then(|e| e.as_ref()) {
                    Some(entry) if entry.occupied && entry.generation == generation => {
                        let slot = entry.slot.clone();
                        Self::touch(&mut inner, idx);
                        drop(inner);
                        Ok((slot.handle(), None))
                    }
                    _ => Err(Error::Cache(CacheError::NotFound(format!("{nid}")))),
                }
            }
            Media::File { offset, size } => {
                if let Some(&(idx, generation)) = self.resident_by_file_nid.lock().get(&(offset, size)) {
                    let mut inner = self.inner.lock();
                    if let Some(entry) = inner.entries.get(idx as usize).and_then(|e| e.as_ref()) {
                        if entry.occupied && entry.generation == generation {
                            let slot = entry.slot.clone();
                            Self::touch(&mut inner, idx);
                            let kind = slot.read().kind();
                            drop(inner);
                            let new_nid = NodeId::volatile(kind, idx, generation);
                            return Ok((slot.handle(), Some(new_nid)));
                        }
                    }
                }
                let bytes = {
                    let mut store = self.store.lock();
                    store.read(offset, size)?
                };
                let node = Node::unpack(&bytes[..])?;
                let kind = node.kind();
                let (idx, slot) = self.insert_resident(node, false);
                let generation = {
                    let inner = self.inner.lock();
                    inner.entries[idx as usize].as_ref().unwrap().generation
                };
                self.resident_by_file_nid
                    .lock()
                    .insert((offset, size), (idx, generation));
                let new_nid = NodeId::volatile(kind, idx, generation);
                self.evict_if_needed()?;
                Ok((slot.handle(), Some(new_nid)))
            }
        }
    }

    fn remove(&self, nid: NodeId) -> Result<()> {
        match nid.media {
            Media::Volatile { slot: idx, generation } => {
                let mut inner = self.inner.lock();
                match inner.entries.get(idx as usize).and_then(|e| e.as_ref()) {
                    Some(entry) if entry.occupied && entry.generation == generation => {
                        Self::unlink(&mut inner, idx);
                        inner.entries[idx as usize] = None;
                        inner.free_head = Some(idx);
                        inner.resident -= 1;
                        Ok(())
                    }
                    _ => Err(Error::Cache(CacheError::NotFound(format!("{nid}")))),
                }
            }
            Media::File { offset, size } => {
                self.resident_by_file_nid.lock().remove(&(offset, size));
                Ok(())
            }
        }
    }

    fn reorder(&self, access_list: &[NodeId]) {
        let mut inner = self.inner.lock();
        for nid in access_list {
            if let Media::Volatile { slot: idx, generation } = nid.media {
                if let Some(entry) = inner.entries.get(idx as usize).and_then(|e| e.as_ref()) {
                    if entry.occupied && entry.generation == generation {
                        Self::touch(&mut inner, idx);
                    }
                }
            }
        }
    }

    /// Persists every dirty resident node. Before any write, rewrites every
    /// outgoing child reference within the flushed batch using an
    /// `old_nid -> new_nid` map built from the volatile NIDs about to become
    /// file-backed, so cross-references stay consistent whether or not the
    /// referenced child is itself part of this batch.
    fn flush(&self) -> Result<()> {
        let dirty: Vec<(u32, u32, Slot<K, V>)> = {
            let inner = self.inner.lock();
            (0..inner.entries.len() as u32)
                .filter_map(|i| {
                    inner.entries[i as usize].as_ref().and_then(|e| {
                        (e.occupied && e.slot.is_dirty())
                            .then(|| (i, e.generation, e.slot.clone()))
                    })
                })
                .collect()
        };
        if dirty.is_empty() {
            return Ok(());
        }

        // Predict each flushed node's eventual (offset, size): sizes are
        // fixed once content is decided (the NID encoding is fixed-width
        // regardless of media), so the map can be built before any bytes
        // are written, then the second pass appends in the same order and
        // lands at exactly the predicted offsets.
        let mut cursor = { self.store.lock().len() };
        let mut rewrites = FxHashMap::default();
        let mut planned: Vec<(Slot<K, V>, NodeId)> = Vec::with_capacity(dirty.len());
        for (idx, generation, slot) in &dirty {
            let kind = slot.read().kind();
            let old_nid = NodeId::volatile(kind, *idx, *generation);
            let size = slot.read().encoded_size() as u32;
            let rounded = self.store.lock().rounded_size(size);
            let new_nid = NodeId::on_disk(kind, cursor, rounded);
            rewrites.insert(old_nid, new_nid);
            planned.push((slot.clone(), new_nid));
            cursor += rounded as u64;
        }

        for (idx, _, slot) in &dirty {
            let mut guard = slot.write_raw();
            if let Node::Index(index) = &mut *guard {
                index.materialize();
                let n = index.n_pivots();
                for i in 0..=n {
                    let child = index.child_at_index(i);
                    if let Some(&new_nid) = rewrites.get(&child) {
                        index.set_child_at(i, new_nid);
                    }
                }
            }
            let _ = idx;
        }

        let mut store = self.store.lock();
        for (slot, _new_nid) in &planned {
            let mut buf = Vec::new();
            slot.read().pack(&mut buf)?;
            store.append(&buf)?;
            slot.clear_dirty();
        }
        Ok(())
    }

    fn cache_state(&self) -> (usize, usize) {
        let inner = self.inner.lock();
        (inner.resident, inner.entries.len())
    }
}
