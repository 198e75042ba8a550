//! Inode store: the on-disk inode table and the in-memory handles over it.
//!
//! At most one [`InodeHandle`] exists per inumber system-wide; concurrent
//! opens share it through the open-inode table. A handle's `disk` mutex is
//! the *data lock* of the inode: it guards the length and the top-level
//! block pointers. Deeper index sectors are guarded by locking the sector
//! itself in the buffer cache while its pointers are patched, so one stuck
//! indirection never blocks unrelated allocations.
//!
//! Sectors are allocated lazily, on the first write that addresses them.
//! Files may be sparse: a zero pointer reads as zeroes until written.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};

use log::debug;

use crate::cache::BufferCache;
use crate::free_map::FreeMap;
use crate::layout::{BlockPath, DiskInode, FANOUT, MAX_INUMS};
use crate::sync::ReentrantLock;
use crate::{FsError, Inum, Result, SectorIdx, PRI_INODE, PRI_META, PRI_NORMAL, SECTOR_SIZE};

pub struct InodeStore {
    cache: Arc<BufferCache>,
    free_map: Arc<FreeMap>,
    /// Open-inode table: inumber → live handle. Guarantees handle
    /// uniqueness; holds weak references so the last close drops the entry.
    open_inodes: StdMutex<HashMap<Inum, Weak<InodeHandle>>>,
    /// Serializes inumber allocation scans.
    inum_lock: StdMutex<()>,
}

/// In-memory inode. One per open inumber; shared by every opener.
pub struct InodeHandle {
    inum: Inum,
    store: Arc<InodeStore>,
    /// Data lock: length and top-level block pointers.
    disk: StdMutex<DiskInode>,
    removed: AtomicBool,
    deny_write_cnt: AtomicU32,
    /// Reentrant lock for directory operations on this inode.
    pub(crate) dir_lock: ReentrantLock,
}

impl InodeStore {
    pub fn new(cache: Arc<BufferCache>, free_map: Arc<FreeMap>) -> Arc<Self> {
        Arc::new(Self {
            cache,
            free_map,
            open_inodes: StdMutex::new(HashMap::new()),
            inum_lock: StdMutex::new(()),
        })
    }

    /// Claims a free inumber: scans the table in order and marks the first
    /// entry that is not in use. The claimed entry is a zeroed placeholder
    /// until [`create`](Self::create) fills it in.
    pub fn assign_inumber(&self) -> Result<Inum> {
        let _guard = self.inum_lock.lock().unwrap();
        for inum in 0..MAX_INUMS {
            let mut di = self.read_table(inum);
            if !di.in_use {
                di.in_use = true;
                self.write_table(inum, &di);
                debug!("assigned inumber {inum}");
                return Ok(inum);
            }
        }
        Err(FsError::NoInodeAvailable)
    }

    /// Zeroes the on-disk entry of `inum`, making the inumber reusable.
    pub fn release_inumber(&self, inum: Inum) {
        self.write_table(inum, &DiskInode::default());
        debug!("released inumber {inum}");
    }

    /// Writes a fresh inode record for `inum`. Block pointers start zeroed;
    /// data sectors appear when first written.
    pub fn create(&self, inum: Inum, length: u32, is_dir: bool) {
        self.write_table(inum, &DiskInode::new(is_dir, length));
    }

    /// Opens `inum`, returning the existing handle when one is live.
    pub fn open(self: &Arc<Self>, inum: Inum) -> Result<Arc<InodeHandle>> {
        let mut table = self.open_inodes.lock().unwrap();
        if let Some(handle) = table.get(&inum).and_then(Weak::upgrade) {
            return Ok(handle);
        }
        let di = self.read_table(inum);
        if !di.in_use {
            return Err(FsError::NotFound);
        }
        let handle = Arc::new(InodeHandle {
            inum,
            store: Arc::clone(self),
            disk: StdMutex::new(di),
            removed: AtomicBool::new(false),
            deny_write_cnt: AtomicU32::new(0),
            dir_lock: ReentrantLock::new(),
        });
        table.insert(inum, Arc::downgrade(&handle));
        Ok(handle)
    }

    fn read_table(&self, inum: Inum) -> DiskInode {
        let (sector, ofs) = DiskInode::table_pos(inum);
        let mut di = DiskInode::default();
        self.cache.read(sector, di.as_bytes_mut(), ofs, PRI_INODE);
        di
    }

    fn write_table(&self, inum: Inum, di: &DiskInode) {
        let (sector, ofs) = DiskInode::table_pos(inum);
        self.cache.write(sector, di.as_bytes(), ofs, PRI_INODE);
    }

    /// Returns every sector reachable from `di` to the free map: data
    /// sectors first, then the index sectors that pointed at them, then
    /// (by the caller) the table entry itself.
    fn release_sectors(&self, di: &DiskInode) {
        for slot in 0..5 {
            self.free_data_sector(di.blocks[slot]);
        }
        for slot in 5..7 {
            self.free_index_sector(di.blocks[slot], 1);
        }
        self.free_index_sector(di.blocks[7], 2);
    }

    fn free_data_sector(&self, sector: SectorIdx) {
        if sector != 0 {
            self.cache.remove(sector);
            self.free_map.release(sector, 1);
        }
    }

    /// Frees everything below an index sector, then the sector itself.
    /// `depth` 1 means its pointers are data sectors; 2 means they are
    /// further index sectors.
    fn free_index_sector(&self, from: SectorIdx, depth: u32) {
        if from == 0 {
            return;
        }
        for entry in 0..FANOUT {
            let mut bytes = [0u8; 4];
            self.cache
                .read(from, &mut bytes, entry as usize * 4, PRI_META);
            let child = SectorIdx::from_ne_bytes(bytes);
            if depth > 1 {
                self.free_index_sector(child, depth - 1);
            } else {
                self.free_data_sector(child);
            }
        }
        self.free_data_sector(from);
    }
}

impl InodeHandle {
    pub fn inum(&self) -> Inum {
        self.inum
    }

    pub fn length(&self) -> u32 {
        self.disk.lock().unwrap().length
    }

    pub fn is_dir(&self) -> bool {
        self.disk.lock().unwrap().is_dir
    }

    /// Marks the inode for deletion; resources go when the last handle
    /// drops.
    pub fn remove(&self) {
        self.removed.store(true, Ordering::Release);
    }

    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }

    pub fn deny_write(&self) {
        self.deny_write_cnt.fetch_add(1, Ordering::AcqRel);
    }

    pub fn allow_write(&self) {
        let prev = self.deny_write_cnt.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0);
    }

    /// Reads up to `buf.len()` bytes at byte offset `offset`, bounded by
    /// the file length. Returns the number of bytes read. Holes and
    /// allocated-but-unwritten sectors read as zeroes.
    pub fn read_at(&self, buf: &mut [u8], offset: u32) -> usize {
        let cache = &self.store.cache;
        let mut read = 0usize;
        let mut pos = offset;
        while read < buf.len() {
            // Re-read the length every sector: a concurrent writer may be
            // extending the file, and the bump happens after its data is
            // in place.
            let length = self.length();
            if pos >= length {
                break;
            }
            let sector_ofs = pos as usize % SECTOR_SIZE;
            let chunk = (buf.len() - read)
                .min(SECTOR_SIZE - sector_ofs)
                .min((length - pos) as usize);
            match self.locate(pos, false) {
                Ok(Some(sector)) => {
                    cache.read(sector, &mut buf[read..read + chunk], sector_ofs, PRI_NORMAL)
                }
                _ => buf[read..read + chunk].fill(0),
            }
            read += chunk;
            pos += chunk as u32;
        }

        if read > 0 {
            // Hint the sector after the last one read, if it exists.
            let next = pos.div_ceil(SECTOR_SIZE as u32) * SECTOR_SIZE as u32;
            if next < self.length() {
                if let Ok(Some(sector)) = self.locate(next, false) {
                    cache.fetch_async(sector);
                }
            }
        }
        read
    }

    /// Writes `buf` at byte offset `offset`, allocating sectors as needed.
    /// Returns the number of bytes written, which is short of `buf.len()`
    /// when allocation fails mid-write or the offset crosses the maximum
    /// file size. Returns 0 while writes are denied.
    pub fn write_at(&self, buf: &[u8], offset: u32) -> usize {
        if self.deny_write_cnt.load(Ordering::Acquire) > 0 {
            return 0;
        }
        let cache = &self.store.cache;
        let mut written = 0usize;
        let mut pos = offset;
        while written < buf.len() {
            let sector_ofs = pos as usize % SECTOR_SIZE;
            let chunk = (buf.len() - written).min(SECTOR_SIZE - sector_ofs);
            let sector = match self.locate(pos, true) {
                Ok(Some(sector)) => sector,
                Ok(None) => break,
                Err(err) => {
                    debug!("inode {}: short write at {pos}: {err}", self.inum);
                    break;
                }
            };
            cache.write(sector, &buf[written..written + chunk], sector_ofs, PRI_NORMAL);

            // The length bump comes after the chunk is in the cache, so a
            // concurrent reader never sees bytes beyond `length` that have
            // not been written yet.
            {
                let mut di = self.disk.lock().unwrap();
                let end = pos + chunk as u32;
                if end > di.length {
                    di.length = end;
                    self.store.write_table(self.inum, &di);
                }
            }

            written += chunk;
            pos += chunk as u32;
        }
        written
    }

    /// Maps a byte offset to the device sector backing it.
    ///
    /// With `alloc` set, missing sectors (and any missing index sectors on
    /// the way) are allocated and zero-initialized in the cache. Without
    /// it, an unallocated position reports `Ok(None)` and the caller reads
    /// zeroes.
    fn locate(&self, offset: u32, alloc: bool) -> Result<Option<SectorIdx>> {
        let index = offset / SECTOR_SIZE as u32;
        let Some(path) = BlockPath::classify(index) else {
            return if alloc {
                Err(FsError::FileTooLarge)
            } else {
                Ok(None)
            };
        };
        match path {
            BlockPath::Direct { slot } => self.fix_top(slot, alloc, PRI_NORMAL),
            BlockPath::Single { slot, leaf } => {
                let Some(top) = self.fix_top(slot, alloc, PRI_META)? else {
                    return Ok(None);
                };
                self.fix_child(top, leaf, alloc, PRI_NORMAL)
            }
            BlockPath::Double { slot, mid, leaf } => {
                let Some(top) = self.fix_top(slot, alloc, PRI_META)? else {
                    return Ok(None);
                };
                let Some(mid_sector) = self.fix_child(top, mid, alloc, PRI_META)? else {
                    return Ok(None);
                };
                self.fix_child(mid_sector, leaf, alloc, PRI_NORMAL)
            }
        }
    }

    /// Resolves (and with `alloc`, populates) a top-level block pointer
    /// under the data lock.
    fn fix_top(&self, slot: usize, alloc: bool, child_pri: u8) -> Result<Option<SectorIdx>> {
        let mut di = self.disk.lock().unwrap();
        let sector = di.blocks[slot];
        if sector != 0 {
            return Ok(Some(sector));
        }
        if !alloc {
            return Ok(None);
        }
        let sector = self.store.free_map.allocate(1)?;
        self.store.cache.add(sector, child_pri);
        di.blocks[slot] = sector;
        self.store.write_table(self.inum, &di);
        Ok(Some(sector))
    }

    /// Resolves (and with `alloc`, populates) the `entry`-th pointer inside
    /// index sector `from`.
    ///
    /// The allocation path locks `from` in the cache for the read-check-
    /// write sequence: two writers racing on the same pointer would
    /// otherwise allocate two different sectors for it.
    fn fix_child(
        &self,
        from: SectorIdx,
        entry: usize,
        alloc: bool,
        child_pri: u8,
    ) -> Result<Option<SectorIdx>> {
        let cache = &self.store.cache;
        let ofs = entry * 4;
        if !alloc {
            let mut bytes = [0u8; 4];
            cache.read(from, &mut bytes, ofs, PRI_META);
            let child = SectorIdx::from_ne_bytes(bytes);
            return Ok((child != 0).then_some(child));
        }

        cache.lock(from);
        let mut bytes = [0u8; 4];
        cache.read(from, &mut bytes, ofs, PRI_META);
        let mut child = SectorIdx::from_ne_bytes(bytes);
        if child == 0 {
            child = match self.store.free_map.allocate(1) {
                Ok(sector) => sector,
                Err(err) => {
                    cache.unlock(from);
                    return Err(err);
                }
            };
            cache.add(child, child_pri);
            cache.write(from, &child.to_ne_bytes(), ofs, PRI_META);
        }
        cache.unlock(from);
        Ok(Some(child))
    }
}

impl Drop for InodeHandle {
    fn drop(&mut self) {
        {
            let mut table = self.store.open_inodes.lock().unwrap();
            // A racing open() may already have replaced our table entry
            // with a fresh handle; only reap the entry if it is dead.
            let dead = table
                .get(&self.inum)
                .is_some_and(|weak| weak.strong_count() == 0);
            if dead {
                table.remove(&self.inum);
            }
        }
        if self.removed.load(Ordering::Acquire) {
            let di = *self.disk.lock().unwrap();
            debug!("inode {}: last close of removed inode, releasing", self.inum);
            self.store.release_sectors(&di);
            self.store.release_inumber(self.inum);
        }
    }
}
