//! Buffer cache: a fixed array of sector-sized slots between the filesystem
//! and the block device.
//!
//! Slots are indexed by two maps keyed on sector number: `active` holds hot
//! sectors, `closed` holds sectors whose last user has let go of them. A
//! closed slot still has valid contents and is revived on re-access, but it
//! is the first pick for eviction. Eviction otherwise runs a clock sweep
//! over the slots with a multi-level access counter, so high-priority
//! sectors (inode table, index sectors) survive several sweeps.
//!
//! Two worker threads run for the lifetime of the cache: a write-back loop
//! that flushes dirty slots every `flush_period`, and a prefetch loop that
//! drains a semaphored queue of read-ahead requests.
//!
//! The free-map bitmap is larger than a sector and pinned in memory, so it
//! bypasses the slots entirely: it is registered as an *external extent*
//! and written back by the same flush loop.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex as StdMutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, trace};
use spin::Mutex as SpinMutex;

use crate::sync::{RwLock, Semaphore};
use crate::{BlockDevice, SectorIdx, SECTOR_SIZE};

/// Number of cache slots.
pub const NUM_SLOTS: usize = 64;

/// Prefetch requests beyond this bound are silently dropped.
const MAX_PENDING_FETCHES: usize = 64;

/// Sector number of a slot that has never been filled.
const NO_SECTOR: SectorIdx = SectorIdx::MAX;

struct Slot {
    lock: RwLock,
    sector: AtomicU32,
    accessed: AtomicU8,
    dirty: AtomicBool,
    data: SlotData,
}

struct SlotData(core::cell::UnsafeCell<[u8; SECTOR_SIZE]>);

// Access to the data buffer is serialized by the slot's rwlock.
unsafe impl Sync for SlotData {}

impl Slot {
    fn new() -> Self {
        Self {
            lock: RwLock::new(),
            sector: AtomicU32::new(NO_SECTOR),
            accessed: AtomicU8::new(0),
            dirty: AtomicBool::new(false),
            data: SlotData(core::cell::UnsafeCell::new([0; SECTOR_SIZE])),
        }
    }

    /// Caller must hold the slot's read or write lock.
    unsafe fn data(&self) -> &[u8; SECTOR_SIZE] {
        &*self.data.0.get()
    }

    /// Caller must hold the slot's write lock.
    #[allow(clippy::mut_from_ref)]
    unsafe fn data_mut(&self) -> &mut [u8; SECTOR_SIZE] {
        &mut *self.data.0.get()
    }
}

/// How a freshly reserved slot gets its contents.
enum Fill {
    /// Read the sector from the device (the normal miss path).
    Device,
    /// Zero the buffer without touching the device (`add`).
    Zero,
}

struct CacheIndex {
    /// Hot sectors, keyed by sector number, valued by slot index.
    active: HashMap<SectorIdx, usize>,
    /// Cold sectors: contents valid, preferred for eviction.
    closed: HashMap<SectorIdx, usize>,
    /// Slots that have never held a sector.
    free: Vec<usize>,
    /// Clock hand for the eviction sweep.
    hand: usize,
}

/// A contiguous run of sectors pinned in memory outside the cache slots.
///
/// The flush loop writes it back when dirty; it never occupies a slot.
pub struct ExternalExtent {
    start: SectorIdx,
    bytes: SpinMutex<Vec<u8>>,
    dirty: AtomicBool,
}

impl ExternalExtent {
    /// An extent of `len` bytes starting at sector `start`. `len` must be a
    /// sector multiple.
    pub fn new(start: SectorIdx, len: usize) -> Arc<Self> {
        assert_eq!(len % SECTOR_SIZE, 0);
        Arc::new(Self {
            start,
            bytes: SpinMutex::new(vec![0; len]),
            dirty: AtomicBool::new(false),
        })
    }

    pub fn start(&self) -> SectorIdx {
        self.start
    }

    pub fn bytes(&self) -> &SpinMutex<Vec<u8>> {
        &self.bytes
    }
}

pub struct BufferCache {
    device: Arc<dyn BlockDevice>,
    index: SpinMutex<CacheIndex>,
    slots: Vec<Slot>,
    fetch_queue: SpinMutex<VecDeque<SectorIdx>>,
    fetch_sem: Semaphore,
    externals: SpinMutex<Vec<Arc<ExternalExtent>>>,
    shutdown: AtomicBool,
    flush_gate: StdMutex<bool>,
    flush_cond: Condvar,
    flush_period: Duration,
    workers: StdMutex<Vec<JoinHandle<()>>>,
}

impl BufferCache {
    /// Creates the cache and launches the write-back and prefetch loops.
    pub fn new(device: Arc<dyn BlockDevice>, flush_period: Duration) -> Arc<Self> {
        let cache = Arc::new(Self {
            device,
            index: SpinMutex::new(CacheIndex {
                active: HashMap::with_capacity(NUM_SLOTS),
                closed: HashMap::new(),
                free: (0..NUM_SLOTS).rev().collect(),
                hand: 0,
            }),
            slots: (0..NUM_SLOTS).map(|_| Slot::new()).collect(),
            fetch_queue: SpinMutex::new(VecDeque::new()),
            fetch_sem: Semaphore::new(0),
            externals: SpinMutex::new(Vec::new()),
            shutdown: AtomicBool::new(false),
            flush_gate: StdMutex::new(false),
            flush_cond: Condvar::new(),
            flush_period,
            workers: StdMutex::new(Vec::new()),
        });

        let flusher = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || cache.flush_loop())
        };
        let fetcher = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || cache.fetch_loop())
        };
        cache.workers.lock().unwrap().extend([flusher, fetcher]);

        cache
    }

    /// Copies `dst.len()` bytes from offset `ofs` of `sector` into `dst`,
    /// reading the sector from the device first on a miss.
    pub fn read(&self, sector: SectorIdx, dst: &mut [u8], ofs: usize, priority: u8) {
        assert!(ofs + dst.len() <= SECTOR_SIZE);
        let slot = self.slot_for_read(sector);
        // Safety: read lock held.
        dst.copy_from_slice(unsafe { &slot.data()[ofs..ofs + dst.len()] });
        slot.accessed.store(priority, Ordering::Relaxed);
        slot.lock.read_unlock();
    }

    /// Copies `src` into `sector` at offset `ofs`, marking the slot dirty.
    pub fn write(&self, sector: SectorIdx, src: &[u8], ofs: usize, priority: u8) {
        assert!(ofs + src.len() <= SECTOR_SIZE);
        let slot = self.obtain_write(sector, Fill::Device);
        // Safety: write lock held.
        unsafe { slot.data_mut()[ofs..ofs + src.len()].copy_from_slice(src) };
        slot.dirty.store(true, Ordering::Release);
        slot.accessed.store(priority, Ordering::Relaxed);
        slot.lock.write_unlock();
    }

    /// Takes the writer lock on the slot backing `sector` and holds it until
    /// [`unlock`](Self::unlock): reads and writes by the same thread are
    /// atomic as a group, and the sector cannot be evicted meanwhile.
    /// Re-entrant no-op if the calling thread already holds the slot.
    pub fn lock(&self, sector: SectorIdx) {
        self.obtain_write(sector, Fill::Device);
    }

    pub fn unlock(&self, sector: SectorIdx) {
        let i = {
            let idx = self.index.lock();
            lookup(&idx, sector).expect("unlock of uncached sector")
        };
        let slot = &self.slots[i];
        debug_assert!(slot.lock.holds_write());
        slot.lock.write_unlock();
    }

    /// Materializes a zeroed, dirty slot for `sector` without reading the
    /// device. Used when a sector is freshly allocated to a file: its disk
    /// contents are uninitialized and must never be observed.
    pub fn add(&self, sector: SectorIdx, priority: u8) {
        let slot = self.obtain_write(sector, Fill::Zero);
        // A hit means a stale copy of a reallocated sector; zero it too.
        // Safety: write lock held.
        unsafe { slot.data_mut().fill(0) };
        slot.dirty.store(true, Ordering::Release);
        slot.accessed.store(priority, Ordering::Relaxed);
        slot.lock.write_unlock();
    }

    /// Marks `sector` cold: still valid, evicted before other candidates.
    pub fn close(&self, sector: SectorIdx) {
        let mut idx = self.index.lock();
        if let Some(i) = idx.active.remove(&sector) {
            idx.closed.insert(sector, i);
        }
    }

    /// Like [`close`](Self::close), but drops the contents: the dirty flag
    /// is cleared so a freed sector is never written back to the device.
    pub fn remove(&self, sector: SectorIdx) {
        let mut idx = self.index.lock();
        if let Some(i) = idx.active.remove(&sector) {
            idx.closed.insert(sector, i);
        }
        if let Some(&i) = idx.closed.get(&sector) {
            self.slots[i].dirty.store(false, Ordering::Release);
        }
    }

    /// Queues a best-effort asynchronous fetch of `sector`. Dropped
    /// silently when the queue is saturated.
    pub fn fetch_async(&self, sector: SectorIdx) {
        {
            let mut queue = self.fetch_queue.lock();
            if queue.len() >= MAX_PENDING_FETCHES {
                trace!("prefetch of sector {sector} dropped: queue full");
                return;
            }
            queue.push_back(sector);
        }
        self.fetch_sem.up();
    }

    /// Reads an extent from the device into its pinned buffer and registers
    /// it for periodic write-back.
    pub fn read_external(&self, ext: &Arc<ExternalExtent>) {
        {
            let mut bytes = ext.bytes.lock();
            let mut buf = [0u8; SECTOR_SIZE];
            for (n, chunk) in bytes.chunks_mut(SECTOR_SIZE).enumerate() {
                self.device.read_sector(ext.start + n as u32, &mut buf);
                chunk.copy_from_slice(&buf);
            }
        }
        self.externals.lock().push(Arc::clone(ext));
    }

    /// Registers an extent whose contents were built in memory (a freshly
    /// formatted free map), marking it dirty for the next flush.
    pub fn add_external(&self, ext: &Arc<ExternalExtent>) {
        ext.dirty.store(true, Ordering::Release);
        self.externals.lock().push(Arc::clone(ext));
    }

    /// Marks the extent starting at `start` for write-back.
    pub fn dirty_external(&self, start: SectorIdx) {
        let externals = self.externals.lock();
        if let Some(ext) = externals.iter().find(|e| e.start == start) {
            ext.dirty.store(true, Ordering::Release);
        }
    }

    /// Writes the extent back if dirty and unregisters it.
    pub fn free_external(&self, start: SectorIdx) {
        let ext = {
            let mut externals = self.externals.lock();
            match externals.iter().position(|e| e.start == start) {
                Some(pos) => externals.swap_remove(pos),
                None => return,
            }
        };
        if ext.dirty.swap(false, Ordering::AcqRel) {
            self.write_extent(&ext);
        }
    }

    /// Writes every dirty slot and extent to the device and marks them
    /// clean. Holding a slot's *reader* lock is enough: it keeps writers
    /// and eviction out while the sector goes to the device.
    pub fn flush_all(&self) {
        let mut flushed = 0usize;
        for slot in &self.slots {
            slot.lock.read_lock();
            if slot.dirty.load(Ordering::Acquire) {
                let sector = slot.sector.load(Ordering::Relaxed);
                // Safety: read lock held; writers are excluded.
                self.device.write_sector(sector, unsafe { slot.data() });
                slot.dirty.store(false, Ordering::Release);
                flushed += 1;
            }
            slot.lock.read_unlock();
        }

        let externals: Vec<_> = self.externals.lock().iter().cloned().collect();
        for ext in externals {
            if ext.dirty.swap(false, Ordering::AcqRel) {
                self.write_extent(&ext);
                flushed += 1;
            }
        }
        if flushed > 0 {
            debug!("write-back: {flushed} dirty entries flushed");
        }
    }

    /// Flushes everything and stops the worker threads.
    pub fn destroy(&self) {
        self.flush_all();
        self.shutdown.store(true, Ordering::Release);
        *self.flush_gate.lock().unwrap() = true;
        self.flush_cond.notify_all();
        self.fetch_sem.up();
        for worker in self.workers.lock().unwrap().drain(..) {
            let _ = worker.join();
        }
    }
}

impl BufferCache {
    /// Returns the slot for `sector` with the read lock held, filling it
    /// from the device on a miss.
    fn slot_for_read(&self, sector: SectorIdx) -> &Slot {
        loop {
            let mut idx = self.index.lock();
            if let Some(i) = lookup_revive(&mut idx, sector) {
                let slot = &self.slots[i];
                drop(idx);
                slot.lock.read_lock();
                if slot.sector.load(Ordering::Relaxed) != sector {
                    // Evicted between lookup and lock; retry.
                    slot.lock.read_unlock();
                    continue;
                }
                return slot;
            }
            let (i, old) = self.reserve(idx, sector);
            let slot = &self.slots[i];
            self.retire(slot, old);
            // Safety: write lock held since reserve().
            self.device.read_sector(sector, unsafe { slot.data_mut() });
            slot.lock.demote();
            return slot;
        }
    }

    /// Returns the slot for `sector` with the write lock held.
    ///
    /// The hit path starts out as a reader and promotes once it has decided
    /// to mutate; a non-atomic promotion (another promoter was ahead of us)
    /// forces revalidation of the slot's identity.
    fn obtain_write(&self, sector: SectorIdx, fill: Fill) -> &Slot {
        loop {
            let mut idx = self.index.lock();
            if let Some(i) = lookup_revive(&mut idx, sector) {
                let slot = &self.slots[i];
                drop(idx);
                slot.lock.read_lock();
                if slot.sector.load(Ordering::Relaxed) != sector {
                    slot.lock.read_unlock();
                    continue;
                }
                if !slot.lock.promote() && slot.sector.load(Ordering::Relaxed) != sector {
                    slot.lock.write_unlock();
                    continue;
                }
                return slot;
            }
            let (i, old) = self.reserve(idx, sector);
            let slot = &self.slots[i];
            self.retire(slot, old);
            match fill {
                // Safety: write lock held since reserve().
                Fill::Device => self.device.read_sector(sector, unsafe { slot.data_mut() }),
                Fill::Zero => unsafe { slot.data_mut().fill(0) },
            }
            return slot;
        }
    }

    /// Claims a slot for `sector` and maps it as active. Returns the slot
    /// index (write lock held) and the sector it previously backed.
    ///
    /// Consumes the index guard: the write-back and device read that follow
    /// a miss happen with the index lock released, holding only the slot's
    /// writer lock.
    fn reserve(
        &self,
        mut idx: spin::MutexGuard<'_, CacheIndex>,
        sector: SectorIdx,
    ) -> (usize, SectorIdx) {
        let i = match idx.free.pop() {
            Some(i) => {
                let locked = self.slots[i].lock.try_write_lock();
                debug_assert!(locked, "free slot was locked");
                i
            }
            None => self.evict_locked(&mut idx),
        };
        let old = self.slots[i].sector.swap(sector, Ordering::Relaxed);
        idx.active.insert(sector, i);
        (i, old)
    }

    /// Picks a victim slot with its write lock held and unmaps it.
    ///
    /// Closed entries go first; otherwise a clock sweep decrements each
    /// lockable slot's access counter and takes the first that reaches
    /// zero. Slots whose lock cannot be taken without blocking are skipped.
    fn evict_locked(&self, idx: &mut CacheIndex) -> usize {
        let closed: Vec<(SectorIdx, usize)> = idx.closed.iter().map(|(&s, &i)| (s, i)).collect();
        for (sec, i) in closed {
            if self.slots[i].lock.try_write_lock() {
                idx.closed.remove(&sec);
                trace!("evicting closed sector {sec}");
                return i;
            }
        }

        loop {
            idx.hand = (idx.hand + 1) % NUM_SLOTS;
            let slot = &self.slots[idx.hand];
            if !slot.lock.try_write_lock() {
                continue;
            }
            if slot.accessed.load(Ordering::Relaxed) > 0 {
                slot.accessed.fetch_sub(1, Ordering::Relaxed);
                slot.lock.write_unlock();
                continue;
            }
            let sec = slot.sector.load(Ordering::Relaxed);
            idx.active.remove(&sec);
            idx.closed.remove(&sec);
            trace!("clock hand evicting sector {sec}");
            return idx.hand;
        }
    }

    /// Writes back the previous occupant of a just-reserved slot, if dirty.
    /// Runs without the index lock; only the slot's writer lock is held.
    fn retire(&self, slot: &Slot, old: SectorIdx) {
        if old != NO_SECTOR && slot.dirty.swap(false, Ordering::AcqRel) {
            // Safety: write lock held.
            self.device.write_sector(old, unsafe { slot.data() });
        }
    }

    fn write_extent(&self, ext: &ExternalExtent) {
        let bytes = ext.bytes.lock();
        let mut buf = [0u8; SECTOR_SIZE];
        for (n, chunk) in bytes.chunks(SECTOR_SIZE).enumerate() {
            buf.copy_from_slice(chunk);
            self.device.write_sector(ext.start + n as u32, &buf);
        }
    }

    fn flush_loop(&self) {
        loop {
            let gate = self.flush_gate.lock().unwrap();
            let (gate, _) = self
                .flush_cond
                .wait_timeout(gate, self.flush_period)
                .unwrap();
            if *gate {
                break;
            }
            drop(gate);
            self.flush_all();
        }
    }

    fn fetch_loop(&self) {
        loop {
            self.fetch_sem.down();
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }
            let Some(sector) = self.fetch_queue.lock().pop_front() else {
                continue;
            };
            trace!("prefetching sector {sector}");
            let slot = self.slot_for_read(sector);
            slot.accessed.store(crate::PRI_NORMAL, Ordering::Relaxed);
            slot.lock.read_unlock();
        }
    }
}

/// Looks `sector` up in either map without changing its temperature.
fn lookup(idx: &CacheIndex, sector: SectorIdx) -> Option<usize> {
    idx.active
        .get(&sector)
        .or_else(|| idx.closed.get(&sector))
        .copied()
}

/// Looks `sector` up, moving a closed entry back to active on a hit.
fn lookup_revive(idx: &mut CacheIndex, sector: SectorIdx) -> Option<usize> {
    if let Some(&i) = idx.active.get(&sector) {
        return Some(i);
    }
    if let Some(i) = idx.closed.remove(&sector) {
        idx.active.insert(sector, i);
        return Some(i);
    }
    None
}
