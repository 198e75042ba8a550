use std::sync::{Condvar, Mutex};
use std::thread::{self, ThreadId};

/// A raw read/write lock: multiple readers XOR one writer, with *promotion*
/// of a reader to writer and *demotion* back.
///
/// This is not an RAII lock; acquisition and release are separate calls so a
/// caller can hold a slot across function boundaries (`BufferCache::lock` /
/// `unlock`). Two properties the buffer cache depends on:
///
/// - The write side is recursive: the owning thread may re-enter
///   `write_lock` (and may take `read_lock` as a no-op) while it holds the
///   lock. This is what makes `cache.write(sector, ..)` safe while the same
///   thread holds `cache.lock(sector)`.
/// - At most one promotion is in flight. A second promoter falls back to
///   releasing its read lock and acquiring the write lock from scratch;
///   `promote` returns `false` in that case so the caller knows the
///   protected state may have changed underneath it.
pub struct RwLock {
    state: Mutex<State>,
    cond: Condvar,
}

#[derive(Default)]
struct State {
    readers: usize,
    writer: Option<ThreadId>,
    depth: usize,
    upgrading: bool,
}

impl RwLock {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(State {
                readers: 0,
                writer: None,
                depth: 0,
                upgrading: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Blocks until a shared lock is held. No-op (recorded as a nested
    /// acquisition) if the current thread already holds the write side.
    pub fn read_lock(&self) {
        let me = thread::current().id();
        let mut s = self.state.lock().unwrap();
        if s.writer == Some(me) {
            s.depth += 1;
            return;
        }
        while s.writer.is_some() || s.upgrading {
            s = self.cond.wait(s).unwrap();
        }
        s.readers += 1;
    }

    pub fn read_unlock(&self) {
        let me = thread::current().id();
        let mut s = self.state.lock().unwrap();
        if s.writer == Some(me) {
            debug_assert!(s.depth > 1);
            s.depth -= 1;
            return;
        }
        debug_assert!(s.readers > 0);
        s.readers -= 1;
        if s.readers == 0 {
            self.cond.notify_all();
        }
    }

    /// Blocks until the exclusive lock is held. Recursive for the owner.
    pub fn write_lock(&self) {
        let me = thread::current().id();
        let mut s = self.state.lock().unwrap();
        if s.writer == Some(me) {
            s.depth += 1;
            return;
        }
        while s.writer.is_some() || s.readers > 0 || s.upgrading {
            s = self.cond.wait(s).unwrap();
        }
        s.writer = Some(me);
        s.depth = 1;
    }

    /// Non-blocking `write_lock`. Unlike `write_lock` it refuses to
    /// recurse: a lock already held by the calling thread reports `false`,
    /// so an eviction sweep can never claim a slot its own caller has
    /// pinned.
    pub fn try_write_lock(&self) -> bool {
        let me = thread::current().id();
        let mut s = self.state.lock().unwrap();
        if s.writer.is_none() && s.readers == 0 && !s.upgrading {
            s.writer = Some(me);
            s.depth = 1;
            return true;
        }
        false
    }

    pub fn write_unlock(&self) {
        let me = thread::current().id();
        let mut s = self.state.lock().unwrap();
        assert_eq!(s.writer, Some(me), "write_unlock by non-owner");
        s.depth -= 1;
        if s.depth == 0 {
            s.writer = None;
            self.cond.notify_all();
        }
    }

    /// Whether the calling thread holds the write side.
    pub fn holds_write(&self) -> bool {
        self.state.lock().unwrap().writer == Some(thread::current().id())
    }

    /// Upgrades a held read lock to the write lock.
    ///
    /// Returns `true` if the upgrade was atomic (no writer intervened).
    /// Returns `false` if another promotion was already pending: the read
    /// lock was released and the write lock acquired the slow way, so the
    /// caller must revalidate whatever it read under the read lock.
    pub fn promote(&self) -> bool {
        let me = thread::current().id();
        let mut s = self.state.lock().unwrap();
        if s.writer == Some(me) {
            // lock(sector) is already held; the read side was nested.
            return true;
        }
        debug_assert!(s.readers > 0);
        if s.upgrading {
            s.readers -= 1;
            if s.readers == 0 {
                self.cond.notify_all();
            }
            drop(s);
            self.write_lock();
            return false;
        }
        s.upgrading = true;
        s.readers -= 1;
        while s.writer.is_some() || s.readers > 0 {
            s = self.cond.wait(s).unwrap();
        }
        s.upgrading = false;
        s.writer = Some(me);
        s.depth = 1;
        true
    }

    /// Downgrades the held write lock to a read lock, admitting other
    /// readers immediately. The write side must not be held recursively.
    pub fn demote(&self) {
        let me = thread::current().id();
        let mut s = self.state.lock().unwrap();
        assert_eq!(s.writer, Some(me), "demote by non-owner");
        assert_eq!(s.depth, 1, "demote of a recursively held lock");
        s.writer = None;
        s.depth = 0;
        s.readers += 1;
        self.cond.notify_all();
    }
}

impl Default for RwLock {
    fn default() -> Self {
        Self::new()
    }
}
