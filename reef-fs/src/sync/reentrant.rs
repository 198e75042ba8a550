use std::sync::{Condvar, Mutex};
use std::thread::{self, ThreadId};

/// A mutex the owning thread may acquire recursively.
///
/// Directory operations need this: `add` and `remove` call `lookup`
/// internally while already holding the directory's lock, so the lock
/// records the owning thread and counts nested acquisitions.
pub struct ReentrantLock {
    state: Mutex<Owner>,
    cond: Condvar,
}

#[derive(Default)]
struct Owner {
    holder: Option<ThreadId>,
    depth: usize,
}

/// Releases one level of the lock on drop.
pub struct ReentrantGuard<'a> {
    lock: &'a ReentrantLock,
}

impl ReentrantLock {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(Owner {
                holder: None,
                depth: 0,
            }),
            cond: Condvar::new(),
        }
    }

    pub fn lock(&self) -> ReentrantGuard<'_> {
        let me = thread::current().id();
        let mut s = self.state.lock().unwrap();
        while s.holder.is_some() && s.holder != Some(me) {
            s = self.cond.wait(s).unwrap();
        }
        s.holder = Some(me);
        s.depth += 1;
        ReentrantGuard { lock: self }
    }
}

impl Default for ReentrantLock {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ReentrantGuard<'_> {
    fn drop(&mut self) {
        let mut s = self.lock.state.lock().unwrap();
        debug_assert_eq!(s.holder, Some(thread::current().id()));
        s.depth -= 1;
        if s.depth == 0 {
            s.holder = None;
            self.lock.cond.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn nested_acquire_by_owner() {
        let lock = ReentrantLock::new();
        let _a = lock.lock();
        let _b = lock.lock();
    }

    #[test]
    fn excludes_other_threads() {
        let lock = Arc::new(ReentrantLock::new());
        let guard = lock.lock();
        let lock2 = Arc::clone(&lock);
        let t = thread::spawn(move || {
            let _g = lock2.lock();
        });
        drop(guard);
        t.join().unwrap();
    }
}
