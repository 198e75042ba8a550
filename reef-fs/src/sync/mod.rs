//! Blocking synchronization primitives the filesystem core is built on.
//!
//! These complement `spin::Mutex` (used for short critical sections that
//! never sleep) with primitives that can suspend the calling thread: the
//! slot read/write lock with promotion and demotion, a counting semaphore
//! for the prefetch queue, and a reentrant mutex for directory operations.

mod reentrant;
mod rwlock;
mod semaphore;

pub use reentrant::{ReentrantGuard, ReentrantLock};
pub use rwlock::RwLock;
pub use semaphore::Semaphore;
