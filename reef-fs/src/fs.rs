//! The filesystem object: owns the cache, free map and inode store, and
//! exposes the path-level API a syscall layer consumes.
//!
//! The bool/Option flavor of the public calls matches what a syscall
//! dispatcher wants to relay; the `try_*` variants underneath report the
//! precise [`FsError`] and are what the tests exercise.

use std::sync::Arc;
use std::time::Duration;

use log::info;

use crate::cache::BufferCache;
use crate::directory::Directory;
use crate::file::FileHandle;
use crate::free_map::FreeMap;
use crate::inode::InodeStore;
use crate::{path, BlockDevice, Result, INODE_TABLE_SECTORS, PRI_INODE, ROOT_INUM};

/// Tunables that are fixed for the life of a mount.
#[derive(Debug, Clone)]
pub struct FsOptions {
    /// Cadence of the background write-back loop.
    pub flush_period: Duration,
}

impl Default for FsOptions {
    fn default() -> Self {
        Self {
            flush_period: Duration::from_secs(30),
        }
    }
}

pub struct Filesystem {
    cache: Arc<BufferCache>,
    free_map: Arc<FreeMap>,
    store: Arc<InodeStore>,
}

impl Filesystem {
    /// Mounts the filesystem on `device`. With `format`, writes a fresh
    /// filesystem first: an empty inode table, a free map with the
    /// reserved region marked, and a root directory.
    pub fn init(device: Arc<dyn BlockDevice>, format: bool) -> Result<Self> {
        Self::init_with(device, format, FsOptions::default())
    }

    pub fn init_with(
        device: Arc<dyn BlockDevice>,
        format: bool,
        options: FsOptions,
    ) -> Result<Self> {
        let sector_count = device.sector_count();
        let cache = BufferCache::new(device, options.flush_period);

        let free_map = if format {
            FreeMap::format(Arc::clone(&cache), sector_count)
        } else {
            FreeMap::open(Arc::clone(&cache), sector_count)
        };
        let store = InodeStore::new(Arc::clone(&cache), Arc::clone(&free_map));

        if format {
            for sector in 0..INODE_TABLE_SECTORS {
                cache.add(sector, PRI_INODE);
            }
            Directory::create_on_disk(&store, ROOT_INUM, ROOT_INUM)?;
            info!("formatted filesystem: {sector_count} sectors");
        } else {
            info!("mounted filesystem: {sector_count} sectors");
        }

        Ok(Self {
            cache,
            free_map,
            store,
        })
    }

    /// Writes all unwritten state and shuts the background loops down.
    /// Order matters: flush the slots, then write out and close the free
    /// map, then tear the cache down.
    pub fn done(self) {
        self.cache.flush_all();
        self.free_map.close();
        self.cache.destroy();
        info!("filesystem shut down");
    }

    /// Creates a file (or directory) at `path` with the given initial
    /// length. The length is a high-water mark only; no data sectors are
    /// allocated until written.
    pub fn create(&self, path: &str, initial_size: u32, is_dir: bool) -> bool {
        self.try_create(path, initial_size, is_dir).is_ok()
    }

    pub fn try_create(&self, path: &str, initial_size: u32, is_dir: bool) -> Result<()> {
        let (dir, name) = path::resolve(&self.store, path, None)?;
        let inum = self.store.assign_inumber()?;

        let populate = || -> Result<()> {
            if is_dir {
                Directory::create_on_disk(&self.store, inum, dir.inode().inum())?;
            } else {
                self.store.create(inum, initial_size, false);
            }
            dir.add(name, inum)
        };

        if let Err(err) = populate() {
            // Back out whatever the failed step left behind: dropping a
            // removed handle returns sectors and the inumber alike.
            match self.store.open(inum) {
                Ok(handle) => handle.remove(),
                Err(_) => self.store.release_inumber(inum),
            }
            return Err(err);
        }
        Ok(())
    }

    /// Opens `path`, file or directory.
    pub fn open(&self, path: &str) -> Option<FileHandle> {
        self.try_open(path).ok()
    }

    pub fn try_open(&self, path: &str) -> Result<FileHandle> {
        let (dir, name) = path::resolve(&self.store, path, None)?;
        let inum = dir.lookup(name)?;
        Ok(FileHandle::new(self.store.open(inum)?))
    }

    /// Removes `path`. Directories must be empty; the inode's resources
    /// are reclaimed when the last open handle drops.
    pub fn remove(&self, path: &str) -> bool {
        self.try_remove(path).is_ok()
    }

    pub fn try_remove(&self, path: &str) -> Result<()> {
        let (dir, name) = path::resolve(&self.store, path, None)?;
        dir.remove(&self.store, name)
    }

    /// A fresh handle on the root directory.
    pub fn root(&self) -> Result<Directory> {
        Directory::open_root(&self.store)
    }

    /// Resolves a path relative to `cwd` the way a per-process working
    /// directory would; `None` falls back to the root.
    pub fn resolve_at<'p>(
        &self,
        path: &'p str,
        cwd: Option<&Directory>,
    ) -> Result<(Directory, &'p str)> {
        path::resolve(&self.store, path, cwd)
    }

    /// Forces a write-back round outside the periodic loop.
    pub fn flush(&self) {
        self.cache.flush_all();
    }

    /// Sectors currently marked used in the free map (reserved region
    /// included). Quiescent-state bookkeeping for integrity checks.
    pub fn used_sectors(&self) -> u32 {
        self.free_map.used_count()
    }
}
