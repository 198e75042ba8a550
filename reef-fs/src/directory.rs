//! Directory operations.
//!
//! A directory is an inode with `is_dir` set whose byte content is an array
//! of fixed-size [`DirEntry`] records. Every operation runs under the
//! inode's reentrant directory lock, so `add` and `remove` can call
//! `lookup` internally without deadlocking.
//!
//! Every directory holds `.` and `..` entries pointing at itself and its
//! parent; the root's `..` points back at the root. `readdir` skips both.

use std::sync::{Arc, Mutex as StdMutex};

use log::debug;

use crate::inode::{InodeHandle, InodeStore};
use crate::layout::DirEntry;
use crate::{FsError, Inum, Result, ROOT_INUM};

pub struct Directory {
    inode: Arc<InodeHandle>,
    /// Byte cursor for `read_next`; per directory handle, not per inode.
    pos: StdMutex<u32>,
}

impl Directory {
    /// Wraps an open inode as a directory.
    pub fn open(inode: Arc<InodeHandle>) -> Result<Self> {
        if !inode.is_dir() {
            return Err(FsError::NotADirectory);
        }
        Ok(Self {
            inode,
            pos: StdMutex::new(0),
        })
    }

    pub fn open_root(store: &Arc<InodeStore>) -> Result<Self> {
        Self::open(store.open(ROOT_INUM)?)
    }

    /// A fresh handle on the same directory, with its own cursor.
    pub fn reopen(&self) -> Self {
        Self {
            inode: Arc::clone(&self.inode),
            pos: StdMutex::new(0),
        }
    }

    pub fn inode(&self) -> &Arc<InodeHandle> {
        &self.inode
    }

    /// Creates a directory inode for `inum` and seeds it with `.` and `..`.
    pub fn create_on_disk(store: &Arc<InodeStore>, inum: Inum, parent: Inum) -> Result<()> {
        store.create(inum, 0, true);
        let dir = Self::open(store.open(inum)?)?;
        dir.add(".", inum)?;
        dir.add("..", parent)?;
        debug!("directory inode {inum} created under {parent}");
        Ok(())
    }

    /// Finds `name` in this directory. Case-sensitive, exact byte match.
    pub fn lookup(&self, name: &str) -> Result<Inum> {
        let _guard = self.inode.dir_lock.lock();
        if self.inode.is_removed() {
            return Err(FsError::Stale);
        }
        self.find(name)
            .map(|(entry, _)| entry.inum)
            .ok_or(FsError::NotFound)
    }

    /// Adds an entry binding `name` to `inum`, reusing an erased slot when
    /// one exists.
    pub fn add(&self, name: &str, inum: Inum) -> Result<()> {
        if !DirEntry::valid_name(name) {
            return Err(FsError::InvalidName);
        }
        let _guard = self.inode.dir_lock.lock();
        if self.inode.is_removed() {
            return Err(FsError::Stale);
        }
        if self.find(name).is_some() {
            return Err(FsError::NameInUse);
        }

        // First erased slot, or end of file if every slot is live.
        let mut ofs = 0;
        while let Some(entry) = self.entry_at(ofs) {
            if !entry.in_use {
                break;
            }
            ofs += DirEntry::SIZE as u32;
        }

        let entry = DirEntry::new(name, inum);
        if self.inode.write_at(entry.as_bytes(), ofs) != DirEntry::SIZE {
            return Err(FsError::NoFreeSector);
        }
        Ok(())
    }

    /// Removes the entry for `name` and marks its inode for deletion.
    /// Refuses to remove a non-empty directory.
    pub fn remove(&self, store: &Arc<InodeStore>, name: &str) -> Result<()> {
        if name == "." || name == ".." {
            return Err(FsError::InvalidName);
        }
        let _guard = self.inode.dir_lock.lock();
        let (mut entry, ofs) = self.find(name).ok_or(FsError::NotFound)?;

        let target = store.open(entry.inum)?;
        if target.is_dir() {
            let target_dir = Directory::open(Arc::clone(&target))?;
            if !target_dir.is_empty() {
                return Err(FsError::DirNotEmpty);
            }
        }

        entry.in_use = false;
        if self.inode.write_at(entry.as_bytes(), ofs) != DirEntry::SIZE {
            return Err(FsError::NoFreeSector);
        }
        target.remove();
        debug!("removed '{name}' (inum {})", entry.inum);
        Ok(())
    }

    /// Yields the next entry name past the handle's cursor, skipping `.`
    /// and `..`. Returns `None` at the end of the directory.
    pub fn read_next(&self) -> Option<String> {
        let _guard = self.inode.dir_lock.lock();
        let mut pos = self.pos.lock().unwrap();
        while let Some(entry) = self.entry_at(*pos) {
            *pos += DirEntry::SIZE as u32;
            if entry.in_use && entry.name() != "." && entry.name() != ".." {
                return Some(entry.name().to_string());
            }
        }
        None
    }

    /// Whether the directory holds no live entries besides `.` and `..`.
    pub fn is_empty(&self) -> bool {
        let _guard = self.inode.dir_lock.lock();
        let mut ofs = 0;
        while let Some(entry) = self.entry_at(ofs) {
            if entry.in_use && entry.name() != "." && entry.name() != ".." {
                return false;
            }
            ofs += DirEntry::SIZE as u32;
        }
        true
    }

    fn find(&self, name: &str) -> Option<(DirEntry, u32)> {
        let mut ofs = 0;
        while let Some(entry) = self.entry_at(ofs) {
            if entry.matches(name) {
                return Some((entry, ofs));
            }
            ofs += DirEntry::SIZE as u32;
        }
        None
    }

    fn entry_at(&self, ofs: u32) -> Option<DirEntry> {
        let mut entry = DirEntry::default();
        (self.inode.read_at(entry.as_bytes_mut(), ofs) == DirEntry::SIZE).then_some(entry)
    }
}
