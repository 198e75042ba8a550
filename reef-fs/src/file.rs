//! Byte-addressed file handles.
//!
//! A handle pairs an open inode with a private file position. Handles on
//! the same path share the inode (and therefore the length and data) but
//! seek independently. Dropping the handle closes it; `close` exists for
//! callers that want the close to read as an action. Because `close` takes
//! the handle by value, operations on a closed handle are unrepresentable.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use crate::directory::Directory;
use crate::inode::InodeHandle;
use crate::Inum;

pub struct FileHandle {
    inode: Arc<InodeHandle>,
    /// Present iff the inode is a directory; carries the readdir cursor.
    dir: Option<Directory>,
    pos: StdMutex<u32>,
    denied: AtomicBool,
}

impl FileHandle {
    pub(crate) fn new(inode: Arc<InodeHandle>) -> Self {
        let dir = inode
            .is_dir()
            .then(|| Directory::open(Arc::clone(&inode)).expect("is_dir checked"));
        Self {
            inode,
            dir,
            pos: StdMutex::new(0),
            denied: AtomicBool::new(false),
        }
    }

    /// Reads from the current position, advancing it by the bytes read.
    /// Directory handles read 0 bytes; use [`readdir`](Self::readdir).
    pub fn read(&self, buf: &mut [u8]) -> usize {
        if self.dir.is_some() {
            return 0;
        }
        let mut pos = self.pos.lock().unwrap();
        let n = self.inode.read_at(buf, *pos);
        *pos += n as u32;
        n
    }

    /// Writes at the current position, advancing it by the bytes written.
    /// Directory handles write 0 bytes; their content belongs to the
    /// directory layer.
    pub fn write(&self, buf: &[u8]) -> usize {
        if self.dir.is_some() {
            return 0;
        }
        let mut pos = self.pos.lock().unwrap();
        let n = self.inode.write_at(buf, *pos);
        *pos += n as u32;
        n
    }

    /// Positioned read; does not move the file position.
    pub fn read_at(&self, buf: &mut [u8], ofs: u32) -> usize {
        if self.dir.is_some() {
            return 0;
        }
        self.inode.read_at(buf, ofs)
    }

    /// Positioned write; does not move the file position.
    pub fn write_at(&self, buf: &[u8], ofs: u32) -> usize {
        if self.dir.is_some() {
            return 0;
        }
        self.inode.write_at(buf, ofs)
    }

    pub fn seek(&self, pos: u32) {
        *self.pos.lock().unwrap() = pos;
    }

    pub fn tell(&self) -> u32 {
        *self.pos.lock().unwrap()
    }

    pub fn length(&self) -> u32 {
        self.inode.length()
    }

    pub fn inumber(&self) -> Inum {
        self.inode.inum()
    }

    pub fn is_dir(&self) -> bool {
        self.dir.is_some()
    }

    /// Next directory entry name, skipping `.` and `..`. `None` on a
    /// regular file or at the end of the directory.
    pub fn readdir(&self) -> Option<String> {
        self.dir.as_ref()?.read_next()
    }

    /// Blocks writes through any handle of this inode (refcounted; used
    /// while an executable is mapped). At most one deny per handle.
    pub fn deny_write(&self) {
        if !self.denied.swap(true, Ordering::AcqRel) {
            self.inode.deny_write();
        }
    }

    /// Undoes this handle's `deny_write`, if any.
    pub fn allow_write(&self) {
        if self.denied.swap(false, Ordering::AcqRel) {
            self.inode.allow_write();
        }
    }

    pub fn close(self) {}
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        if self.denied.load(Ordering::Acquire) {
            self.inode.allow_write();
        }
    }
}

impl std::fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileHandle")
            .field("inum", &self.inode.inum())
            .field("is_dir", &self.dir.is_some())
            .finish()
    }
}
