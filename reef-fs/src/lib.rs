//! `reef-fs` is a UNIX-like on-disk filesystem layered over a fixed-size
//! block device.
//!
//! On-disk layout, in sector order:
//! - Inode table: [`INODE_TABLE_SECTORS`] sectors of packed [`DiskInode`]
//!   records. Inumber 0 is the root directory and lives at sector 0, offset 0.
//! - Free map: one bit per device sector, stored in the sectors immediately
//!   after the inode table and pinned in memory while mounted.
//! - Data pool: everything else, handed out by the free map.
//!
//! The crate's layers, from bottom to top:
//! 1. Block device: sector I/O. User implemented (see [`BlockDevice`]).
//! 2. Buffer cache: fixed-slot cache with eviction, periodic write-back and
//!    prefetching. Per-slot read/write locks coordinate concurrent access.
//! 3. Free map: sector allocation bitmap.
//! 4. Inode store: on-disk inodes with direct, single-indirect and
//!    double-indirect block pointers; lazy sector allocation; a process-wide
//!    table deduplicating open handles.
//! 5. Directory / path: directory entries over directory inodes, and
//!    absolute/relative path traversal.
//! 6. [`Filesystem`]: the path-level API a syscall layer consumes.

mod block_dev;
mod cache;
mod directory;
mod error;
mod file;
mod free_map;
mod fs;
mod inode;
mod layout;
mod path;
mod sync;

pub use block_dev::BlockDevice;
pub use cache::{BufferCache, ExternalExtent};
pub use directory::Directory;
pub use error::{FsError, Result};
pub use file::FileHandle;
pub use free_map::FreeMap;
pub use fs::{Filesystem, FsOptions};
pub use inode::{InodeHandle, InodeStore};
pub use layout::{DirEntry, DiskInode, DID_LIMIT, DIRECT_LIMIT, SID_LIMIT};

/// Smallest device-addressable unit, in bytes.
pub const SECTOR_SIZE: usize = 512;

/// Index of a sector on the block device.
pub type SectorIdx = u32;

/// Persistent identity of an inode: its index in the inode table.
pub type Inum = u32;

/// Sectors reserved for the inode table, starting at sector 0.
pub const INODE_TABLE_SECTORS: u32 = 100;

/// Inumber of the root directory.
pub const ROOT_INUM: Inum = 0;

/// Maximum length of a single path component, in bytes.
pub const NAME_MAX: usize = 14;

/// Cache priority for inode-table sectors.
pub const PRI_INODE: u8 = 3;
/// Cache priority for indirect index sectors.
pub const PRI_META: u8 = 2;
/// Cache priority for file data sectors.
pub const PRI_NORMAL: u8 = 1;
