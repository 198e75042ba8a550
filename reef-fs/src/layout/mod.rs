//! On-disk data structures: the packed inode record and the directory
//! entry, together with the block-index arithmetic for the three
//! indirection tiers.

mod dir_entry;
mod inode;

pub use dir_entry::DirEntry;
pub use inode::{BlockPath, DiskInode, DID_LIMIT, DIRECT_LIMIT, FANOUT, SID_LIMIT};
pub(crate) use inode::MAX_INUMS;
