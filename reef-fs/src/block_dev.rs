//! Block device interface.
//!
//! A block device stores data in fixed-size sectors; implementing this trait
//! makes a storage backend usable by the filesystem. Implementations are
//! expected to be infallible: an I/O error leaves nothing for the layers
//! above to recover (there is no journal), so the contract is to panic.

use crate::SECTOR_SIZE;

pub trait BlockDevice: Send + Sync {
    /// Reads sector `idx` into `buf`. Panics on device failure.
    fn read_sector(&self, idx: u32, buf: &mut [u8; SECTOR_SIZE]);

    /// Writes `buf` to sector `idx`. Panics on device failure.
    fn write_sector(&self, idx: u32, buf: &[u8; SECTOR_SIZE]);

    /// Number of sectors the device exposes.
    fn sector_count(&self) -> u32;
}
