//! Host-side plumbing for `reef-fs` images: a file-backed block device.

#[cfg(test)]
mod tests;

use std::fs::{File, OpenOptions};
use std::io;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Mutex;

use reef_fs::{BlockDevice, SECTOR_SIZE};

/// A disk image on the host filesystem, one sector per 512-byte chunk.
pub struct BlockFile(pub Mutex<File>);

impl BlockFile {
    /// Opens an existing image.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self(Mutex::new(file)))
    }

    /// Creates (or truncates) an image of `sectors` sectors.
    pub fn create(path: &Path, sectors: u32) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(sectors as u64 * SECTOR_SIZE as u64)?;
        Ok(Self(Mutex::new(file)))
    }
}

impl BlockDevice for BlockFile {
    fn read_sector(&self, idx: u32, buf: &mut [u8; SECTOR_SIZE]) {
        let mut file = self.0.lock().unwrap();
        file.seek(SeekFrom::Start(idx as u64 * SECTOR_SIZE as u64))
            .expect("seeking error");
        file.read_exact(buf).expect("not a complete sector");
    }

    fn write_sector(&self, idx: u32, buf: &[u8; SECTOR_SIZE]) {
        let mut file = self.0.lock().unwrap();
        file.seek(SeekFrom::Start(idx as u64 * SECTOR_SIZE as u64))
            .expect("seeking error");
        file.write_all(buf).expect("not a complete sector");
    }

    fn sector_count(&self) -> u32 {
        let file = self.0.lock().unwrap();
        (file.metadata().expect("image metadata").len() / SECTOR_SIZE as u64) as u32
    }
}
