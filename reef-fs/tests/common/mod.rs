//! Shared test fixtures.
#![allow(unused)]

use std::sync::{Arc, Mutex};

use reef_fs::{BlockDevice, Filesystem, SECTOR_SIZE};

/// 2 MiB device: roomy enough for the double-indirect tests.
pub const TEST_SECTORS: usize = 4096;

/// Memory-backed block device.
pub struct RamDisk {
    sectors: Mutex<Vec<[u8; SECTOR_SIZE]>>,
}

impl RamDisk {
    pub fn new(sectors: usize) -> Arc<Self> {
        Arc::new(Self {
            sectors: Mutex::new(vec![[0; SECTOR_SIZE]; sectors]),
        })
    }

    /// Raw device bytes, bypassing the filesystem. Lets tests observe what
    /// the flush loop has (or has not) persisted.
    pub fn raw(&self, sector: u32) -> [u8; SECTOR_SIZE] {
        self.sectors.lock().unwrap()[sector as usize]
    }

    /// Whether `needle` occurs anywhere on the raw device.
    pub fn contains(&self, needle: &[u8]) -> bool {
        let sectors = self.sectors.lock().unwrap();
        sectors
            .iter()
            .any(|s| s.windows(needle.len()).any(|w| w == needle))
    }
}

impl BlockDevice for RamDisk {
    fn read_sector(&self, idx: u32, buf: &mut [u8; SECTOR_SIZE]) {
        *buf = self.sectors.lock().unwrap()[idx as usize];
    }

    fn write_sector(&self, idx: u32, buf: &[u8; SECTOR_SIZE]) {
        self.sectors.lock().unwrap()[idx as usize] = *buf;
    }

    fn sector_count(&self) -> u32 {
        self.sectors.lock().unwrap().len() as u32
    }
}

/// A freshly formatted filesystem over a new RAM disk. `RUST_LOG=debug`
/// surfaces the crate's logging during a test run.
pub fn setup() -> (Arc<RamDisk>, Filesystem) {
    let _ = env_logger::builder().is_test(true).try_init();
    let disk = RamDisk::new(TEST_SECTORS);
    let fs = Filesystem::init(disk.clone(), true).expect("format failed");
    (disk, fs)
}
