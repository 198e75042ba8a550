//! Free map: one bit per device sector.
//!
//! The bitmap is larger than a sector, so it does not live in cache slots.
//! It is pinned in memory as an external extent of the buffer cache,
//! backed by the sectors immediately after the inode table; mutations mark
//! the extent dirty and the cache's flush loop writes it back.

use std::sync::Arc;

use log::debug;

use crate::cache::{BufferCache, ExternalExtent};
use crate::{FsError, Result, SectorIdx, INODE_TABLE_SECTORS, SECTOR_SIZE};

pub struct FreeMap {
    cache: Arc<BufferCache>,
    extent: Arc<ExternalExtent>,
    sector_count: u32,
}

/// Sectors the bitmap for a `sector_count`-sector device occupies.
pub fn free_map_sectors(sector_count: u32) -> u32 {
    let bytes = sector_count.div_ceil(8);
    bytes.div_ceil(SECTOR_SIZE as u32)
}

impl FreeMap {
    /// Builds a fresh free map with the reserved region (inode table plus
    /// the bitmap itself) pre-marked used, and registers it with the cache.
    pub fn format(cache: Arc<BufferCache>, sector_count: u32) -> Arc<Self> {
        let map = Self::empty(cache, sector_count);
        let reserved = INODE_TABLE_SECTORS + free_map_sectors(sector_count);
        {
            let mut bytes = map.extent.bytes().lock();
            for sector in 0..reserved {
                set_bit(&mut bytes, sector);
            }
        }
        map.cache.add_external(&map.extent);
        debug!("free map formatted: {reserved} reserved of {sector_count} sectors");
        map
    }

    /// Reads the bitmap of an existing filesystem from the device.
    pub fn open(cache: Arc<BufferCache>, sector_count: u32) -> Arc<Self> {
        let map = Self::empty(cache, sector_count);
        map.cache.read_external(&map.extent);
        map
    }

    fn empty(cache: Arc<BufferCache>, sector_count: u32) -> Arc<Self> {
        let len = free_map_sectors(sector_count) as usize * SECTOR_SIZE;
        Arc::new(Self {
            extent: ExternalExtent::new(INODE_TABLE_SECTORS, len),
            cache,
            sector_count,
        })
    }

    /// Finds `cnt` consecutive free sectors, marks them used, and returns
    /// the first index.
    pub fn allocate(&self, cnt: u32) -> Result<SectorIdx> {
        assert!(cnt > 0);
        let mut bytes = self.extent.bytes().lock();
        let mut run = 0u32;
        for sector in 0..self.sector_count {
            if get_bit(&bytes, sector) {
                run = 0;
                continue;
            }
            run += 1;
            if run == cnt {
                let first = sector + 1 - cnt;
                for s in first..=sector {
                    set_bit(&mut bytes, s);
                }
                drop(bytes);
                self.cache.dirty_external(self.extent.start());
                return Ok(first);
            }
        }
        Err(FsError::NoFreeSector)
    }

    /// Returns `cnt` sectors starting at `start` to the pool. All of them
    /// must currently be marked used.
    pub fn release(&self, start: SectorIdx, cnt: u32) {
        {
            let mut bytes = self.extent.bytes().lock();
            for sector in start..start + cnt {
                assert!(get_bit(&bytes, sector), "releasing free sector {sector}");
                clear_bit(&mut bytes, sector);
            }
        }
        self.cache.dirty_external(self.extent.start());
    }

    pub fn is_used(&self, sector: SectorIdx) -> bool {
        get_bit(&self.extent.bytes().lock(), sector)
    }

    /// Number of sectors currently marked used, reserved region included.
    pub fn used_count(&self) -> u32 {
        let bytes = self.extent.bytes().lock();
        (0..self.sector_count)
            .filter(|&s| get_bit(&bytes, s))
            .count() as u32
    }

    /// Writes the bitmap back and unregisters the extent.
    pub fn close(&self) {
        self.cache.free_external(self.extent.start());
    }
}

fn get_bit(bytes: &[u8], sector: SectorIdx) -> bool {
    bytes[sector as usize / 8] & (1u8 << (sector % 8)) != 0
}

fn set_bit(bytes: &mut [u8], sector: SectorIdx) {
    bytes[sector as usize / 8] |= 1 << (sector % 8);
}

fn clear_bit(bytes: &mut [u8], sector: SectorIdx) {
    bytes[sector as usize / 8] &= !(1 << (sector % 8));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BlockDevice;
    use spin::Mutex as SpinMutex;
    use std::time::Duration;

    struct Disk(SpinMutex<Vec<[u8; SECTOR_SIZE]>>);

    impl BlockDevice for Disk {
        fn read_sector(&self, idx: u32, buf: &mut [u8; SECTOR_SIZE]) {
            *buf = self.0.lock()[idx as usize];
        }
        fn write_sector(&self, idx: u32, buf: &[u8; SECTOR_SIZE]) {
            self.0.lock()[idx as usize] = *buf;
        }
        fn sector_count(&self) -> u32 {
            self.0.lock().len() as u32
        }
    }

    fn setup(sectors: usize) -> (Arc<BufferCache>, u32) {
        let disk = Arc::new(Disk(SpinMutex::new(vec![[0; SECTOR_SIZE]; sectors])));
        let cache = BufferCache::new(disk, Duration::from_secs(3600));
        (cache, sectors as u32)
    }

    #[test]
    fn reserved_region_is_marked() {
        let (cache, n) = setup(1024);
        let map = FreeMap::format(Arc::clone(&cache), n);
        let reserved = INODE_TABLE_SECTORS + free_map_sectors(n);
        assert_eq!(map.used_count(), reserved);
        assert!(map.is_used(0));
        assert!(map.is_used(reserved - 1));
        assert!(!map.is_used(reserved));
        cache.destroy();
    }

    #[test]
    fn allocate_release_round_trip() {
        let (cache, n) = setup(1024);
        let map = FreeMap::format(Arc::clone(&cache), n);
        let a = map.allocate(1).unwrap();
        let b = map.allocate(3).unwrap();
        assert_ne!(a, b);
        assert!(map.is_used(b) && map.is_used(b + 2));
        map.release(b, 3);
        assert!(!map.is_used(b));
        // Freed run is found again.
        assert_eq!(map.allocate(3).unwrap(), b);
        map.release(a, 1);
        cache.destroy();
    }

    #[test]
    fn exhaustion_reports_no_free_sector() {
        let (cache, n) = setup(128);
        let map = FreeMap::format(Arc::clone(&cache), n);
        let free = n - INODE_TABLE_SECTORS - free_map_sectors(n);
        for _ in 0..free {
            map.allocate(1).unwrap();
        }
        assert_eq!(map.allocate(1), Err(FsError::NoFreeSector));
        cache.destroy();
    }

    #[test]
    fn persists_through_close_and_open() {
        let (cache, n) = setup(1024);
        let map = FreeMap::format(Arc::clone(&cache), n);
        let a = map.allocate(5).unwrap();
        map.close();

        let map2 = FreeMap::open(Arc::clone(&cache), n);
        assert!(map2.is_used(a + 4));
        assert_eq!(
            map2.used_count(),
            INODE_TABLE_SECTORS + free_map_sectors(n) + 5
        );
        cache.destroy();
    }
}
