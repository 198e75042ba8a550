//! Concurrent workloads: sector-granular write atomicity, the
//! length-after-data ordering guarantee, and directory operations under
//! contention.

mod common;

use std::sync::Arc;
use std::thread;

use common::{setup, RamDisk};
use reef_fs::{Filesystem, SECTOR_SIZE};

fn setup_shared() -> (Arc<RamDisk>, Arc<Filesystem>) {
    let (disk, fs) = setup();
    (disk, Arc::new(fs))
}

#[test]
fn two_appenders_never_interleave_within_sectors() {
    let (_disk, fs) = setup_shared();
    assert!(fs.create("/shared", 0, false));

    let writers: Vec<_> = [b'A', b'B']
        .into_iter()
        .map(|fill| {
            let fs = Arc::clone(&fs);
            thread::spawn(move || {
                let file = fs.open("/shared").unwrap();
                let buf = vec![fill; 4096];
                assert_eq!(file.write(&buf), 4096);
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    let file = fs.open("/shared").unwrap();
    assert_eq!(file.length(), 4096);
    let mut content = vec![0u8; 4096];
    assert_eq!(file.read(&mut content), 4096);
    // Writes serialize through the per-slot writer lock, so every sector
    // is wholly one writer's bytes.
    for (i, sector) in content.chunks(SECTOR_SIZE).enumerate() {
        let first = sector[0];
        assert!(first == b'A' || first == b'B');
        assert!(
            sector.iter().all(|&b| b == first),
            "sector {i} interleaved"
        );
    }
}

#[test]
fn readers_never_see_bytes_beyond_length() {
    let (_disk, fs) = setup_shared();
    assert!(fs.create("/grow", 0, false));

    let writer = {
        let fs = Arc::clone(&fs);
        thread::spawn(move || {
            let file = fs.open("/grow").unwrap();
            let mut pattern = Vec::new();
            for i in 0..256u32 {
                let chunk = vec![(i & 0xFF) as u8; 64];
                pattern.extend_from_slice(&chunk);
                assert_eq!(file.write(&chunk), 64);
            }
        })
    };

    let reader = {
        let fs = Arc::clone(&fs);
        thread::spawn(move || {
            let file = fs.open("/grow").unwrap();
            let mut buf = vec![0u8; 256 * 64];
            loop {
                let n = file.read_at(&mut buf, 0);
                // Every byte the read returns was really written: position
                // p always carries pattern byte (p / 64) & 0xFF, because
                // the length bump follows the data.
                for (p, &b) in buf[..n].iter().enumerate() {
                    assert_eq!(b, ((p / 64) & 0xFF) as u8, "stale byte at {p}");
                }
                if n == 256 * 64 {
                    break;
                }
            }
        })
    };

    writer.join().unwrap();
    reader.join().unwrap();
}

#[test]
fn concurrent_writers_to_disjoint_files() {
    let (_disk, fs) = setup_shared();
    let threads: Vec<_> = (0..8u8)
        .map(|t| {
            let fs = Arc::clone(&fs);
            thread::spawn(move || {
                let path = format!("/w{t}");
                assert!(fs.create(&path, 0, false));
                let file = fs.open(&path).unwrap();
                let buf = vec![t; 3 * SECTOR_SIZE + 17];
                assert_eq!(file.write(&buf), buf.len());
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    for t in 0..8u8 {
        let file = fs.open(&format!("/w{t}")).unwrap();
        let mut buf = vec![0u8; 3 * SECTOR_SIZE + 17];
        assert_eq!(file.read(&mut buf), buf.len());
        assert!(buf.iter().all(|&b| b == t), "file /w{t} corrupted");
    }
}

#[test]
fn concurrent_creates_in_one_directory() {
    let (_disk, fs) = setup_shared();
    assert!(fs.create("/dir", 0, true));

    let threads: Vec<_> = (0..8u8)
        .map(|t| {
            let fs = Arc::clone(&fs);
            thread::spawn(move || {
                for n in 0..4u8 {
                    assert!(fs.create(&format!("/dir/t{t}n{n}"), 0, false));
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    let dir = fs.open("/dir").unwrap();
    let mut count = 0;
    let mut seen = std::collections::HashSet::new();
    while let Some(name) = dir.readdir() {
        assert!(seen.insert(name), "duplicate directory entry");
        count += 1;
    }
    assert_eq!(count, 32);

    // Every created file resolves to a distinct inumber.
    let mut inums = std::collections::HashSet::new();
    for t in 0..8u8 {
        for n in 0..4u8 {
            let file = fs.open(&format!("/dir/t{t}n{n}")).unwrap();
            assert!(inums.insert(file.inumber()));
        }
    }
}

#[test]
fn concurrent_opens_share_one_handle() {
    let (_disk, fs) = setup_shared();
    assert!(fs.create("/f", 0, false));
    fs.open("/f").unwrap().write(b"shared");

    let threads: Vec<_> = (0..8)
        .map(|_| {
            let fs = Arc::clone(&fs);
            thread::spawn(move || {
                let file = fs.open("/f").unwrap();
                let mut buf = [0u8; 6];
                assert_eq!(file.read(&mut buf), 6);
                assert_eq!(&buf, b"shared");
                file.inumber()
            })
        })
        .collect();
    let inums: Vec<_> = threads.into_iter().map(|t| t.join().unwrap()).collect();
    assert!(inums.windows(2).all(|w| w[0] == w[1]));
}

#[test]
fn remove_races_with_readers() {
    let (_disk, fs) = setup_shared();
    assert!(fs.create("/victim", 0, false));
    let payload = vec![0x42u8; 2 * SECTOR_SIZE];
    fs.open("/victim").unwrap().write(&payload);

    let reader = {
        let fs = Arc::clone(&fs);
        let file = fs.open("/victim").unwrap();
        thread::spawn(move || {
            // The handle outlives the path: reads keep working after the
            // remove until this handle drops.
            for _ in 0..64 {
                let mut buf = vec![0u8; 2 * SECTOR_SIZE];
                assert_eq!(file.read_at(&mut buf, 0), 2 * SECTOR_SIZE);
                assert!(buf.iter().all(|&b| b == 0x42));
            }
        })
    };

    assert!(fs.remove("/victim"));
    reader.join().unwrap();
    assert!(fs.open("/victim").is_none());
}
