use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use reef_fs::{BlockDevice, Filesystem};

use crate::BlockFile;

fn scratch_image() -> PathBuf {
    static SEQ: AtomicU32 = AtomicU32::new(0);
    let n = SEQ.fetch_add(1, Ordering::SeqCst);
    std::env::temp_dir().join(format!("reef-fs-test-{}-{n}.img", std::process::id()))
}

#[test]
fn image_round_trip() {
    let path = scratch_image();
    {
        let device = Arc::new(BlockFile::create(&path, 4096).unwrap());
        let fs = Filesystem::init(device, true).unwrap();
        assert!(fs.create("/hello", 0, false));
        assert_eq!(fs.open("/hello").unwrap().write(b"from the image"), 14);
        fs.done();
    }
    {
        let device = Arc::new(BlockFile::open(&path).unwrap());
        assert_eq!(device.sector_count(), 4096);
        let fs = Filesystem::init(device, false).unwrap();
        let file = fs.open("/hello").unwrap();
        let mut buf = [0u8; 14];
        assert_eq!(file.read(&mut buf), 14);
        assert_eq!(&buf, b"from the image");
        fs.done();
    }
    std::fs::remove_file(&path).unwrap();
}
