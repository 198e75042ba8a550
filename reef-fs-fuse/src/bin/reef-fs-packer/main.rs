mod cli;

use std::io;
use std::io::Write;
use std::sync::Arc;

use clap::Parser;
use cli::{Cli, Command};
use log::info;
use reef_fs::Filesystem;
use reef_fs_fuse::BlockFile;

fn main() -> io::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let device = match &cli.command {
        Command::Format { sectors } => BlockFile::create(&cli.image, *sectors)?,
        _ => BlockFile::open(&cli.image)?,
    };
    let format = matches!(cli.command, Command::Format { .. });
    let fs = Filesystem::init(Arc::new(device), format).expect("mount failed");

    match cli.command {
        Command::Format { sectors } => {
            info!("formatted {:?}: {sectors} sectors", cli.image);
        }
        Command::Put { sources } => {
            for source in sources {
                let data = std::fs::read(&source)?;
                let name = source
                    .file_name()
                    .and_then(|n| n.to_str())
                    .expect("source file name");
                let path = format!("/{name}");
                assert!(fs.create(&path, 0, false), "create {path} failed");
                let file = fs.open(&path).expect("open failed");
                assert_eq!(file.write(&data), data.len(), "short write for {path}");
                println!("{name}: {} bytes", data.len());
            }
        }
        Command::Ls { path } => {
            let dir = fs.open(&path).expect("no such directory");
            assert!(dir.is_dir(), "{path} is not a directory");
            while let Some(name) = dir.readdir() {
                println!("{name}");
            }
        }
        Command::Cat { path } => {
            let file = fs.open(&path).expect("no such file");
            let mut buf = vec![0u8; 64 * 1024];
            let stdout = io::stdout();
            let mut out = stdout.lock();
            loop {
                let n = file.read(&mut buf);
                if n == 0 {
                    break;
                }
                out.write_all(&buf[..n])?;
            }
        }
    }

    fs.done();
    Ok(())
}
