use core::fmt;

/// Everything recoverable the filesystem can report.
///
/// Device I/O failure is deliberately absent: the [`crate::BlockDevice`]
/// contract makes I/O errors fatal, so they never surface here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// The inode table has no free entry.
    NoInodeAvailable,
    /// The free map has no run of free sectors of the requested length.
    NoFreeSector,
    /// A byte offset at or past the double-indirect limit.
    FileTooLarge,
    /// A path component does not exist.
    NotFound,
    /// A non-leaf path component names a regular file.
    NotADirectory,
    /// `add` on a name already present in the directory.
    NameInUse,
    /// `remove` on a directory that still has entries.
    DirNotEmpty,
    /// Operation on a directory whose inode has been removed.
    Stale,
    /// Write refused while the inode is mapped deny-write.
    DenyWrite,
    /// A component is empty, too long, or contains `/` or NUL.
    InvalidName,
    /// The path as a whole is malformed (e.g. empty).
    InvalidPath,
}

pub type Result<T> = core::result::Result<T, FsError>;

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            FsError::NoInodeAvailable => "inode table full",
            FsError::NoFreeSector => "no free sectors",
            FsError::FileTooLarge => "file too large",
            FsError::NotFound => "no such file or directory",
            FsError::NotADirectory => "not a directory",
            FsError::NameInUse => "name already in use",
            FsError::DirNotEmpty => "directory not empty",
            FsError::Stale => "directory has been removed",
            FsError::DenyWrite => "writes denied",
            FsError::InvalidName => "invalid name",
            FsError::InvalidPath => "invalid path",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for FsError {}
