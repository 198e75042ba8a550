use core::mem;

use crate::{Inum, NAME_MAX};

/// A fixed-size directory entry. A directory's byte content is an array of
/// these; `in_use` distinguishes live entries from erased slots, which are
/// reused before the directory grows.
#[derive(Debug, Default, Clone)]
#[repr(C)]
pub struct DirEntry {
    pub in_use: bool,
    _pad: [u8; 3],
    pub inum: Inum,
    /// NUL-terminated name, at most `NAME_MAX` bytes long.
    name: [u8; NAME_MAX + 1],
    _pad2: u8,
}

const _: () = assert!(mem::size_of::<DirEntry>() == 24);

impl DirEntry {
    pub const SIZE: usize = mem::size_of::<DirEntry>();

    /// `name` must be a valid component: `1..=NAME_MAX` bytes, no `/`, no
    /// NUL. See [`DirEntry::valid_name`].
    pub fn new(name: &str, inum: Inum) -> Self {
        debug_assert!(Self::valid_name(name));
        let mut entry = Self {
            in_use: true,
            inum,
            ..Self::default()
        };
        entry.name[..name.len()].copy_from_slice(name.as_bytes());
        entry
    }

    pub fn valid_name(name: &str) -> bool {
        (1..=NAME_MAX).contains(&name.len()) && !name.bytes().any(|b| b == b'/' || b == 0)
    }

    pub fn name(&self) -> &str {
        let len = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.name.len() - 1);
        core::str::from_utf8(&self.name[..len]).unwrap_or("")
    }

    /// Exact byte comparison, case-sensitive.
    pub fn matches(&self, name: &str) -> bool {
        self.in_use && self.name() == name
    }

    pub fn as_bytes(&self) -> &[u8] {
        // Safety: repr(C) with explicit padding; every byte is initialized.
        unsafe { core::slice::from_raw_parts((self as *const Self).cast(), Self::SIZE) }
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        // Safety: as above; callers only feed bytes previously produced by
        // `as_bytes`.
        unsafe { core::slice::from_raw_parts_mut((self as *mut Self).cast(), Self::SIZE) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_round_trip() {
        let e = DirEntry::new("readme.txt", 17);
        assert_eq!(e.name(), "readme.txt");
        assert_eq!(e.inum, 17);
        assert!(e.matches("readme.txt"));
        assert!(!e.matches("readme.TXT"));

        let mut copy = DirEntry::default();
        copy.as_bytes_mut().copy_from_slice(e.as_bytes());
        assert!(copy.matches("readme.txt"));
    }

    #[test]
    fn name_validation() {
        assert!(DirEntry::valid_name("a"));
        assert!(DirEntry::valid_name("fourteen-chars"));
        assert!(!DirEntry::valid_name(""));
        assert!(!DirEntry::valid_name("fifteen-chars.."));
        assert!(!DirEntry::valid_name("a/b"));
        assert!(!DirEntry::valid_name("a\0b"));
    }
}
