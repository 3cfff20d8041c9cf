//! Mount table parsing for `/proc/self/mounts`-style files.

use std::io;

use camino::Utf8PathBuf;

use super::{MountEntry, MountLookup};
use crate::fs;

/// Reads mounts from a procfs-style mount table.
#[derive(Clone, Debug)]
pub struct ProcMountTable {
    path: Utf8PathBuf,
}

impl ProcMountTable {
    /// Reads from the given mount table file.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for ProcMountTable {
    fn default() -> Self {
        Self::new("/proc/self/mounts")
    }
}

impl MountLookup for ProcMountTable {
    fn mounts(&self) -> io::Result<Vec<MountEntry>> {
        fs::read_to_string(&self.path).map(|contents| parse_mounts(&contents))
    }
}

/// Parses mount table contents. Lines with fewer than three fields are
/// skipped.
///
/// # Examples
///
/// ```
/// # use vstorage_provisioner::mount::parse_mounts;
/// let entries = parse_mounts("vstorage://c1 /mnt/c1 fuse.vstorage rw 0 0\n");
/// assert_eq!(entries[0].vstorage_cluster(), Some("c1"));
/// ```
#[must_use]
pub fn parse_mounts(contents: &str) -> Vec<MountEntry> {
    contents
        .lines()
        .filter_map(|line| {
            // <device> <mount point> <fs type> <options> <dump> <pass>
            let mut fields = line.split_whitespace();
            let device = fields.next()?;
            let mount_point = fields.next()?;
            let fs_type = fields.next()?;
            Some(MountEntry {
                device: unescape(device),
                mount_point: Utf8PathBuf::from(unescape(mount_point)),
                fs_type: unescape(fs_type),
            })
        })
        .collect()
}

/// Decodes the `\NNN` octal escapes the kernel uses for whitespace.
fn unescape(field: &str) -> String {
    let mut decoded = Vec::with_capacity(field.len());
    let mut bytes = field.bytes();
    while let Some(byte) = bytes.next() {
        if byte != b'\\' {
            decoded.push(byte);
            continue;
        }
        let digits: Vec<u8> = bytes.clone().take(3).collect();
        if let Some(value) = decode_octal(&digits) {
            decoded.push(value);
            bytes.by_ref().take(3).for_each(drop);
        } else {
            decoded.push(byte);
        }
    }
    String::from_utf8_lossy(&decoded).into_owned()
}

fn decode_octal(digits: &[u8]) -> Option<u8> {
    if digits.len() != 3 || !digits.iter().all(|digit| (b'0'..=b'7').contains(digit)) {
        return None;
    }
    digits.iter().try_fold(0_u8, |acc, digit| {
        acc.checked_mul(8)?.checked_add(digit.checked_sub(b'0')?)
    })
}
