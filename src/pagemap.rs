//! Virtual to physical address resolution through `/proc/<pid>/pagemap`.
//!
//! Each virtual page has one little-endian 64-bit entry in the pagemap file, at byte
//! offset `vpn * 8`. Format: <https://www.kernel.org/doc/Documentation/vm/pagemap.txt>.
//! Without `CAP_SYS_ADMIN` the kernel reports a zero page frame number.
//!
//! Only used for diagnostic output; benchmark timing never depends on it.

use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;

const ENTRY_SIZE: usize = std::mem::size_of::<u64>();
const PFN_BITS: u32 = 54;

/// One decoded pagemap entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagemapEntry {
    pub pfn: u64,
    pub soft_dirty: bool,
    pub file_page: bool,
    pub swapped: bool,
    pub present: bool,
}

impl PagemapEntry {
    /// Decodes a raw pagemap word.
    pub fn from_raw(data: u64) -> Self {
        PagemapEntry {
            pfn: data & ((1u64 << PFN_BITS) - 1),
            soft_dirty: (data >> 54) & 1 == 1,
            file_page: (data >> 61) & 1 == 1,
            swapped: (data >> 62) & 1 == 1,
            present: (data >> 63) & 1 == 1,
        }
    }
}

/// System page size in bytes.
pub fn page_size() -> usize {
    // SAFETY: sysconf has no memory-safety preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as usize
    } else {
        4096
    }
}

/// Reads the entry describing `vaddr` from an open pagemap file.
///
/// Short reads continue at the updated offset; a read returning zero bytes before the
/// full entry arrived fails with [`io::ErrorKind::UnexpectedEof`].
pub fn read_entry(pagemap: &File, vaddr: usize, page_size: usize) -> io::Result<PagemapEntry> {
    let vpn = (vaddr / page_size) as u64;
    let mut data = [0u8; ENTRY_SIZE];
    let mut nread = 0;

    while nread < ENTRY_SIZE {
        let offset = vpn * ENTRY_SIZE as u64 + nread as u64;
        match pagemap.read_at(&mut data[nread..], offset) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("short pagemap entry for {:#x} ({} of {} bytes)", vaddr, nread, ENTRY_SIZE),
                ))
            }
            Ok(n) => nread += n,
            Err(e) => return Err(e),
        }
    }

    Ok(PagemapEntry::from_raw(u64::from_le_bytes(data)))
}

/// Translates `vaddr` of process `pid` to a physical address.
pub fn virt_to_phys(pid: u32, vaddr: usize) -> io::Result<usize> {
    let pagemap = File::open(format!("/proc/{}/pagemap", pid))?;
    let page_size = page_size();
    let entry = read_entry(&pagemap, vaddr, page_size)?;
    Ok(entry.pfn as usize * page_size + vaddr % page_size)
}

/// Translates an address of the calling process.
pub fn virt_to_phys_self(vaddr: usize) -> io::Result<usize> {
    virt_to_phys(std::process::id(), vaddr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn scratch_file(name: &str, contents: &[u8]) -> File {
        let path = std::env::temp_dir().join(format!(
            "peakflops-pagemap-{}-{}",
            std::process::id(),
            name
        ));
        let mut file = File::create(&path).unwrap();
        file.write_all(contents).unwrap();
        drop(file);
        let file = File::open(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        file
    }

    #[test]
    fn test_entry_decoding() {
        let raw = (1u64 << 63) | (1u64 << 54) | 0x12345;
        let entry = PagemapEntry::from_raw(raw);
        assert_eq!(entry.pfn, 0x12345);
        assert!(entry.present);
        assert!(entry.soft_dirty);
        assert!(!entry.swapped);
        assert!(!entry.file_page);

        let swapped = PagemapEntry::from_raw((1u64 << 62) | (1u64 << 61));
        assert!(swapped.swapped);
        assert!(swapped.file_page);
        assert!(!swapped.present);
        assert_eq!(swapped.pfn, 0);
    }

    #[test]
    fn test_pfn_is_masked_to_54_bits() {
        let entry = PagemapEntry::from_raw(u64::MAX);
        assert_eq!(entry.pfn, (1u64 << 54) - 1);
    }

    #[test]
    fn test_read_entry_at_page_index() {
        let mut contents = Vec::new();
        for pfn in 0..4u64 {
            contents.extend_from_slice(&((1u64 << 63) | (100 + pfn)).to_le_bytes());
        }
        let file = scratch_file("index", &contents);

        let entry = read_entry(&file, 2 * 4096 + 17, 4096).unwrap();
        assert_eq!(entry.pfn, 102);
        assert!(entry.present);
    }

    #[test]
    fn test_truncated_entry_is_an_error() {
        let file = scratch_file("short", &[0xff; 12]);
        let err = read_entry(&file, 4096, 4096).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_missing_process_fails_to_open() {
        assert!(virt_to_phys(u32::MAX, 0x1000).is_err());
    }

    #[test]
    fn test_page_size_is_power_of_two() {
        assert!(page_size().is_power_of_two());
    }
}
