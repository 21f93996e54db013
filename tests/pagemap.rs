//! Physical address resolution against the live `/proc/self/pagemap`.
//!
//! Skipped when the pagemap cannot be read (no procfs, restricted sandbox).

use std::fs::File;

use peakflops::memory::{Arena, HugePageMode};
use peakflops::pagemap::{page_size, read_entry, virt_to_phys_self};
use peakflops::HUGE_PAGE_SIZE;

fn pagemap_available() -> bool {
    match File::open("/proc/self/pagemap") {
        Ok(_) => true,
        Err(e) => {
            eprintln!("skipping: /proc/self/pagemap unavailable ({})", e);
            false
        }
    }
}

#[test]
fn test_resolution_preserves_page_offset() {
    if !pagemap_available() {
        return;
    }

    let mut arena = Arena::map(HUGE_PAGE_SIZE, None, HugePageMode::Transparent).unwrap();
    arena.commit();
    let page = page_size();
    let base = arena.as_ptr() as usize;

    for offset in [0, 8, 1000, page + 24, HUGE_PAGE_SIZE - 8] {
        let virt = base + offset;
        let phys = virt_to_phys_self(virt).unwrap();
        assert_eq!(phys % page, virt % page, "virt {:#x} -> phys {:#x}", virt, phys);
    }
}

#[test]
fn test_entry_decoding_matches_translation() {
    if !pagemap_available() {
        return;
    }

    let values = vec![2.0f64; 1024];
    let virt = values.as_ptr() as usize;
    let pagemap = File::open("/proc/self/pagemap").unwrap();
    let entry = read_entry(&pagemap, virt, page_size()).unwrap();

    assert!(entry.pfn < 1 << 54);
    assert_eq!(
        virt_to_phys_self(virt).unwrap(),
        entry.pfn as usize * page_size() + virt % page_size()
    );
}

#[test]
fn test_committed_heap_value_resolves() {
    if !pagemap_available() {
        return;
    }

    let values = vec![1.0f64; 4096];
    let virt = values.as_ptr() as usize + 3 * std::mem::size_of::<f64>();
    let phys = virt_to_phys_self(virt).unwrap();
    assert_eq!(phys % page_size(), virt % page_size());
}

