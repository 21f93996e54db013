//! Aligned memory provisioning for the per-thread `A` and `B` buffers.
//!
//! Three interchangeable strategies all end in the same shape: every worker thread gets a
//! pair of `&mut [f64]` buffers, aligned to [`ALIGN`], that no other thread can touch.
//!
//! - [`ProvisioningStrategy::HeapAligned`]: one aligned heap arena for `A` and one for
//!   `B`, split into equal [`Partition`]s by thread index.
//! - [`ProvisioningStrategy::FixedHugePage`]: same split, but the two arenas are huge-page
//!   mappings placed at caller-chosen addresses.
//! - [`ProvisioningStrategy::PerThreadHugePage`]: each thread maps its own region with `A`
//!   in the first part and `B` after a configurable offset.
//!
//! An [`Arena`] owns its region and gives it back in `Drop`, so memory is returned on
//! every exit path of a run.

use std::fmt;
use std::io;
use std::ops::Range;
use std::ptr::{self, NonNull};
use std::slice;
use std::str::FromStr;

use rayon::{iter::ParallelIterator, slice::ParallelSliceMut};

use crate::config::BenchConfig;
use crate::error::{config_error, mapping_error, BenchError, Result};
use crate::pagemap;
use crate::utils::{alloc_aligned_zeroed, divides_evenly, free_aligned, round_up};
use crate::{ALIGN, HUGE_PAGE_SIZE};

const F64_SIZE: usize = std::mem::size_of::<f64>();

/// Value written to the start of each per-thread buffer to commit its first page.
pub const SENTINEL: f64 = 1.0;

/// How the `A`/`B` buffers of a run are obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProvisioningStrategy {
    HeapAligned,
    FixedHugePage,
    PerThreadHugePage,
}

impl ProvisioningStrategy {
    pub const ALL: [ProvisioningStrategy; 3] = [
        ProvisioningStrategy::HeapAligned,
        ProvisioningStrategy::FixedHugePage,
        ProvisioningStrategy::PerThreadHugePage,
    ];

    /// Whether buffers are provisioned once for all threads before launch.
    pub fn is_shared(&self) -> bool {
        !matches!(self, ProvisioningStrategy::PerThreadHugePage)
    }
}

impl fmt::Display for ProvisioningStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProvisioningStrategy::HeapAligned => "heap",
            ProvisioningStrategy::FixedHugePage => "fixed-huge",
            ProvisioningStrategy::PerThreadHugePage => "per-thread-huge",
        };
        f.write_str(name)
    }
}

impl FromStr for ProvisioningStrategy {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "heap" | "heap-aligned" => Ok(ProvisioningStrategy::HeapAligned),
            "fixed-huge" | "fixed-huge-page" => Ok(ProvisioningStrategy::FixedHugePage),
            "per-thread-huge" | "per-thread-huge-page" => {
                Ok(ProvisioningStrategy::PerThreadHugePage)
            }
            other => Err(config_error(format!(
                "unknown provisioning strategy '{}' (expected heap, fixed-huge or per-thread-huge)",
                other
            ))),
        }
    }
}

/// Page backing of mapped arenas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HugePageMode {
    /// Reserved hugetlbfs pages (`MAP_HUGETLB`); the mapping fails if none are free.
    HugeTlb,
    /// Ordinary anonymous memory advised with `MADV_HUGEPAGE`.
    Transparent,
}

enum Backing {
    Heap(std::alloc::Layout),
    Mapped,
}

/// One owned, aligned memory region.
pub struct Arena {
    ptr: NonNull<u8>,
    len: usize,
    backing: Backing,
}

// SAFETY: Arena uniquely owns its region; access goes through &self / &mut self.
unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

impl Arena {
    /// Allocates a zeroed heap region of `size` bytes aligned to `align`.
    pub fn heap(size: usize, align: usize) -> Result<Arena> {
        let (ptr, layout) = alloc_aligned_zeroed(size, align)?;
        Ok(Arena {
            ptr,
            len: layout.size(),
            backing: Backing::Heap(layout),
        })
    }

    /// Maps an anonymous region of at least `size` bytes, rounded up to whole huge pages.
    ///
    /// With `address`, the mapping must land exactly there; an occupied range is an
    /// error, never a silent replacement.
    pub fn map(size: usize, address: Option<usize>, mode: HugePageMode) -> Result<Arena> {
        let len = round_up(size, HUGE_PAGE_SIZE);
        if len == 0 {
            return Err(mapping_error(
                size,
                address,
                io::Error::from_raw_os_error(libc::EINVAL),
            ));
        }

        let mut flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
        if mode == HugePageMode::HugeTlb {
            flags |= libc::MAP_HUGETLB;
        }
        if address.is_some() {
            flags |= libc::MAP_FIXED_NOREPLACE;
        }
        let hint = address.map_or(ptr::null_mut(), |addr| addr as *mut libc::c_void);

        // SAFETY: anonymous mapping; MAP_FIXED_NOREPLACE never replaces existing mappings.
        let raw = unsafe {
            libc::mmap(
                hint,
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                flags,
                -1,
                0,
            )
        };
        if raw == libc::MAP_FAILED {
            return Err(mapping_error(len, address, io::Error::last_os_error()));
        }

        // kernels older than 4.17 treat MAP_FIXED_NOREPLACE as a hint
        if let Some(addr) = address {
            if raw as usize != addr {
                // SAFETY: raw/len is the mapping just created.
                unsafe { libc::munmap(raw, len) };
                return Err(mapping_error(
                    len,
                    address,
                    io::Error::from_raw_os_error(libc::EEXIST),
                ));
            }
        }

        if mode == HugePageMode::Transparent {
            // advisory only; THP may be disabled system-wide
            // SAFETY: raw/len is a valid mapping.
            unsafe { libc::madvise(raw, len, libc::MADV_HUGEPAGE) };
        }

        let ptr = NonNull::new(raw.cast::<u8>())
            .ok_or_else(|| mapping_error(len, address, io::Error::from_raw_os_error(libc::EFAULT)))?;

        Ok(Arena {
            ptr,
            len,
            backing: Backing::Mapped,
        })
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self.backing, Backing::Mapped)
    }

    /// The whole region as `f64` elements.
    pub fn as_mut_f64(&mut self) -> &mut [f64] {
        // SAFETY: the region is at least 8-byte aligned, zero-initialized (all-zero bits
        // are a valid f64) and exclusively borrowed through &mut self.
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr().cast::<f64>(), self.len / F64_SIZE) }
    }

    /// Writes one element per OS page so later accesses never page-fault.
    pub fn commit(&mut self) {
        let page_elems = (pagemap::page_size() / F64_SIZE).max(1);
        self.as_mut_f64()
            .par_chunks_mut(page_elems)
            .for_each(|page| page[0] = 0.0);
    }

    /// Splits the region into one buffer per partition.
    ///
    /// Partitions must be sorted by offset, non-overlapping and inside the region.
    pub fn split(&mut self, partitions: &[Partition]) -> Result<Vec<&mut [f64]>> {
        let len = self.len;
        let mut rest = self.as_mut_f64();
        let mut consumed = 0;
        let mut buffers = Vec::with_capacity(partitions.len());

        for part in partitions {
            if part.offset < consumed || part.end() > len {
                return Err(config_error(format!(
                    "partition {} ({:?}) overlaps a previous one or exceeds the {} byte arena",
                    part.index,
                    part.range(),
                    len
                )));
            }
            if part.offset % F64_SIZE != 0 || part.len % F64_SIZE != 0 {
                return Err(config_error(format!(
                    "partition {} is not a whole number of f64 elements",
                    part.index
                )));
            }

            let skip = (part.offset - consumed) / F64_SIZE;
            let (_, tail) = std::mem::take(&mut rest).split_at_mut(skip);
            let (head, tail) = tail.split_at_mut(part.len / F64_SIZE);
            buffers.push(head);
            rest = tail;
            consumed = part.end();
        }

        Ok(buffers)
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        match self.backing {
            // SAFETY: ptr/layout come from alloc_aligned_zeroed.
            Backing::Heap(layout) => unsafe { free_aligned(self.ptr, layout) },
            // SAFETY: ptr/len describe the mapping created in Arena::map.
            Backing::Mapped => unsafe {
                libc::munmap(self.ptr.as_ptr().cast::<libc::c_void>(), self.len);
            },
        }
    }
}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .field("mapped", &self.is_mapped())
            .finish()
    }
}

/// A thread's slice of a shared arena, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    pub index: usize,
    pub offset: usize,
    pub len: usize,
}

impl Partition {
    pub fn end(&self) -> usize {
        self.offset + self.len
    }

    pub fn range(&self) -> Range<usize> {
        self.offset..self.end()
    }

    pub fn overlaps(&self, other: &Partition) -> bool {
        self.offset < other.end() && other.offset < self.end()
    }
}

/// Splits `total` bytes into `parts` equal partitions: `offset = index * (total / parts)`.
pub fn partition(total: usize, parts: usize) -> Result<Vec<Partition>> {
    if !divides_evenly(total, parts) {
        return Err(config_error(format!(
            "{} bytes do not split evenly across {} threads",
            total, parts
        )));
    }
    let len = total / parts;
    Ok((0..parts)
        .map(|index| Partition {
            index,
            offset: index * len,
            len,
        })
        .collect())
}

/// Arenas shared by all threads, provisioned once before launch.
#[derive(Debug)]
pub struct SharedArenas {
    pub a: Arena,
    pub b: Arena,
    pub partitions: Vec<Partition>,
}

impl SharedArenas {
    /// Total bytes held by both arenas.
    pub fn bytes(&self) -> usize {
        self.a.len() + self.b.len()
    }

    /// Per-thread `(A, B)` buffer pairs, index-ordered.
    pub fn thread_buffers(&mut self) -> Result<Vec<(&mut [f64], &mut [f64])>> {
        let a = self.a.split(&self.partitions)?;
        let b = self.b.split(&self.partitions)?;
        Ok(a.into_iter().zip(b).collect())
    }
}

/// Provisions the two shared arenas of a heap or fixed-address run.
pub fn provision_shared(config: &BenchConfig) -> Result<SharedArenas> {
    let (mut a, mut b) = match config.strategy {
        ProvisioningStrategy::HeapAligned => (
            Arena::heap(config.arena_bytes, ALIGN)?,
            Arena::heap(config.arena_bytes, ALIGN)?,
        ),
        ProvisioningStrategy::FixedHugePage => {
            let (addr_a, addr_b) = config.fixed_addresses;
            let a = Arena::map(config.arena_bytes, Some(addr_a), config.huge_pages)?;
            let b = Arena::map(config.arena_bytes, Some(addr_b), config.huge_pages)?;
            (a, b)
        }
        ProvisioningStrategy::PerThreadHugePage => {
            return Err(config_error(
                "per-thread huge pages are provisioned by each worker, not up front",
            ))
        }
    };

    a.commit();
    b.commit();

    Ok(SharedArenas {
        a,
        b,
        partitions: partition(config.arena_bytes, config.threads)?,
    })
}

/// One thread's private mapping holding both `A` and `B`.
#[derive(Debug)]
pub struct ThreadArena {
    arena: Arena,
    b_offset: usize,
}

impl ThreadArena {
    /// `A` then `B`, split at the configured offset.
    pub fn buffers(&mut self) -> (&mut [f64], &mut [f64]) {
        let split = self.b_offset / F64_SIZE;
        self.arena.as_mut_f64().split_at_mut(split)
    }

    /// Writes [`SENTINEL`] into the first element of `A` and `B`.
    pub fn touch_sentinels(&mut self) {
        let (a, b) = self.buffers();
        a[0] = SENTINEL;
        b[0] = SENTINEL;
    }

    pub fn b_offset(&self) -> usize {
        self.b_offset
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.arena.as_ptr()
    }
}

/// Maps the private region of one per-thread huge-page worker.
pub fn provision_thread(config: &BenchConfig) -> Result<ThreadArena> {
    let arena = Arena::map(config.per_thread_bytes, None, config.huge_pages)?;
    let b_offset = config.b_offset();
    if b_offset == 0 || b_offset >= arena.len() {
        return Err(config_error(format!(
            "B offset {} does not fit a {} byte per-thread mapping",
            b_offset,
            arena.len()
        )));
    }
    Ok(ThreadArena { arena, b_offset })
}
