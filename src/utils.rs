use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;

use num::Integer;

use crate::error::{allocation_error, layout_error, Result};

/// Builds the layout for an aligned byte allocation.
///
/// # Errors
///
/// Returns a `LayoutError` if `align` is not a power of two, or if `size` rounded up to
/// `align` overflows `isize::MAX`.
pub fn aligned_layout(size: usize, align: usize) -> Result<Layout> {
    if size == 0 {
        return Err(layout_error(size, align, "zero-sized buffer"));
    }
    Layout::from_size_align(size, align).map_err(|e| layout_error(size, align, e.to_string()))
}

/// Allocates `size` zeroed bytes aligned to `align`.
///
/// Unlike `handle_alloc_error`, a null return from the allocator is reported as an
/// `AllocationError` so a run can print it and stop cleanly.
///
/// # Safety of the result
///
/// The returned pointer must be released with [`free_aligned`] using the same layout.
pub fn alloc_aligned_zeroed(size: usize, align: usize) -> Result<(NonNull<u8>, Layout)> {
    let layout = aligned_layout(size, align)?;

    // SAFETY: layout has non-zero size.
    let ptr = unsafe { alloc_zeroed(layout) };

    match NonNull::new(ptr) {
        Some(ptr) => Ok((ptr, layout)),
        None => Err(allocation_error(size, align, "allocator returned null")),
    }
}

/// Releases memory obtained from [`alloc_aligned_zeroed`].
///
/// # Safety
///
/// `ptr` must come from `alloc_aligned_zeroed` with exactly this `layout` and must not
/// be used afterwards.
pub unsafe fn free_aligned(ptr: NonNull<u8>, layout: Layout) {
    dealloc(ptr.as_ptr(), layout);
}

/// Rounds `value` up to the next multiple of `multiple`.
#[inline]
pub fn round_up(value: usize, multiple: usize) -> usize {
    Integer::div_ceil(&value, &multiple) * multiple
}

/// Whether `value` splits into `parts` equal pieces.
#[inline]
pub fn divides_evenly(value: usize, parts: usize) -> bool {
    parts != 0 && Integer::is_multiple_of(&value, &parts)
}

/// Whether `ptr` sits on an `align` boundary.
#[inline]
pub fn is_aligned_to<T>(ptr: *const T, align: usize) -> bool {
    (ptr as usize) % align == 0
}
