//! `#[global_allocator]` adapter
//!
//! ```ignore
//! #[global_allocator]
//! static HEAP: LockedHeap = LockedHeap::new();
//!
//! static mut POOL: [u8; 4096] = [0; 4096];
//!
//! fn main() {
//!     HEAP.init(unsafe { &mut *core::ptr::addr_of_mut!(POOL) });
//! }
//! ```
#![allow(unsafe_code)]

use core::alloc::{GlobalAlloc, Layout};
use core::cell::RefCell;
use core::ptr::{self, NonNull};

use critical_section::Mutex;
use log::warn;

use crate::heap::{Heap, DEFAULT_ALIGN};
use crate::MemStats;

/// A [`Heap`] behind the kernel critical section.
///
/// Layouts asking for more than `ALIGN` bytes of alignment cannot be served
/// and fail with a null pointer.
pub struct LockedHeap<const ALIGN: usize = DEFAULT_ALIGN> {
    inner: Mutex<RefCell<Option<Heap<'static, ALIGN>>>>,
}

impl<const ALIGN: usize> LockedHeap<ALIGN> {
    /// Create an empty allocator; every allocation fails until [`init`].
    ///
    /// [`init`]: LockedHeap::init
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(None)),
        }
    }

    /// Hand the pool over to the allocator, replacing any previous one.
    pub fn init(&self, pool: &'static mut [u8]) {
        let heap = Heap::new(pool);
        if !heap.is_initialized() {
            warn!("global heap pool too small");
        }
        zmos_core::critical::with(|cs| {
            self.inner.borrow_ref_mut(cs).replace(heap);
        });
    }

    /// Run `f` against the underlying heap, if initialized.
    ///
    /// Returns `None` when called again from inside `f`, as happens when the
    /// heap logs through a logger that allocates. The nested allocation then
    /// fails with a null pointer instead of corrupting the heap.
    pub fn with<R>(&self, f: impl FnOnce(&mut Heap<'static, ALIGN>) -> R) -> Option<R> {
        zmos_core::critical::with(|cs| self.inner.borrow(cs).try_borrow_mut().ok()?.as_mut().map(f))
    }

    /// Usage statistics; zero before [`init`](LockedHeap::init)
    pub fn stats(&self) -> MemStats {
        self.with(|heap| heap.stats()).unwrap_or_default()
    }
}

impl<const ALIGN: usize> Default for LockedHeap<ALIGN> {
    fn default() -> Self {
        Self::new()
    }
}

fn into_raw(ptr: Option<NonNull<u8>>) -> *mut u8 {
    ptr.map_or(ptr::null_mut(), NonNull::as_ptr)
}

unsafe impl<const ALIGN: usize> GlobalAlloc for LockedHeap<ALIGN> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > ALIGN {
            return ptr::null_mut();
        }
        into_raw(self.with(|heap| heap.malloc(layout.size())).flatten())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        if let Some(ptr) = NonNull::new(ptr) {
            self.with(|heap| heap.free(ptr));
        }
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        if layout.align() > ALIGN {
            return ptr::null_mut();
        }
        into_raw(self.with(|heap| heap.calloc(1, layout.size())).flatten())
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() > ALIGN || new_size == 0 {
            return ptr::null_mut();
        }
        into_raw(
            self.with(|heap| heap.realloc(NonNull::new(ptr), new_size))
                .flatten(),
        )
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use std::boxed::Box;

    fn leaked_pool(len: usize) -> &'static mut [u8] {
        let words: &'static mut [u64] = Box::leak(std::vec![0u64; len / 8].into_boxed_slice());
        // SAFETY: a u64 slice is valid as bytes and stays alive forever.
        unsafe { core::slice::from_raw_parts_mut(words.as_mut_ptr().cast::<u8>(), len) }
    }

    #[test]
    fn test_uninitialized_heap_returns_null() {
        let heap: LockedHeap = LockedHeap::new();
        let layout = Layout::from_size_align(16, 4).unwrap();
        assert!(unsafe { heap.alloc(layout) }.is_null());
        assert_eq!(heap.stats(), MemStats::new());
    }

    #[test]
    fn test_over_aligned_layout_is_refused() {
        let heap: LockedHeap<4> = LockedHeap::new();
        heap.init(leaked_pool(256));
        let layout = Layout::from_size_align(16, 16).unwrap();
        assert!(unsafe { heap.alloc(layout) }.is_null());
    }

    #[test]
    fn test_alloc_realloc_dealloc() {
        let heap: LockedHeap<8> = LockedHeap::new();
        heap.init(leaked_pool(512));

        let layout = Layout::from_size_align(24, 8).unwrap();
        let p = unsafe { heap.alloc_zeroed(layout) };
        assert!(!p.is_null());
        assert_eq!(p as usize % 8, 0);
        unsafe {
            assert_eq!(*p.add(23), 0);
            p.write(0x5A);
        }

        let q = unsafe { heap.realloc(p, layout, 200) };
        assert!(!q.is_null());
        assert_eq!(unsafe { *q }, 0x5A);

        unsafe { heap.dealloc(q, Layout::from_size_align(200, 8).unwrap()) };
        assert_eq!(heap.with(|h| h.blocks().filter(|b| b.used).count()), Some(0));
    }
}
