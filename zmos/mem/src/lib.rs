#![no_std]
#![deny(unsafe_code)]

//! # ZMOS Memory Management
//!
//! A pool-backed dynamic allocator for devices with a few kilobytes of RAM.
//! Blocks are kept in an address-ordered list threaded through the pool
//! itself; allocation is first-fit from a low-water hint and freeing merges
//! with both neighbours immediately.
//!
//! The allocator is meant to be used from task (main-loop) context only.
//! Allocating or freeing from an interrupt handler is not supported.

pub mod global;
pub mod heap;

pub use global::LockedHeap;
pub use heap::{BlockInfo, Blocks, Heap, DEFAULT_ALIGN, HEAP_MAGIC};

/// Heap usage statistics.
///
/// Counts include block headers. With the `stats` feature disabled the
/// counters are never updated and read as zero.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MemStats {
    /// Bytes currently taken by used blocks
    pub used: usize,
    /// Highest value `used` has reached since initialization
    pub max_used: usize,
}

impl MemStats {
    /// Create zeroed statistics
    pub const fn new() -> Self {
        Self {
            used: 0,
            max_used: 0,
        }
    }

    /// Update statistics after allocation
    pub fn on_alloc(&mut self, bytes: usize) {
        if cfg!(feature = "stats") {
            self.used += bytes;
            if self.used > self.max_used {
                self.max_used = self.used;
            }
        }
    }

    /// Update statistics after deallocation
    pub fn on_free(&mut self, bytes: usize) {
        if cfg!(feature = "stats") {
            self.used = self.used.saturating_sub(bytes);
        }
    }

    /// Utilization of `total` bytes as a percentage (0-100)
    pub fn utilization(&self, total: usize) -> u8 {
        if total == 0 {
            0
        } else {
            ((self.used.min(total) * 100) / total) as u8
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for MemStats {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(
            fmt,
            "MemStats{{ used: {}, max_used: {} }}",
            self.used,
            self.max_used
        );
    }
}
