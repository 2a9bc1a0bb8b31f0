//! First-fit allocator over a caller-supplied memory pool
//!
//! Every block starts with a small header stored in the pool itself:
//!
//! ```text
//! +-------+------+----------+----------+---------------------+
//! | magic | used | prev off | next off | payload ...         |
//! | u16   | u16  | u32      | u32      |                     |
//! +-------+------+----------+----------+---------------------+
//! ```
//!
//! Neighbours are referenced by byte offsets from the start of the pool
//! rather than by pointers, which keeps the header at 12 bytes on both 16-
//! and 32-bit targets. The list ends in a sentinel block that is permanently
//! marked used and whose `prev`/`next` both point at itself.

use core::ops::Range;
use core::ptr::NonNull;

use log::{debug, trace};
use zmos_core::{ZmError, ZmResult};

use crate::MemStats;

/// Default alignment of block payloads and sizes
pub const DEFAULT_ALIGN: usize = 4;

/// Marker stored in every live block header
pub const HEAP_MAGIC: u16 = 0x1EA0;

/// Smallest payload a block is allowed to carry
const MIN_SIZE: usize = 12;

/// Encoded header length before alignment padding
const RAW_HEADER: usize = 12;

const fn align_up(size: usize, align: usize) -> usize {
    (size + align - 1) & !(align - 1)
}

/// Byte offset of a block header inside the pool.
///
/// All header reads and writes go through this type so a corrupted link can
/// never index outside the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct BlockOffset(u32);

impl BlockOffset {
    const START: Self = Self(0);

    fn from_usize(offset: usize) -> Self {
        Self(offset as u32)
    }

    const fn get(self) -> usize {
        self.0 as usize
    }

    fn header_range(self) -> Range<usize> {
        self.get()..self.get() + RAW_HEADER
    }
}

#[derive(Debug, Clone, Copy)]
struct BlockHeader {
    magic: u16,
    used: bool,
    prev: BlockOffset,
    next: BlockOffset,
}

impl BlockHeader {
    fn new(used: bool, prev: BlockOffset, next: BlockOffset) -> Self {
        Self {
            magic: HEAP_MAGIC,
            used,
            prev,
            next,
        }
    }

    fn decode(raw: &[u8]) -> Self {
        let word = |at: usize| u32::from_ne_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]]);
        Self {
            magic: u16::from_ne_bytes([raw[0], raw[1]]),
            used: u16::from_ne_bytes([raw[2], raw[3]]) != 0,
            prev: BlockOffset(word(4)),
            next: BlockOffset(word(8)),
        }
    }

    fn encode(&self, raw: &mut [u8]) {
        raw[0..2].copy_from_slice(&self.magic.to_ne_bytes());
        raw[2..4].copy_from_slice(&(self.used as u16).to_ne_bytes());
        raw[4..8].copy_from_slice(&self.prev.0.to_ne_bytes());
        raw[8..12].copy_from_slice(&self.next.0.to_ne_bytes());
    }
}

/// Fatal heap corruption. Continuing would silently damage other blocks,
/// so the only recovery is a reset.
#[cold]
#[inline(never)]
fn corrupted(what: &str, offset: usize) -> ! {
    panic!("heap corrupted: {} (offset {})", what, offset)
}

/// Snapshot of one block, as yielded by [`Heap::blocks`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Header offset from the start of the pool
    pub offset: usize,
    /// Payload bytes available in the block
    pub size: usize,
    pub used: bool,
}

/// Pool allocator with `ALIGN`-byte granularity.
///
/// `ALIGN` must be a power of two. Payload addresses are `ALIGN`-aligned in
/// absolute terms, not only relative to the pool start.
pub struct Heap<'a, const ALIGN: usize = DEFAULT_ALIGN> {
    /// Aligned part of the caller's region; empty when uninitialized
    pool: &'a mut [u8],
    /// Usable bytes, excluding the first and the sentinel header
    mem_size: usize,
    /// At or before the lowest free block
    lfree: BlockOffset,
    stats: MemStats,
}

impl<'a, const ALIGN: usize> Heap<'a, ALIGN> {
    const VALID_ALIGN: () = assert!(ALIGN.is_power_of_two(), "ALIGN must be a power of two");

    /// Header size rounded up to the alignment
    pub const HEADER: usize = align_up(RAW_HEADER, ALIGN);

    /// Smallest payload handed out, rounded up to the alignment
    pub const MIN_BLOCK: usize = align_up(MIN_SIZE, ALIGN);

    /// Take over `region` as the allocation pool.
    ///
    /// The region is trimmed to `ALIGN` at both ends. If fewer than two
    /// headers fit, the heap stays uninitialized: [`Heap::total`] reads zero
    /// and every allocation fails.
    pub fn new(region: &'a mut [u8]) -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::VALID_ALIGN;

        let begin_addr = region.as_ptr() as usize;
        let head = region.as_ptr().align_offset(ALIGN);
        let end_addr = (begin_addr + region.len()) & !(ALIGN - 1);
        let span = end_addr.saturating_sub(begin_addr + head);

        if head > region.len() || span < 2 * Self::HEADER || span > u32::MAX as usize {
            debug!("heap region of {} bytes is unusable", region.len());
            let len = region.len();
            return Self {
                pool: &mut region[len..],
                mem_size: 0,
                lfree: BlockOffset::START,
                stats: MemStats::new(),
            };
        }

        let mut heap = Self {
            pool: &mut region[head..head + span],
            mem_size: span - 2 * Self::HEADER,
            lfree: BlockOffset::START,
            stats: MemStats::new(),
        };

        let end = heap.end();
        heap.write(BlockOffset::START, BlockHeader::new(false, BlockOffset::START, end));
        heap.write(end, BlockHeader::new(true, end, end));
        debug!("heap ready: {} usable bytes", heap.mem_size);
        heap
    }

    /// Whether the pool was large enough to initialize
    pub fn is_initialized(&self) -> bool {
        !self.pool.is_empty()
    }

    /// Usable pool size in bytes (zero when uninitialized)
    pub fn total(&self) -> usize {
        self.mem_size
    }

    /// Bytes currently taken by used blocks, headers included
    pub fn used(&self) -> usize {
        self.stats.used
    }

    /// High-water mark of [`Heap::used`]
    pub fn max_used(&self) -> usize {
        self.stats.max_used
    }

    pub fn stats(&self) -> MemStats {
        self.stats
    }

    /// Allocate `size` bytes, first-fit from the lowest free block.
    pub fn malloc(&mut self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 || !self.is_initialized() || size > self.mem_size {
            return None;
        }
        let size = align_up(size, ALIGN).max(Self::MIN_BLOCK);
        if size > self.mem_size {
            return None;
        }

        let mut idx = self.lfree;
        while idx.get() <= self.mem_size - size {
            let mut block = self.read(idx);
            let available = self.payload_len(idx, &block);

            if !block.used && available >= size {
                if available >= size + Self::HEADER + Self::MIN_BLOCK {
                    let split = BlockOffset::from_usize(idx.get() + Self::HEADER + size);
                    self.write(split, BlockHeader::new(false, idx, block.next));
                    self.link_prev(block.next, split);
                    block.next = split;
                    self.stats.on_alloc(size + Self::HEADER);
                } else {
                    self.stats.on_alloc(block.next.get() - idx.get());
                }
                block.used = true;
                self.write(idx, block);

                if idx == self.lfree {
                    self.advance_lfree();
                }

                trace!("malloc {} -> block {}", size, idx.get());
                return self.payload_ptr(idx);
            }
            idx = block.next;
        }

        debug!("malloc {} failed: no block large enough", size);
        None
    }

    /// [`Heap::malloc`] with the failure reason.
    ///
    /// A zero size, or one larger than the whole pool, is `InvalidSize`.
    /// A request no free block can hold is `OutOfMemory`.
    pub fn try_malloc(&mut self, size: usize) -> ZmResult<NonNull<u8>> {
        if size == 0 || size > self.mem_size {
            return Err(ZmError::InvalidSize);
        }
        self.malloc(size).ok_or(ZmError::OutOfMemory)
    }

    /// Allocate `count * size` zeroed bytes.
    ///
    /// An overflowing product fails the allocation.
    pub fn calloc(&mut self, count: usize, size: usize) -> Option<NonNull<u8>> {
        let total = count.checked_mul(size)?;
        let ptr = self.malloc(total)?;
        let start = self.used_block(ptr).get() + Self::HEADER;
        self.pool[start..start + total].fill(0);
        Some(ptr)
    }

    /// Return a block to the pool and merge it with free neighbours.
    ///
    /// # Panics
    ///
    /// Halts on a pointer this heap did not hand out, or on a block that is
    /// already free.
    pub fn free(&mut self, ptr: NonNull<u8>) {
        let at = self.used_block(ptr);
        let mut block = self.read(at);
        block.used = false;
        self.write(at, block);

        if at < self.lfree {
            self.lfree = at;
        }
        self.stats.on_free(block.next.get() - at.get());
        trace!("free block {}", at.get());

        self.put_together(at);
    }

    /// Resize an allocation.
    ///
    /// `None` behaves as [`Heap::malloc`] and a zero size as [`Heap::free`].
    /// Shrinking happens in place; growing always moves the data to a fresh
    /// block. On failure the original block is left untouched.
    pub fn realloc(&mut self, ptr: Option<NonNull<u8>>, new_size: usize) -> Option<NonNull<u8>> {
        let ptr = match ptr {
            Some(ptr) => ptr,
            None => return self.malloc(new_size),
        };
        if new_size == 0 {
            self.free(ptr);
            return None;
        }
        if new_size > self.mem_size {
            return None;
        }

        let new_size = align_up(new_size, ALIGN).max(Self::MIN_BLOCK);
        let at = self.used_block(ptr);
        let mut block = self.read(at);
        let size = self.payload_len(at, &block);

        if new_size == size {
            return Some(ptr);
        }

        if new_size + Self::HEADER + Self::MIN_BLOCK <= size {
            let split = BlockOffset::from_usize(at.get() + Self::HEADER + new_size);
            self.write(split, BlockHeader::new(false, at, block.next));
            self.link_prev(block.next, split);
            block.next = split;
            self.write(at, block);

            self.stats.on_free(size - new_size);
            if split < self.lfree {
                self.lfree = split;
            }
            self.put_together(split);
            return Some(ptr);
        }

        if new_size < size {
            // Remainder too small to stand as a block of its own.
            return Some(ptr);
        }

        let moved = self.malloc(new_size)?;
        let src = at.get() + Self::HEADER;
        let dst = self.used_block(moved).get() + Self::HEADER;
        self.pool.copy_within(src..src + size, dst);
        self.free(ptr);
        Some(moved)
    }

    /// Payload bytes available behind `ptr`
    pub fn usable_size(&self, ptr: NonNull<u8>) -> usize {
        let at = self.used_block(ptr);
        let block = self.read(at);
        self.payload_len(at, &block)
    }

    /// Borrow the payload of an allocation
    pub fn payload(&self, ptr: NonNull<u8>) -> &[u8] {
        let at = self.used_block(ptr);
        let block = self.read(at);
        let start = at.get() + Self::HEADER;
        &self.pool[start..start + self.payload_len(at, &block)]
    }

    /// Mutably borrow the payload of an allocation
    pub fn payload_mut(&mut self, ptr: NonNull<u8>) -> &mut [u8] {
        let at = self.used_block(ptr);
        let block = self.read(at);
        let start = at.get() + Self::HEADER;
        let len = self.payload_len(at, &block);
        &mut self.pool[start..start + len]
    }

    /// Walk the block list in address order, sentinel excluded
    pub fn blocks(&self) -> Blocks<'_, 'a, ALIGN> {
        Blocks {
            heap: self,
            at: if self.is_initialized() {
                Some(BlockOffset::START)
            } else {
                None
            },
        }
    }
}

impl<'a, const ALIGN: usize> Heap<'a, ALIGN> {
    /// Offset of the sentinel block
    fn end(&self) -> BlockOffset {
        BlockOffset::from_usize(self.mem_size + Self::HEADER)
    }

    fn read(&self, at: BlockOffset) -> BlockHeader {
        let raw = match self.pool.get(at.header_range()) {
            Some(raw) => raw,
            None => corrupted("block offset outside pool", at.get()),
        };
        let block = BlockHeader::decode(raw);
        if block.magic != HEAP_MAGIC {
            corrupted("bad block magic", at.get());
        }
        block
    }

    fn write(&mut self, at: BlockOffset, block: BlockHeader) {
        match self.pool.get_mut(at.header_range()) {
            Some(raw) => block.encode(raw),
            None => corrupted("block offset outside pool", at.get()),
        }
    }

    /// Erase the magic of a header that was merged away
    fn scrub(&mut self, at: BlockOffset) {
        if let Some(raw) = self.pool.get_mut(at.header_range()) {
            raw[0..2].fill(0);
        }
    }

    fn payload_len(&self, at: BlockOffset, block: &BlockHeader) -> usize {
        match block.next.get().checked_sub(at.get() + Self::HEADER) {
            Some(len) => len,
            None => corrupted("block links run backwards", at.get()),
        }
    }

    fn payload_ptr(&mut self, at: BlockOffset) -> Option<NonNull<u8>> {
        NonNull::new(self.pool.as_mut_ptr().wrapping_add(at.get() + Self::HEADER))
    }

    /// Point `at`'s back link to `prev`; the sentinel always links to itself.
    fn link_prev(&mut self, at: BlockOffset, prev: BlockOffset) {
        if at != self.end() {
            let mut block = self.read(at);
            block.prev = prev;
            self.write(at, block);
        }
    }

    /// Map a payload pointer back to its header, halting unless it names a
    /// used block of this heap.
    fn used_block(&self, ptr: NonNull<u8>) -> BlockOffset {
        let base = self.pool.as_ptr() as usize;
        let addr = ptr.as_ptr() as usize;
        if addr < base + Self::HEADER || addr >= base + self.end().get() {
            corrupted("pointer outside heap", addr.wrapping_sub(base));
        }

        let at = BlockOffset::from_usize(addr - base - Self::HEADER);
        let raw = match self.pool.get(at.header_range()) {
            Some(raw) => raw,
            None => corrupted("block offset outside pool", at.get()),
        };
        let block = BlockHeader::decode(raw);
        if block.magic != HEAP_MAGIC {
            corrupted("bad block magic", at.get());
        }
        if !block.used {
            corrupted("block is not in use", at.get());
        }
        at
    }

    /// Move the free hint past used blocks after allocating from it.
    fn advance_lfree(&mut self) {
        let end = self.end();
        let mut at = self.lfree;
        loop {
            let block = self.read(at);
            if !block.used || at == end {
                break;
            }
            at = block.next;
        }
        self.lfree = at;
    }

    /// Merge a free block with its free neighbours.
    fn put_together(&mut self, at: BlockOffset) {
        let end = self.end();
        let mut block = self.read(at);

        if block.next != at && block.next != end {
            let next = self.read(block.next);
            if !next.used {
                if self.lfree == block.next {
                    self.lfree = at;
                }
                let absorbed = block.next;
                block.next = next.next;
                self.write(at, block);
                self.link_prev(next.next, at);
                self.scrub(absorbed);
            }
        }

        if block.prev != at {
            let mut prev = self.read(block.prev);
            if !prev.used {
                if self.lfree == at {
                    self.lfree = block.prev;
                }
                prev.next = block.next;
                self.write(block.prev, prev);
                self.link_prev(block.next, block.prev);
                self.scrub(at);
            }
        }
    }
}

/// Iterator returned by [`Heap::blocks`]
pub struct Blocks<'h, 'a, const ALIGN: usize> {
    heap: &'h Heap<'a, ALIGN>,
    at: Option<BlockOffset>,
}

impl<const ALIGN: usize> Iterator for Blocks<'_, '_, ALIGN> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<BlockInfo> {
        let at = self.at?;
        if at == self.heap.end() {
            self.at = None;
            return None;
        }
        let block = self.heap.read(at);
        self.at = Some(block.next);
        Some(BlockInfo {
            offset: at.get(),
            size: self.heap.payload_len(at, &block),
            used: block.used,
        })
    }
}
