//! Heap allocator: chunked arenas with an address-sorted free list
//!
//! Memory is obtained from the OS in page-aligned chunks (`mmap`). Every
//! allocation inside a chunk is a block: a 16-byte header followed by the
//! payload. Blocks are laid out contiguously, so `block + header + size`
//! reaches the next header; a zero-size EndOfChunk sentinel terminates the
//! walk. The free list is singly linked through the first payload word of
//! each free block and kept sorted by address so freeing can coalesce with
//! both neighbors.
//!
//! ```text
//! chunk:  [Hhdr][Bhdr|payload][Bhdr|payload]...[Bhdr sentinel]
//!                ^16-aligned   ^16-aligned
//! ```
//!
//! The collector reuses the block header's color field; a freshly allocated
//! block is colored with the current mutator color supplied by the caller.

use std::ptr;

/// Alignment quantum for payloads.
pub const ALIGN: usize = 16;

/// Block header size. Must equal [`ALIGN`] so payloads stay aligned.
pub const BHDR_SIZE: usize = std::mem::size_of::<Bhdr>();

pub const MAGIC_ALLOC: u32 = 0xA110_C8ED;
pub const MAGIC_FREE: u32 = 0xF4EE_B10C;
pub const MAGIC_END: u32 = 0xE4D0_FC4C;
/// Auxiliary storage (string runes, table slot arrays): owned by another
/// cell, skipped by the collector's linear walk.
pub const MAGIC_IMMUTABLE: u32 = 0x133D_A7A0;

/// The transient fourth color: enqueued for the marker.
pub const PROPAGATOR: u32 = 3;

/// Per-block header. Free blocks store their successor pointer in the
/// first payload word.
#[repr(C)]
pub struct Bhdr {
    pub magic: u32,
    pub color: u32,
    pub size: usize,
}

const _: () = assert!(BHDR_SIZE == ALIGN, "block header must preserve payload alignment");

/// Per-chunk header; chunks form a linked list.
#[repr(C)]
pub struct Hhdr {
    /// Usable bytes after this header (block area including sentinel).
    pub size: usize,
    pub next: *mut Hhdr,
}

const HHDR_SIZE: usize = std::mem::size_of::<Hhdr>();
const _: () = assert!(HHDR_SIZE == ALIGN, "chunk header must preserve payload alignment");

/// Header to payload.
pub unsafe fn b2d(b: *mut Bhdr) -> *mut u8 {
    unsafe { b.add(1).cast() }
}

/// Payload to header.
pub unsafe fn d2b(d: *mut u8) -> *mut Bhdr {
    unsafe { d.cast::<Bhdr>().sub(1) }
}

/// Next block header in chunk order.
pub unsafe fn b2nb(b: *mut Bhdr) -> *mut Bhdr {
    unsafe { b2d(b).add((*b).size).cast() }
}

/// First block of a chunk.
pub unsafe fn chunk_first_block(h: *mut Hhdr) -> *mut Bhdr {
    unsafe { h.add(1).cast() }
}

unsafe fn fb_next(b: *mut Bhdr) -> *mut Bhdr {
    unsafe { *b2d(b).cast::<*mut Bhdr>() }
}

unsafe fn set_fb_next(b: *mut Bhdr, next: *mut Bhdr) {
    unsafe { *b2d(b).cast::<*mut Bhdr>() = next }
}

/// Default minimum chunk expansion (bytes) before page rounding.
pub const DEFAULT_MIN_EXPANSION: usize = 512 * 1024;
/// Default over-allocation percentage applied to each expansion request.
pub const DEFAULT_OVER_PERCENT: usize = 30;

pub struct Heap {
    chunks: *mut Hhdr,
    fl_head: *mut Bhdr,
    page_size: usize,
    pub min_expansion: usize,
    pub over_percent: usize,
}

impl Heap {
    pub fn new(min_expansion: usize, over_percent: usize) -> Heap {
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        let page_size = if page_size > 0 { page_size as usize } else { 4096 };
        Heap {
            chunks: ptr::null_mut(),
            fl_head: ptr::null_mut(),
            page_size,
            min_expansion,
            over_percent,
        }
    }

    /// Allocate a block of at least `size` bytes, colored `color` and
    /// marked Allocated. Returns the payload pointer, or null if the OS
    /// refuses to grow the heap.
    pub fn alloc(&mut self, size: usize, color: u32) -> *mut u8 {
        let size = round_size(size);
        let blk = unsafe { self.fl_alloc(size, color) };
        if !blk.is_null() {
            return blk;
        }
        if !self.expand(size, color) {
            return ptr::null_mut();
        }
        unsafe { self.fl_alloc(size, color) }
    }

    /// Allocate auxiliary storage invisible to the collector's walk.
    /// The owning cell's sweeper is responsible for freeing it.
    pub fn alloc_immutable(&mut self, size: usize, color: u32) -> *mut u8 {
        let d = self.alloc(size, color);
        if !d.is_null() {
            unsafe { (*d2b(d)).magic = MAGIC_IMMUTABLE };
        }
        d
    }

    /// Return a payload to the free list, coalescing with any adjacent
    /// free neighbor.
    pub fn free(&mut self, payload: *mut u8) {
        unsafe {
            let h = d2b(payload);
            debug_assert!((*h).magic == MAGIC_ALLOC || (*h).magic == MAGIC_IMMUTABLE);
            (*h).magic = MAGIC_FREE;
            self.fl_insert(h);
        }
    }

    /// First-fit allocation. The head block gets a fast path: taken whole
    /// when its slack cannot hold another header, carved from the high end
    /// otherwise. Carving from the high end leaves the free remainder in
    /// place on the list, so no relinking is needed.
    unsafe fn fl_alloc(&mut self, size: usize, color: u32) -> *mut u8 {
        unsafe {
            if self.fl_head.is_null() {
                return ptr::null_mut();
            }

            let head = self.fl_head;
            if (*head).size >= size && (*head).size <= size + BHDR_SIZE {
                self.fl_head = fb_next(head);
                return Self::take_block(head, color);
            }
            if (*head).size > size + BHDR_SIZE {
                return Self::carve_block(head, size, color);
            }

            let mut prev = head;
            let mut cur = fb_next(prev);
            while !cur.is_null() {
                if (*cur).size >= size && (*cur).size <= size + BHDR_SIZE {
                    set_fb_next(prev, fb_next(cur));
                    return Self::take_block(cur, color);
                }
                if (*cur).size > size + BHDR_SIZE {
                    return Self::carve_block(cur, size, color);
                }
                prev = cur;
                cur = fb_next(cur);
            }
            ptr::null_mut()
        }
    }

    unsafe fn take_block(blk: *mut Bhdr, color: u32) -> *mut u8 {
        unsafe {
            (*blk).magic = MAGIC_ALLOC;
            (*blk).color = color;
            b2d(blk)
        }
    }

    /// Split `size + header` bytes off the high end of `blk`.
    unsafe fn carve_block(blk: *mut Bhdr, size: usize, color: u32) -> *mut u8 {
        unsafe {
            (*blk).size -= size + BHDR_SIZE;
            let cut = b2nb(blk);
            (*cut).size = size;
            Self::take_block(cut, color)
        }
    }

    /// Address-sorted insert with two-sided coalescing. Blocks in distinct
    /// chunks can never abut: an EndOfChunk sentinel (never free) sits
    /// between them.
    unsafe fn fl_insert(&mut self, blk: *mut Bhdr) {
        unsafe {
            let mut prev: *mut Bhdr = ptr::null_mut();
            let mut cur = self.fl_head;
            while !cur.is_null() && cur < blk {
                prev = cur;
                cur = fb_next(cur);
            }

            // merge the successor into blk when they abut
            if !cur.is_null() && b2nb(blk) == cur {
                (*blk).size += BHDR_SIZE + (*cur).size;
                set_fb_next(blk, fb_next(cur));
            } else {
                set_fb_next(blk, cur);
            }

            if prev.is_null() {
                self.fl_head = blk;
            } else if b2nb(prev) == blk {
                // merge blk into its predecessor
                (*prev).size += BHDR_SIZE + (*blk).size;
                set_fb_next(prev, fb_next(blk));
            } else {
                set_fb_next(prev, blk);
            }
        }
    }

    /// Obtain one new chunk big enough for `request` bytes plus headroom.
    /// The chunk is formatted as a single free block and a sentinel, then
    /// pushed onto the free list.
    fn expand(&mut self, request: usize, color: u32) -> bool {
        let mut over = request + (request / 100) * self.over_percent + 2 * BHDR_SIZE;
        if over < self.min_expansion {
            over = self.min_expansion;
        }
        let total = round_to(over + HHDR_SIZE, self.page_size);

        let mem = unsafe {
            libc::mmap(
                ptr::null_mut(),
                total,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if mem == libc::MAP_FAILED {
            tracing::error!(request, total, "heap expansion failed: mmap refused");
            return false;
        }
        tracing::debug!(total, "heap chunk mapped");

        unsafe {
            let h = mem.cast::<Hhdr>();
            (*h).size = total - HHDR_SIZE;
            (*h).next = self.chunks;
            self.chunks = h;

            let blk = chunk_first_block(h);
            (*blk).magic = MAGIC_FREE;
            (*blk).color = color;
            (*blk).size = total - HHDR_SIZE - 2 * BHDR_SIZE;

            let tail = b2nb(blk);
            (*tail).magic = MAGIC_END;
            (*tail).color = color;
            (*tail).size = 0;

            self.fl_insert(blk);
        }
        true
    }

    /// Head of the chunk list, for the collector's linear walk.
    pub fn first_chunk(&self) -> *mut Hhdr {
        self.chunks
    }

    pub fn chunk_count(&self) -> usize {
        let mut n = 0;
        let mut h = self.chunks;
        while !h.is_null() {
            n += 1;
            h = unsafe { (*h).next };
        }
        n
    }

    /// Number of blocks on the free list.
    pub fn free_block_count(&self) -> usize {
        let mut n = 0;
        let mut b = self.fl_head;
        while !b.is_null() {
            n += 1;
            b = unsafe { fb_next(b) };
        }
        n
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        let mut h = self.chunks;
        while !h.is_null() {
            unsafe {
                let next = (*h).next;
                let total = (*h).size + HHDR_SIZE;
                libc::munmap(h.cast(), total);
                h = next;
            }
        }
    }
}

fn round_size(size: usize) -> usize {
    round_to(size.max(ALIGN), ALIGN)
}

fn round_to(n: usize, quantum: usize) -> usize {
    n.div_ceil(quantum) * quantum
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payloads_are_aligned_and_sized() {
        let mut heap = Heap::new(DEFAULT_MIN_EXPANSION, DEFAULT_OVER_PERCENT);
        for req in [1usize, 8, 16, 17, 24, 100, 4096] {
            let p = heap.alloc(req, 0);
            assert!(!p.is_null());
            assert_eq!(p as usize % ALIGN, 0, "payload for {req} not 16-aligned");
            let reported = unsafe { (*d2b(p)).size };
            assert!(reported >= req, "header reports {reported} < requested {req}");
        }
    }

    #[test]
    fn free_everything_coalesces_to_one_block_per_chunk() {
        let mut heap = Heap::new(64 * 1024, DEFAULT_OVER_PERCENT);
        let mut blocks = Vec::new();
        for i in 0..200 {
            let p = heap.alloc(16 + (i % 7) * 16, 0);
            assert!(!p.is_null());
            blocks.push(p);
        }
        // free in a scrambled order to exercise both coalescing sides
        blocks.reverse();
        let (odd, even): (Vec<_>, Vec<_>) =
            blocks.into_iter().enumerate().partition(|(i, _)| i % 2 == 1);
        for (_, p) in odd.into_iter().chain(even) {
            heap.free(p);
        }
        assert_eq!(heap.free_block_count(), heap.chunk_count());
    }

    #[test]
    fn freeing_never_leaves_adjacent_free_blocks() {
        let mut heap = Heap::new(64 * 1024, DEFAULT_OVER_PERCENT);
        let a = heap.alloc(32, 0);
        let b = heap.alloc(32, 0);
        let c = heap.alloc(32, 0);
        heap.free(a);
        heap.free(c);
        heap.free(b); // middle free must fuse all three
        // walk the free list checking no block's end touches the next
        unsafe {
            let mut cur = heap.fl_head;
            while !cur.is_null() {
                let next = fb_next(cur);
                if !next.is_null() {
                    assert_ne!(b2nb(cur), next, "adjacent free blocks not coalesced");
                }
                cur = next;
            }
        }
    }

    #[test]
    fn carving_comes_from_the_high_end() {
        let mut heap = Heap::new(64 * 1024, DEFAULT_OVER_PERCENT);
        let first = heap.alloc(64, 0);
        let second = heap.alloc(64, 0);
        // both carved from the same big free block: the second sits below
        assert!(second < first);
    }

    #[test]
    fn exhausted_heap_expands_with_new_chunk() {
        let mut heap = Heap::new(8 * 1024, 0);
        let mut got = 0;
        for _ in 0..64 {
            if !heap.alloc(1024, 0).is_null() {
                got += 1;
            }
        }
        assert_eq!(got, 64);
        assert!(heap.chunk_count() >= 2);
    }
}
