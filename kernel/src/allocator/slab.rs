//! Bounded-size slab allocator.
//!
//! A [`Slab`] caches objects of one fixed size, carved out of blocks
//! obtained from [`super::basic::BasicAllocator`]. Every free slot has its
//! first eight bytes overwritten with [`FREE_MAGIC`]; [`Slab::optimize`]
//! walks the free list and panics with a block dump the moment one of
//! those words has been clobbered, which is the only way a slab detects
//! a use-after-free write into memory it still considers free.
//!
//! Re-allocation (changing an existing object's size class in place) is
//! not supported: a slab's whole point is stride-uniform objects, and
//! letting one object migrate size classes would mean either leaving a
//! hole in its old slab or growing past the stride every other object in
//! the new slab was sized for. Callers that need to grow an allocation
//! free the old object and allocate a new one.

#![allow(dead_code)]

#[cfg(feature = "alloc")]
extern crate alloc;
#[cfg(feature = "alloc")]
use alloc::vec::Vec;

#[cfg(feature = "alloc")]
use spin::Mutex;

/// Written into the first `size_of::<u64>()` bytes of every free object;
/// read back and checked the next time that slot would be reused or
/// during [`Slab::optimize`].
const FREE_MAGIC: u64 = 0xDEAD_C0DE_FEED_FACE;

const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

#[cfg(feature = "alloc")]
struct SlabBlock {
    base: usize,
    object_count: usize,
    free_indices: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlabError {
    /// The operation is not supported by this allocator (e.g. re-allocation).
    InvalidArgument,
    OutOfMemory,
    /// The caller's pointer does not fall within any block this slab owns.
    NotOwned,
}

/// A fixed-size object cache.
#[cfg(feature = "alloc")]
pub struct Slab {
    object_size: usize,
    align: usize,
    blocks: Mutex<Vec<SlabBlock>>,
}

#[cfg(feature = "alloc")]
impl Slab {
    pub const fn new(object_size: usize, align: usize) -> Self {
        let min = core::mem::size_of::<u64>();
        let object_size = if object_size < min { min } else { object_size };
        Self {
            object_size,
            align,
            blocks: Mutex::new(Vec::new()),
        }
    }

    pub fn object_size(&self) -> usize {
        self.object_size
    }

    fn stride(&self) -> usize {
        align_up(self.object_size, self.align)
    }

    /// Add a backing block (already allocated elsewhere — the basic
    /// allocator, or a frame handed straight from the VMM) carved into
    /// fixed-stride objects, each stamped with [`FREE_MAGIC`].
    ///
    /// # Safety
    /// `base` must point to at least `size` owned, writable bytes that
    /// nothing else reads or writes for the lifetime of this slab.
    pub unsafe fn add_block(&self, base: usize, size: usize) {
        let stride = self.stride();
        let count = size / stride;
        let mut free_indices = Vec::with_capacity(count);
        for i in (0..count).rev() {
            let addr = base + i * stride;
            (addr as *mut u64).write_volatile(FREE_MAGIC);
            free_indices.push(i);
        }
        self.blocks.lock().push(SlabBlock {
            base,
            object_count: count,
            free_indices,
        });
    }

    pub fn block_count(&self) -> usize {
        self.blocks.lock().len()
    }

    /// Take the next free slot, if any block has one. Does not itself grow
    /// the slab; callers needing growth-on-demand add a block first (see
    /// `allocator::KernelAllocator::alloc`).
    pub fn allocate(&self) -> Result<usize, SlabError> {
        let stride = self.stride();
        let mut blocks = self.blocks.lock();
        for block in blocks.iter_mut() {
            if let Some(idx) = block.free_indices.pop() {
                return Ok(block.base + idx * stride);
            }
        }
        Err(SlabError::OutOfMemory)
    }

    /// Re-allocation is unsupported; slab objects are always handed back at
    /// their configured stride.
    pub fn reallocate(&self, _ptr: usize, _new_size: usize) -> Result<usize, SlabError> {
        Err(SlabError::InvalidArgument)
    }

    pub fn free(&self, ptr: usize) -> Result<(), SlabError> {
        let stride = self.stride();
        let mut blocks = self.blocks.lock();
        for block in blocks.iter_mut() {
            if ptr >= block.base && ptr < block.base + block.object_count * stride {
                let idx = (ptr - block.base) / stride;
                // SAFETY: `ptr` falls within this block's carved range at
                // an object-aligned offset, and the caller is surrendering
                // ownership of it back to the slab.
                unsafe {
                    (ptr as *mut u64).write_volatile(FREE_MAGIC);
                }
                block.free_indices.push(idx);
                return Ok(());
            }
        }
        Err(SlabError::NotOwned)
    }

    /// Walk every free slot and confirm its magic word is intact. A slab
    /// has no adjacent-node coalescing to do (every object in a block is
    /// already the same stride), so this is the slab's whole `optimize`
    /// contract: corruption detection.
    ///
    /// # Panics
    /// Panics with the offending block's base and offset if any free
    /// slot's magic word has been overwritten. Corruption here means
    /// something wrote through a pointer after freeing it, which is not a
    /// condition this allocator can recover from cleanly.
    pub fn optimize(&self) {
        let stride = self.stride();
        let blocks = self.blocks.lock();
        for block in blocks.iter() {
            for &idx in &block.free_indices {
                let addr = block.base + idx * stride;
                // SAFETY: `addr` is a free slot within a block this slab owns.
                let word = unsafe { (addr as *const u64).read_volatile() };
                if word != FREE_MAGIC {
                    panic!(
                        "slab corruption: object_size={} block_base=0x{:x} offset=0x{:x} expected=0x{:x} found=0x{:x}",
                        self.object_size, block.base, addr, FREE_MAGIC, word
                    );
                }
            }
        }
    }
}

#[cfg(all(test, feature = "alloc"))]
mod tests {
    use super::*;

    /// Leaks a byte buffer and returns its base address for use as slab
    /// backing memory; acceptable in tests, never used outside them.
    fn backing_block(object_count: usize, stride: usize) -> usize {
        let mut buf = alloc::vec![0u8; object_count * stride];
        let base = buf.as_mut_ptr() as usize;
        core::mem::forget(buf);
        base
    }

    #[test]
    fn allocate_and_free_round_trip() {
        let slab = Slab::new(32, 8);
        let base = backing_block(4, slab.stride());
        unsafe { slab.add_block(base, 4 * slab.stride()) };

        let a = slab.allocate().unwrap();
        let b = slab.allocate().unwrap();
        assert_ne!(a, b);
        slab.free(a).unwrap();
        slab.free(b).unwrap();
        slab.optimize();
    }

    #[test]
    fn exhausted_slab_reports_out_of_memory() {
        let slab = Slab::new(16, 8);
        let base = backing_block(1, slab.stride());
        unsafe { slab.add_block(base, slab.stride()) };

        let _only = slab.allocate().unwrap();
        assert!(matches!(slab.allocate(), Err(SlabError::OutOfMemory)));
    }

    #[test]
    fn reallocate_is_always_rejected() {
        let slab = Slab::new(16, 8);
        assert!(matches!(
            slab.reallocate(0x1000, 32),
            Err(SlabError::InvalidArgument)
        ));
    }

    #[test]
    fn free_of_foreign_pointer_is_rejected() {
        let slab = Slab::new(16, 8);
        let base = backing_block(1, slab.stride());
        unsafe { slab.add_block(base, slab.stride()) };
        assert!(matches!(slab.free(0xDEAD_0000), Err(SlabError::NotOwned)));
    }

    #[test]
    #[should_panic(expected = "slab corruption")]
    fn corrupted_free_slot_panics_on_optimize() {
        let slab = Slab::new(16, 8);
        let base = backing_block(1, slab.stride());
        unsafe { slab.add_block(base, slab.stride()) };
        // Clobber the only free slot's magic word directly, simulating a
        // stray write after the object was freed.
        unsafe {
            (base as *mut u64).write_volatile(0);
        }
        slab.optimize();
    }
}
