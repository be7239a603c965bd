//! Two-tier kernel allocator.
//!
//! This sits alongside `mm::heap`'s `#[global_allocator]`, not in place of
//! it: `mm::heap` backs ordinary `Box`/`Vec`/`alloc::collections` use
//! throughout the kernel, while this module is the explicit service API a
//! subsystem calls when it wants the basic/slab failure contract directly
//! (propagated `OutOfMemory` rather than an infallible-looking `alloc`
//! panic, slab's stride-uniform re-allocation refusal, and corruption
//! detection via `optimize`).
//!
//! [`basic::BasicAllocator`] carves arbitrarily-sized blocks out of
//! regions; [`slab::Slab`] caches small, fixed-size objects below
//! [`SLAB_SIZE_CLASSES`]'s largest class, growing itself one block at a
//! time from the basic tier on demand. Larger requests go straight to the
//! basic tier.

#![allow(dead_code)]

pub mod basic;
pub mod slab;

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(feature = "alloc")]
use basic::BasicAllocator;
#[cfg(feature = "alloc")]
use slab::{Slab, SlabError};

use crate::error::KernelError;

/// Object sizes (in bytes) the slab tier caches directly; a request larger
/// than the biggest class here is served by the basic allocator instead.
const SLAB_SIZE_CLASSES: [usize; 8] = [16, 32, 64, 128, 256, 512, 1024, 2048];

/// Number of objects carved out of each block a slab grows itself by.
const SLAB_BLOCK_OBJECTS: usize = 64;

#[cfg(feature = "alloc")]
pub struct KernelAllocator {
    basic: BasicAllocator,
    slabs: [Slab; SLAB_SIZE_CLASSES.len()],
}

#[cfg(feature = "alloc")]
impl KernelAllocator {
    pub const fn new() -> Self {
        Self {
            basic: BasicAllocator::new(),
            slabs: [
                Slab::new(SLAB_SIZE_CLASSES[0], 8),
                Slab::new(SLAB_SIZE_CLASSES[1], 8),
                Slab::new(SLAB_SIZE_CLASSES[2], 8),
                Slab::new(SLAB_SIZE_CLASSES[3], 8),
                Slab::new(SLAB_SIZE_CLASSES[4], 8),
                Slab::new(SLAB_SIZE_CLASSES[5], 8),
                Slab::new(SLAB_SIZE_CLASSES[6], 8),
                Slab::new(SLAB_SIZE_CLASSES[7], 8),
            ],
        }
    }

    /// Register a region of memory (from the bare-memory manager at boot,
    /// or the VMM once it is up) for the basic tier to carve blocks from.
    pub fn add_region(&self, base: usize, size: usize) {
        self.basic.add_region(base, size);
    }

    fn size_class(size: usize) -> Option<usize> {
        SLAB_SIZE_CLASSES.iter().position(|&c| size <= c)
    }

    pub fn alloc(&self, size: usize) -> Result<usize, KernelError> {
        if size == 0 {
            return Err(KernelError::InvalidArgument {
                name: "size",
                value: "zero-length allocation",
            });
        }
        match Self::size_class(size) {
            Some(class_idx) => self.alloc_from_slab(class_idx, size),
            None => self.basic.allocate(size),
        }
    }

    fn alloc_from_slab(&self, class_idx: usize, requested: usize) -> Result<usize, KernelError> {
        let slab = &self.slabs[class_idx];
        match slab.allocate() {
            Ok(ptr) => Ok(ptr),
            Err(SlabError::OutOfMemory) => {
                let block_size = slab.object_size() * SLAB_BLOCK_OBJECTS;
                let block_base = self.basic.allocate(block_size)?;
                // SAFETY: `block_base..block_base + block_size` was just
                // carved from the basic allocator and handed to nobody else.
                unsafe { slab.add_block(block_base, block_size) };
                slab.allocate().map_err(|_| KernelError::OutOfMemory {
                    requested,
                    available: 0,
                })
            }
            Err(SlabError::InvalidArgument) | Err(SlabError::NotOwned) => {
                Err(KernelError::InvalidArgument {
                    name: "slab_object",
                    value: "operation not supported by this allocator",
                })
            }
        }
    }

    pub fn free(&self, ptr: usize, size: usize) -> Result<(), KernelError> {
        match Self::size_class(size) {
            Some(class_idx) => self.slabs[class_idx]
                .free(ptr)
                .map_err(|_| KernelError::InvalidAddress { addr: ptr }),
            None => self.basic.free(ptr, size),
        }
    }

    /// Run corruption detection and free-list coalescing across every
    /// tier. Panics (per the slab tier's own contract, see
    /// [`slab::Slab::optimize`]) if a free slot's magic word was
    /// overwritten.
    pub fn optimize(&self) {
        self.basic.optimize();
        for slab in &self.slabs {
            slab.optimize();
        }
    }
}

#[cfg(feature = "alloc")]
static KERNEL_ALLOCATOR: KernelAllocator = KernelAllocator::new();

/// Register the first region (typically a range handed back by the bare
/// memory manager right after frame allocator init) for the kernel
/// allocator to carve from.
#[cfg(feature = "alloc")]
pub fn init(base: usize, size: usize) {
    KERNEL_ALLOCATOR.add_region(base, size);
    crate::println!(
        "[ALLOC] kernel allocator: {} KiB region at {:#x}",
        size / 1024,
        base
    );
}

#[cfg(feature = "alloc")]
pub fn add_region(base: usize, size: usize) {
    KERNEL_ALLOCATOR.add_region(base, size);
}

#[cfg(feature = "alloc")]
pub fn alloc(size: usize) -> Result<usize, KernelError> {
    KERNEL_ALLOCATOR.alloc(size)
}

#[cfg(feature = "alloc")]
pub fn free(ptr: usize, size: usize) -> Result<(), KernelError> {
    KERNEL_ALLOCATOR.free(ptr, size)
}

#[cfg(feature = "alloc")]
pub fn optimize() {
    KERNEL_ALLOCATOR.optimize();
}

#[cfg(all(test, feature = "alloc"))]
mod tests {
    use super::*;

    #[test]
    fn small_request_routes_through_slab_tier() {
        let alloc = KernelAllocator::new();
        alloc.add_region(0x1000_0000, 1 << 20);
        let ptr = alloc.alloc(24).unwrap();
        assert_eq!(alloc.slabs[1].block_count(), 1); // 32-byte class
        alloc.free(ptr, 24).unwrap();
    }

    #[test]
    fn large_request_routes_through_basic_tier() {
        let alloc = KernelAllocator::new();
        alloc.add_region(0x1000_0000, 1 << 20);
        let ptr = alloc.alloc(4096).unwrap();
        assert!(ptr >= 0x1000_0000 && ptr < 0x1000_0000 + (1 << 20));
        alloc.free(ptr, 4096).unwrap();
    }

    #[test]
    fn zero_size_alloc_is_rejected() {
        let alloc = KernelAllocator::new();
        assert!(matches!(
            alloc.alloc(0),
            Err(KernelError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn slab_grows_itself_on_demand() {
        let alloc = KernelAllocator::new();
        alloc.add_region(0x2000_0000, 1 << 20);
        // One block covers SLAB_BLOCK_OBJECTS objects; request one more to
        // force a second on-demand growth.
        let mut ptrs = alloc::vec::Vec::new();
        for _ in 0..(SLAB_BLOCK_OBJECTS + 1) {
            ptrs.push(alloc.alloc(16).unwrap());
        }
        assert_eq!(alloc.slabs[0].block_count(), 2);
        for p in ptrs {
            alloc.free(p, 16).unwrap();
        }
    }
}
