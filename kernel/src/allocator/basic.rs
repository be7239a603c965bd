//! Region-based basic allocator.
//!
//! A [`BasicAllocator`] owns a list of [`Region`]s obtained from the bare
//! memory manager during boot, or from the VMM once it is up. Each region
//! tracks its own free and allocated node lists; allocation walks the
//! region list for the first one whose biggest free node is large enough,
//! then carves the request from the high end of that node (the region
//! keeps its lowest address fixed, which is what lets an intermediate
//! region still coalesce with whatever sits below it later).

#![allow(dead_code)]

#[cfg(feature = "alloc")]
extern crate alloc;
#[cfg(feature = "alloc")]
use alloc::collections::BTreeMap;
#[cfg(feature = "alloc")]
use alloc::vec::Vec;

#[cfg(feature = "alloc")]
use spin::Mutex;

use crate::error::KernelError;

/// One free run within a region, given as an offset and size in bytes from
/// the region's base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FreeNode {
    offset: usize,
    size: usize,
}

/// A contiguous span of memory the basic allocator carves blocks from.
#[cfg(feature = "alloc")]
pub struct Region {
    base: usize,
    size: usize,
    free: Vec<FreeNode>,
    allocated: BTreeMap<usize, usize>,
}

#[cfg(feature = "alloc")]
impl Region {
    pub fn new(base: usize, size: usize) -> Self {
        let mut free = Vec::new();
        free.push(FreeNode { offset: 0, size });
        Self {
            base,
            size,
            free,
            allocated: BTreeMap::new(),
        }
    }

    pub fn base(&self) -> usize {
        self.base
    }

    pub fn size(&self) -> usize {
        self.size
    }

    fn biggest_free_node(&self) -> usize {
        self.free.iter().map(|n| n.size).max().unwrap_or(0)
    }

    pub fn is_empty_region(&self) -> bool {
        self.allocated.is_empty()
    }

    fn contains(&self, ptr: usize) -> bool {
        ptr >= self.base && ptr < self.base + self.size
    }

    /// Allocate `size` bytes from this region's biggest free node. Exact
    /// fit removes the node outright; otherwise the request is carved from
    /// the node's high end, which keeps the node's own offset unchanged
    /// and only shrinks its size.
    fn allocate(&mut self, size: usize) -> Option<usize> {
        if size == 0 {
            return None;
        }
        let (idx, _) = self
            .free
            .iter()
            .enumerate()
            .max_by_key(|(_, n)| n.size)?;
        if self.free[idx].size < size {
            return None;
        }

        let node = &mut self.free[idx];
        if node.size == size {
            let node = self.free.remove(idx);
            self.allocated.insert(node.offset, size);
            return Some(self.base + node.offset);
        }

        node.size -= size;
        let alloc_offset = node.offset + node.size;
        self.allocated.insert(alloc_offset, size);
        Some(self.base + alloc_offset)
    }

    /// Return a previously allocated block to the free list.
    fn free(&mut self, ptr: usize, size: usize) -> Result<(), KernelError> {
        let offset = ptr - self.base;
        match self.allocated.remove(&offset) {
            Some(allocated_size) if allocated_size == size => {
                self.free.push(FreeNode { offset, size });
                Ok(())
            }
            Some(allocated_size) => {
                // Put it back; the caller's size didn't match our bookkeeping.
                self.allocated.insert(offset, allocated_size);
                Err(KernelError::InvalidArgument {
                    name: "size",
                    value: "does not match the allocation's recorded size",
                })
            }
            None => Err(KernelError::InvalidAddress {
                addr: ptr,
            }),
        }
    }

    /// Merge adjacent free nodes. Run after a burst of frees to keep the
    /// free list from fragmenting into runs that are individually too
    /// small to satisfy anything.
    fn coalesce(&mut self) {
        if self.free.len() < 2 {
            return;
        }
        self.free.sort_by_key(|n| n.offset);
        let mut merged: Vec<FreeNode> = Vec::with_capacity(self.free.len());
        for node in self.free.drain(..) {
            match merged.last_mut() {
                Some(prev) if prev.offset + prev.size == node.offset => {
                    prev.size += node.size;
                }
                _ => merged.push(node),
            }
        }
        self.free = merged;
    }
}

/// Two-tier basic allocator: a list of regions, each carved per
/// [`Region::allocate`]. Regions that become fully empty after a free are
/// dropped from the list (save for the very first one, kept permanently so
/// the allocator never runs out of regions to search), returning their
/// bookkeeping rather than any backing memory — the memory itself stays
/// owned by whoever handed the region to [`BasicAllocator::add_region`].
#[cfg(feature = "alloc")]
pub struct BasicAllocator {
    regions: Mutex<Vec<Region>>,
}

#[cfg(feature = "alloc")]
impl BasicAllocator {
    pub const fn new() -> Self {
        Self {
            regions: Mutex::new(Vec::new()),
        }
    }

    pub fn add_region(&self, base: usize, size: usize) {
        self.regions.lock().push(Region::new(base, size));
    }

    pub fn region_count(&self) -> usize {
        self.regions.lock().len()
    }

    pub fn allocate(&self, size: usize) -> Result<usize, KernelError> {
        let mut regions = self.regions.lock();
        for region in regions.iter_mut() {
            if region.biggest_free_node() >= size {
                if let Some(ptr) = region.allocate(size) {
                    return Ok(ptr);
                }
            }
        }
        Err(KernelError::OutOfMemory {
            requested: size,
            available: regions.iter().map(|r| r.biggest_free_node()).max().unwrap_or(0),
        })
    }

    pub fn free(&self, ptr: usize, size: usize) -> Result<(), KernelError> {
        let mut regions = self.regions.lock();
        let idx = regions
            .iter()
            .position(|r| r.contains(ptr))
            .ok_or(KernelError::InvalidAddress { addr: ptr })?;
        regions[idx].free(ptr, size)?;
        if regions.len() > 1 && regions[idx].is_empty_region() {
            regions.remove(idx);
        }
        Ok(())
    }

    /// Coalesce every region's free list.
    pub fn optimize(&self) {
        for region in self.regions.lock().iter_mut() {
            region.coalesce();
        }
    }
}

#[cfg(all(test, feature = "alloc"))]
mod tests {
    use super::*;

    #[test]
    fn exact_fit_removes_node() {
        let mut region = Region::new(0x1000, 256);
        let ptr = region.allocate(256).unwrap();
        assert_eq!(ptr, 0x1000);
        assert_eq!(region.biggest_free_node(), 0);
    }

    #[test]
    fn partial_fit_carves_high_end() {
        let mut region = Region::new(0x1000, 256);
        let ptr = region.allocate(64).unwrap();
        // High end of [0, 256) is [192, 256); base-relative offset 192.
        assert_eq!(ptr, 0x1000 + 192);
        assert_eq!(region.biggest_free_node(), 192);
    }

    #[test]
    fn free_then_coalesce_restores_capacity() {
        let mut region = Region::new(0x1000, 256);
        let a = region.allocate(128).unwrap();
        let b = region.allocate(128).unwrap();
        region.free(a, 128).unwrap();
        region.free(b, 128).unwrap();
        assert_eq!(region.free.len(), 2);
        region.coalesce();
        assert_eq!(region.free.len(), 1);
        assert_eq!(region.biggest_free_node(), 256);
    }

    #[test]
    fn allocator_picks_first_sufficient_region() {
        let alloc = BasicAllocator::new();
        alloc.add_region(0x1000, 64);
        alloc.add_region(0x2000, 256);
        let ptr = alloc.allocate(128).unwrap();
        assert!(ptr >= 0x2000 && ptr < 0x2000 + 256);
    }

    #[test]
    fn out_of_memory_when_nothing_fits() {
        let alloc = BasicAllocator::new();
        alloc.add_region(0x1000, 64);
        assert!(matches!(
            alloc.allocate(128),
            Err(KernelError::OutOfMemory { .. })
        ));
    }

    #[test]
    fn free_with_mismatched_size_is_rejected() {
        let alloc = BasicAllocator::new();
        alloc.add_region(0x1000, 256);
        let ptr = alloc.allocate(64).unwrap();
        assert!(matches!(
            alloc.free(ptr, 32),
            Err(KernelError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn extra_region_drops_once_fully_freed() {
        let alloc = BasicAllocator::new();
        alloc.add_region(0x1000, 64);
        alloc.add_region(0x2000, 64);
        assert_eq!(alloc.region_count(), 2);
        let ptr = alloc.allocate(64).unwrap();
        alloc.free(ptr, 64).unwrap();
        assert_eq!(alloc.region_count(), 1);
    }
}
