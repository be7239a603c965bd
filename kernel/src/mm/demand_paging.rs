//! Demand Paging and Copy-on-Write (COW) Manager
//!
//! Provides infrastructure for lazy page allocation and COW fork support.
//!
//! ## Demand Paging
//! Pages can be registered as "lazy" mappings via [`register_lazy`]. When
//! a page fault hits a lazy-mapped address, the manager allocates a physical
//! frame and returns it (along with the appropriate flags) so the caller can
//! install the mapping in the page table.
//!
//! ## Copy-on-Write
//! [`CowTable`] tracks shared physical frames with reference counts. When a
//! COW page is written, the fault handler calls
//! [`DemandPagingManager::handle_cow_fault`] to allocate a private copy and
//! decrement the shared reference count.

#![allow(dead_code)]

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(feature = "alloc")]
use alloc::collections::BTreeMap;
#[cfg(feature = "alloc")]
use alloc::vec;
#[cfg(feature = "alloc")]
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use spin::Mutex;

use crate::{
    error::KernelError,
    mm::{FrameNumber, PageFlags, FRAME_ALLOCATOR, PAGE_SIZE},
};

// ===========================================================================
// Lazy Mapping Types
// ===========================================================================

/// How a lazy page is backed when finally faulted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackingType {
    /// Anonymous memory (zero-filled on first access).
    Anonymous,
    /// File-backed memory (load from inode + offset).
    FileBacked {
        /// Inode number of the backing file.
        inode: u64,
        /// Byte offset into the file for this mapping.
        offset: u64,
    },
}

/// A region of virtual address space registered for demand paging.
///
/// No physical frames are allocated when a lazy mapping is created.
/// The first access triggers a page fault, which the demand paging
/// manager resolves by allocating a frame and returning it.
#[cfg(feature = "alloc")]
pub struct LazyMapping {
    /// Start virtual address (page-aligned).
    pub start_vaddr: usize,
    /// Size in bytes (multiple of PAGE_SIZE).
    pub size: usize,
    /// Page flags to apply when the page is finally mapped.
    pub flags: PageFlags,
    /// Backing type for this mapping.
    pub backing: BackingType,
    /// Per-page tracking: true if the page has been faulted in.
    faulted_in: Vec<bool>,
}

#[cfg(feature = "alloc")]
impl LazyMapping {
    /// Create a new lazy mapping.
    pub fn new(start_vaddr: usize, size: usize, flags: PageFlags, backing: BackingType) -> Self {
        let page_count = size.div_ceil(PAGE_SIZE);
        Self {
            start_vaddr,
            size,
            flags,
            backing,
            faulted_in: vec![false; page_count],
        }
    }

    /// Check whether a virtual address falls within this mapping.
    pub fn contains(&self, vaddr: usize) -> bool {
        vaddr >= self.start_vaddr && vaddr < self.start_vaddr + self.size
    }

    /// Page index for a given virtual address within this mapping.
    fn page_index(&self, vaddr: usize) -> usize {
        (vaddr - self.start_vaddr) / PAGE_SIZE
    }
}

// ===========================================================================
// Copy-on-Write Table
// ===========================================================================

/// Reference count on a physical frame shared copy-on-write by two or more
/// address spaces.
pub struct CowEntry {
    /// Number of address spaces whose page tables currently point at this
    /// frame with the `COW` software bit set.
    pub ref_count: AtomicU32,
}

/// Table of COW-shared frames, keyed by the *physical* frame they cover.
///
/// Keying by physical frame (rather than by the virtual address a single
/// process happens to map it at) is what makes the table safe to share
/// globally across every address space: physical frame numbers are unique
/// kernel-wide, while the same virtual address is reused by every process.
#[cfg(feature = "alloc")]
#[derive(Default)]
pub struct CowTable {
    entries: BTreeMap<FrameNumber, CowEntry>,
}

#[cfg(feature = "alloc")]
impl CowTable {
    /// Create an empty COW table.
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Record that `frame` now has one more COW mapping pointing at it.
    /// The first call after a frame becomes shared must be balanced by two
    /// matching `release` calls (one per sharing address space).
    pub fn share(&mut self, frame: FrameNumber) {
        self.entries
            .entry(frame)
            .and_modify(|e| {
                e.ref_count.fetch_add(1, Ordering::AcqRel);
            })
            .or_insert_with(|| CowEntry {
                ref_count: AtomicU32::new(2),
            });
    }

    /// Drop one COW mapping of `frame`. Returns true if that was the last
    /// mapping (the caller is now the frame's sole, non-shared owner).
    pub fn release(&mut self, frame: FrameNumber) -> bool {
        let Some(entry) = self.entries.get(&frame) else {
            return true;
        };
        let prev = entry.ref_count.fetch_sub(1, Ordering::AcqRel);
        if prev <= 1 {
            self.entries.remove(&frame);
            true
        } else {
            false
        }
    }

    /// Check whether a frame is currently COW-shared.
    pub fn is_cow(&self, frame: FrameNumber) -> bool {
        self.entries.contains_key(&frame)
    }
}

// ===========================================================================
// Demand Paging Manager
// ===========================================================================

/// Manages lazy mappings and COW state.
///
/// The manager does NOT directly modify page tables. Instead, its methods
/// return allocation results (frame number + flags) that the caller uses
/// to install the actual mapping via the VAS / page table infrastructure.
#[cfg(feature = "alloc")]
pub struct DemandPagingManager {
    /// Registered lazy mappings keyed by start address.
    lazy_mappings: BTreeMap<usize, LazyMapping>,
    /// COW-shared frame tracking.
    pub cow_table: CowTable,
}

#[cfg(feature = "alloc")]
impl Default for DemandPagingManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "alloc")]
impl DemandPagingManager {
    /// Create a new demand paging manager.
    pub fn new() -> Self {
        Self {
            lazy_mappings: BTreeMap::new(),
            cow_table: CowTable::new(),
        }
    }

    /// Register a lazy mapping. No physical memory is allocated.
    pub fn register_lazy(
        &mut self,
        start_vaddr: usize,
        size: usize,
        flags: PageFlags,
        backing: BackingType,
    ) {
        let mapping = LazyMapping::new(start_vaddr, size, flags, backing);
        self.lazy_mappings.insert(start_vaddr, mapping);
    }

    /// Try to resolve a demand-page fault at `vaddr`.
    ///
    /// If the address falls within a registered lazy mapping that has not
    /// yet been faulted in, allocates a physical frame and returns
    /// `Ok((frame, flags))`. The caller is responsible for installing the
    /// mapping in the page table.
    pub fn try_demand_page(
        &mut self,
        vaddr: usize,
    ) -> Result<(FrameNumber, PageFlags), KernelError> {
        // Find which lazy mapping contains this address.
        let mapping = self.lazy_mappings.values_mut().find(|m| m.contains(vaddr));

        let mapping = match mapping {
            Some(m) => m,
            None => {
                return Err(KernelError::UnmappedMemory { addr: vaddr });
            }
        };

        let idx = mapping.page_index(vaddr);
        if idx >= mapping.faulted_in.len() {
            return Err(KernelError::InvalidAddress { addr: vaddr });
        }
        if mapping.faulted_in[idx] {
            // Already faulted in -- not a lazy fault.
            return Err(KernelError::InvalidAddress { addr: vaddr });
        }

        // Allocate a physical frame.
        let frame = FRAME_ALLOCATOR
            .lock()
            .allocate_frames(1, None)
            .map_err(|_| KernelError::OutOfMemory {
                requested: PAGE_SIZE,
                available: 0,
            })?;

        // Zero the frame for anonymous mappings.
        if mapping.backing == BackingType::Anonymous {
            let virt = crate::mm::phys_to_virt_addr(frame.as_u64() * PAGE_SIZE as u64) as *mut u8;
            // SAFETY: frame is freshly allocated within the physical memory window.
            unsafe {
                core::ptr::write_bytes(virt, 0, PAGE_SIZE);
            }
        }

        mapping.faulted_in[idx] = true;
        let flags = mapping.flags;

        Ok((frame, flags))
    }

    /// Resolve a write fault against a COW-shared frame.
    ///
    /// Allocates a private copy, copies the shared frame's contents into
    /// it, and drops this address space's share of `old_frame`. Returns
    /// the new, exclusively-owned frame the caller should map writable in
    /// place of `old_frame`.
    ///
    /// If this call observes itself as the last sharer of `old_frame`, the
    /// *other* remaining mapping (now the sole owner) is left with its PTE
    /// still marked read-only/COW: it pays one extra, harmless copy fault
    /// the next time it writes, rather than this call reaching into a
    /// different address space's page tables to restore write access
    /// early. Correctness does not depend on that optimization.
    pub fn resolve_cow_write(&mut self, old_frame: FrameNumber) -> Result<FrameNumber, KernelError> {
        let new_frame = FRAME_ALLOCATOR
            .lock()
            .allocate_frames(1, None)
            .map_err(|_| KernelError::OutOfMemory {
                requested: PAGE_SIZE,
                available: 0,
            })?;

        let old_virt = crate::mm::phys_to_virt_addr(old_frame.as_u64() * PAGE_SIZE as u64);
        let new_virt = crate::mm::phys_to_virt_addr(new_frame.as_u64() * PAGE_SIZE as u64);
        // SAFETY: both addresses are within the kernel's physical-memory
        // window and point at whole, page-aligned frames.
        unsafe {
            core::ptr::copy_nonoverlapping(old_virt as *const u8, new_virt as *mut u8, PAGE_SIZE);
        }

        if self.cow_table.release(old_frame) {
            // We were the last sharer: the frame is no longer referenced by
            // any COW mapping we know of, so it is ours to free.
            let _ = FRAME_ALLOCATOR.lock().free_frames(old_frame, 1);
        }

        Ok(new_frame)
    }

    /// Remove a lazy mapping.
    pub fn unregister_lazy(&mut self, start_vaddr: usize) {
        self.lazy_mappings.remove(&start_vaddr);
    }

    /// Record that `frame` is now shared copy-on-write by one more address
    /// space (called once per side when a fork demotes a writable range).
    pub fn share_cow_frame(&mut self, frame: FrameNumber) {
        self.cow_table.share(frame);
    }

    /// Whether `frame` is currently tracked as COW-shared.
    pub fn is_cow_frame(&self, frame: FrameNumber) -> bool {
        self.cow_table.is_cow(frame)
    }
}

// ===========================================================================
// Global Instance
// ===========================================================================

#[cfg(feature = "alloc")]
static DEMAND_PAGING: Mutex<Option<DemandPagingManager>> = Mutex::new(None);

/// Initialize the global demand paging manager.
#[cfg(feature = "alloc")]
pub fn init() {
    *DEMAND_PAGING.lock() = Some(DemandPagingManager::new());
    crate::println!("[DEMAND_PAGING] Manager initialized");
}

/// Register a lazy mapping via the global manager.
#[cfg(feature = "alloc")]
pub fn register_lazy(start_vaddr: usize, size: usize, flags: PageFlags, backing: BackingType) {
    if let Some(ref mut mgr) = *DEMAND_PAGING.lock() {
        mgr.register_lazy(start_vaddr, size, flags, backing);
    }
}

/// Try to resolve a page fault via demand paging.
///
/// Returns `Ok((frame, flags))` if the fault was resolved.
#[cfg(feature = "alloc")]
pub fn handle_page_fault(vaddr: usize) -> Result<(FrameNumber, PageFlags), KernelError> {
    let mut guard = DEMAND_PAGING.lock();
    let mgr = guard.as_mut().ok_or(KernelError::NotInitialized {
        subsystem: "demand_paging",
    })?;
    mgr.try_demand_page(vaddr)
}

/// Access the global demand paging manager (mutable).
#[cfg(feature = "alloc")]
pub fn with_manager_mut<R, F: FnOnce(&mut DemandPagingManager) -> R>(f: F) -> R {
    let mut guard = DEMAND_PAGING.lock();
    let mgr = guard.get_or_insert_with(DemandPagingManager::new);
    f(mgr)
}

/// Record a newly COW-shared frame (one call per fork that demotes a
/// writable private range).
#[cfg(feature = "alloc")]
pub fn share_cow_frame(frame: FrameNumber) {
    with_manager_mut(|mgr| mgr.share_cow_frame(frame));
}

/// Whether `frame` is currently COW-shared.
#[cfg(feature = "alloc")]
pub fn is_cow_frame(frame: FrameNumber) -> bool {
    with_manager_mut(|mgr| mgr.is_cow_frame(frame))
}

/// Resolve a write fault against a COW-shared frame; see
/// [`DemandPagingManager::resolve_cow_write`].
#[cfg(feature = "alloc")]
pub fn resolve_cow_write(old_frame: FrameNumber) -> Result<FrameNumber, KernelError> {
    with_manager_mut(|mgr| mgr.resolve_cow_write(old_frame))
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backing_type() {
        let anon = BackingType::Anonymous;
        let file = BackingType::FileBacked {
            inode: 42,
            offset: 0,
        };
        assert_eq!(anon, BackingType::Anonymous);
        assert_ne!(anon, file);
    }

    #[cfg(feature = "alloc")]
    #[test]
    fn test_cow_table() {
        let mut table = CowTable::new();
        let frame = FrameNumber::new(100);
        table.share(frame);

        assert!(table.is_cow(frame));
        assert!(!table.is_cow(FrameNumber::new(200)));

        // First release: ref goes from 2 -> 1, not last
        assert!(!table.release(frame));
        // Second release: ref goes from 1 -> 0, last ref
        assert!(table.release(frame));
        assert!(!table.is_cow(frame));
    }

    #[cfg(feature = "alloc")]
    #[test]
    fn test_cow_table_three_way_share() {
        let mut table = CowTable::new();
        let frame = FrameNumber::new(7);
        table.share(frame); // parent + first child: count 2
        table.share(frame); // grandchild forks again: count 3

        assert!(!table.release(frame));
        assert!(!table.release(frame));
        assert!(table.release(frame));
    }

    #[cfg(feature = "alloc")]
    #[test]
    fn test_lazy_mapping_contains() {
        let mapping = LazyMapping::new(
            0x10000,
            PAGE_SIZE * 4,
            PageFlags::PRESENT | PageFlags::WRITABLE,
            BackingType::Anonymous,
        );

        assert!(mapping.contains(0x10000));
        assert!(mapping.contains(0x10000 + PAGE_SIZE * 3));
        assert!(!mapping.contains(0x10000 + PAGE_SIZE * 4));
        assert!(!mapping.contains(0x0));
    }
}
