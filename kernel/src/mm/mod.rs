//! Memory management: physical frames, page tables, address spaces, paging.
//!
//! Module layout mirrors the component split used throughout this crate:
//! each subsystem owns its lock(s) and exposes a small set of free
//! functions plus a small number of long-lived types. `init()` brings the
//! subsystems up in dependency order (frame allocator, then the kernel
//! heap, then the rest, which may use `alloc`).

#![allow(dead_code)]

use core::sync::atomic::{AtomicU64, Ordering};

pub mod bootloader;
pub mod demand_paging;
pub mod frame_allocator;
pub mod heap;
pub mod page_fault;
pub mod page_table;
pub mod swap;
pub mod user_validation;
pub mod vas;
pub mod vmm;
pub mod working_set;

pub use demand_paging::DemandPagingManager;
pub use frame_allocator::{
    FrameAllocator, FrameAllocatorError, FrameAllocatorStats, FrameNumber, PhysicalFrame,
    ReservedRegion, FRAME_ALLOCATOR, FRAME_SIZE,
};
pub use page_fault::{PageFaultInfo, PageFaultOutcome, PageFaultReason};
pub use vas::{MappingType, TlbFlushBatch, VasStats, VirtualAddressSpace, VirtualMapping};

/// Alias kept for modules (demand paging, page cache) that talk in terms of
/// "page size" rather than "frame size" — the two are the same quantity.
pub const PAGE_SIZE: usize = FRAME_SIZE;

/// Higher-half direct map offset: `phys_to_virt_addr(0)` resolves here.
///
/// Populated once from the bootloader's physical-memory-offset field during
/// [`init`]. Reads before `init()` observe the identity-mapped default (0),
/// which is correct for the earliest boot code that runs before the HHDM is
/// live.
pub static PHYS_MEM_OFFSET: AtomicU64 = AtomicU64::new(0);

/// Translate a physical address to a kernel-accessible virtual address via
/// the higher-half direct map.
pub fn phys_to_virt_addr(phys: u64) -> u64 {
    phys + PHYS_MEM_OFFSET.load(Ordering::Acquire)
}

/// Record the bootloader-provided HHDM base. Called once, early in boot.
pub fn set_phys_mem_offset(offset: u64) {
    PHYS_MEM_OFFSET.store(offset, Ordering::Release);
}

/// Physical memory address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PhysicalAddress(pub u64);

impl PhysicalAddress {
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Virtual memory address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct VirtualAddress(pub u64);

impl VirtualAddress {
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn add(&self, offset: usize) -> Self {
        Self(self.0 + offset as u64)
    }
}

/// A contiguous region reported by the bootloader memory map.
#[derive(Debug, Clone, Copy)]
pub struct MemoryRegion {
    pub start: u64,
    pub size: u64,
    pub usable: bool,
}

/// Page size options.
#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSize {
    /// 4 KiB pages
    Small = 4096,
    /// 2 MiB pages
    Large = 2 * 1024 * 1024,
    /// 1 GiB pages
    Huge = 1024 * 1024 * 1024,
}

/// Page table structure (opaque root handle; see [`page_table::PageTable`]
/// for the real 512-entry table layout).
pub struct PageTable {
    pub root_phys: PhysicalAddress,
}

/// Hardware-facing page protection/attribute bits.
///
/// `SWAP_PHYS` is software-defined: when set on a non-present entry the
/// entry's address field holds a swap id rather than a physical frame
/// number (spec'd in [`swap`]). Hardware never sees this bit since it is
/// only ever written into entries that also have `PRESENT` clear.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFlags(u64);

impl PageFlags {
    pub const PRESENT: Self = Self(1 << 0);
    pub const WRITABLE: Self = Self(1 << 1);
    pub const USER: Self = Self(1 << 2);
    pub const WRITE_THROUGH: Self = Self(1 << 3);
    pub const NO_CACHE: Self = Self(1 << 4);
    pub const ACCESSED: Self = Self(1 << 5);
    pub const DIRTY: Self = Self(1 << 6);
    pub const HUGE: Self = Self(1 << 7);
    pub const GLOBAL: Self = Self(1 << 8);
    /// Software bit: entry is never demand-paged in (guard pages).
    pub const NO_DEMAND: Self = Self(1 << 9);
    /// Software bit: physical-address field holds a swap id, not a frame.
    pub const SWAP_PHYS: Self = Self(1 << 10);
    /// Software bit: page is shared copy-on-write.
    pub const COW: Self = Self(1 << 11);
    pub const NO_EXECUTE: Self = Self(1 << 63);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(&self) -> u64 {
        self.0
    }

    pub const fn from_bits_truncate(bits: u64) -> Self {
        Self(bits)
    }

    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl core::ops::BitOr for PageFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl core::ops::BitOrAssign for PageFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl core::ops::BitAnd for PageFlags {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self::Output {
        Self(self.0 & rhs.0)
    }
}

impl core::ops::Sub for PageFlags {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 & !rhs.0)
    }
}

/// Bring up memory management in dependency order.
///
/// `usable_regions` is the parsed bootloader memory map (see
/// [`bootloader`]); `phys_mem_offset` is the HHDM base the bootloader
/// mapped all physical memory at.
pub fn init(usable_regions: &[MemoryRegion], phys_mem_offset: u64) {
    set_phys_mem_offset(phys_mem_offset);

    {
        let mut allocator = FRAME_ALLOCATOR.lock();
        for region in usable_regions.iter().filter(|r| r.usable) {
            allocator.add_region(region.start, region.size);
        }
        allocator.mark_standard_reserved_regions();
    }

    heap::init();
    swap::init();
    working_set::init();

    crate::println!("[MM] memory management initialized");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_flags_combine() {
        let flags = PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER;
        assert!(flags.contains(PageFlags::PRESENT));
        assert!(flags.contains(PageFlags::WRITABLE));
        assert!(!flags.contains(PageFlags::NO_EXECUTE));
    }

    #[test]
    fn page_flags_sub_removes_bit() {
        let flags = PageFlags::PRESENT | PageFlags::WRITABLE;
        let demoted = flags - PageFlags::WRITABLE;
        assert!(demoted.contains(PageFlags::PRESENT));
        assert!(!demoted.contains(PageFlags::WRITABLE));
    }

    #[test]
    fn phys_to_virt_uses_offset() {
        set_phys_mem_offset(0x1000_0000);
        assert_eq!(phys_to_virt_addr(0x2000), 0x1000_2000);
        set_phys_mem_offset(0);
    }
}
