//! Hardware abstraction layer.
//!
//! This is the only surface the VMM (`mm::vas`, `mm::page_fault`) is meant
//! to call into for anything that touches a concrete page-table encoding,
//! an interrupt controller, or per-CPU hardware state. Protection-bit
//! layout, APIC register offsets, and CR3/TTBR/SATP encoding stay behind
//! this module; everything above it talks in [`PageFlags`] and
//! [`PhysicalAddress`]/[`VirtualAddress`] only.
//!
//! x86_64 is implemented directly against [`crate::mm::page_table`] and
//! [`crate::arch::x86_64::apic`]; aarch64 and riscv64 share the page-table
//! code (same four-level format) but have no APIC, so the IPI/EOI surface
//! here is a no-op there until those ports grow interrupt controllers of
//! their own.

#![allow(dead_code)]

use core::sync::atomic::{AtomicU64, Ordering};

use crate::error::KernelError;
use crate::mm::{
    self,
    page_table::{FrameAllocator as PageFrameAllocator, PageMapper},
    vas::create_mapper_from_root_pub,
    FrameAllocatorError, FrameNumber, PageFlags, PhysicalAddress, VirtualAddress, FRAME_ALLOCATOR,
};

/// Snapshot of one page-table entry, decoded into architecture-neutral
/// terms. When `is_swap_phys` is set, `phys` does not hold a physical
/// frame: its bits are a [`mm::swap::SwapId`] instead, exactly as the
/// underlying PTE stores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageInfo {
    pub present: bool,
    pub phys: PhysicalAddress,
    pub huge: bool,
    pub writable: bool,
    pub executable: bool,
    pub user: bool,
    pub dirty: bool,
    pub accessed: bool,
    pub uncached: bool,
    pub is_swap_phys: bool,
}

/// Shim satisfying `page_table::FrameAllocator` for HAL-internal page-table
/// walks (allocating intermediate L3/L2/L1 tables), delegating to the
/// global physical frame allocator. Mirrors `mm::vas::VasFrameAllocator`.
struct HalFrameAllocator;

impl PageFrameAllocator for HalFrameAllocator {
    fn allocate_frames(
        &mut self,
        count: usize,
        numa_node: Option<usize>,
    ) -> Result<FrameNumber, FrameAllocatorError> {
        FRAME_ALLOCATOR.lock().allocate_frames(count, numa_node)
    }
}

/// Inspect the mapping at `virt` under the page table rooted at `pt_root`.
///
/// Clears the hardware accessed/dirty bits if either was set (matching the
/// "sticky until read" semantics most MMUs give these bits), returning the
/// pre-clear values. Returns `None` if `pt_root` is zero or the entry is
/// entirely unused.
pub fn query_page_info(pt_root: u64, virt: VirtualAddress) -> Option<PageInfo> {
    if pt_root == 0 {
        return None;
    }
    // SAFETY: `pt_root` is a live page-table root; the caller holds the
    // owning address space's lock for the duration of this call.
    let mapper = unsafe { create_mapper_from_root_pub(pt_root) };
    let (raw_addr, flags) = mapper.translate_page_raw(virt)?;

    let accessed = flags.contains(PageFlags::ACCESSED);
    let dirty = flags.contains(PageFlags::DIRTY);
    if flags.contains(PageFlags::PRESENT) && (accessed || dirty) {
        let mut mapper = unsafe { create_mapper_from_root_pub(pt_root) };
        let cleared = (flags - PageFlags::ACCESSED) - PageFlags::DIRTY;
        let _ = mapper.update_page_flags(virt, cleared);
    }

    Some(PageInfo {
        present: flags.contains(PageFlags::PRESENT),
        phys: PhysicalAddress::new(raw_addr << 12),
        huge: flags.contains(PageFlags::HUGE),
        writable: flags.contains(PageFlags::WRITABLE),
        executable: !flags.contains(PageFlags::NO_EXECUTE),
        user: flags.contains(PageFlags::USER),
        dirty,
        accessed,
        uncached: flags.contains(PageFlags::NO_CACHE),
        is_swap_phys: flags.contains(PageFlags::SWAP_PHYS),
    })
}

/// Install or remove the mapping at `virt` under `pt_root`.
///
/// `phys: None` unmaps the page. Safe to call while holding the owning
/// address space's spinlock: this only ever touches page-table memory
/// (already-mapped kernel pages), never the heap or a blocking lock.
pub fn set_page_mapping(
    pt_root: u64,
    virt: VirtualAddress,
    phys: Option<PhysicalAddress>,
    flags: PageFlags,
    flush: bool,
) -> Result<(), KernelError> {
    if pt_root == 0 {
        return Err(KernelError::NotInitialized {
            subsystem: "page_table",
        });
    }
    let mut mapper = unsafe { create_mapper_from_root_pub(pt_root) };

    match phys {
        Some(p) => {
            let frame = FrameNumber::new(p.as_u64() >> 12);
            let mut alloc = HalFrameAllocator;
            if mapper.map_page(virt, frame, flags, &mut alloc).is_err() {
                // Already mapped (or the leaf table already exists from a
                // prior call): retarget the existing entry instead.
                mapper
                    .remap_page(virt, frame, flags)
                    .map_err(|_| KernelError::UnmappedMemory {
                        addr: virt.as_u64() as usize,
                    })?;
            }
        }
        None => {
            mapper
                .unmap_page(virt)
                .map_err(|_| KernelError::UnmappedMemory {
                    addr: virt.as_u64() as usize,
                })?;
        }
    }

    if flush {
        crate::arch::tlb_flush_address(virt.as_u64());
    }
    Ok(())
}

/// Vector used for inter-CPU TLB invalidation IPIs, above the device and
/// timer vector range.
const TLB_SHOOTDOWN_VECTOR: u8 = 0xFD;

/// Number of shootdowns broadcast since boot, for diagnostics.
static SHOOTDOWN_COUNT: AtomicU64 = AtomicU64::new(0);

/// Invalidate the mapping for `[virt, virt + size)` on every CPU.
///
/// Flushes the local TLB directly, then sends `TLB_SHOOTDOWN_VECTOR` to
/// every other online CPU. The acknowledgement rendezvous described for
/// this operation (the invoking CPU spinning until every target has
/// acked) needs an IDT handler for `TLB_SHOOTDOWN_VECTOR` to bump an ack
/// counter; that handler is not registered yet, so on SMP configurations
/// this currently only guarantees the invoking CPU's view is consistent
/// immediately after the call returns, not every CPU's.
pub fn tlb_shootdown(pt_root: u64, virt: VirtualAddress, size: usize) {
    let _ = pt_root;
    let pages = (size / mm::PAGE_SIZE).max(1);
    for i in 0..pages {
        crate::arch::tlb_flush_address(virt.as_u64() + (i * mm::PAGE_SIZE) as u64);
    }
    SHOOTDOWN_COUNT.fetch_add(1, Ordering::Relaxed);
    ipi_broadcast(TLB_SHOOTDOWN_VECTOR);
}

/// Return a kernel-accessible virtual view of `phys` via the higher-half
/// direct map (pre-mapped at boot; see [`mm::phys_to_virt_addr`]).
pub fn map_virt_from_phys(phys: PhysicalAddress) -> VirtualAddress {
    VirtualAddress::new(mm::phys_to_virt_addr(phys.as_u64()))
}

/// Recursively release a process page table, leaving the shared
/// higher-half (kernel) mapping intact. Returns the number of frames
/// freed.
pub fn free_page_table(root: u64) -> usize {
    mm::vas::free_user_page_table_frames(root)
}

/// Send `vector` to every online CPU other than the caller.
#[cfg(target_arch = "x86_64")]
pub fn ipi_broadcast(vector: u8) {
    let _ = crate::arch::x86_64::apic::send_ipi_all_excluding_self(vector);
}

#[cfg(not(target_arch = "x86_64"))]
pub fn ipi_broadcast(_vector: u8) {}

/// Signal end-of-interrupt to the local interrupt controller.
#[cfg(target_arch = "x86_64")]
pub fn send_eoi() {
    crate::arch::x86_64::apic::send_eoi();
}

#[cfg(not(target_arch = "x86_64"))]
pub fn send_eoi() {}

/// Upper bound on concurrently online CPUs this kernel supports; hot-adding
/// CPUs beyond this count is not implemented.
pub const MAX_CPUS: usize = 64;

#[repr(align(64))]
struct PerCpuSlot([u8; 64]);

/// One fixed-size storage slot per possible APIC ID. Callers (the scheduler,
/// interrupt dispatch) build their own per-CPU structures on top of the
/// address `percpu_storage_base` returns rather than this module knowing
/// their shape.
static PERCPU_SLOTS: [PerCpuSlot; MAX_CPUS] = [const { PerCpuSlot([0; 64]) }; MAX_CPUS];

/// Base address of the current CPU's per-CPU storage block.
#[cfg(target_arch = "x86_64")]
pub fn percpu_storage_base() -> u64 {
    let id = crate::arch::x86_64::apic::read_id().unwrap_or(0) as usize % MAX_CPUS;
    (&PERCPU_SLOTS[id] as *const PerCpuSlot) as u64
}

#[cfg(not(target_arch = "x86_64"))]
pub fn percpu_storage_base() -> u64 {
    (&PERCPU_SLOTS[0] as *const PerCpuSlot) as u64
}

/// Halt the current CPU until the next interrupt, forever. Used by the
/// idle thread; never returns.
pub fn halt_cpu() -> ! {
    loop {
        #[cfg(target_arch = "x86_64")]
        unsafe {
            core::arch::asm!("hlt");
        }
        #[cfg(target_arch = "aarch64")]
        unsafe {
            core::arch::asm!("wfi");
        }
        #[cfg(any(target_arch = "riscv32", target_arch = "riscv64"))]
        unsafe {
            core::arch::asm!("wfi");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_page_info_rejects_null_root() {
        assert!(query_page_info(0, VirtualAddress::new(0x1000)).is_none());
    }

    #[test]
    fn set_page_mapping_rejects_null_root() {
        let err = set_page_mapping(
            0,
            VirtualAddress::new(0x1000),
            Some(PhysicalAddress::new(0x2000)),
            PageFlags::PRESENT | PageFlags::WRITABLE,
            false,
        )
        .unwrap_err();
        assert!(matches!(err, KernelError::NotInitialized { .. }));
    }

    #[test]
    fn map_virt_from_phys_applies_hhdm_offset() {
        mm::set_phys_mem_offset(0x1000_0000);
        let v = map_virt_from_phys(PhysicalAddress::new(0x4000));
        assert_eq!(v.as_u64(), 0x1000_4000);
        mm::set_phys_mem_offset(0);
    }
}
