//! Physical frame allocator.
//!
//! Free physical memory is tracked as a set of coalesced runs in two
//! ordered collections: `below_4g` for frames usable by legacy DMA
//! devices and `general` for everything else. This replaces an earlier
//! bitmap+buddy design with plain owning maps keyed by the run's first
//! frame — the "at most one of {free, dirty, standby, mapped}" invariant
//! a page must satisfy is then a property of which collection (if any)
//! contains it, rather than something an intrusive pointer list has to
//! get right by hand.

#![allow(dead_code)]

use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

#[allow(unused_imports)]
use crate::println;
use crate::raii::{FrameGuard, FramesGuard};

use super::PhysicalAddress;

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(feature = "alloc")]
use alloc::collections::BTreeMap;
#[cfg(feature = "alloc")]
use alloc::vec::Vec;

#[cfg(not(feature = "alloc"))]
struct Vec<T> {
    _phantom: core::marker::PhantomData<T>,
}

#[cfg(not(feature = "alloc"))]
impl<T> Vec<T> {
    fn with_capacity(_: usize) -> Self {
        Self {
            _phantom: core::marker::PhantomData,
        }
    }
    fn push(&mut self, _: T) {}
    fn len(&self) -> usize {
        0
    }
    fn iter(&self) -> core::iter::Empty<&T> {
        core::iter::empty()
    }
}

/// Size of a physical frame (4 KiB).
pub const FRAME_SIZE: usize = 4096;

/// Frame number below which DMA controllers that can only address 32 bits
/// can still target memory directly.
const BELOW_4G_FRAME_LIMIT: u64 = (4u64 * 1024 * 1024 * 1024) / FRAME_SIZE as u64;

/// Legacy zone classification, kept for callers that still reason about
/// DMA/normal/high memory rather than the two-list split directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryZone {
    Dma,
    Normal,
    High,
}

impl MemoryZone {
    fn prefers_below_4g(&self) -> bool {
        matches!(self, MemoryZone::Dma)
    }
}

/// A physical frame number (physical address / [`FRAME_SIZE`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FrameNumber(u64);

impl FrameNumber {
    pub const fn new(num: u64) -> Self {
        Self(num)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    pub const fn as_addr(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.0 * FRAME_SIZE as u64)
    }

    fn is_below_4g(&self) -> bool {
        self.0 < BELOW_4G_FRAME_LIMIT
    }
}

/// A single allocated physical frame, as handed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysicalFrame {
    number: FrameNumber,
}

impl PhysicalFrame {
    pub fn new(number: FrameNumber) -> Self {
        Self { number }
    }

    pub fn number(&self) -> FrameNumber {
        self.number
    }

    pub fn addr(&self) -> usize {
        (self.number.0 * FRAME_SIZE as u64) as usize
    }
}

pub type Result<T> = core::result::Result<T, FrameAllocatorError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameAllocatorError {
    OutOfMemory,
    InvalidFrame,
    InvalidSize,
    InvalidNumaNode,
    ReservedMemoryConflict,
}

/// A reserved physical region that must never be handed out.
#[derive(Debug, Clone, Copy)]
pub struct ReservedRegion {
    pub start: FrameNumber,
    pub end: FrameNumber,
    pub description: &'static str,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FrameAllocatorStats {
    pub total_frames: u64,
    pub free_frames: u64,
    pub free_below_4g: u64,
    pub allocations: u64,
    pub frees: u64,
}

/// An ordered set of coalesced free runs, keyed by the run's first frame.
#[cfg(feature = "alloc")]
#[derive(Default)]
struct FreeList {
    runs: BTreeMap<u64, u64>,
}

#[cfg(feature = "alloc")]
impl FreeList {
    fn insert(&mut self, start: u64, count: u64) {
        if count == 0 {
            return;
        }
        self.runs.insert(start, count);
    }

    /// First-fit allocation: the first run at least `count` frames long.
    fn take_first_fit(&mut self, count: u64) -> Option<u64> {
        let hit = self
            .runs
            .iter()
            .find(|(_, &len)| len >= count)
            .map(|(&start, &len)| (start, len));
        let (start, len) = hit?;
        self.runs.remove(&start);
        if len > count {
            self.runs.insert(start + count, len - count);
        }
        Some(start)
    }

    fn free_frame_count(&self) -> u64 {
        self.runs.values().sum()
    }

    /// Merge adjacent runs. Called periodically (and after `free`) so the
    /// free set stays a small number of coalesced runs rather than one
    /// entry per freed frame.
    fn optimize(&mut self) {
        let mut merged: BTreeMap<u64, u64> = BTreeMap::new();
        for (&start, &len) in self.runs.iter() {
            if let Some((&prev_start, &prev_len)) = merged.iter().next_back() {
                if prev_start + prev_len == start {
                    merged.insert(prev_start, prev_len + len);
                    continue;
                }
            }
            merged.insert(start, len);
        }
        self.runs = merged;
    }
}

/// Physical frame allocator: two coalesced free lists plus the reserved
/// region list the boot protocol installs before any allocation happens.
pub struct FrameAllocator {
    #[cfg(feature = "alloc")]
    below_4g: Mutex<FreeList>,
    #[cfg(feature = "alloc")]
    general: Mutex<FreeList>,
    reserved_regions: Mutex<Vec<ReservedRegion>>,
    total_frames: AtomicU64,
    allocations: AtomicU64,
    frees: AtomicU64,
}

impl FrameAllocator {
    pub const fn new() -> Self {
        Self {
            #[cfg(feature = "alloc")]
            below_4g: Mutex::new(FreeList {
                runs: BTreeMap::new(),
            }),
            #[cfg(feature = "alloc")]
            general: Mutex::new(FreeList {
                runs: BTreeMap::new(),
            }),
            reserved_regions: Mutex::new(Vec::new()),
            total_frames: AtomicU64::new(0),
            allocations: AtomicU64::new(0),
            frees: AtomicU64::new(0),
        }
    }

    /// Feed a usable bootloader memory-map region into the free lists.
    #[cfg(feature = "alloc")]
    pub fn add_region(&self, phys_start: u64, size: u64) {
        let start_frame = (phys_start + FRAME_SIZE as u64 - 1) / FRAME_SIZE as u64;
        let end_frame = (phys_start + size) / FRAME_SIZE as u64;
        if end_frame <= start_frame {
            return;
        }
        let count = end_frame - start_frame;
        self.total_frames.fetch_add(count, Ordering::Relaxed);
        if start_frame < BELOW_4G_FRAME_LIMIT {
            let below_count = count.min(BELOW_4G_FRAME_LIMIT - start_frame);
            self.below_4g.lock().insert(start_frame, below_count);
            if below_count < count {
                self.general
                    .lock()
                    .insert(start_frame + below_count, count - below_count);
            }
        } else {
            self.general.lock().insert(start_frame, count);
        }
    }

    pub fn add_reserved_region(&self, region: ReservedRegion) -> Result<()> {
        self.reserved_regions.lock().push(region);
        Ok(())
    }

    pub fn is_reserved(&self, start: FrameNumber, count: usize) -> bool {
        let end = FrameNumber::new(start.0 + count as u64);
        self.reserved_regions
            .lock()
            .iter()
            .any(|r| start < r.end && r.start < end)
    }

    /// Reserve the conventional low-memory regions (real-mode IVT, BDA,
    /// legacy video/BIOS ROM) so early allocations never hand them out.
    pub fn mark_standard_reserved_regions(&self) {
        let _ = self.add_reserved_region(ReservedRegion {
            start: FrameNumber::new(0),
            end: FrameNumber::new(0x100), // first 1 MiB
            description: "real-mode IVT / BDA / legacy BIOS",
        });
    }

    /// Kept for API compatibility with callers that used to select a NUMA
    /// node explicitly; this allocator has a single free-frame pool.
    pub fn init_numa_node(&self, _node: usize, _start: FrameNumber, _end: FrameNumber) {}

    #[cfg(feature = "alloc")]
    pub fn allocate_frames(&self, count: usize, _numa_node: Option<usize>) -> Result<FrameNumber> {
        self.allocate_frames_in_zone(count, _numa_node, None)
    }

    #[cfg(feature = "alloc")]
    pub fn allocate_frames_in_zone(
        &self,
        count: usize,
        _numa_node: Option<usize>,
        zone: Option<MemoryZone>,
    ) -> Result<FrameNumber> {
        if count == 0 {
            return Err(FrameAllocatorError::InvalidSize);
        }
        let want_below_4g = zone.map(|z| z.prefers_below_4g()).unwrap_or(false);
        let start = self.alloc_frames(count as u64, want_below_4g)?;
        self.allocations.fetch_add(1, Ordering::Relaxed);
        Ok(FrameNumber::new(start))
    }

    /// Allocate `count` contiguous frames. `below_4g` requests memory
    /// addressable by 32-bit DMA; on exhaustion of that list the general
    /// list is tried as a fallback only when `below_4g` is false.
    #[cfg(feature = "alloc")]
    pub fn alloc_frames(&self, count: u64, below_4g: bool) -> Result<u64> {
        if count == 0 {
            return Err(FrameAllocatorError::InvalidSize);
        }
        match self.try_alloc_frames_once(count, below_4g) {
            Ok(start) => Ok(start),
            Err(FrameAllocatorError::OutOfMemory) => {
                self.reclaim_and_retry(count, below_4g)
            }
            Err(e) => Err(e),
        }
    }

    #[cfg(feature = "alloc")]
    fn try_alloc_frames_once(&self, count: u64, below_4g: bool) -> Result<u64> {
        if below_4g {
            return self
                .below_4g
                .lock()
                .take_first_fit(count)
                .ok_or(FrameAllocatorError::OutOfMemory);
        }
        if let Some(start) = self.general.lock().take_first_fit(count) {
            return Ok(start);
        }
        self.below_4g
            .lock()
            .take_first_fit(count)
            .ok_or(FrameAllocatorError::OutOfMemory)
    }

    /// On outright exhaustion, reclaim single standby pages (§4.E) and feed
    /// them back into the free lists before giving up. Each reclaimed page
    /// is already clean (written out, or never dirtied), so the frame can
    /// be handed back without further I/O; the owning address space's PTE
    /// for it is left mapped read-only+COW-free until that process next
    /// touches the page, at which point it faults through the normal
    /// not-present path and gets refaulted in (anonymous) or re-read from
    /// its backing file, same as any other reclaimed page.
    #[cfg(feature = "alloc")]
    fn reclaim_and_retry(&self, count: u64, below_4g: bool) -> Result<u64> {
        const MAX_RECLAIM_ATTEMPTS: u32 = 64;
        for _ in 0..MAX_RECLAIM_ATTEMPTS {
            let reclaimed = match super::swap::reclaim_standby_page() {
                Some(page) => page,
                None => break,
            };
            let _ = self.free_frames(reclaimed.frame, 1);
            if let Ok(start) = self.try_alloc_frames_once(count, below_4g) {
                return Ok(start);
            }
        }
        Err(FrameAllocatorError::OutOfMemory)
    }

    pub fn mark_frame_used(&self, frame: FrameNumber) -> Result<()> {
        #[cfg(feature = "alloc")]
        {
            // Carve a single frame out of whichever list currently contains
            // it, if any; used to reserve specific frames (e.g. framebuffer)
            // discovered after the general free lists were already built.
            let list = if frame.is_below_4g() {
                &self.below_4g
            } else {
                &self.general
            };
            let mut guard = list.lock();
            if let Some(start) = guard.take_first_fit(1) {
                if start != frame.0 {
                    guard.insert(start, 1);
                }
            }
        }
        Ok(())
    }

    #[cfg(feature = "alloc")]
    pub fn free_frames(&self, frame: FrameNumber, count: usize) -> Result<()> {
        if count == 0 {
            return Err(FrameAllocatorError::InvalidSize);
        }
        if self.is_reserved(frame, count) {
            return Err(FrameAllocatorError::ReservedMemoryConflict);
        }
        if frame.is_below_4g() {
            self.below_4g.lock().insert(frame.0, count as u64);
        } else {
            self.general.lock().insert(frame.0, count as u64);
        }
        self.frees.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Coalesce adjacent free runs in both lists. Cheap to call
    /// periodically (e.g. from the idle loop); allocation and free do not
    /// need it to stay correct, only to stay fast.
    #[cfg(feature = "alloc")]
    pub fn optimize_free_list(&self) {
        self.below_4g.lock().optimize();
        self.general.lock().optimize();
    }

    #[cfg(feature = "alloc")]
    pub fn get_stats(&self) -> FrameAllocatorStats {
        let below = self.below_4g.lock().free_frame_count();
        let general = self.general.lock().free_frame_count();
        FrameAllocatorStats {
            total_frames: self.total_frames.load(Ordering::Relaxed),
            free_frames: below + general,
            free_below_4g: below,
            allocations: self.allocations.load(Ordering::Relaxed),
            frees: self.frees.load(Ordering::Relaxed),
        }
    }

    #[cfg(feature = "alloc")]
    pub fn allocate_frame_raii(&'static self) -> Result<FrameGuard> {
        let frame = PhysicalFrame::new(FrameNumber::new(self.alloc_frames(1, false)?));
        Ok(FrameGuard::new(frame, self))
    }

    #[cfg(feature = "alloc")]
    pub fn allocate_frames_raii(&'static self, count: usize) -> Result<FramesGuard> {
        let mut frames = Vec::with_capacity(count);
        for _ in 0..count {
            let start = self.alloc_frames(1, false)?;
            frames.push(PhysicalFrame::new(FrameNumber::new(start)));
        }
        Ok(FramesGuard::new(frames, self))
    }

    #[cfg(feature = "alloc")]
    pub fn allocate_frame_raii_numa(&'static self, _numa_node: usize) -> Result<FrameGuard> {
        self.allocate_frame_raii()
    }

    /// SAFETY: caller must guarantee `frame` was previously returned by this
    /// allocator and is not otherwise in use (mapped, on a dirty/standby
    /// list, etc.).
    pub unsafe fn free_frame(&self, frame: PhysicalFrame) {
        #[cfg(feature = "alloc")]
        if let Err(_e) = self.free_frames(frame.number(), 1) {
            println!(
                "[FrameAllocator] warning: failed to free frame {}: {:?}",
                frame.number().0,
                _e
            );
        }
    }

    pub fn deallocate_frame(&self, frame: PhysicalAddress) {
        #[cfg(feature = "alloc")]
        {
            let number = FrameNumber::new(frame.as_u64() / FRAME_SIZE as u64);
            let _ = self.free_frames(number, 1);
        }
    }
}

impl Default for FrameAllocator {
    fn default() -> Self {
        Self::new()
    }
}

pub static FRAME_ALLOCATOR: Mutex<FrameAllocator> = Mutex::new(FrameAllocator::new());

/// Per-CPU frame cache. Batches refills/drains against the global
/// allocator so a hot allocation path does not take the global lock on
/// every single frame.
pub struct PerCpuPageCache {
    frames: [Option<FrameNumber>; 64],
    count: usize,
    low_watermark: usize,
    high_watermark: usize,
}

impl Default for PerCpuPageCache {
    fn default() -> Self {
        Self::new()
    }
}

impl PerCpuPageCache {
    pub const fn new() -> Self {
        Self {
            frames: [None; 64],
            count: 0,
            low_watermark: 8,
            high_watermark: 56,
        }
    }

    pub fn alloc_one(&mut self) -> Option<FrameNumber> {
        if self.count == 0 {
            return None;
        }
        self.count -= 1;
        self.frames[self.count].take()
    }

    pub fn free_one(&mut self, frame: FrameNumber) -> bool {
        if self.count >= self.frames.len() {
            return false;
        }
        self.frames[self.count] = Some(frame);
        self.count += 1;
        true
    }

    pub fn needs_refill(&self) -> bool {
        self.count < self.low_watermark
    }

    pub fn needs_drain(&self) -> bool {
        self.count > self.high_watermark
    }

    #[cfg(feature = "alloc")]
    pub fn batch_refill(&mut self) {
        let global = FRAME_ALLOCATOR.lock();
        while self.count < self.high_watermark {
            match global.alloc_frames(1, false) {
                Ok(start) => {
                    self.frames[self.count] = Some(FrameNumber::new(start));
                    self.count += 1;
                }
                Err(_) => break,
            }
        }
    }

    #[cfg(feature = "alloc")]
    pub fn batch_drain(&mut self) {
        let global = FRAME_ALLOCATOR.lock();
        while self.count > self.low_watermark {
            self.count -= 1;
            if let Some(frame) = self.frames[self.count].take() {
                let _ = global.free_frames(frame, 1);
            }
        }
    }

    pub fn cached_count(&self) -> usize {
        self.count
    }
}

#[cfg(feature = "alloc")]
static PER_CPU_CACHES: Mutex<[PerCpuPageCache; 256]> =
    Mutex::new([const { PerCpuPageCache::new() }; 256]);

#[cfg(feature = "alloc")]
pub fn per_cpu_alloc_frame() -> Result<FrameNumber> {
    let cpu = crate::sched::smp::current_cpu_id() as usize;
    let mut caches = PER_CPU_CACHES.lock();
    let cache = &mut caches[cpu % caches.len()];
    if cache.needs_refill() {
        cache.batch_refill();
    }
    cache
        .alloc_one()
        .ok_or(FrameAllocatorError::OutOfMemory)
}

#[cfg(not(feature = "alloc"))]
pub fn per_cpu_alloc_frame() -> Result<FrameNumber> {
    FRAME_ALLOCATOR.lock().allocate_frames(1, None)
}

#[cfg(feature = "alloc")]
pub fn per_cpu_free_frame(frame: FrameNumber) -> Result<()> {
    let cpu = crate::sched::smp::current_cpu_id() as usize;
    let mut caches = PER_CPU_CACHES.lock();
    let cache = &mut caches[cpu % caches.len()];
    if !cache.free_one(frame) {
        cache.batch_drain();
        cache.free_one(frame);
    }
    if cache.needs_drain() {
        cache.batch_drain();
    }
    Ok(())
}

#[cfg(not(feature = "alloc"))]
pub fn per_cpu_free_frame(frame: FrameNumber) -> Result<()> {
    FRAME_ALLOCATOR.lock().free_frames(frame, 1)
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn alloc_then_free_reuses_frame() {
        let alloc = FrameAllocator::new();
        alloc.add_region(0x10_0000_0000, 16 * FRAME_SIZE as u64); // well above 4G
        let first = alloc.alloc_frames(4, false).unwrap();
        alloc.free_frames(FrameNumber::new(first), 4).unwrap();
        let second = alloc.alloc_frames(4, false).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn below_4g_request_stays_below_limit() {
        let alloc = FrameAllocator::new();
        alloc.add_region(0, 8 * FRAME_SIZE as u64);
        alloc.add_region(0x10_0000_0000, 8 * FRAME_SIZE as u64);
        let frame = alloc.alloc_frames(2, true).unwrap();
        assert!(frame < BELOW_4G_FRAME_LIMIT);
    }

    #[test]
    fn out_of_memory_when_exhausted() {
        let alloc = FrameAllocator::new();
        alloc.add_region(0x10_0000_0000, 2 * FRAME_SIZE as u64);
        assert!(alloc.alloc_frames(1, false).is_ok());
        assert!(alloc.alloc_frames(1, false).is_ok());
        assert_eq!(
            alloc.alloc_frames(1, false).unwrap_err(),
            FrameAllocatorError::OutOfMemory
        );
    }

    #[test]
    fn optimize_merges_adjacent_runs() {
        let alloc = FrameAllocator::new();
        alloc.add_region(0x10_0000_0000, 4 * FRAME_SIZE as u64);
        let a = alloc.alloc_frames(2, false).unwrap();
        let b = alloc.alloc_frames(2, false).unwrap();
        alloc.free_frames(FrameNumber::new(a), 2).unwrap();
        alloc.free_frames(FrameNumber::new(b), 2).unwrap();
        alloc.optimize_free_list();
        // A single coalesced run of 4 should satisfy one allocation of 4.
        assert!(alloc.alloc_frames(4, false).is_ok());
    }

    #[test]
    fn reserved_region_blocks_free() {
        let alloc = FrameAllocator::new();
        alloc.add_region(0, 4 * FRAME_SIZE as u64);
        alloc
            .add_reserved_region(ReservedRegion {
                start: FrameNumber::new(0),
                end: FrameNumber::new(1),
                description: "test",
            })
            .unwrap();
        assert!(alloc.is_reserved(FrameNumber::new(0), 1));
    }
}
