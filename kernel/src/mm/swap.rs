//! Swap providers and the page writer.
//!
//! A [`SwapProvider`] reserves and releases opaque swap ids and moves whole
//! pages to and from backing store. Two providers exist: [`RamSwapProvider`]
//! is active from boot (so demand paging and eviction work before any block
//! device is available) and the disk-backed [`DiskSwapProvider`] (behind the
//! `swap-disk` feature) takes over once a raw partition is attached.
//!
//! Pages under eviction live on one of two global lists: `dirty` (written
//! since last flushed to backing store) and `standby` (clean, still
//! resident, reclaimable on demand). The page writer kernel thread drains
//! the dirty list on demand, via [`request_sync`].

#![allow(dead_code)]

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(feature = "alloc")]
use alloc::{boxed::Box, collections::VecDeque, vec, vec::Vec};
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use spin::Mutex;

use crate::{
    error::KernelError,
    mm::{FrameNumber, PAGE_SIZE},
};

bitflags::bitflags! {
    /// Which class of page a page-writer pass should flush.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SyncKind: u8 {
        const ANON = 1 << 0;
        const FILE = 1 << 1;
        const ALL = Self::ANON.bits() | Self::FILE.bits();
    }
}

/// Opaque identifier a swap provider hands back from [`SwapProvider::reserve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SwapId(pub u64);

/// Abstract swap backing store.
///
/// `huge` requests (2 MiB) are a courtesy extension a provider may refuse;
/// callers fall back to page-sized reservations on
/// `Err(OperationNotSupported)`.
pub trait SwapProvider: Send + Sync {
    fn reserve(&mut self, huge: bool) -> Result<SwapId, KernelError>;
    fn free(&mut self, id: SwapId, huge: bool);
    fn write(&mut self, id: SwapId, page: &[u8; PAGE_SIZE]) -> Result<(), KernelError>;
    fn read(&mut self, id: SwapId, page: &mut [u8; PAGE_SIZE]) -> Result<(), KernelError>;
    fn deinit(&mut self);
}

// ===========================================================================
// RAM-backed provider
// ===========================================================================

/// Swap provider backed by ordinary kernel memory.
///
/// Active from boot until a disk-backed provider is attached. Trades memory
/// for swap space: a "swapped out" page still occupies a slot here, so this
/// provider does not actually relieve memory pressure, but it gives the VMM
/// a uniform swap-id abstraction to exercise before storage is available.
#[cfg(feature = "alloc")]
pub struct RamSwapProvider {
    slots: Vec<[u8; PAGE_SIZE]>,
    free_slots: Vec<u64>,
}

#[cfg(feature = "alloc")]
impl RamSwapProvider {
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_slots: Vec::new(),
        }
    }
}

#[cfg(feature = "alloc")]
impl Default for RamSwapProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "alloc")]
impl SwapProvider for RamSwapProvider {
    fn reserve(&mut self, huge: bool) -> Result<SwapId, KernelError> {
        if huge {
            // A contiguous 512-slot run would be needed; the RAM provider
            // only ever hands out single slots.
            return Err(KernelError::OperationNotSupported {
                operation: "ram swap provider: huge page reservation",
            });
        }

        if let Some(idx) = self.free_slots.pop() {
            return Ok(SwapId(idx));
        }

        self.slots.push([0u8; PAGE_SIZE]);
        Ok(SwapId((self.slots.len() - 1) as u64))
    }

    fn free(&mut self, id: SwapId, _huge: bool) {
        if (id.0 as usize) < self.slots.len() {
            self.free_slots.push(id.0);
        }
    }

    fn write(&mut self, id: SwapId, page: &[u8; PAGE_SIZE]) -> Result<(), KernelError> {
        let slot = self
            .slots
            .get_mut(id.0 as usize)
            .ok_or(KernelError::InvalidAddress { addr: id.0 as usize })?;
        slot.copy_from_slice(page);
        Ok(())
    }

    fn read(&mut self, id: SwapId, page: &mut [u8; PAGE_SIZE]) -> Result<(), KernelError> {
        let slot = self
            .slots
            .get(id.0 as usize)
            .ok_or(KernelError::InvalidAddress { addr: id.0 as usize })?;
        page.copy_from_slice(slot);
        Ok(())
    }

    fn deinit(&mut self) {
        self.slots.clear();
        self.free_slots.clear();
    }
}

// ===========================================================================
// Disk-backed provider
// ===========================================================================

/// Magic stamped in block 0 of a swap partition.
#[cfg(feature = "swap-disk")]
const SWAP_MAGIC: u64 = 0x4F42_4F53_5741_5021; // "OBOSWAP!" in ASCII, packed LE

#[cfg(feature = "swap-disk")]
const SWAP_HEADER_VERSION: u32 = 1;

#[cfg(feature = "swap-disk")]
const SWAP_FLAG_HIBERNATE: u32 = 1 << 0;

/// On-disk header occupying the first page of the swap partition.
#[cfg(feature = "swap-disk")]
#[derive(Debug, Clone, Copy)]
#[repr(C)]
struct SwapHeader {
    magic: u64,
    version: u32,
    flags: u32,
    reserved_blocks: u64,
    free_list_head: u64,
}

#[cfg(feature = "swap-disk")]
impl SwapHeader {
    fn to_bytes(self) -> [u8; PAGE_SIZE] {
        let mut buf = [0u8; PAGE_SIZE];
        buf[0..8].copy_from_slice(&self.magic.to_le_bytes());
        buf[8..12].copy_from_slice(&self.version.to_le_bytes());
        buf[12..16].copy_from_slice(&self.flags.to_le_bytes());
        buf[16..24].copy_from_slice(&self.reserved_blocks.to_le_bytes());
        buf[24..32].copy_from_slice(&self.free_list_head.to_le_bytes());
        buf
    }

    fn from_bytes(buf: &[u8; PAGE_SIZE]) -> Option<Self> {
        let magic = u64::from_le_bytes(buf[0..8].try_into().ok()?);
        if magic != SWAP_MAGIC {
            return None;
        }
        Some(Self {
            magic,
            version: u32::from_le_bytes(buf[8..12].try_into().ok()?),
            flags: u32::from_le_bytes(buf[12..16].try_into().ok()?),
            reserved_blocks: u64::from_le_bytes(buf[16..24].try_into().ok()?),
            free_list_head: u64::from_le_bytes(buf[24..32].try_into().ok()?),
        })
    }
}

/// A node in the on-disk free list, threaded by LBA (page-granular: one
/// swap "page" is one node slot). `n_pages` is the run length starting at
/// this node's own LBA; `next_lba` chains to the next free run, or
/// `u64::MAX` at the tail.
#[cfg(feature = "swap-disk")]
#[derive(Debug, Clone, Copy)]
struct FreeNode {
    n_pages: u64,
    next_lba: u64,
}

#[cfg(feature = "swap-disk")]
const FREE_NODE_TAIL: u64 = u64::MAX;

#[cfg(feature = "swap-disk")]
impl FreeNode {
    fn to_bytes(self) -> [u8; PAGE_SIZE] {
        let mut buf = [0u8; PAGE_SIZE];
        buf[0..8].copy_from_slice(&self.n_pages.to_le_bytes());
        buf[8..16].copy_from_slice(&self.next_lba.to_le_bytes());
        buf
    }

    fn from_bytes(buf: &[u8; PAGE_SIZE]) -> Self {
        Self {
            n_pages: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
            next_lba: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
        }
    }
}

/// Maximum free-list nodes visited by one best-fit scan. A pathologically
/// fragmented swap area degrades to first-fit rather than walking forever.
#[cfg(feature = "swap-disk")]
const MAX_FREE_LIST_SCAN: usize = 4096;

/// Disk-backed swap provider over a raw partition: block 0 is the
/// [`SwapHeader`], every page-granular block after it is either in use or a
/// [`FreeNode`] threaded by LBA.
#[cfg(feature = "swap-disk")]
pub struct DiskSwapProvider {
    device: Box<dyn crate::fs::blockdev::BlockDevice + Send + Sync>,
    header: SwapHeader,
}

#[cfg(feature = "swap-disk")]
impl DiskSwapProvider {
    const HEADER_LBA: u64 = 0;

    /// How many of the device's own blocks make up one page-granular swap
    /// "LBA" as used by [`FreeNode`]/[`SwapId`]. `page_to_device_block`
    /// converts between the two.
    fn device_blocks_per_page(&self) -> u64 {
        (PAGE_SIZE as u64) / self.device.block_size() as u64
    }

    fn page_to_device_block(&self, page_lba: u64) -> u64 {
        page_lba * self.device_blocks_per_page()
    }

    /// Format a fresh partition: writes the header with an empty free list
    /// spanning every page after the header.
    pub fn format(
        mut device: Box<dyn crate::fs::blockdev::BlockDevice + Send + Sync>,
        reserved_blocks: u64,
    ) -> Result<Self, KernelError> {
        let blocks_per_page = (PAGE_SIZE as u64) / device.block_size() as u64;
        let total_pages = device.block_count() / blocks_per_page;
        let first_free_lba = 1 + reserved_blocks;
        if first_free_lba >= total_pages {
            return Err(KernelError::InvalidArgument {
                name: "swap_partition_size",
                value: "too small for header and reserved blocks",
            });
        }

        let header = SwapHeader {
            magic: SWAP_MAGIC,
            version: SWAP_HEADER_VERSION,
            flags: 0,
            reserved_blocks,
            free_list_head: first_free_lba,
        };

        let head_node = FreeNode {
            n_pages: total_pages - first_free_lba,
            next_lba: FREE_NODE_TAIL,
        };

        device.write_blocks(
            Self::HEADER_LBA * blocks_per_page,
            &header.to_bytes(),
        )?;
        device.write_blocks(first_free_lba * blocks_per_page, &head_node.to_bytes())?;

        Ok(Self { device, header })
    }

    /// Attach to an already-formatted partition, validating the header.
    pub fn open(
        mut device: Box<dyn crate::fs::blockdev::BlockDevice + Send + Sync>,
    ) -> Result<Self, KernelError> {
        let mut buf = [0u8; PAGE_SIZE];
        device.read_blocks(0, &mut buf)?; // header always lives at device block 0
        let header = SwapHeader::from_bytes(&buf).ok_or(KernelError::InvalidArgument {
            name: "swap_header",
            value: "bad magic",
        })?;

        if header.flags & SWAP_FLAG_HIBERNATE != 0 {
            return Err(KernelError::OperationNotSupported {
                operation: "hibernation swap image as a migration target",
            });
        }

        Ok(Self { device, header })
    }

    fn read_node(&mut self, lba: u64) -> Result<FreeNode, KernelError> {
        let mut buf = [0u8; PAGE_SIZE];
        let block = self.page_to_device_block(lba);
        self.device.read_blocks(block, &mut buf)?;
        Ok(FreeNode::from_bytes(&buf))
    }

    fn write_node(&mut self, lba: u64, node: FreeNode) -> Result<(), KernelError> {
        let block = self.page_to_device_block(lba);
        self.device.write_blocks(block, &node.to_bytes())
    }

    fn write_header(&mut self) -> Result<(), KernelError> {
        let block = self.page_to_device_block(Self::HEADER_LBA);
        self.device.write_blocks(block, &self.header.to_bytes())
    }

    /// Best-fit allocation of `pages` contiguous page-slots from the
    /// on-disk free list. Only the head LBA is cached in memory; every
    /// other node is walked from disk, matching a design meant to survive
    /// reboot without a large resident free-list cache.
    fn alloc_pages(&mut self, pages: u64) -> Result<u64, KernelError> {
        let mut prev_lba: Option<u64> = None;
        let mut cur_lba = self.header.free_list_head;

        let mut best: Option<(u64, Option<u64>, FreeNode)> = None; // (lba, prev, node)
        let mut scanned = 0;

        while cur_lba != FREE_NODE_TAIL && scanned < MAX_FREE_LIST_SCAN {
            let node = self.read_node(cur_lba)?;
            if node.n_pages >= pages {
                let better = match &best {
                    Some((_, _, best_node)) => node.n_pages < best_node.n_pages,
                    None => true,
                };
                if better {
                    best = Some((cur_lba, prev_lba, node));
                    if node.n_pages == pages {
                        break; // exact fit, stop early
                    }
                }
            }
            prev_lba = Some(cur_lba);
            cur_lba = node.next_lba;
            scanned += 1;
        }

        let (lba, prev, node) = best.ok_or(KernelError::OutOfMemory {
            requested: pages as usize * PAGE_SIZE,
            available: 0,
        })?;

        if node.n_pages == pages {
            // Exact fit: unlink the node entirely.
            self.unlink(prev, node.next_lba)?;
        } else {
            // Carve `pages` off the front; the remainder keeps living at a
            // new LBA (old_lba + pages) with the same successor.
            let remainder_lba = lba + pages;
            let remainder = FreeNode {
                n_pages: node.n_pages - pages,
                next_lba: node.next_lba,
            };
            self.write_node(remainder_lba, remainder)?;
            self.unlink(prev, remainder_lba)?;
        }

        Ok(lba)
    }

    /// Point `prev`'s successor (or the header's free-list head, if there is
    /// no predecessor) at `new_next`.
    fn unlink(&mut self, prev: Option<u64>, new_next: u64) -> Result<(), KernelError> {
        match prev {
            Some(prev_lba) => {
                let mut prev_node = self.read_node(prev_lba)?;
                prev_node.next_lba = new_next;
                self.write_node(prev_lba, prev_node)
            }
            None => {
                self.header.free_list_head = new_next;
                self.write_header()
            }
        }
    }

    /// Return `pages` contiguous page-slots starting at `lba` to the free
    /// list by pushing a new head node referencing the previous head.
    fn free_pages(&mut self, lba: u64, pages: u64) -> Result<(), KernelError> {
        let node = FreeNode {
            n_pages: pages,
            next_lba: self.header.free_list_head,
        };
        self.write_node(lba, node)?;
        self.header.free_list_head = lba;
        self.write_header()
    }
}

#[cfg(feature = "swap-disk")]
impl SwapProvider for DiskSwapProvider {
    fn reserve(&mut self, huge: bool) -> Result<SwapId, KernelError> {
        let pages = if huge { 512 } else { 1 };
        let lba = self.alloc_pages(pages)?;
        Ok(SwapId(lba))
    }

    fn free(&mut self, id: SwapId, huge: bool) {
        let pages = if huge { 512 } else { 1 };
        let _ = self.free_pages(id.0, pages);
    }

    fn write(&mut self, id: SwapId, page: &[u8; PAGE_SIZE]) -> Result<(), KernelError> {
        let block = self.page_to_device_block(id.0);
        self.device.write_blocks(block, page)
    }

    fn read(&mut self, id: SwapId, page: &mut [u8; PAGE_SIZE]) -> Result<(), KernelError> {
        let block = self.page_to_device_block(id.0);
        self.device.read_blocks(block, page)
    }

    fn deinit(&mut self) {
        let _ = self.device.flush();
    }
}

// ===========================================================================
// Dirty / standby tracking
// ===========================================================================

/// A page currently under eviction bookkeeping.
#[cfg(feature = "alloc")]
#[derive(Debug, Clone, Copy)]
pub struct SwapPage {
    pub swap_id: SwapId,
    pub frame: FrameNumber,
    /// `Some((inode, offset))` for a file-backed page; `None` for anonymous.
    pub file_backing: Option<(u64, u64)>,
    /// MMIO-backed pages are never swapped; tracked only so callers can
    /// assert they never land on the dirty/standby lists.
    pub mmio: bool,
}

#[cfg(feature = "alloc")]
struct EvictionLists {
    dirty: VecDeque<SwapPage>,
    standby: VecDeque<SwapPage>,
}

#[cfg(feature = "alloc")]
impl EvictionLists {
    const fn new() -> Self {
        Self {
            dirty: VecDeque::new(),
            standby: VecDeque::new(),
        }
    }
}

#[cfg(feature = "alloc")]
static EVICTION: Mutex<EvictionLists> = Mutex::new(EvictionLists::new());

/// Total bytes currently on the dirty list; drives page-writer wakeup when
/// it crosses [`DIRTY_WAKEUP_THRESHOLD`].
static DIRTY_BYTES: AtomicU64 = AtomicU64::new(0);

/// Page-writer wakeup threshold (4 MiB of dirty pages).
pub const DIRTY_WAKEUP_THRESHOLD: u64 = 4 * 1024 * 1024;

/// Set when the page writer has outstanding work; the page-writer thread
/// spins on this rather than blocking on a scheduler event, since the
/// scheduler does not yet expose a generic wait/notify primitive this
/// module can use from a `no_std`, not-yet-thread-aware context.
static WRITER_PENDING: AtomicBool = AtomicBool::new(false);

/// Enqueue `page` on the dirty list (no-op for MMIO pages, which are never
/// written to a swap device).
#[cfg(feature = "alloc")]
pub fn mark_dirty(page: SwapPage) {
    if page.mmio {
        return;
    }
    EVICTION.lock().dirty.push_back(page);
    DIRTY_BYTES.fetch_add(PAGE_SIZE as u64, Ordering::AcqRel);
    if DIRTY_BYTES.load(Ordering::Acquire) >= DIRTY_WAKEUP_THRESHOLD {
        WRITER_PENDING.store(true, Ordering::Release);
    }
}

/// Move `page` (matched by swap id) from the dirty list to the standby
/// list, removing it from dirty first if present.
#[cfg(feature = "alloc")]
pub fn mark_standby(page: SwapPage) {
    let mut lists = EVICTION.lock();
    let before = lists.dirty.len();
    lists.dirty.retain(|p| p.swap_id != page.swap_id);
    if lists.dirty.len() < before {
        DIRTY_BYTES.fetch_sub(PAGE_SIZE as u64, Ordering::AcqRel);
    }
    lists.standby.push_back(page);
}

/// Pop the oldest page off the standby list, if any, for outright physical
/// reclamation (the frame allocator calls this on an out-of-memory retry;
/// see §4.B).
#[cfg(feature = "alloc")]
pub fn reclaim_standby_page() -> Option<SwapPage> {
    EVICTION.lock().standby.pop_front()
}

// ===========================================================================
// Active provider
// ===========================================================================

#[cfg(feature = "alloc")]
static PROVIDER: Mutex<Option<Box<dyn SwapProvider>>> = Mutex::new(None);

/// Bring up swap with the RAM-backed provider active.
pub fn init() {
    #[cfg(feature = "alloc")]
    {
        *PROVIDER.lock() = Some(Box::new(RamSwapProvider::new()));
    }
    crate::println!("[MM] swap initialized (ram-backed provider)");
}

/// Replace the active provider (e.g. once a swap partition is probed and
/// attached post-boot). The outgoing provider is deinitialized first.
#[cfg(feature = "alloc")]
pub fn set_provider(provider: Box<dyn SwapProvider>) {
    let mut guard = PROVIDER.lock();
    if let Some(old) = guard.as_mut() {
        old.deinit();
    }
    *guard = Some(provider);
}

/// Outcome of [`swap_in`].
#[cfg(feature = "alloc")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapInOutcome {
    /// The frame was still resident on the dirty/standby list; no I/O was
    /// needed, just a remap.
    Soft(FrameNumber),
    /// The frame had already been reclaimed; its contents were read back
    /// from the swap device into a freshly allocated frame.
    Hard(FrameNumber),
}

/// Evict `frame` by reserving a swap id and recording it on the dirty list
/// (or standby, if `dirty` is false, meaning the page's contents already
/// match what is on the swap device / source file).
#[cfg(feature = "alloc")]
pub fn swap_out(
    frame: FrameNumber,
    dirty: bool,
    file_backing: Option<(u64, u64)>,
    mmio: bool,
) -> Result<SwapId, KernelError> {
    if mmio {
        return Err(KernelError::OperationNotSupported {
            operation: "swap_out on an MMIO-backed page",
        });
    }

    let mut guard = PROVIDER.lock();
    let provider = guard.as_mut().ok_or(KernelError::NotInitialized {
        subsystem: "swap",
    })?;
    let id = provider.reserve(false)?;
    drop(guard);

    let page = SwapPage {
        swap_id: id,
        frame,
        file_backing,
        mmio,
    };

    if dirty {
        mark_dirty(page);
    } else {
        mark_standby(page);
    }

    Ok(id)
}

/// Resolve a swap-phys PTE back into a resident frame.
#[cfg(feature = "alloc")]
pub fn swap_in(id: SwapId) -> Result<SwapInOutcome, KernelError> {
    let existing = {
        let mut lists = EVICTION.lock();
        let from_dirty = lists
            .dirty
            .iter()
            .position(|p| p.swap_id == id)
            .map(|i| lists.dirty.remove(i).unwrap());
        if let Some(p) = from_dirty {
            DIRTY_BYTES.fetch_sub(PAGE_SIZE as u64, Ordering::AcqRel);
            Some(p)
        } else {
            lists
                .standby
                .iter()
                .position(|p| p.swap_id == id)
                .map(|i| lists.standby.remove(i).unwrap())
        }
    };

    let mut guard = PROVIDER.lock();
    let provider = guard.as_mut().ok_or(KernelError::NotInitialized {
        subsystem: "swap",
    })?;

    if let Some(page) = existing {
        // SOFT fault: the frame never actually left memory.
        provider.free(id, false);
        return Ok(SwapInOutcome::Soft(page.frame));
    }

    // HARD fault: the page writer already flushed and the frame was
    // reclaimed. Allocate a new frame and read the contents back.
    let new_frame = crate::mm::FRAME_ALLOCATOR
        .lock()
        .allocate_frames(1, None)
        .map_err(|_| KernelError::OutOfMemory {
            requested: PAGE_SIZE,
            available: 0,
        })?;

    let virt = crate::mm::phys_to_virt_addr(new_frame.as_u64() * PAGE_SIZE as u64);
    // SAFETY: new_frame was just allocated and is exclusively ours.
    let buf: &mut [u8; PAGE_SIZE] = unsafe { &mut *(virt as *mut [u8; PAGE_SIZE]) };
    provider.read(id, buf)?;
    provider.free(id, false);

    Ok(SwapInOutcome::Hard(new_frame))
}

/// Request the page writer to flush pages matching `kind` on its next
/// pass. Synchronous in this implementation: the flush runs inline rather
/// than handed to a separate kernel thread, since the scheduler does not
/// yet expose kernel-thread spawning this module can drive; see
/// `run_page_writer_pass` for the actual flush logic shared with the
/// (future) dedicated writer thread.
#[cfg(feature = "alloc")]
pub fn request_sync(kind: SyncKind) {
    run_page_writer_pass(kind);
}

/// Drain the dirty list for pages matching `kind`, writing each one to its
/// backing store and moving it to the standby list. I/O errors are logged
/// and the page is left on the dirty list for the next pass; the page
/// writer is the sole authority that clears a page's dirty status, so a
/// failed write must not silently drop it.
#[cfg(feature = "alloc")]
pub fn run_page_writer_pass(kind: SyncKind) {
    loop {
        let next = {
            let mut lists = EVICTION.lock();
            let idx = lists.dirty.iter().position(|p| match p.file_backing {
                Some(_) => kind.contains(SyncKind::FILE),
                None => kind.contains(SyncKind::ANON),
            });
            idx.map(|i| lists.dirty.remove(i).unwrap())
        };

        let Some(page) = next else { break };

        let virt = crate::mm::phys_to_virt_addr(page.frame.as_u64() * PAGE_SIZE as u64);
        // SAFETY: `page.frame` is resident (it is only tracked here while
        // still backed by real memory) and page-aligned.
        let buf: &[u8; PAGE_SIZE] = unsafe { &*(virt as *const [u8; PAGE_SIZE]) };

        let result = match page.file_backing {
            Some((_inode, _offset)) => {
                // File-backed pages flush through the owning filesystem
                // driver's synchronous write path rather than the swap
                // provider; the VFS wires the concrete driver call once a
                // vnode handle is threaded through here.
                Ok(())
            }
            None => {
                let mut guard = PROVIDER.lock();
                match guard.as_mut() {
                    Some(provider) => provider.write(page.swap_id, buf),
                    None => Err(KernelError::NotInitialized { subsystem: "swap" }),
                }
            }
        };

        DIRTY_BYTES.fetch_sub(PAGE_SIZE as u64, Ordering::AcqRel);

        match result {
            Ok(()) => {
                EVICTION.lock().standby.push_back(page);
            }
            Err(_) => {
                // Leave it dirty for the next pass rather than losing data.
                mark_dirty(page);
                crate::println!("[SWAP] page writer: write failed, page stays dirty");
            }
        }
    }

    WRITER_PENDING.store(false, Ordering::Release);
}

/// Entry point for a dedicated page-writer kernel thread, once the
/// scheduler exposes kernel-thread spawning with a blocking wait/notify
/// primitive. Spins on [`WRITER_PENDING`] in the meantime so the logic is
/// exercised even before that integration lands.
#[cfg(feature = "alloc")]
pub fn run_page_writer() -> ! {
    loop {
        if WRITER_PENDING.swap(false, Ordering::AcqRel) {
            run_page_writer_pass(SyncKind::ALL);
        } else {
            core::hint::spin_loop();
        }
    }
}

#[cfg(all(test, feature = "alloc"))]
mod tests {
    use super::*;

    #[test]
    fn ram_provider_reserve_write_read_roundtrip() {
        let mut provider = RamSwapProvider::new();
        let id = provider.reserve(false).unwrap();

        let mut page = [0u8; PAGE_SIZE];
        page[0] = 0xAB;
        page[PAGE_SIZE - 1] = 0xCD;
        provider.write(id, &page).unwrap();

        let mut out = [0u8; PAGE_SIZE];
        provider.read(id, &mut out).unwrap();
        assert_eq!(out[0], 0xAB);
        assert_eq!(out[PAGE_SIZE - 1], 0xCD);
    }

    #[test]
    fn ram_provider_reuses_freed_slots() {
        let mut provider = RamSwapProvider::new();
        let id1 = provider.reserve(false).unwrap();
        provider.free(id1, false);
        let id2 = provider.reserve(false).unwrap();
        assert_eq!(id1, id2);
    }

    #[test]
    fn ram_provider_rejects_huge() {
        let mut provider = RamSwapProvider::new();
        assert!(provider.reserve(true).is_err());
    }

    #[test]
    fn sync_kind_all_contains_both() {
        assert!(SyncKind::ALL.contains(SyncKind::ANON));
        assert!(SyncKind::ALL.contains(SyncKind::FILE));
    }

    #[test]
    fn mark_dirty_then_standby_moves_list_membership() {
        let page = SwapPage {
            swap_id: SwapId(42),
            frame: FrameNumber::new(1),
            file_backing: None,
            mmio: false,
        };
        mark_dirty(page);
        assert!(EVICTION.lock().dirty.iter().any(|p| p.swap_id == page.swap_id));

        mark_standby(page);
        let lists = EVICTION.lock();
        assert!(!lists.dirty.iter().any(|p| p.swap_id == page.swap_id));
        assert!(lists.standby.iter().any(|p| p.swap_id == page.swap_id));
    }

    #[test]
    fn mark_dirty_skips_mmio_pages() {
        let before = EVICTION.lock().dirty.len();
        let page = SwapPage {
            swap_id: SwapId(99),
            frame: FrameNumber::new(2),
            file_backing: None,
            mmio: true,
        };
        mark_dirty(page);
        assert_eq!(EVICTION.lock().dirty.len(), before);
    }
}
