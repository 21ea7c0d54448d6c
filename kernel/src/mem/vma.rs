//! Virtual memory areas: per-process mapped regions.
//!
//! A region is a page-aligned span of a process's address space between
//! [`MMAP_BASE`] and [`OFFSET`], backed either by zero-filled anonymous
//! memory or by an open file. Eager regions get their frames at map time;
//! lazy ones get them on first touch, through [`handle_fault`].
//!
//! Region records live in one table behind one lock, which is the
//! outermost lock in the system: it is never held while frames are
//! allocated, pages populated, or blocks transferred. Those happen after
//! the record is claimed (or removed), so a half-populated region is
//! already visible as a record but its pages simply fault in as usual.

use crate::fs::OpenFile;
use crate::mem::error::{Error, Result};
use crate::sync::Mutex;
use crate::system::SystemState;
use crate::threading::process::Pid;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use nephros_shared::mem::{is_page_aligned, page_round_down, MMAP_BASE, OFFSET, PAGE_FRAME_SIZE};
use nephros_shared::paging::{EntryState, PageTableEntry};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Protection {
    pub read: bool,
    pub write: bool,
}

impl Protection {
    pub const READ: Self = Self {
        read: true,
        write: false,
    };
    pub const READ_WRITE: Self = Self {
        read: true,
        write: true,
    };
}

#[derive(Clone)]
pub enum Backing {
    Anonymous,
    File {
        file: Arc<OpenFile>,
        offset: usize,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PopulateMode {
    Eager,
    Lazy,
}

#[derive(Clone)]
pub struct Vma {
    size: usize,
    prot: Protection,
    backing: Backing,
    populate: PopulateMode,
}

impl Vma {
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn prot(&self) -> Protection {
        self.prot
    }
}

/// All regions of all processes, keyed by (owner, base address).
pub struct VmaTable {
    content: Mutex<BTreeMap<(Pid, usize), Vma>>,
    capacity: usize,
}

impl VmaTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            content: Mutex::new(BTreeMap::new()),
            capacity,
        }
    }

    /// Total number of regions across every process.
    pub fn len(&self) -> usize {
        self.content.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn vma_at(content: &BTreeMap<(Pid, usize), Vma>, pid: Pid, addr: usize) -> Option<(usize, Vma)> {
        let ((_, base), vma) = content.range((pid, 0)..=(pid, addr)).next_back()?;
        if addr < base + vma.size {
            Some((*base, vma.clone()))
        } else {
            None
        }
    }

    fn is_address_range_free(
        content: &BTreeMap<(Pid, usize), Vma>,
        pid: Pid,
        range: core::ops::Range<usize>,
    ) -> bool {
        if Self::vma_at(content, pid, range.start).is_some() {
            return false;
        }
        content
            .range((pid, range.start)..(pid, range.end))
            .next()
            .is_none()
    }
}

/// Creates a region at `MMAP_BASE + hint` and returns its base address.
///
/// `hint` and `size` must be page aligned, `size` nonzero, and the span
/// must stay below [`OFFSET`]. File backings need a page-aligned offset, a
/// readable file, and a writable file if `prot.write` is set. The new span
/// must not overlap an existing region of the same process.
pub fn map(
    system: &SystemState,
    pid: Pid,
    hint: usize,
    size: usize,
    prot: Protection,
    backing: Backing,
    populate: PopulateMode,
) -> Result<usize> {
    if size == 0 || !is_page_aligned(size) || !is_page_aligned(hint) || !prot.read {
        return Err(Error::InvalidArgument);
    }
    let base = MMAP_BASE
        .checked_add(hint)
        .ok_or(Error::InvalidArgument)?;
    let end = base.checked_add(size).ok_or(Error::InvalidArgument)?;
    if end > OFFSET {
        return Err(Error::InvalidArgument);
    }
    if let Backing::File { file, offset } = &backing {
        if !is_page_aligned(*offset) || !file.readable() || (prot.write && !file.writable()) {
            return Err(Error::InvalidArgument);
        }
    }

    let vma = Vma {
        size,
        prot,
        backing,
        populate,
    };

    // Claim the record, then populate with the table unlocked.
    {
        let mut content = system.regions.content.lock();
        if content.len() >= system.regions.capacity {
            return Err(Error::ResourceExhausted);
        }
        if !VmaTable::is_address_range_free(&content, pid, base..end) {
            return Err(Error::InvalidArgument);
        }
        content.insert((pid, base), vma.clone());
    }

    if vma.populate == PopulateMode::Eager {
        for vaddr in (base..end).step_by(PAGE_FRAME_SIZE) {
            if let Err(e) = populate_page(system, pid, base, &vma, vaddr) {
                // Undo everything this call created.
                for torn in (base..=vaddr).step_by(PAGE_FRAME_SIZE) {
                    teardown_page(system, pid, torn);
                }
                system.regions.content.lock().remove(&(pid, base));
                return Err(e);
            }
        }
    }

    Ok(base)
}

/// Removes the region whose base is exactly `addr`, releasing every frame
/// and swap slot it holds.
///
/// Fails with [`Error::OwnershipViolation`] if a region with that base
/// exists but belongs to another process, [`Error::NotFound`] otherwise.
pub fn unmap(system: &SystemState, pid: Pid, addr: usize) -> Result<()> {
    let vma = {
        let mut content = system.regions.content.lock();
        match content.remove(&(pid, addr)) {
            Some(vma) => vma,
            None => {
                return if content.keys().any(|&(_, base)| base == addr) {
                    Err(Error::OwnershipViolation)
                } else {
                    Err(Error::NotFound)
                };
            }
        }
    };

    for vaddr in (addr..addr + vma.size).step_by(PAGE_FRAME_SIZE) {
        teardown_page(system, pid, vaddr);
    }
    Ok(())
}

/// Resolves a page fault at `addr` for `pid`.
///
/// A swapped page is brought back in; an unmapped page inside a region is
/// populated; a page already resident means another thread got there first
/// and the fault is spurious. An address outside every region of `pid` is
/// [`Error::NotFound`] (the caller kills the process or signals it).
pub fn handle_fault(system: &SystemState, pid: Pid, addr: usize) -> Result<()> {
    let page = page_round_down(addr);
    let (base, vma) = {
        let content = system.regions.content.lock();
        VmaTable::vma_at(&content, pid, page).ok_or(Error::NotFound)?
    };

    match system.page_tables.get(pid, page).state() {
        EntryState::Unmapped => populate_page(system, pid, base, &vma, page),
        EntryState::Swapped { .. } => crate::swapping::swap_in(system, pid, page),
        EntryState::Resident { .. } => Ok(()),
    }
}

/// Duplicates every region of `parent` into `child`, page contents
/// included. Pages the parent has swapped out are read from their slots
/// and become resident in the child; the parent's slots are untouched.
///
/// On frame exhaustion partway through, everything already given to the
/// child is torn down again.
pub fn fork_duplicate(system: &SystemState, parent: Pid, child: Pid) -> Result<()> {
    let inherited: Vec<(usize, Vma)> = {
        let mut content = system.regions.content.lock();
        let inherited: Vec<(usize, Vma)> = content
            .range((parent, 0)..=(parent, usize::MAX))
            .map(|((_, base), vma)| (*base, vma.clone()))
            .collect();
        if content.len() + inherited.len() > system.regions.capacity {
            return Err(Error::ResourceExhausted);
        }
        for (base, vma) in &inherited {
            content.insert((child, *base), vma.clone());
        }
        inherited
    };

    for (base, vma) in &inherited {
        for vaddr in (*base..*base + vma.size).step_by(PAGE_FRAME_SIZE) {
            if let Err(e) = duplicate_page(system, parent, child, vaddr) {
                exit_cleanup(system, child);
                return Err(e);
            }
        }
    }
    Ok(())
}

/// Releases every region, frame, and swap slot held by `pid`.
pub fn exit_cleanup(system: &SystemState, pid: Pid) {
    let owned: Vec<(usize, Vma)> = {
        let mut content = system.regions.content.lock();
        let owned = content
            .range((pid, 0)..=(pid, usize::MAX))
            .map(|((_, base), vma)| (*base, vma.clone()))
            .collect();
        content.retain(|&(owner, _), _| owner != pid);
        owned
    };

    for (base, vma) in owned {
        for vaddr in (base..base + vma.size).step_by(PAGE_FRAME_SIZE) {
            teardown_page(system, pid, vaddr);
        }
    }
}

/// Makes one page of a region resident for the first time.
///
/// The frame arrives zeroed; a file backing overlays the file's bytes,
/// short reads past end of file leaving the zero tail. Publication uses a
/// compare on the unmapped entry so a concurrent fault on the same page
/// populates it exactly once.
fn populate_page(system: &SystemState, pid: Pid, base: usize, vma: &Vma, vaddr: usize) -> Result<()> {
    let frame = crate::mem::allocate(system)?;

    if let Backing::File { file, offset } = &vma.backing {
        let file_offset = offset + (vaddr - base);
        // Exclusive: the frame came straight off the free list.
        let _ = file.read_at(file_offset, unsafe { system.frames.frame_bytes_mut(frame) });
    }

    let mut ring = system.ring.lock();
    if system.page_tables.replace_if(
        pid,
        vaddr,
        PageTableEntry::DEFAULT,
        PageTableEntry::resident(frame, vma.prot.write),
    ) {
        ring.insert(frame, pid, vaddr);
    } else {
        drop(ring);
        system.frames.free(frame);
    }
    Ok(())
}

/// Copies one page of `parent` into `child`'s address space, whatever
/// state the parent's copy is in.
fn duplicate_page(system: &SystemState, parent: Pid, child: Pid, vaddr: usize) -> Result<()> {
    let entry = system.page_tables.get(parent, vaddr);
    let (frame, writable) = match entry.state() {
        EntryState::Unmapped => return Ok(()),
        EntryState::Resident {
            frame: parent_frame,
            writable,
        } => {
            let frame = crate::mem::allocate(system)?;
            system.frames.copy_frame(frame, parent_frame);
            (frame, writable)
        }
        EntryState::Swapped { slot, writable } => {
            let frame = crate::mem::allocate(system)?;
            system.swap.slots().wait_ready(slot);
            // Exclusive: fresh frame, and the parent's slot stays occupied.
            system
                .swap
                .read_slot(slot, unsafe { system.frames.frame_bytes_mut(frame) });
            (frame, writable)
        }
    };

    let mut ring = system.ring.lock();
    system
        .page_tables
        .set(child, vaddr, PageTableEntry::resident(frame, writable));
    ring.insert(frame, child, vaddr);
    Ok(())
}

/// Returns whatever one page holds, resident frame or swap slot, to the
/// free pools and clears its entry.
fn teardown_page(system: &SystemState, pid: Pid, vaddr: usize) {
    let released = {
        let mut ring = system.ring.lock();
        match system.page_tables.get(pid, vaddr).state() {
            EntryState::Unmapped => None,
            EntryState::Resident { frame, .. } => {
                ring.remove(frame);
                system.page_tables.clear(pid, vaddr);
                system.page_tables.invalidate(pid, vaddr);
                Some(Released::Frame(frame))
            }
            EntryState::Swapped { slot, .. } => {
                system.page_tables.clear(pid, vaddr);
                Some(Released::Slot(slot))
            }
        }
    };

    match released {
        None => {}
        Some(Released::Frame(frame)) => system.frames.free(frame),
        Some(Released::Slot(slot)) => {
            // An in-flight eviction write must land before the slot is
            // reusable.
            system.swap.slots().wait_ready(slot);
            system.swap.slots().free(slot);
        }
    }
}

enum Released {
    Frame(arbitrary_int::u20),
    Slot(arbitrary_int::u20),
}
