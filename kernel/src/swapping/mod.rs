//! Moving pages between frames and the swap device.
//!
//! One swap slot holds exactly one page, and slot `i` is block `i` of the
//! backing device. Ownership of a page's bytes is handed between frame and
//! slot by rewriting its page table entry in a single store while the
//! eviction ring is locked; the block transfer itself happens with no locks
//! held, guarded by the slot's in-flight bit.

pub mod slots;

use crate::block::{BlockDevice, SWAP_BLOCK_SIZE};
use crate::mem::error::{Error, Result};
use crate::mem::page_replacement::PageReplacementPolicy;
use crate::system::SystemState;
use crate::threading::process::Pid;
use alloc::boxed::Box;
use arbitrary_int::u20;
use core::sync::atomic::{AtomicU64, Ordering};
use nephros_shared::mem::PAGE_FRAME_SIZE;
use nephros_shared::paging::{EntryState, PageTableEntry};
use slots::SlotAllocator;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SwapStats {
    pub pages_read: u64,
    pub pages_written: u64,
}

pub struct SwapSpace {
    device: Box<dyn BlockDevice>,
    slots: SlotAllocator,
    pages_read: AtomicU64,
    pages_written: AtomicU64,
}

impl SwapSpace {
    /// Wraps a block device as swap space, one slot per block.
    ///
    /// # Panics
    ///
    /// Panics if the device has no blocks.
    pub fn new(device: Box<dyn BlockDevice>) -> Self {
        const _: () = assert!(SWAP_BLOCK_SIZE == PAGE_FRAME_SIZE);
        let slots = SlotAllocator::new(device.block_count());
        Self {
            device,
            slots,
            pages_read: AtomicU64::new(0),
            pages_written: AtomicU64::new(0),
        }
    }

    pub fn slots(&self) -> &SlotAllocator {
        &self.slots
    }

    pub fn stats(&self) -> SwapStats {
        SwapStats {
            pages_read: self.pages_read.load(Ordering::Relaxed),
            pages_written: self.pages_written.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn write_slot(&self, slot: u20, bytes: &[u8]) {
        self.device.write_block(slot.value(), bytes);
        self.pages_written.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn read_slot(&self, slot: u20, buf: &mut [u8]) {
        self.device.read_block(slot.value(), buf);
        self.pages_read.fetch_add(1, Ordering::Relaxed);
    }
}

/// Evicts one page to swap, freeing its frame.
///
/// Victim selection, slot reservation, and the resident-to-swapped entry
/// rewrite happen in one critical section on the ring lock, so no other
/// thread can observe the page half-moved. The block write and the frame
/// release follow with the ring unlocked; until the write completes the
/// slot's in-flight bit keeps readers away.
///
/// Fails with [`Error::ResourceExhausted`] when the ring is empty (nothing
/// evictable) or swap space is full. Returns the index of the freed frame.
pub fn swap_out(system: &SystemState) -> Result<u20> {
    let (victim, slot) = {
        let mut ring = system.ring.lock();
        let victim = ring
            .select_victim(&mut |pid, vaddr| system.page_tables.test_and_clear_accessed(pid, vaddr))
            .ok_or(Error::ResourceExhausted)?;

        let Some(slot) = system.swap.slots().allocate() else {
            // Swap is full; put the page back as if untouched.
            ring.insert(victim.frame, victim.owner, victim.vaddr);
            return Err(Error::ResourceExhausted);
        };

        let entry = system.page_tables.get(victim.owner, victim.vaddr);
        let writable = match entry.state() {
            EntryState::Resident { frame, writable } if frame == victim.frame => writable,
            state => panic!("ring victim out of sync with page table: {state:?}"),
        };
        system.page_tables.set(
            victim.owner,
            victim.vaddr,
            PageTableEntry::swapped_out(slot, writable),
        );
        system.page_tables.invalidate(victim.owner, victim.vaddr);
        (victim, slot)
    };

    // The entry now points at the slot, so nothing can touch the frame;
    // its bytes are ours until we free it.
    let bytes = unsafe { system.frames.frame_bytes(victim.frame) };
    system.swap.write_slot(slot, bytes);
    system.swap.slots().mark_ready(slot);
    system.frames.free(victim.frame);
    Ok(victim.frame)
}

/// Brings a swapped-out page back into a frame.
///
/// The frame is allocated before the ring lock is taken: allocation may
/// itself trigger [`swap_out`], which needs that lock. After the block read
/// the entry is republished only if it still names the same slot; a
/// concurrent swap-in of the same page loses the race harmlessly, dropping
/// its frame.
pub fn swap_in(system: &SystemState, pid: Pid, vaddr: usize) -> Result<()> {
    let entry = system.page_tables.get(pid, vaddr);
    let EntryState::Swapped { slot, writable } = entry.state() else {
        return Err(Error::NotFound);
    };

    let frame = crate::mem::allocate(system)?;

    system.swap.slots().wait_ready(slot);
    // Exclusive: the frame came straight off the free list.
    system
        .swap
        .read_slot(slot, unsafe { system.frames.frame_bytes_mut(frame) });

    let won = {
        let mut ring = system.ring.lock();
        let published = system.page_tables.replace_if(
            pid,
            vaddr,
            entry,
            PageTableEntry::resident(frame, writable),
        );
        if published {
            ring.insert(frame, pid, vaddr);
        }
        published
    };

    if won {
        system.swap.slots().free(slot);
    } else {
        // Someone else resolved the fault (or unmapped the page) first.
        system.frames.free(frame);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::mem::error::Error;
    use crate::system::{SystemConfig, SystemState};
    use crate::threading::process::Pid;
    use arbitrary_int::u20;
    use nephros_shared::paging::{EntryState, PageTableEntry};

    const PID: Pid = 1;
    const VADDR: usize = 0x4000_0000;

    fn tiny_system(frames: usize, slots: usize) -> SystemState {
        SystemState::new(SystemConfig {
            total_frames: frames,
            swap_slots: slots,
            region_slots: 8,
        })
    }

    fn make_resident(system: &SystemState, vaddr: usize, fill: u8) -> u20 {
        let frame = system.frames.try_allocate().unwrap();
        unsafe { system.frames.frame_bytes_mut(frame) }.fill(fill);
        system
            .page_tables
            .set(PID, vaddr, PageTableEntry::resident(frame, true));
        system.ring.insert(frame, PID, vaddr);
        frame
    }

    #[test]
    fn round_trip_preserves_bytes() {
        let system = tiny_system(2, 4);
        let frame = make_resident(&system, VADDR, 0xab);

        super::swap_out(&system).unwrap();
        assert_eq!(system.frames.free_count(), 2);
        let EntryState::Swapped { slot, writable } = system.page_tables.get(PID, VADDR).state()
        else {
            panic!("entry should be swapped");
        };
        assert!(writable);
        assert_eq!(system.swap.slots().free_count(), 3);

        super::swap_in(&system, PID, VADDR).unwrap();
        let EntryState::Resident { frame: back, .. } = system.page_tables.get(PID, VADDR).state()
        else {
            panic!("entry should be resident");
        };
        assert!(unsafe { system.frames.frame_bytes(back) }
            .iter()
            .all(|&b| b == 0xab));
        // The slot was released and the old frame recycled.
        assert_eq!(system.swap.slots().free_count(), 4);
        let _ = (frame, slot);
    }

    #[test]
    fn empty_ring_means_exhausted() {
        let system = tiny_system(1, 1);
        assert_eq!(super::swap_out(&system), Err(Error::ResourceExhausted));
    }

    #[test]
    fn full_swap_relinks_the_victim() {
        let system = tiny_system(2, 1);
        make_resident(&system, VADDR, 1);
        make_resident(&system, VADDR + 0x1000, 2);

        super::swap_out(&system).unwrap();
        assert_eq!(super::swap_out(&system), Err(Error::ResourceExhausted));
        // The failed eviction left its victim resident and on the ring.
        assert_eq!(system.ring.len(), 1);
        assert!(matches!(
            system.page_tables.get(PID, VADDR + 0x1000).state(),
            EntryState::Resident { .. }
        ));
    }

    #[test]
    fn swap_in_of_resident_page_is_not_found() {
        let system = tiny_system(2, 1);
        make_resident(&system, VADDR, 0);
        assert_eq!(super::swap_in(&system, PID, VADDR), Err(Error::NotFound));
        assert_eq!(super::swap_in(&system, PID, VADDR + 0x1000), Err(Error::NotFound));
    }

    #[test]
    fn stats_count_transfers() {
        let system = tiny_system(2, 2);
        make_resident(&system, VADDR, 7);
        super::swap_out(&system).unwrap();
        super::swap_in(&system, PID, VADDR).unwrap();
        super::swap_out(&system).unwrap();
        let stats = system.swap.stats();
        assert_eq!(stats.pages_written, 2);
        assert_eq!(stats.pages_read, 1);
    }
}
