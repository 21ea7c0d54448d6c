//! Copying between user address spaces and kernel buffers.
//!
//! These walk the destination page by page the way the MMU would: a
//! resident page is used directly and its accessed bit set, a swapped page
//! is brought back in, an unmapped page inside a region is populated, and
//! only an address outside every region (or a write through a read-only
//! mapping) fails. Kernel code that moves data into or out of a process
//! goes through here, and so do the tests standing in for user programs.

use crate::mem::error::{Error, Result};
use crate::system::SystemState;
use crate::threading::process::Pid;
use nephros_shared::mem::{page_round_down, OFFSET, PAGE_FRAME_SIZE};
use nephros_shared::paging::EntryState;

/// Copies `buf` into `pid`'s address space at `addr`.
pub fn copy_to_user(system: &SystemState, pid: Pid, addr: usize, buf: &[u8]) -> Result<()> {
    access(system, pid, addr, buf.len(), true, |frame_bytes, chunk| {
        frame_bytes.copy_from_slice(&buf[chunk])
    })
}

/// Copies from `pid`'s address space at `addr` into `buf`.
pub fn copy_from_user(system: &SystemState, pid: Pid, addr: usize, buf: &mut [u8]) -> Result<()> {
    access(system, pid, addr, buf.len(), false, |frame_bytes, chunk| {
        buf[chunk].copy_from_slice(frame_bytes)
    })
}

fn access(
    system: &SystemState,
    pid: Pid,
    addr: usize,
    count: usize,
    write: bool,
    mut transfer: impl FnMut(&mut [u8], core::ops::Range<usize>),
) -> Result<()> {
    if count == 0 {
        return Ok(());
    }
    let end = addr.checked_add(count).ok_or(Error::InvalidArgument)?;
    // User pointers never reach kernel space.
    if end > OFFSET {
        return Err(Error::InvalidArgument);
    }

    let mut cursor = addr;
    while cursor < end {
        let page = page_round_down(cursor);
        let in_page = cursor - page;
        let chunk_len = (PAGE_FRAME_SIZE - in_page).min(end - cursor);

        let frame = resolve(system, pid, page, write)?;
        let chunk_start = cursor - addr;
        // Exclusive enough: the page stays resident for the duration of
        // this chunk in the single-fault-at-a-time model these helpers
        // assume, matching a pinned user page during a kernel copy.
        let frame_bytes =
            unsafe { &mut system.frames.frame_bytes_mut(frame)[in_page..in_page + chunk_len] };
        transfer(frame_bytes, chunk_start..chunk_start + chunk_len);

        cursor += chunk_len;
    }
    Ok(())
}

/// Makes the page at `page` resident and returns its frame, faulting it in
/// or back from swap as needed. Mirrors what the MMU plus the page fault
/// handler do on a real access, accessed-bit update included.
fn resolve(
    system: &SystemState,
    pid: Pid,
    page: usize,
    write: bool,
) -> Result<arbitrary_int::u20> {
    // A fault may be resolved by another thread between the fault and the
    // retry, so loop rather than assume one round settles it.
    for _ in 0..8 {
        match system.page_tables.get(pid, page).state() {
            EntryState::Resident { frame, writable } => {
                if write && !writable {
                    return Err(Error::OwnershipViolation);
                }
                system.page_tables.set_accessed(pid, page);
                return Ok(frame);
            }
            EntryState::Swapped { .. } | EntryState::Unmapped => {
                crate::mem::vma::handle_fault(system, pid, page)?;
            }
        }
    }
    // Only reachable if the page keeps getting evicted between the fault
    // and the load; treat it as memory pressure.
    Err(Error::ResourceExhausted)
}
