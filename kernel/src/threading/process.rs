//! Process identity and the memory side of the process lifecycle.
//!
//! Scheduling, trap frames, and context switching live elsewhere; this
//! module owns pid allocation and the two lifecycle points the memory core
//! cares about, fork and exit.

use crate::mem::error::Result;
use crate::system::SystemState;
use core::sync::atomic::{AtomicU16, Ordering};

pub type Pid = u16;
pub type AtomicPid = AtomicU16;

#[derive(Default)]
pub struct ProcessState {
    next_pid: AtomicPid,
}

impl ProcessState {
    pub fn new() -> Self {
        // Pid 0 is reserved for the idle/kernel pseudo-process.
        Self {
            next_pid: AtomicPid::new(1),
        }
    }

    pub fn allocate_pid(&self) -> Pid {
        self.next_pid.fetch_add(1, Ordering::Relaxed)
    }
}

/// Forks `parent`'s memory image: a fresh pid, a copy of every region with
/// its page contents, and duplicates of its open files sharing their
/// cursors. The child's image is fully independent of the parent's; pages
/// the parent has in swap are read back and given to the child resident.
///
/// On failure (frame or region exhaustion) nothing of the child survives.
pub fn fork(system: &SystemState, parent: Pid) -> Result<Pid> {
    let child = system.process.allocate_pid();
    crate::mem::vma::fork_duplicate(system, parent, child)?;
    system.files.fork_dup(parent, child);
    Ok(child)
}

/// Tears down `pid`'s memory image: regions, frames, swap slots, open
/// files, and finally the page table itself.
pub fn exit(system: &SystemState, pid: Pid) {
    crate::mem::vma::exit_cleanup(system, pid);
    system.files.close_all(pid);
    system.page_tables.remove_address_space(pid);
}

#[cfg(test)]
mod tests {
    use crate::mem::vma::{Backing, PopulateMode, Protection};
    use crate::system::{SystemConfig, SystemState};
    use nephros_shared::mem::PAGE_FRAME_SIZE;

    #[test]
    fn pids_are_unique() {
        let state = super::ProcessState::new();
        let a = state.allocate_pid();
        let b = state.allocate_pid();
        assert_ne!(a, b);
        assert_ne!(a, 0);
    }

    #[test]
    fn exit_after_fork_leaves_the_parent_intact() {
        let system = SystemState::new(SystemConfig {
            total_frames: 8,
            swap_slots: 8,
            region_slots: 8,
        });
        let parent = system.process.allocate_pid();
        let base = crate::mem::vma::map(
            &system,
            parent,
            0,
            2 * PAGE_FRAME_SIZE,
            Protection::READ_WRITE,
            Backing::Anonymous,
            PopulateMode::Eager,
        )
        .unwrap();
        crate::mem::user::copy_to_user(&system, parent, base, b"parent data").unwrap();

        let child = super::fork(&system, parent).unwrap();
        assert_eq!(system.frames.free_count(), 4);

        super::exit(&system, child);
        assert_eq!(system.frames.free_count(), 6);
        assert_eq!(system.page_tables.entry_count(child), 0);

        let mut buf = [0u8; 11];
        crate::mem::user::copy_from_user(&system, parent, base, &mut buf).unwrap();
        assert_eq!(&buf, b"parent data");
    }
}
