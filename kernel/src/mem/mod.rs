//! Memory management: physical frames, replacement, and virtual regions.

pub mod error;
pub mod frame_allocator;
pub mod page_replacement;
pub mod user;
pub mod vma;

pub use error::{Error, Result};

use crate::system::SystemState;
use arbitrary_int::u20;

/// Allocates a frame, evicting one page if none is free.
///
/// A single eviction either frees a frame or fails, so one retry suffices;
/// under concurrency another thread may steal the freed frame, in which
/// case the caller sees [`Error::ResourceExhausted`] and may try again.
pub fn allocate(system: &SystemState) -> Result<u20> {
    if let Some(frame) = system.frames.try_allocate() {
        return Ok(frame);
    }
    crate::swapping::swap_out(system)?;
    system.frames.try_allocate().ok_or(Error::ResourceExhausted)
}

#[cfg(test)]
mod tests {
    use super::Error;
    use crate::system::{SystemConfig, SystemState};
    use nephros_shared::paging::PageTableEntry;

    #[test]
    fn allocate_falls_back_to_eviction() {
        let system = SystemState::new(SystemConfig {
            total_frames: 1,
            swap_slots: 1,
            region_slots: 8,
        });
        let frame = system.frames.try_allocate().unwrap();
        system
            .page_tables
            .set(1, 0x4000_0000, PageTableEntry::resident(frame, false));
        system.ring.insert(frame, 1, 0x4000_0000);

        // The pool is empty but the resident page can be pushed to swap.
        let evicted = super::allocate(&system).unwrap();
        assert_eq!(evicted.value(), frame.value());
    }

    #[test]
    fn allocate_with_nothing_evictable_fails() {
        let system = SystemState::new(SystemConfig {
            total_frames: 1,
            swap_slots: 1,
            region_slots: 8,
        });
        let _held = system.frames.try_allocate().unwrap();
        // Frame allocated but never put on the ring (a pinned page).
        assert_eq!(super::allocate(&system), Err(Error::ResourceExhausted));
    }
}
