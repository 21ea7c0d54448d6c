//! Physical frame allocator.
//!
//! Frames live in one contiguous arena and are tracked by a core map (one
//! entry per frame) plus an intrusive free list threaded through the frame
//! indices, so allocate and free are O(1). Frame numbers are `u20`, the
//! same width the page table entry's index field stores.
//!
//! Allocated frames are handed out zeroed so no stale data leaks between
//! owners. Freed frames are filled with [`FREED_FRAME_FILL`] so a
//! use-after-free reads recognizable junk rather than plausible data.

use crate::sync::Mutex;
use alloc::boxed::Box;
use alloc::vec;
use arbitrary_int::u20;
use bitbybit::bitfield;
use core::ptr::NonNull;
use nephros_shared::mem::{FREED_FRAME_FILL, PAGE_FRAME_SIZE};

#[bitfield(u8, default = 0)]
pub struct CoreMapEntry {
    #[bit(0, rw)]
    allocated: bool,
}

const FREE_LIST_END: u32 = u32::MAX;

struct CoreMap {
    entries: Box<[CoreMapEntry]>,
    /// Free-list links: `free_next[i]` is the frame after `i` on the free
    /// list, `FREE_LIST_END` for the last one. Meaningless for allocated
    /// frames.
    free_next: Box<[u32]>,
    free_head: u32,
    free_count: usize,
}

pub struct FrameTable {
    base: NonNull<u8>,
    frame_count: usize,
    core_map: Mutex<CoreMap>,
    /// Owns the arena `base` points into.
    _storage: Box<[u8]>,
}

// The arena is only reached through `base`, and every access goes through
// the unsafe accessors whose contracts forbid aliasing; the core map is
// behind its own lock.
unsafe impl Send for FrameTable {}
unsafe impl Sync for FrameTable {}

impl FrameTable {
    /// Creates a table managing `frame_count` frames, all initially free.
    ///
    /// # Panics
    ///
    /// Panics if `frame_count` is 0 or does not fit in a `u20`.
    pub fn new(frame_count: usize) -> Self {
        assert!(frame_count > 0, "frame table must manage at least one frame");
        assert!(
            u32::try_from(frame_count).is_ok_and(|n| n <= 1 << 20),
            "frame number must fit the page table entry index field"
        );

        let mut storage = vec![0u8; frame_count * PAGE_FRAME_SIZE].into_boxed_slice();
        let base = NonNull::new(storage.as_mut_ptr()).expect("boxed slice is non-null");

        // Link every frame onto the free list in ascending order.
        let mut free_next = vec![FREE_LIST_END; frame_count].into_boxed_slice();
        for i in 0..frame_count - 1 {
            free_next[i] = (i + 1) as u32;
        }

        Self {
            base,
            frame_count,
            core_map: Mutex::new(CoreMap {
                entries: vec![CoreMapEntry::DEFAULT; frame_count].into_boxed_slice(),
                free_next,
                free_head: 0,
                free_count: frame_count,
            }),
            _storage: storage,
        }
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    /// Number of frames currently free.
    pub fn free_count(&self) -> usize {
        self.core_map.lock().free_count
    }

    /// Pops a free frame, zeroed, or returns `None` if every frame is
    /// allocated. Callers wanting eviction on exhaustion go through
    /// [`crate::mem::allocate`] instead.
    pub fn try_allocate(&self) -> Option<u20> {
        let frame = {
            let mut core_map = self.core_map.lock();
            if core_map.free_head == FREE_LIST_END {
                return None;
            }
            let frame = core_map.free_head as usize;
            core_map.free_head = core_map.free_next[frame];
            core_map.free_count -= 1;
            assert!(!core_map.entries[frame].allocated());
            core_map.entries[frame] = core_map.entries[frame].with_allocated(true);
            frame
        };

        // Safe: the frame was just removed from the free list, so nothing
        // else holds it.
        unsafe { self.frame_bytes_mut(u20::new(frame as u32)) }.fill(0);
        Some(u20::new(frame as u32))
    }

    /// Returns a frame to the free list.
    ///
    /// # Panics
    ///
    /// Panics if `frame` is out of range or not currently allocated. Both
    /// indicate corrupted bookkeeping, which must not be papered over.
    pub fn free(&self, frame: u20) {
        let index = frame.value() as usize;
        assert!(index < self.frame_count, "freeing out-of-range frame");

        let mut core_map = self.core_map.lock();
        assert!(
            core_map.entries[index].allocated(),
            "double free of frame {index}"
        );
        // Fill only once the frame is known to be ours, and before it goes
        // back on the free list where a new owner could claim it.
        // Safe: the caller is giving up its exclusive hold on the frame.
        unsafe { self.frame_bytes_mut(frame) }.fill(FREED_FRAME_FILL);
        core_map.entries[index] = core_map.entries[index].with_allocated(false);
        core_map.free_next[index] = core_map.free_head;
        core_map.free_head = index as u32;
        core_map.free_count += 1;
    }

    /// Borrows a frame's bytes.
    ///
    /// # Safety
    ///
    /// `frame` must be allocated and the caller must ensure no concurrent
    /// mutable access to the same frame for the borrow's duration.
    pub unsafe fn frame_bytes(&self, frame: u20) -> &[u8] {
        let index = frame.value() as usize;
        assert!(index < self.frame_count, "out-of-range frame access");
        core::slice::from_raw_parts(
            self.base.as_ptr().add(index * PAGE_FRAME_SIZE),
            PAGE_FRAME_SIZE,
        )
    }

    /// Mutably borrows a frame's bytes.
    ///
    /// # Safety
    ///
    /// `frame` must be allocated (or just popped from the free list) and
    /// the caller must have exclusive access to it for the borrow's
    /// duration.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn frame_bytes_mut(&self, frame: u20) -> &mut [u8] {
        let index = frame.value() as usize;
        assert!(index < self.frame_count, "out-of-range frame access");
        core::slice::from_raw_parts_mut(
            self.base.as_ptr().add(index * PAGE_FRAME_SIZE),
            PAGE_FRAME_SIZE,
        )
    }

    /// Copies one frame's contents into another.
    ///
    /// # Panics
    ///
    /// Panics if `dst == src`.
    pub fn copy_frame(&self, dst: u20, src: u20) {
        assert_ne!(dst.value(), src.value(), "copying a frame onto itself");
        // Safe: distinct frames, both owned by the caller.
        unsafe {
            let src = self.frame_bytes(src);
            self.frame_bytes_mut(dst).copy_from_slice(src);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::FrameTable;
    use nephros_shared::mem::FREED_FRAME_FILL;

    #[test]
    fn allocations_come_back_zeroed() {
        let frames = FrameTable::new(2);
        let frame = frames.try_allocate().unwrap();
        unsafe { frames.frame_bytes_mut(frame) }.fill(0xcd);
        frames.free(frame);

        // The freed frame was junk-filled, and reallocating it zeroes it.
        let again = frames.try_allocate().unwrap();
        assert_eq!(again.value(), frame.value());
        assert!(unsafe { frames.frame_bytes(again) }.iter().all(|&b| b == 0));
    }

    #[test]
    fn freed_frames_are_junk_filled() {
        let frames = FrameTable::new(1);
        let frame = frames.try_allocate().unwrap();
        frames.free(frame);
        // Reading a freed frame is exactly the bug the fill pattern exists
        // to expose; peeking at the arena here stands in for that bug.
        assert!(unsafe { frames.frame_bytes(frame) }
            .iter()
            .all(|&b| b == FREED_FRAME_FILL));
    }

    #[test]
    fn exhaustion_and_recovery() {
        let frames = FrameTable::new(3);
        let held: alloc::vec::Vec<_> = (0..3).map(|_| frames.try_allocate().unwrap()).collect();
        assert_eq!(frames.free_count(), 0);
        assert!(frames.try_allocate().is_none());

        frames.free(held[1]);
        assert_eq!(frames.free_count(), 1);
        assert_eq!(frames.try_allocate().unwrap().value(), held[1].value());
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn double_free_panics() {
        let frames = FrameTable::new(1);
        let frame = frames.try_allocate().unwrap();
        frames.free(frame);
        frames.free(frame);
    }

    #[test]
    fn double_free_panics_before_touching_the_frame() {
        let frames = FrameTable::new(1);
        let frame = frames.try_allocate().unwrap();
        frames.free(frame);
        // Stand-in for a racing allocation claiming the freed frame: its
        // bytes belong to someone else by the time the stale free runs.
        unsafe { frames.frame_bytes_mut(frame) }.fill(0x77);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            frames.free(frame);
        }));
        assert!(result.is_err());
        // The stale free must fail before scribbling the fill pattern
        // over bytes it no longer owns.
        assert!(unsafe { frames.frame_bytes(frame) }
            .iter()
            .all(|&b| b == 0x77));
    }

    #[test]
    #[should_panic(expected = "out-of-range")]
    fn out_of_range_free_panics() {
        let frames = FrameTable::new(1);
        frames.free(arbitrary_int::u20::new(7));
    }

    #[test]
    fn copy_frame_moves_contents() {
        let frames = FrameTable::new(2);
        let a = frames.try_allocate().unwrap();
        let b = frames.try_allocate().unwrap();
        unsafe { frames.frame_bytes_mut(a) }.fill(0x11);
        frames.copy_frame(b, a);
        assert!(unsafe { frames.frame_bytes(b) }.iter().all(|&b| b == 0x11));
    }
}
