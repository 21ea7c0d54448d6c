//! Swap slot accounting.
//!
//! Two bitmaps, one word-packed bit per slot. `map` says a slot holds (or
//! is receiving) a page; `busy` says its block write has not finished yet.
//! A slot is allocated busy, marked ready once the write completes, and a
//! reader that arrives early spins in [`SlotAllocator::wait_ready`] so it
//! never reads a half-written block.

use crate::sync::Mutex;
use alloc::boxed::Box;
use alloc::vec;
use arbitrary_int::u20;

const BITS_PER_WORD: usize = u64::BITS as usize;

struct SlotBits {
    map: Box<[u64]>,
    busy: Box<[u64]>,
    free_count: usize,
}

impl SlotBits {
    fn get(words: &[u64], slot: usize) -> bool {
        words[slot / BITS_PER_WORD] & (1 << (slot % BITS_PER_WORD)) != 0
    }

    fn set(words: &mut [u64], slot: usize, value: bool) {
        let mask = 1 << (slot % BITS_PER_WORD);
        if value {
            words[slot / BITS_PER_WORD] |= mask;
        } else {
            words[slot / BITS_PER_WORD] &= !mask;
        }
    }
}

pub struct SlotAllocator {
    slot_count: usize,
    bits: Mutex<SlotBits>,
}

impl SlotAllocator {
    pub fn new(slot_count: usize) -> Self {
        assert!(slot_count > 0, "swap space must have at least one slot");
        assert!(
            slot_count <= 1 << 20,
            "slot number must fit the page table entry index field"
        );
        let words = slot_count.div_ceil(BITS_PER_WORD);
        Self {
            slot_count,
            bits: Mutex::new(SlotBits {
                map: vec![0; words].into_boxed_slice(),
                busy: vec![0; words].into_boxed_slice(),
                free_count: slot_count,
            }),
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    pub fn free_count(&self) -> usize {
        self.bits.lock().free_count
    }

    /// Claims the lowest free slot, marked busy until
    /// [`Self::mark_ready`]. `None` means swap space is full.
    pub fn allocate(&self) -> Option<u20> {
        let mut bits = self.bits.lock();
        if bits.free_count == 0 {
            return None;
        }
        let slot = (0..self.slot_count).find(|&s| !SlotBits::get(&bits.map, s))?;
        SlotBits::set(&mut bits.map, slot, true);
        SlotBits::set(&mut bits.busy, slot, true);
        bits.free_count -= 1;
        Some(u20::new(slot as u32))
    }

    /// The slot's block write finished; readers may proceed.
    pub fn mark_ready(&self, slot: u20) {
        let slot = self.check(slot);
        let mut bits = self.bits.lock();
        assert!(SlotBits::get(&bits.map, slot), "marking a free slot ready");
        SlotBits::set(&mut bits.busy, slot, false);
    }

    /// Spins until the slot's write has completed. No lock is held while
    /// spinning. Returns immediately if the slot has already been released
    /// again; the caller's page table recheck catches that case.
    pub fn wait_ready(&self, slot: u20) {
        let slot = self.check(slot);
        loop {
            let bits = self.bits.lock();
            if !SlotBits::get(&bits.map, slot) || !SlotBits::get(&bits.busy, slot) {
                return;
            }
            drop(bits);
            core::hint::spin_loop();
        }
    }

    /// Releases a slot.
    ///
    /// # Panics
    ///
    /// Panics on double free or if the slot's write is still in flight;
    /// both mean the PTE bookkeeping is corrupt.
    pub fn free(&self, slot: u20) {
        let slot = self.check(slot);
        let mut bits = self.bits.lock();
        assert!(SlotBits::get(&bits.map, slot), "double free of slot {slot}");
        assert!(
            !SlotBits::get(&bits.busy, slot),
            "freeing slot {slot} with write in flight"
        );
        SlotBits::set(&mut bits.map, slot, false);
        bits.free_count += 1;
    }

    fn check(&self, slot: u20) -> usize {
        let slot = slot.value() as usize;
        assert!(slot < self.slot_count, "out-of-range swap slot {slot}");
        slot
    }
}

#[cfg(test)]
mod tests {
    use super::SlotAllocator;
    use arbitrary_int::u20;

    #[test]
    fn lowest_free_slot_first() {
        let slots = SlotAllocator::new(4);
        assert_eq!(slots.allocate().unwrap().value(), 0);
        assert_eq!(slots.allocate().unwrap().value(), 1);
        slots.mark_ready(u20::new(0));
        slots.free(u20::new(0));
        assert_eq!(slots.allocate().unwrap().value(), 0);
        // Slots 0 and 1 are held, 2 and 3 are not.
        assert_eq!(slots.free_count(), 2);
    }

    #[test]
    fn exhaustion_returns_none() {
        let slots = SlotAllocator::new(2);
        assert!(slots.allocate().is_some());
        assert!(slots.allocate().is_some());
        assert!(slots.allocate().is_none());
    }

    #[test]
    fn ready_slot_does_not_block() {
        let slots = SlotAllocator::new(1);
        let slot = slots.allocate().unwrap();
        slots.mark_ready(slot);
        slots.wait_ready(slot); // returns immediately
        slots.free(slot);
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn double_free_panics() {
        let slots = SlotAllocator::new(1);
        let slot = slots.allocate().unwrap();
        slots.mark_ready(slot);
        slots.free(slot);
        slots.free(slot);
    }

    #[test]
    #[should_panic(expected = "in flight")]
    fn freeing_busy_slot_panics() {
        let slots = SlotAllocator::new(1);
        let slot = slots.allocate().unwrap();
        slots.free(slot);
    }

    #[test]
    fn bitmap_spans_word_boundaries() {
        let slots = SlotAllocator::new(70);
        let held: alloc::vec::Vec<_> = (0..70).map(|_| slots.allocate().unwrap()).collect();
        assert_eq!(held[64].value(), 64);
        assert!(slots.allocate().is_none());
        slots.mark_ready(u20::new(65));
        slots.free(u20::new(65));
        assert_eq!(slots.allocate().unwrap().value(), 65);
    }
}
