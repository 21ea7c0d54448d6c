// https://wiki.osdev.org/Paging
//
// The entry layout follows the x86 page-table entry for the hardware-defined
// bits (present, read/write, user, accessed). Bit 9 is one of the
// OS-available bits and is used as the swap discriminant: the index field
// holds a physical frame number when `present` is set and a swap slot number
// when `swapped` is set. The two interpretations are never valid at once.

#![allow(clippy::cast_possible_truncation)]

use arbitrary_int::u20;
use bitbybit::bitfield;

#[bitfield(u32, default = 0)]
pub struct PageTableEntry {
    #[bit(0, rw)]
    present: bool,
    #[bit(1, rw)]
    writable: bool,
    #[bit(2, rw)]
    user: bool,
    #[bit(5, rw)]
    accessed: bool,
    #[bit(9, rw)]
    swapped: bool,
    #[bits(12..=31, rw)]
    index: u20,
}

/// The three logical states a page-table entry can encode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryState {
    Unmapped,
    /// Content lives in the frame with this index.
    Resident { frame: u20, writable: bool },
    /// Content lives in the swap slot with this index.
    Swapped { slot: u20, writable: bool },
}

impl PageTableEntry {
    /// Builds a resident user entry mapping `frame`.
    pub fn resident(frame: u20, writable: bool) -> Self {
        Self::DEFAULT
            .with_present(true)
            .with_user(true)
            .with_writable(writable)
            .with_index(frame)
    }

    /// Builds a swapped-out entry pointing at `slot`, preserving the saved
    /// permissions. Present and accessed are clear by construction.
    pub fn swapped_out(slot: u20, writable: bool) -> Self {
        Self::DEFAULT
            .with_swapped(true)
            .with_user(true)
            .with_writable(writable)
            .with_index(slot)
    }

    pub fn state(self) -> EntryState {
        if self.present() {
            EntryState::Resident {
                frame: self.index(),
                writable: self.writable(),
            }
        } else if self.swapped() {
            EntryState::Swapped {
                slot: self.index(),
                writable: self.writable(),
            }
        } else {
            EntryState::Unmapped
        }
    }

    pub fn is_unmapped(self) -> bool {
        !self.present() && !self.swapped()
    }
}
