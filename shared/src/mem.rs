use crate::sizes::KB;

// Page size is 4KB. This is a property of x86 processors.
pub const PAGE_FRAME_SIZE: usize = 4 * KB;

// Any virtual address at or above OFFSET is a kernel address.
pub const OFFSET: usize = 0x8000_0000;

/// Base of the mmap window. Region hint addresses are offsets into
/// `MMAP_BASE..OFFSET`, keeping mappings disjoint from heap and stack.
pub const MMAP_BASE: usize = 0x4000_0000;

/// Freed frames are filled with this pattern to catch dangling references.
/// Frames handed out by the allocator are zeroed, so the pattern is never
/// visible to a new owner.
pub const FREED_FRAME_FILL: u8 = 0x5a;

/// Number of region-table slots shared by all processes.
pub const MAX_REGIONS: usize = 64;

/// Rounds `addr` down to the base of its page.
#[inline]
pub const fn page_round_down(addr: usize) -> usize {
    addr & !(PAGE_FRAME_SIZE - 1)
}

/// True iff `addr` is page-aligned.
#[inline]
pub const fn is_page_aligned(addr: usize) -> bool {
    addr % PAGE_FRAME_SIZE == 0
}
