//! Per-process page tables.
//!
//! Hardware walks a radix tree; here a map keyed by (pid, page address)
//! stands in for it so the entry encoding in [`nephros_shared::paging`] can
//! be exercised on the host. Entries absent from the map read back as the
//! unmapped [`PageTableEntry::DEFAULT`], exactly like a zeroed hardware
//! entry. The map's lock is a leaf in the lock order: it is taken last and
//! held only for the single load or store.

use crate::sync::Mutex;
use crate::threading::process::Pid;
use alloc::collections::BTreeMap;
use core::sync::atomic::{AtomicUsize, Ordering};
use nephros_shared::mem::is_page_aligned;
use nephros_shared::paging::PageTableEntry;

#[derive(Default)]
pub struct PageTables {
    entries: Mutex<BTreeMap<(Pid, usize), PageTableEntry>>,
    /// Count of TLB invalidations that real hardware would have required.
    invalidations: AtomicUsize,
}

impl PageTables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the entry for a page, `DEFAULT` (unmapped) if none was stored.
    pub fn get(&self, pid: Pid, vaddr: usize) -> PageTableEntry {
        debug_assert!(is_page_aligned(vaddr));
        self.entries
            .lock()
            .get(&(pid, vaddr))
            .copied()
            .unwrap_or(PageTableEntry::DEFAULT)
    }

    /// Stores an entry in a single write, so concurrent readers observe
    /// either the old encoding or the new one, never a mix.
    pub fn set(&self, pid: Pid, vaddr: usize, entry: PageTableEntry) {
        debug_assert!(is_page_aligned(vaddr));
        self.entries.lock().insert((pid, vaddr), entry);
    }

    /// Replaces the entry only if it still reads back as `expected`.
    /// Returns whether the replacement happened.
    pub fn replace_if(
        &self,
        pid: Pid,
        vaddr: usize,
        expected: PageTableEntry,
        new: PageTableEntry,
    ) -> bool {
        debug_assert!(is_page_aligned(vaddr));
        let mut entries = self.entries.lock();
        let current = entries
            .get(&(pid, vaddr))
            .copied()
            .unwrap_or(PageTableEntry::DEFAULT);
        if current.raw_value() != expected.raw_value() {
            return false;
        }
        entries.insert((pid, vaddr), new);
        true
    }

    /// Clears the entry back to unmapped, returning the old value.
    pub fn clear(&self, pid: Pid, vaddr: usize) -> PageTableEntry {
        debug_assert!(is_page_aligned(vaddr));
        self.entries
            .lock()
            .remove(&(pid, vaddr))
            .unwrap_or(PageTableEntry::DEFAULT)
    }

    /// Reads and clears the accessed bit, as the clock sweep does when it
    /// gives a page its second chance. Returns the bit's old value.
    pub fn test_and_clear_accessed(&self, pid: Pid, vaddr: usize) -> bool {
        debug_assert!(is_page_aligned(vaddr));
        let mut entries = self.entries.lock();
        match entries.get_mut(&(pid, vaddr)) {
            Some(entry) if entry.accessed() => {
                *entry = entry.with_accessed(false);
                true
            }
            _ => false,
        }
    }

    /// Marks a page accessed, as the MMU would on any load or store
    /// through it.
    pub fn set_accessed(&self, pid: Pid, vaddr: usize) {
        debug_assert!(is_page_aligned(vaddr));
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(&(pid, vaddr)) {
            *entry = entry.with_accessed(true);
        }
    }

    /// Records the TLB shootdown a mapping change would require on real
    /// hardware.
    pub fn invalidate(&self, _pid: Pid, _vaddr: usize) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn invalidation_count(&self) -> usize {
        self.invalidations.load(Ordering::Relaxed)
    }

    /// Drops every entry belonging to `pid`. Process exit calls this after
    /// the frames themselves have been released.
    pub fn remove_address_space(&self, pid: Pid) {
        self.entries.lock().retain(|(owner, _), _| *owner != pid);
    }

    /// Number of entries stored for `pid`, in any state.
    pub fn entry_count(&self, pid: Pid) -> usize {
        self.entries
            .lock()
            .range((pid, 0)..=(pid, usize::MAX))
            .count()
    }
}
