//! Page replacement: the clock (second chance) policy.
//!
//! Every resident user page sits on one global ring, a doubly linked list
//! threaded through per-frame nodes so membership changes are O(1) and need
//! no allocation. The clock hand is the ring head; a sweep gives each
//! recently accessed page one second chance (its accessed bit is read and
//! cleared through a callback, keeping this module free of page table
//! knowledge) before the first quiet page is unlinked and returned.
//!
//! A sweep is bounded: after one full lap every accessed bit has been
//! cleared, so if no quiet page was found the head itself is taken. The
//! sweep therefore terminates in at most `len + 1` steps.

use crate::sync::{Mutex, MutexGuard};
use crate::threading::process::Pid;
use alloc::boxed::Box;
use alloc::vec;
use arbitrary_int::u20;

const RING_NONE: u32 = u32::MAX;

/// A page chosen for eviction, already unlinked from the ring.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Victim {
    pub owner: Pid,
    pub vaddr: usize,
    pub frame: u20,
}

pub trait PageReplacementPolicy {
    /// Removes and returns the next victim, or `None` if no page is
    /// evictable. `accessed` reads and clears a page's accessed bit.
    fn select_victim(&mut self, accessed: &mut dyn FnMut(Pid, usize) -> bool) -> Option<Victim>;
}

#[derive(Clone, Copy)]
struct RingNode {
    in_ring: bool,
    owner: Pid,
    vaddr: usize,
    next: u32,
    prev: u32,
}

const EMPTY_NODE: RingNode = RingNode {
    in_ring: false,
    owner: 0,
    vaddr: 0,
    next: RING_NONE,
    prev: RING_NONE,
};

/// Ring state; one node per physical frame, indexed by frame number.
pub struct ClockState {
    nodes: Box<[RingNode]>,
    head: u32,
    len: usize,
}

impl ClockState {
    fn new(frame_count: usize) -> Self {
        Self {
            nodes: vec![EMPTY_NODE; frame_count].into_boxed_slice(),
            head: RING_NONE,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn contains(&self, frame: u20) -> bool {
        self.nodes[frame.value() as usize].in_ring
    }

    /// Links a freshly resident page in just behind the hand, so it is the
    /// last page the current sweep reaches.
    ///
    /// # Panics
    ///
    /// Panics if the frame is already on the ring.
    pub fn insert(&mut self, frame: u20, owner: Pid, vaddr: usize) {
        let index = frame.value() as usize;
        assert!(!self.nodes[index].in_ring, "frame {index} already on ring");

        if self.head == RING_NONE {
            self.nodes[index] = RingNode {
                in_ring: true,
                owner,
                vaddr,
                next: index as u32,
                prev: index as u32,
            };
            self.head = index as u32;
        } else {
            let head = self.head as usize;
            let tail = self.nodes[head].prev as usize;
            self.nodes[index] = RingNode {
                in_ring: true,
                owner,
                vaddr,
                next: self.head,
                prev: tail as u32,
            };
            self.nodes[tail].next = index as u32;
            self.nodes[head].prev = index as u32;
        }
        self.len += 1;
    }

    /// Unlinks a page if present (unmap and exit call this without knowing
    /// whether the page ever made it onto the ring).
    pub fn remove(&mut self, frame: u20) {
        let index = frame.value() as usize;
        if !self.nodes[index].in_ring {
            return;
        }
        self.unlink(index);
    }

    fn unlink(&mut self, index: usize) {
        let node = self.nodes[index];
        if self.len == 1 {
            self.head = RING_NONE;
        } else {
            self.nodes[node.prev as usize].next = node.next;
            self.nodes[node.next as usize].prev = node.prev;
            if self.head == index as u32 {
                self.head = node.next;
            }
        }
        self.nodes[index] = EMPTY_NODE;
        self.len -= 1;
    }
}

impl PageReplacementPolicy for ClockState {
    fn select_victim(&mut self, accessed: &mut dyn FnMut(Pid, usize) -> bool) -> Option<Victim> {
        if self.len == 0 {
            return None;
        }

        for _ in 0..self.len {
            let index = self.head as usize;
            let node = self.nodes[index];
            if accessed(node.owner, node.vaddr) {
                // Second chance: clear the bit (the callback did) and move
                // the hand past it.
                self.head = node.next;
            } else {
                self.unlink(index);
                return Some(Victim {
                    owner: node.owner,
                    vaddr: node.vaddr,
                    frame: u20::new(index as u32),
                });
            }
        }

        // Every page was accessed; all bits are now clear, take the head.
        let index = self.head as usize;
        let node = self.nodes[index];
        self.unlink(index);
        Some(Victim {
            owner: node.owner,
            vaddr: node.vaddr,
            frame: u20::new(index as u32),
        })
    }
}

/// The ring behind its lock. Eviction holds the guard across victim
/// selection and the page table rewrite so the two are one atomic step.
pub struct ClockRing {
    state: Mutex<ClockState>,
}

impl ClockRing {
    pub fn new(frame_count: usize) -> Self {
        Self {
            state: Mutex::new(ClockState::new(frame_count)),
        }
    }

    pub fn lock(&self) -> MutexGuard<ClockState> {
        self.state.lock()
    }

    pub fn insert(&self, frame: u20, owner: Pid, vaddr: usize) {
        self.state.lock().insert(frame, owner, vaddr);
    }

    pub fn remove(&self, frame: u20) {
        self.state.lock().remove(frame);
    }

    pub fn len(&self) -> usize {
        self.state.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().is_empty()
    }
}
