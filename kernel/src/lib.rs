//! The nephros virtual-memory core: physical-frame allocation, per-process
//! memory regions with eager or lazy population, and swapping to a backing
//! store under memory pressure.

#![cfg_attr(target_os = "none", no_std)]

extern crate alloc;

pub mod block;
pub mod fs;
pub mod mem;
pub mod paging;
pub mod swapping;
pub mod sync;
pub mod system;
pub mod threading;
pub mod user_program;
