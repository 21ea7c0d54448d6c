pub mod block_core;

pub use block_core::{BlockDevice, BlockIndex, RamDisk, SWAP_BLOCK_SIZE};
