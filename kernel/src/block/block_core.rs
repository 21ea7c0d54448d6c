//! Backing-store block devices.
//!
//! The swap subsystem sees its backing store as an array of fixed-size
//! blocks, one block per page, read and written synchronously. The calling
//! context blocks until the device acknowledges the transfer.

use crate::sync::Mutex;
use alloc::{boxed::Box, vec};
use core::sync::atomic::{AtomicU64, Ordering};
use nephros_shared::mem::PAGE_FRAME_SIZE;

/// Size of one backing-store block in bytes. Equal to the frame size so a
/// swap slot holds exactly one page.
pub const SWAP_BLOCK_SIZE: usize = PAGE_FRAME_SIZE;

/// Index of a block within a device.
pub type BlockIndex = u32;

/// Lower-level interface to block device drivers.
pub trait BlockDevice: Send + Sync {
    /// Number of blocks the device holds.
    fn block_count(&self) -> usize;

    /// Reads block `index` into `buf`, which must have room for
    /// `SWAP_BLOCK_SIZE` bytes. Blocks until the transfer completes.
    fn read_block(&self, index: BlockIndex, buf: &mut [u8]);

    /// Writes `buf`, which must contain `SWAP_BLOCK_SIZE` bytes, to block
    /// `index`. Returns after the device has acknowledged the data.
    fn write_block(&self, index: BlockIndex, buf: &[u8]);
}

/// Verifies that `buf` is a valid buffer for a block transfer.
///
/// Panics if the buffer is not exactly `SWAP_BLOCK_SIZE` bytes.
fn verify_buffer(buf: &[u8]) {
    if buf.len() != SWAP_BLOCK_SIZE {
        panic!("invalid block buffer size {}", buf.len());
    }
}

/// A memory-backed block device, used as the swap store in tests and on
/// machines without a real swap partition.
pub struct RamDisk {
    blocks: usize,
    data: Mutex<Box<[u8]>>,
    read_count: AtomicU64,
    write_count: AtomicU64,
}

impl RamDisk {
    pub fn new(blocks: usize) -> Self {
        Self {
            blocks,
            data: Mutex::new(vec![0u8; blocks * SWAP_BLOCK_SIZE].into_boxed_slice()),
            read_count: AtomicU64::new(0),
            write_count: AtomicU64::new(0),
        }
    }

    /// Number of blocks read from the device since creation.
    pub fn read_count(&self) -> u64 {
        self.read_count.load(Ordering::Relaxed)
    }

    /// Number of blocks written to the device since creation.
    pub fn write_count(&self) -> u64 {
        self.write_count.load(Ordering::Relaxed)
    }

    fn check_index(&self, index: BlockIndex) {
        if index as usize >= self.blocks {
            panic!(
                "invalid block {} (device size: {} blocks)",
                index, self.blocks
            );
        }
    }
}

impl BlockDevice for RamDisk {
    fn block_count(&self) -> usize {
        self.blocks
    }

    fn read_block(&self, index: BlockIndex, buf: &mut [u8]) {
        self.check_index(index);
        verify_buffer(buf);
        let data = self.data.lock();
        let start = index as usize * SWAP_BLOCK_SIZE;
        buf.copy_from_slice(&data[start..start + SWAP_BLOCK_SIZE]);
        self.read_count.fetch_add(1, Ordering::Relaxed);
    }

    fn write_block(&self, index: BlockIndex, buf: &[u8]) {
        self.check_index(index);
        verify_buffer(buf);
        let mut data = self.data.lock();
        let start = index as usize * SWAP_BLOCK_SIZE;
        data[start..start + SWAP_BLOCK_SIZE].copy_from_slice(buf);
        self.write_count.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::{BlockDevice, RamDisk, SWAP_BLOCK_SIZE};

    #[test]
    fn write_then_read_round_trips() {
        let disk = RamDisk::new(4);
        let mut block = [0u8; SWAP_BLOCK_SIZE];
        block[0] = 0xAB;
        block[SWAP_BLOCK_SIZE - 1] = 0xCD;
        disk.write_block(2, &block);

        let mut readback = [0u8; SWAP_BLOCK_SIZE];
        disk.read_block(2, &mut readback);
        assert_eq!(readback[0], 0xAB);
        assert_eq!(readback[SWAP_BLOCK_SIZE - 1], 0xCD);

        // Other blocks are untouched.
        disk.read_block(0, &mut readback);
        assert!(readback.iter().all(|&b| b == 0));
        assert_eq!(disk.read_count(), 2);
        assert_eq!(disk.write_count(), 1);
    }

    #[test]
    #[should_panic(expected = "invalid block")]
    fn out_of_range_block_panics() {
        let disk = RamDisk::new(2);
        let block = [0u8; SWAP_BLOCK_SIZE];
        disk.write_block(2, &block);
    }
}
