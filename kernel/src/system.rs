//! The global system state.
//!
//! Every service is a field here rather than its own static, so tests
//! build private instances with tiny configurations and exercise the whole
//! stack in isolation. The kernel proper initializes one instance at boot
//! and reaches it through [`unwrap_system`].

use crate::block::RamDisk;
use crate::fs::FileTable;
use crate::mem::frame_allocator::FrameTable;
use crate::mem::page_replacement::ClockRing;
use crate::mem::vma::VmaTable;
use crate::paging::PageTables;
use crate::swapping::SwapSpace;
use crate::threading::process::ProcessState;
use alloc::boxed::Box;
use nephros_shared::mem::{MAX_REGIONS, PAGE_FRAME_SIZE};
use nephros_shared::println;
use nephros_shared::sizes::SWAP_SIZE;
use once_cell::race::OnceBox;

#[derive(Clone, Copy, Debug)]
pub struct SystemConfig {
    pub total_frames: usize,
    pub swap_slots: usize,
    pub region_slots: usize,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            total_frames: 256,
            swap_slots: SWAP_SIZE / PAGE_FRAME_SIZE,
            region_slots: MAX_REGIONS,
        }
    }
}

pub struct SystemState {
    pub frames: FrameTable,
    pub ring: ClockRing,
    pub swap: SwapSpace,
    pub page_tables: PageTables,
    pub regions: VmaTable,
    pub files: FileTable,
    pub process: ProcessState,
}

impl SystemState {
    pub fn new(config: SystemConfig) -> Self {
        let frames = FrameTable::new(config.total_frames);
        let ring = ClockRing::new(config.total_frames);
        let swap = SwapSpace::new(Box::new(RamDisk::new(config.swap_slots)));
        Self {
            frames,
            ring,
            swap,
            page_tables: PageTables::new(),
            regions: VmaTable::new(config.region_slots),
            files: FileTable::new(),
            process: ProcessState::new(),
        }
    }
}

static SYSTEM: OnceBox<SystemState> = OnceBox::new();

/// Initializes the global system state. Later calls keep the first
/// configuration.
pub fn init_system(config: SystemConfig) -> &'static SystemState {
    SYSTEM.get_or_init(|| {
        println!(
            "mem: {} frames ({} KiB), {} swap slots, {} region slots",
            config.total_frames,
            config.total_frames * PAGE_FRAME_SIZE / 1024,
            config.swap_slots,
            config.region_slots,
        );
        Box::new(SystemState::new(config))
    })
}

/// # Panics
///
/// Panics if [`init_system`] has not run yet.
pub fn unwrap_system() -> &'static SystemState {
    SYSTEM.get().expect("system not initialized")
}

#[cfg(test)]
mod tests {
    use super::{SystemConfig, SystemState};

    #[test]
    fn fresh_system_has_everything_free() {
        let config = SystemConfig::default();
        let system = SystemState::new(config);
        assert_eq!(system.frames.free_count(), config.total_frames);
        assert_eq!(system.swap.slots().free_count(), config.swap_slots);
        assert!(system.ring.is_empty());
        assert!(system.regions.is_empty());
    }
}
