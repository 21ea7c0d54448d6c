pub const KB: usize = 1024;
pub const MB: usize = KB * KB;
pub const GB: usize = MB * KB;

/// Default size of the swap partition in bytes.
pub const SWAP_SIZE: usize = 4 * MB;
