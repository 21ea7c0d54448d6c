//! Error types for the virtual-memory subsystem.
//!
//! These are returned to the calling process as failure values; none of them
//! is fatal to the kernel. The only fatal condition in this subsystem is an
//! attempt to free or touch a frame outside the legal physical range, which
//! panics (see `FrameTable`).

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Misaligned address or length, protection exceeding the file's
    /// capabilities, or a malformed anonymous/file combination.
    InvalidArgument,
    /// No frame obtainable even after eviction, or the swap bitmap is full.
    ResourceExhausted,
    /// Unmap of an unrecorded region, or swap-in of an entry that is not in
    /// the swapped state.
    NotFound,
    /// Operation targeting another address space's frame or region, or a
    /// store through a read-only mapping.
    OwnershipViolation,
}

impl Error {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidArgument => "invalid argument",
            Self::ResourceExhausted => "out of physical frames or swap slots",
            Self::NotFound => "no such region or page",
            Self::OwnershipViolation => "resource owned by another process",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

pub type Result<T> = core::result::Result<T, Error>;
