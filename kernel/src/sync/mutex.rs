//! The lock guarding every kernel service.
//!
//! A thin facade so call sites name `sync::Mutex` rather than a concrete
//! primitive. The `ticket_mutex` feature selects the FIFO ticket lock; it
//! is the only primitive shipped, so the fallback resolves to the same
//! type today.
//!
//! A guard must never be held across a blocking backing-store transfer;
//! the swap paths stage their lock-free I/O around the critical sections.

pub mod ticket;

use core::fmt;
use core::ops::{Deref, DerefMut};

#[cfg(feature = "ticket_mutex")]
use ticket::{TicketMutex as Inner, TicketMutexGuard as InnerGuard};
#[cfg(not(feature = "ticket_mutex"))]
use ticket::{TicketMutex as Inner, TicketMutexGuard as InnerGuard};

/// Mutual exclusion for the data it wraps. Send/Sync follow from the
/// underlying primitive.
pub struct Mutex<T: ?Sized> {
    inner: Inner<T>,
}

/// Grants access to the locked data; dropping it releases the lock.
pub struct MutexGuard<'a, T: 'a + ?Sized> {
    inner: InnerGuard<'a, T>,
}

impl<T> Mutex<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: Inner::new(value),
        }
    }
}

impl<T: ?Sized> Mutex<T> {
    pub fn lock(&self) -> MutexGuard<T> {
        MutexGuard {
            inner: self.inner.lock(),
        }
    }

    pub fn try_lock(&self) -> Option<MutexGuard<T>> {
        self.inner
            .try_lock()
            .map(|inner| MutexGuard { inner })
    }

    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(&self.inner, f)
    }
}

impl<'a, T: ?Sized> Deref for MutexGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<'a, T: ?Sized> DerefMut for MutexGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

impl<'a, T: ?Sized + fmt::Debug> fmt::Debug for MutexGuard<'a, T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}
