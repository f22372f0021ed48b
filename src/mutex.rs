//! # Mutex
//!
//! Binary lock for uthread threads, built on the scheduler's block/wake
//! mechanism rather than on spinning.
//!
//! A blocked thread is not handed the lock. It is parked in `Waiting` with
//! a pointer to the mutex, and the scheduler makes it runnable again only
//! when a scan finds the mutex free. The woken thread then races for the
//! lock like anyone else, which is why [`Mutex::lock`] loops.
//!
//! There is no wait queue, so there is no FIFO fairness: waiters are woken
//! in round-robin scan order.

use core::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{fatal, Fatal};
use crate::kernel;
use crate::sync::{self, MaskGuard};
use crate::thread::ThreadId;

/// Owner value of a free mutex.
const FREE: usize = usize::MAX;

/// Single-owner lock.
///
/// The fields are only written with preemption masked; the atomics make the
/// type `Sync` so it can live in a `static`, not because of real parallelism.
#[derive(Debug)]
pub struct Mutex {
    owner: AtomicUsize,
    waiters: AtomicUsize,
}

impl Mutex {
    /// Create a free mutex.
    pub const fn new() -> Self {
        Self {
            owner: AtomicUsize::new(FREE),
            waiters: AtomicUsize::new(0),
        }
    }

    /// Block the calling thread until it owns the mutex.
    ///
    /// Waits indefinitely. Acquiring several mutexes is done by sequential
    /// calls; a consistent acquisition order is the caller's job.
    pub fn lock(&self) {
        loop {
            sync::mask();
            let me = kernel::current_masked();
            if self.is_free() {
                self.claim(me);
                sync::unmask();
                return;
            }
            // Returns unmasked once a scan saw the mutex free.
            kernel::wait_for(self);
        }
    }

    /// Take the mutex if it is free. Never blocks.
    pub fn try_lock(&self) -> bool {
        let _guard = MaskGuard::new();
        if self.is_free() {
            self.claim(kernel::current_masked());
            true
        } else {
            false
        }
    }

    /// Release the mutex. Fatal unless the caller owns it.
    pub fn unlock(&self) {
        let _guard = MaskGuard::new();
        let me = kernel::current_masked();
        if let Err(err) = self.check_owner(me) {
            fatal(err);
        }
        self.clear();
    }

    /// Release the mutex's resources. Fatal if it is still held or a
    /// thread is still blocked on it.
    pub fn destroy(self) {
        drop(self);
    }

    /// Thread currently holding the mutex.
    pub fn owner(&self) -> Option<ThreadId> {
        match self.owner.load(Ordering::Relaxed) {
            FREE => None,
            index => Some(ThreadId::new(index)),
        }
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        !self.is_free()
    }

    /// Number of threads currently blocked on this mutex.
    pub fn waiters(&self) -> usize {
        self.waiters.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn is_free(&self) -> bool {
        self.owner.load(Ordering::Relaxed) == FREE
    }

    pub(crate) fn claim(&self, owner: ThreadId) {
        debug_assert!(self.is_free());
        self.owner.store(owner.index(), Ordering::Relaxed);
    }

    pub(crate) fn clear(&self) {
        self.owner.store(FREE, Ordering::Relaxed);
    }

    pub(crate) fn check_owner(&self, caller: ThreadId) -> Result<(), Fatal> {
        match self.owner() {
            Some(owner) if owner == caller => Ok(()),
            owner => Err(Fatal::NotOwner { caller, owner }),
        }
    }

    /// Whether the mutex can go away without leaving a holder or a
    /// blocked thread pointing at it.
    pub(crate) fn check_destroy(&self) -> Result<(), Fatal> {
        if let Some(owner) = self.owner() {
            return Err(Fatal::StillHeld { owner });
        }
        match self.waiters() {
            0 => Ok(()),
            waiters => Err(Fatal::StillAwaited { waiters }),
        }
    }

    pub(crate) fn add_waiter(&self) {
        self.waiters.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn remove_waiter(&self) {
        let prev = self.waiters.fetch_sub(1, Ordering::Relaxed);
        debug_assert!(prev > 0);
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Mutex {
    fn drop(&mut self) {
        if let Err(err) = self.check_destroy() {
            fatal(err);
        }
    }
}
