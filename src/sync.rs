//! # Synchronization Primitives
//!
//! Interrupt discipline for uthread. The "interrupt" is `SIGVTALRM`, the
//! preemption timer; masking it with `pthread_sigmask` is the only thing
//! that keeps the scheduler's handler from running between two
//! instructions. All shared scheduler state and mutex ownership is touched
//! with the signal masked.
//!
//! Masking nests. The signal is blocked when the depth goes 0 → 1 and
//! unblocked when it returns to 0. The depth is per OS thread, like the
//! signal mask it mirrors, and it travels with a context switch: the
//! switching thread masks, and whichever thread resumes unmasks.

use core::cell::Cell;
use core::mem::MaybeUninit;
use core::sync::atomic::{compiler_fence, Ordering};

use critical_section::CriticalSection;

use crate::error::{fatal, Fatal};

thread_local! {
    static DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// The preemption signal.
pub const PREEMPT_SIGNAL: libc::c_int = libc::SIGVTALRM;

fn set_blocked(blocked: bool) {
    let how = if blocked { libc::SIG_BLOCK } else { libc::SIG_UNBLOCK };
    // SAFETY: the set is initialized by sigemptyset before use.
    unsafe {
        let mut set = MaybeUninit::<libc::sigset_t>::uninit();
        libc::sigemptyset(set.as_mut_ptr());
        libc::sigaddset(set.as_mut_ptr(), PREEMPT_SIGNAL);
        let rc = libc::pthread_sigmask(how, set.as_ptr(), core::ptr::null_mut());
        debug_assert_eq!(rc, 0);
    }
}

/// Enter a masked section.
///
/// A tick landing between the depth check and the block runs the whole
/// scheduler and comes back with the depth at 0 again, so the order is
/// safe.
pub fn mask() {
    let depth = DEPTH.with(Cell::get);
    if depth == 0 {
        set_blocked(true);
    }
    DEPTH.with(|d| d.set(depth + 1));
    compiler_fence(Ordering::SeqCst);
}

/// Leave a masked section. Unmasking an unmasked thread is fatal.
pub fn unmask() {
    compiler_fence(Ordering::SeqCst);
    match DEPTH.with(Cell::get) {
        0 => fatal(Fatal::MaskDiscipline { depth: 0 }),
        1 => {
            DEPTH.with(|d| d.set(0));
            set_blocked(false);
        }
        n => DEPTH.with(|d| d.set(n - 1)),
    }
}

/// Current nesting depth of masked sections.
#[inline]
pub fn depth() -> usize {
    DEPTH.with(Cell::get)
}

/// Whether preemption is currently masked.
#[inline]
pub fn is_masked() -> bool {
    depth() > 0
}

/// RAII masked section: masks on creation, unmasks on drop.
#[must_use = "the section ends when the guard is dropped"]
pub struct MaskGuard {
    _private: (),
}

impl MaskGuard {
    pub fn new() -> Self {
        mask();
        Self { _private: () }
    }

    /// Token proving the caller is inside a masked section.
    #[inline]
    pub fn token(&self) -> CriticalSection<'_> {
        // SAFETY: preemption stays masked while `self` lives.
        unsafe { CriticalSection::new() }
    }
}

impl Default for MaskGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MaskGuard {
    fn drop(&mut self) {
        unmask();
    }
}

/// Execute a closure with preemption masked.
///
/// This is the mechanism for touching shared runtime state, and also for
/// any non-reentrant process resource a green thread uses (the allocator,
/// stdio): a thread preempted while holding one of those would otherwise
/// hand it, mid-update, to the next thread on the same OS thread.
///
/// # Usage
/// ```
/// uthread::sync::critical_section(|_cs| {
///     println!("printed without being preempted");
/// });
/// ```
///
/// Keep sections short; a pending tick is delivered only once the
/// outermost section ends.
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(CriticalSection<'_>) -> R,
{
    let guard = MaskGuard::new();
    f(guard.token())
}

#[cfg(feature = "critical-section-impl")]
mod impl_critical_section {
    struct SignalMask;
    critical_section::set_impl!(SignalMask);

    unsafe impl critical_section::Impl for SignalMask {
        unsafe fn acquire() -> critical_section::RawRestoreState {
            super::mask();
        }

        unsafe fn release(_restore: critical_section::RawRestoreState) {
            super::unmask();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal_blocked() -> bool {
        unsafe {
            let mut current = MaybeUninit::<libc::sigset_t>::uninit();
            libc::sigemptyset(current.as_mut_ptr());
            libc::pthread_sigmask(libc::SIG_BLOCK, core::ptr::null(), current.as_mut_ptr());
            libc::sigismember(current.as_ptr(), PREEMPT_SIGNAL) == 1
        }
    }

    #[test]
    fn test_mask_nests() {
        assert_eq!(depth(), 0);
        assert!(!signal_blocked());

        mask();
        mask();
        assert_eq!(depth(), 2);
        assert!(signal_blocked());

        unmask();
        assert!(is_masked());
        assert!(signal_blocked());

        unmask();
        assert_eq!(depth(), 0);
        assert!(!signal_blocked());
    }

    #[test]
    fn test_critical_section_returns_value() {
        let value = critical_section(|_cs| {
            assert!(is_masked());
            7
        });
        assert_eq!(value, 7);
        assert!(!is_masked());
    }

    #[cfg(feature = "critical-section-impl")]
    #[test]
    fn test_critical_section_crate_masks() {
        critical_section::with(|_cs| {
            assert_eq!(depth(), 1);
            assert!(signal_blocked());
        });
        assert_eq!(depth(), 0);
    }
}
