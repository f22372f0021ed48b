//! # Preemption Timer
//!
//! `ITIMER_VIRTUAL` delivers `SIGVTALRM` after every time slice of CPU time
//! the process consumes. The handler enters the scheduler exactly like a
//! voluntary yield, and like a yield it may not return for a long time:
//! the interrupted thread's signal frame stays on its stack until the
//! thread is resumed.
//!
//! The handler is installed with `SA_NODEFER`. Since it leaves through a
//! context switch instead of returning, an automatically blocked signal
//! would stay blocked in whichever thread runs next.

use core::mem;
use core::ptr;
use core::time::Duration;

use crate::error::{errno, Fatal};
use crate::sync::PREEMPT_SIGNAL;

/// Install `handler` for the preemption signal.
pub fn install(handler: extern "C" fn(libc::c_int)) -> Result<(), Fatal> {
    // SAFETY: a zeroed sigaction is valid; every field we rely on is set.
    unsafe {
        let mut action: libc::sigaction = mem::zeroed();
        action.sa_sigaction = handler as usize;
        action.sa_flags = libc::SA_NODEFER | libc::SA_RESTART;
        libc::sigemptyset(&mut action.sa_mask);
        if libc::sigaction(PREEMPT_SIGNAL, &action, ptr::null_mut()) != 0 {
            return Err(Fatal::Timer { errno: errno() });
        }
    }
    Ok(())
}

/// Sub-microsecond periods round up to 1 µs; an all-zero `timeval` would
/// disarm the timer instead.
fn timeval(period: Duration) -> libc::timeval {
    let mut micros = period.subsec_micros();
    if micros == 0 && period.as_secs() == 0 && !period.is_zero() {
        micros = 1;
    }
    libc::timeval {
        tv_sec: period.as_secs() as libc::time_t,
        tv_usec: micros as libc::suseconds_t,
    }
}

/// Fire the preemption signal every `period` of consumed CPU time.
/// A zero period disarms the timer.
pub fn arm(period: Duration) -> Result<(), Fatal> {
    let interval = libc::itimerval {
        it_interval: timeval(period),
        it_value: timeval(period),
    };
    // SAFETY: plain syscall with a valid, initialized argument.
    if unsafe { libc::setitimer(libc::ITIMER_VIRTUAL, &interval, ptr::null_mut()) } != 0 {
        return Err(Fatal::Timer { errno: errno() });
    }
    Ok(())
}

/// `errno` is per OS thread, hence shared by every green thread. A tick
/// that switches threads between a failing call and the read of `errno`
/// would hand the victim someone else's value; the handler saves and
/// restores it around the switch.
#[cfg(target_os = "linux")]
pub(crate) fn errno_location() -> *mut libc::c_int {
    // SAFETY: always returns the calling thread's errno slot.
    unsafe { libc::__errno_location() }
}

#[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
pub(crate) fn errno_location() -> *mut libc::c_int {
    // SAFETY: always returns the calling thread's errno slot.
    unsafe { libc::__error() }
}

#[cfg(any(target_os = "android", target_os = "netbsd", target_os = "openbsd"))]
pub(crate) fn errno_location() -> *mut libc::c_int {
    // SAFETY: always returns the calling thread's errno slot.
    unsafe { libc::__errno() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeval_splits_duration() {
        let tv = timeval(Duration::from_millis(1_250));
        assert_eq!(tv.tv_sec, 1);
        assert_eq!(tv.tv_usec, 250_000);
    }

    #[test]
    fn test_timeval_keeps_tiny_periods_armed() {
        let tv = timeval(Duration::from_nanos(500));
        assert_eq!(tv.tv_sec, 0);
        assert_eq!(tv.tv_usec, 1);

        let tv = timeval(Duration::ZERO);
        assert_eq!((tv.tv_sec, tv.tv_usec), (0, 0));
    }
}
