//! # uthread Configuration
//!
//! Compile-time limits for the thread table and stacks, plus the small
//! runtime `Config` accepted by [`crate::kernel::init_with`].

use core::time::Duration;

/// Number of slots in the thread table, main thread included.
/// Bounds the number of simultaneously live threads.
pub const MAX_THREADS: usize = 16;

/// Usable stack size per spawned thread, in bytes. Stacks never grow, so
/// this must cover the deepest call chain of any entry function plus the
/// signal frame the kernel pushes when the preemption timer fires.
pub const STACK_SIZE: usize = 256 * 1024;

/// Inaccessible region mapped below every stack. An overflow faults here
/// instead of silently corrupting the neighbouring mapping.
pub const GUARD_SIZE: usize = 4 * 1024;

/// Default preemption quantum, measured in consumed CPU time
/// (`ITIMER_VIRTUAL`).
pub const DEFAULT_TIME_SLICE: Duration = Duration::from_millis(10);

/// Runtime parameters fixed at initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Period of the preemption timer. `Duration::ZERO` disables
    /// preemption: threads then only switch at yield, lock and exit.
    pub time_slice: Duration,
}

impl Config {
    /// Purely cooperative scheduling, no timer.
    pub const fn cooperative() -> Self {
        Self {
            time_slice: Duration::ZERO,
        }
    }

    /// Whether the preemption timer is armed under this configuration.
    #[inline]
    pub const fn is_preemptive(&self) -> bool {
        !self.time_slice.is_zero()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            time_slice: DEFAULT_TIME_SLICE,
        }
    }
}
