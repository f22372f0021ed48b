//! # Kernel
//!
//! The process-wide runtime and the public thread API.
//!
//! The runtime is one global [`Scheduler`] plus an initialization flag. It
//! is created lazily by [`init`], never torn down, and only ever touched
//! with preemption masked.
//!
//! ## Reschedule Path
//!
//! ```text
//! yield_now() ─┐
//! Mutex::lock ─┼─► mask ─► schedule(reason)
//! exit()      ─┤             ├─► Scheduler::suspend_current
//! SIGVTALRM   ─┘             ├─► Scheduler::next
//!                            └─► arch::switch ──► resumed thread unmasks
//! ```
//!
//! The switch happens while still masked. The thread that gets the CPU is
//! always either returning from its own `schedule` call or entering
//! `thread_start` for the first time, and both paths unmask.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::arch::{self, Context};
use crate::config::Config;
use crate::error::{fatal, Fatal, SpawnError};
use crate::mutex::Mutex;
use crate::scheduler::{Dispatch, Reason, Scheduler};
use crate::sync::{self, MaskGuard};
use crate::thread::{Entry, ThreadId, ThreadState};
use crate::timer;

// ---------------------------------------------------------------------------
// Global runtime instance
// ---------------------------------------------------------------------------

struct Runtime {
    initialized: AtomicBool,
    scheduler: UnsafeCell<Scheduler>,
}

// Single logical core: every access happens masked on the OS thread that
// called `init`.
unsafe impl Sync for Runtime {}

static RUNTIME: Runtime = Runtime {
    initialized: AtomicBool::new(false),
    scheduler: UnsafeCell::new(Scheduler::new()),
};

impl Runtime {
    /// # Safety
    /// Preemption must be masked, and the reference must not be held
    /// across a context switch.
    #[allow(clippy::mut_from_ref)]
    unsafe fn scheduler(&self) -> &mut Scheduler {
        &mut *self.scheduler.get()
    }

    #[inline]
    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    fn with<R>(&self, f: impl FnOnce(&mut Scheduler) -> R) -> R {
        let _guard = MaskGuard::new();
        // SAFETY: masked, and `f` cannot switch.
        f(unsafe { self.scheduler() })
    }
}

// ---------------------------------------------------------------------------
// Kernel API
// ---------------------------------------------------------------------------

/// Initialize the runtime with the default configuration.
///
/// Adopts the caller as thread 0 and starts the preemption timer. Calls
/// after the first are no-ops.
pub fn init() {
    init_with(Config::default());
}

/// Initialize the runtime with `config`. Ignored once initialized.
pub fn init_with(config: Config) {
    let fresh = RUNTIME.with(|sched| {
        if RUNTIME.is_initialized() {
            return false;
        }
        sched.boot();
        RUNTIME.initialized.store(true, Ordering::Release);
        true
    });
    if !fresh {
        log::debug!("init: already initialized");
        return;
    }

    if config.is_preemptive() {
        if let Err(err) = timer::install(on_tick).and_then(|()| timer::arm(config.time_slice)) {
            fatal(err);
        }
    }
    log::debug!("init: runtime started ({:?})", config);
}

/// Whether [`init`] has run.
pub fn is_initialized() -> bool {
    RUNTIME.is_initialized()
}

/// Create a thread running `entry(arg)`.
///
/// The thread starts when the scheduler first reaches its slot, not
/// during this call.
///
/// # Returns
/// - `Ok(id)`: the new thread's identity.
/// - `Err(SpawnError::CapacityExhausted)`: no free slot.
/// - `Err(SpawnError::NotInitialized)`: [`init`] has not been called.
pub fn spawn(entry: Entry, arg: usize) -> Result<ThreadId, SpawnError> {
    if !RUNTIME.is_initialized() {
        return Err(SpawnError::NotInitialized);
    }
    RUNTIME.with(|sched| sched.spawn(entry, arg))
}

/// Finish the calling thread with `code`. Does not return.
pub fn exit(code: i32) -> ! {
    if !RUNTIME.is_initialized() {
        fatal(Fatal::NotInitialized);
    }
    sync::mask();
    // SAFETY: masked; reference dropped before the switch.
    let sched = unsafe { RUNTIME.scheduler() };
    let current = sched.current;
    sched.threads[current].exit_code = Some(code);
    schedule(Reason::Exit);
    fatal(Fatal::BadDispatch {
        thread: ThreadId::new(current),
        state: ThreadState::Done,
    })
}

/// Let every other runnable thread have a turn before continuing.
///
/// A no-op before [`init`], and when the caller is the only runnable
/// thread.
pub fn yield_now() {
    if !RUNTIME.is_initialized() {
        return;
    }
    sync::mask();
    schedule(Reason::Yield);
}

/// Number of threads that have not finished, main thread included.
/// `0` before [`init`].
///
/// Waiting for spawned threads is done by polling this together with
/// [`yield_now`]:
///
/// ```no_run
/// while uthread::live_threads() > 1 {
///     uthread::yield_now();
/// }
/// ```
pub fn live_threads() -> usize {
    RUNTIME.with(|sched| sched.live)
}

/// Identity of the calling thread. [`ThreadId::MAIN`] before [`init`].
pub fn current() -> ThreadId {
    RUNTIME.with(|sched| sched.current_id())
}

/// State of the thread in slot `id`, or `None` if out of range.
pub fn thread_state(id: ThreadId) -> Option<ThreadState> {
    RUNTIME.with(|sched| sched.threads.get(id.index()).map(|t| t.state))
}

/// Exit code recorded by the last thread in slot `id`.
pub fn exit_code(id: ThreadId) -> Option<i32> {
    RUNTIME.with(|sched| sched.threads.get(id.index()).and_then(|t| t.exit_code))
}

// ---------------------------------------------------------------------------
// Mutex support
// ---------------------------------------------------------------------------

/// Calling thread, for callers that already masked.
pub(crate) fn current_masked() -> ThreadId {
    debug_assert!(sync::is_masked());
    // SAFETY: masked per the caller's contract.
    unsafe { RUNTIME.scheduler() }.current_id()
}

/// Block the calling thread on `mutex` until a scan finds it free.
///
/// Entered masked (depth 1), returns unmasked. Recording the wait and
/// entering the scheduler happen in one masked section, so a tick can
/// never observe a thread with a wait target that is not `Waiting`.
pub(crate) fn wait_for(mutex: &Mutex) {
    if !RUNTIME.is_initialized() {
        fatal(Fatal::NotInitialized);
    }
    // SAFETY: masked; reference dropped before the switch.
    let sched = unsafe { RUNTIME.scheduler() };
    let current = sched.current;
    sched.threads[current].block_on(mutex);
    mutex.add_waiter();
    schedule(Reason::Wait);
}

// ---------------------------------------------------------------------------
// Scheduling core
// ---------------------------------------------------------------------------

/// Run the scheduler for `reason` and switch to its choice.
///
/// Must be entered with a mask depth of exactly 1. Returns, unmasked, when
/// the caller is resumed; for `Reason::Exit` it does not return.
fn schedule(reason: Reason) {
    let depth = sync::depth();
    if depth != 1 {
        fatal(Fatal::MaskDiscipline { depth });
    }

    // SAFETY: masked; the last use of `sched` precedes the switch.
    let sched = unsafe { RUNTIME.scheduler() };
    let prev = sched.current;

    if let Err(err) = sched.suspend_current(reason) {
        fatal(err);
    }
    let next = match sched.next() {
        Ok(Some(next)) => next,
        Ok(None) => return no_successor(sched, reason),
        Err(err) => fatal(err),
    };
    debug_assert_eq!(sched.running_count(), 1);

    if next.slot() == prev {
        sync::unmask();
        return;
    }

    let save: *mut Context = &mut sched.threads[prev].context;
    let restore: *const Context = {
        let thread = &mut sched.threads[next.slot()];
        if let Dispatch::Start(_) = next {
            let top = match thread.stack.as_ref() {
                Some(stack) => stack.top(),
                None => fatal(Fatal::BadDispatch {
                    thread: ThreadId::new(next.slot()),
                    state: ThreadState::New,
                }),
            };
            // SAFETY: the slot's stack is mapped and nothing runs on it.
            unsafe { thread.context.prepare(top, thread_start) };
        }
        &thread.context
    };

    // For an exiting thread `save` is scratch: a Done context is never
    // resumed.
    // SAFETY: masked; both contexts live in the static table.
    unsafe { arch::switch(save, restore) };

    sync::unmask();
}

/// Nothing eligible after suspending the current thread.
fn no_successor(sched: &mut Scheduler, reason: Reason) {
    match reason {
        Reason::Yield | Reason::Elapsed => {
            sched.resume_current();
            sync::unmask();
        }
        Reason::Exit if sched.live == 0 => {
            let code = sched.threads[sched.current].exit_code.unwrap_or(0);
            log::debug!("last thread exited, terminating with {}", code);
            std::process::exit(code)
        }
        Reason::Wait | Reason::Exit => fatal(Fatal::Deadlock { live: sched.live }),
    }
}

/// First code run by every spawned thread, on its own stack.
extern "C" fn thread_start() -> ! {
    // Arrives masked, from the `switch` in `schedule`.
    let (entry, arg, me) = {
        // SAFETY: masked; reference dropped before unmasking.
        let sched = unsafe { RUNTIME.scheduler() };
        let me = sched.current;
        match sched.threads[me].entry.take() {
            Some((entry, arg)) => (entry, arg, me),
            None => fatal(Fatal::BadDispatch {
                thread: ThreadId::new(me),
                state: sched.threads[me].state,
            }),
        }
    };
    log::trace!("thread {} starting", me);
    sync::unmask();

    entry(arg);

    // Returned without calling exit(): retire without a code.
    sync::mask();
    schedule(Reason::Exit);
    fatal(Fatal::BadDispatch {
        thread: ThreadId::new(me),
        state: ThreadState::Done,
    })
}

/// `SIGVTALRM` handler.
extern "C" fn on_tick(_signal: libc::c_int) {
    if !RUNTIME.is_initialized() {
        return;
    }
    let depth = sync::depth();
    if depth != 0 {
        fatal(Fatal::MaskDiscipline { depth });
    }

    let errno = timer::errno_location();
    // SAFETY: the calling thread's errno slot.
    let saved = unsafe { *errno };

    sync::mask();
    schedule(Reason::Elapsed);

    // SAFETY: as above; same OS thread after the switch back.
    unsafe { *errno = saved };
}
