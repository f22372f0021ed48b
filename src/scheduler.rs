//! # Scheduler
//!
//! The thread table and the state machine that decides which thread runs
//! next. This module only does bookkeeping; the actual context switch is
//! performed by [`crate::kernel`] with the decision made here.
//!
//! ## Scheduling Algorithm
//!
//! On every reschedule trigger ([`Reason`]), with preemption masked:
//! 1. **Retire or suspend the current thread**: `Exit` marks it `Done`
//!    and drops the live count; `Wait` marks it `Waiting` (its mutex must
//!    already be recorded); `Yield` and `Elapsed` mark it `Ready`.
//! 2. **Scan round-robin**: starting at the slot after the current one,
//!    visit every slot exactly once, the current slot last. The first
//!    `New`, `Ready`, or `Waiting`-on-a-free-mutex thread wins.
//! 3. **Dispatch**: mark the winner `Running` and make it current. A
//!    waiting winner has its wait cleared.
//!
//! Policy is strict round-robin. There are no priorities and no wait
//! queues: a waiter can be passed over while another waiter earlier in
//! scan order grabs the mutex first.

use crate::config::{GUARD_SIZE, MAX_THREADS, STACK_SIZE};
use crate::error::{Fatal, SpawnError};
use crate::stack::Stack;
use crate::thread::{Entry, Thread, ThreadId, ThreadState};

/// Why the scheduler was entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    /// Voluntary `yield_now()`.
    Yield,
    /// The current thread is about to block on a mutex.
    Wait,
    /// The current thread finished.
    Exit,
    /// The preemption timer fired.
    Elapsed,
}

/// Outcome of a scan: the slot to run and how to enter it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// First run of a `New` thread: enter its start function on a fresh
    /// stack.
    Start(usize),
    /// Restore a saved continuation.
    Resume(usize),
}

impl Dispatch {
    #[inline]
    pub fn slot(&self) -> usize {
        match *self {
            Dispatch::Start(slot) | Dispatch::Resume(slot) => slot,
        }
    }
}

/// Thread table plus the scheduler-global state.
pub struct Scheduler {
    /// Fixed-size thread table. Slot 0 is the main thread.
    pub threads: [Thread; MAX_THREADS],

    /// Slot of the `Running` thread.
    pub current: usize,

    /// Number of slots not in `Done`.
    pub live: usize,
}

impl Scheduler {
    /// An empty table: every slot `Done`, nothing live.
    pub const fn new() -> Self {
        Self {
            threads: [Thread::EMPTY; MAX_THREADS],
            current: 0,
            live: 0,
        }
    }

    /// Adopt the calling thread as slot 0, `Running`.
    pub fn boot(&mut self) {
        for thread in self.threads.iter_mut() {
            thread.retire();
            thread.exit_code = None;
        }
        self.threads[0].state = ThreadState::Running;
        self.current = 0;
        self.live = 1;
    }

    /// Install `entry(arg)` in the lowest `Done` slot.
    ///
    /// The slot's stack is mapped here if it has none yet. A full table is
    /// reported without touching any slot.
    pub fn spawn(&mut self, entry: Entry, arg: usize) -> Result<ThreadId, SpawnError> {
        let slot = self
            .threads
            .iter()
            .position(|t| t.state == ThreadState::Done)
            .ok_or(SpawnError::CapacityExhausted)?;

        let thread = &mut self.threads[slot];
        if thread.stack.is_none() {
            match Stack::new(STACK_SIZE, GUARD_SIZE) {
                Ok(stack) => thread.stack = Some(stack),
                Err(err) => crate::error::fatal(err),
            }
        }
        thread.install(entry, arg);
        self.live += 1;

        log::debug!("spawned thread {} (live: {})", slot, self.live);
        Ok(ThreadId::new(slot))
    }

    /// Step 1: take the current thread off the CPU for `reason`.
    pub fn suspend_current(&mut self, reason: Reason) -> Result<(), Fatal> {
        let current = self.current;
        let thread = &mut self.threads[current];
        if thread.state != ThreadState::Running {
            return Err(Fatal::BadDispatch {
                thread: ThreadId::new(current),
                state: thread.state,
            });
        }

        match reason {
            Reason::Exit => {
                thread.retire();
                self.live -= 1;
                log::debug!(
                    "thread {} exited with {:?} (live: {})",
                    current,
                    thread.exit_code,
                    self.live
                );
            }
            Reason::Wait => {
                if thread.waiting_on.is_none() {
                    return Err(Fatal::MissingWaitTarget {
                        thread: ThreadId::new(current),
                    });
                }
                thread.state = ThreadState::Waiting;
            }
            Reason::Yield | Reason::Elapsed => thread.state = ThreadState::Ready,
        }
        Ok(())
    }

    /// Step 2: the first eligible slot in round-robin order after the
    /// current one, or `None`.
    pub fn select(&self) -> Option<usize> {
        (1..=MAX_THREADS)
            .map(|offset| (self.current + offset) % MAX_THREADS)
            .find(|&slot| self.threads[slot].is_eligible())
    }

    /// Step 3: make `slot` the running thread.
    pub fn dispatch(&mut self, slot: usize) -> Result<Dispatch, Fatal> {
        let thread = &mut self.threads[slot];
        let dispatch = match thread.state {
            ThreadState::New => Dispatch::Start(slot),
            ThreadState::Ready => Dispatch::Resume(slot),
            ThreadState::Waiting if thread.is_eligible() => {
                if let Some(mutex) = thread.waiting_on.take() {
                    // SAFETY: the waiter's `lock` call still borrows the mutex.
                    unsafe { mutex.as_ref() }.remove_waiter();
                }
                Dispatch::Resume(slot)
            }
            state => {
                return Err(Fatal::BadDispatch {
                    thread: ThreadId::new(slot),
                    state,
                })
            }
        };

        thread.state = ThreadState::Running;
        self.current = slot;
        log::trace!("dispatch {:?}", dispatch);
        Ok(dispatch)
    }

    /// Scan and dispatch in one step.
    pub fn next(&mut self) -> Result<Option<Dispatch>, Fatal> {
        match self.select() {
            Some(slot) => self.dispatch(slot).map(Some),
            None => Ok(None),
        }
    }

    /// Undo `suspend_current` for a `Yield`/`Elapsed` that found nothing
    /// else to run.
    pub fn resume_current(&mut self) {
        let thread = &mut self.threads[self.current];
        debug_assert_eq!(thread.state, ThreadState::Ready);
        thread.state = ThreadState::Running;
    }

    /// Number of `Running` slots. One, outside masked transitions.
    pub fn running_count(&self) -> usize {
        self.threads
            .iter()
            .filter(|t| t.state == ThreadState::Running)
            .count()
    }

    /// Live threads counted from the table rather than the counter.
    pub fn count_live(&self) -> usize {
        self.threads.iter().filter(|t| t.is_live()).count()
    }

    #[inline]
    pub fn current_id(&self) -> ThreadId {
        ThreadId::new(self.current)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
