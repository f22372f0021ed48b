//! # Thread Control Block
//!
//! Defines the thread record kept in every slot of the scheduler's table.
//! A slot's index is the thread's identity; slots are recycled once their
//! thread is `Done`.

use core::fmt;
use core::ptr::NonNull;

use crate::arch::Context;
use crate::mutex::Mutex;
use crate::stack::Stack;

/// Entry point of a spawned thread. Receives the argument given to `spawn`.
pub type Entry = fn(usize);

/// Identity of a thread: the index of its slot in the thread table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(usize);

impl ThreadId {
    /// The thread that called `init()`. Always slot 0.
    pub const MAIN: ThreadId = ThreadId(0);

    #[inline]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Slot index in the thread table.
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Thread state machine
// ---------------------------------------------------------------------------

/// Execution state of a thread.
///
/// ```text
///            spawn()            first dispatch
///   Done ───────────► New ─────────────────────► Running
///    ▲                                          │  │  │
///    │            exit / entry returned         │  │  │
///    └──────────────────────────────────────────┘  │  │
///                        yield / timer             │  │
///               Ready ◄────────────────────────────┘  │
///                 │        lock() on a held mutex     │
///                 │     Waiting ◄─────────────────────┘
///                 │        │
///                 └────────┴──── selected by scheduler ──► Running
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Spawned, entry function not yet started.
    New,
    /// Suspended by a yield or the timer; context is valid.
    Ready,
    /// Currently executing. Exactly one slot is in this state.
    Running,
    /// Blocked on a mutex; context and `waiting_on` are valid.
    Waiting,
    /// Finished, or a never-used slot. Free for `spawn`.
    Done,
}

// ---------------------------------------------------------------------------
// Thread record
// ---------------------------------------------------------------------------

/// One slot of the thread table.
pub struct Thread {
    /// Current execution state.
    pub state: ThreadState,

    /// Saved continuation. Meaningful only while `Ready` or `Waiting`.
    pub context: Context,

    /// Entry function and argument. Present only while `New`; taken on
    /// first dispatch.
    pub entry: Option<(Entry, usize)>,

    /// Code passed to `exit`. `None` until the thread exits with a code.
    pub exit_code: Option<i32>,

    /// Mutex this thread is blocked on. Set iff `state == Waiting`.
    ///
    /// Non-owning: the blocked thread is parked inside `Mutex::lock`, whose
    /// borrow keeps the mutex alive for as long as the wait lasts.
    pub waiting_on: Option<NonNull<Mutex>>,

    /// Stack this slot runs on. Mapped by the first spawn into the slot and
    /// reused afterwards. The main thread's slot has none until recycled.
    pub stack: Option<Stack>,
}

impl Thread {
    /// A never-used slot.
    pub const EMPTY: Thread = Thread {
        state: ThreadState::Done,
        context: Context::EMPTY,
        entry: None,
        exit_code: None,
        waiting_on: None,
        stack: None,
    };

    /// Turn a `Done` slot into a `New` thread.
    pub fn install(&mut self, entry: Entry, arg: usize) {
        debug_assert_eq!(self.state, ThreadState::Done);
        self.state = ThreadState::New;
        self.entry = Some((entry, arg));
        self.exit_code = None;
        self.waiting_on = None;
    }

    /// Record that this thread is about to block on `mutex`.
    pub fn block_on(&mut self, mutex: &Mutex) {
        debug_assert!(self.waiting_on.is_none());
        self.waiting_on = Some(NonNull::from(mutex));
    }

    /// Mark the thread finished. Nothing but the exit code survives.
    pub fn retire(&mut self) {
        self.state = ThreadState::Done;
        self.entry = None;
        self.waiting_on = None;
    }

    /// Whether the slot holds a thread that has not finished.
    #[inline]
    pub fn is_live(&self) -> bool {
        self.state != ThreadState::Done
    }

    /// Whether a scheduler scan may pick this thread right now.
    ///
    /// A waiting thread qualifies only while its mutex is free; the wake is
    /// a hint, the thread re-checks ownership after it resumes.
    pub fn is_eligible(&self) -> bool {
        match self.state {
            ThreadState::New | ThreadState::Ready => true,
            ThreadState::Waiting => match self.waiting_on {
                // SAFETY: see `waiting_on`; the mutex outlives the wait.
                Some(mutex) => unsafe { mutex.as_ref() }.is_free(),
                None => false,
            },
            ThreadState::Running | ThreadState::Done => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
