//! # uthread — User-Level Threads
//!
//! Green threads for a single OS thread, scheduled round-robin, switched
//! cooperatively at yields and blocking calls and preemptively by a CPU-time
//! timer signal. Comes with one synchronization primitive, a blocking
//! [`Mutex`].
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                  Application Threads                   │
//! ├────────────────────────────────────────────────────────┤
//! │                 Kernel API (kernel.rs)                 │
//! │   init() · spawn() · exit() · yield_now() · live_…()   │
//! ├──────────────┬─────────────────────┬───────────────────┤
//! │  Scheduler   │  Mutex              │  Sync             │
//! │  scheduler.rs│  mutex.rs           │  sync.rs          │
//! │  ─ suspend   │  ─ lock()           │  ─ mask/unmask    │
//! │  ─ select    │  ─ unlock()         │  ─ critical_section│
//! │  ─ dispatch  │  ─ destroy()        │                   │
//! ├──────────────┴─────────────────────┴───────────────────┤
//! │        Thread Table (thread.rs) · Stacks (stack.rs)    │
//! ├────────────────────────────────────────────────────────┤
//! │   Arch Port (arch/) · Preemption Timer (timer.rs)      │
//! │   Context · switch · SIGVTALRM · ITIMER_VIRTUAL        │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use uthread::Mutex;
//!
//! static COUNTER_LOCK: Mutex = Mutex::new();
//!
//! fn worker(id: usize) {
//!     COUNTER_LOCK.lock();
//!     // ... exclusive work ...
//!     COUNTER_LOCK.unlock();
//!     uthread::exit(id as i32);
//! }
//!
//! uthread::init();
//! for id in 1..=3 {
//!     uthread::spawn(worker, id).expect("spawn");
//! }
//! // No join: poll until only the main thread is left.
//! while uthread::live_threads() > 1 {
//!     uthread::yield_now();
//! }
//! ```
//!
//! ## Memory Model
//!
//! - **Fixed table**: `[Thread; MAX_THREADS]` in a static, no heap.
//! - **Per-thread stack**: an `mmap`ed region of `STACK_SIZE` bytes with a
//!   guard below it, mapped on first use of a slot and kept for reuse.
//! - **Critical sections**: `SIGVTALRM` masked via `pthread_sigmask`.
//!
//! ## Caveats
//!
//! All threads share one OS thread, its signal mask and its `errno`. A
//! thread can be preempted anywhere outside a critical section, including
//! inside `malloc` or while holding the stdout lock, so green threads must
//! allocate and print inside [`sync::critical_section`]. Other OS threads
//! of the process must keep `SIGVTALRM` blocked.

pub mod arch;
pub mod config;
pub mod error;
pub mod kernel;
pub mod mutex;
pub mod scheduler;
pub mod stack;
pub mod sync;
pub mod thread;
pub mod timer;

pub use config::{Config, MAX_THREADS};
pub use error::{Fatal, SpawnError};
pub use kernel::{
    current, exit, exit_code, init, init_with, is_initialized, live_threads, spawn, thread_state,
    yield_now,
};
pub use mutex::Mutex;
pub use thread::{Entry, ThreadId, ThreadState};
