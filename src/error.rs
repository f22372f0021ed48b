//! # Errors
//!
//! Two classes of failure exist in uthread:
//!
//! - [`SpawnError`] is recoverable and returned to the caller.
//! - [`Fatal`] describes misuse of the runtime or a broken scheduler
//!   invariant. It is never returned: [`fatal`] logs it and aborts the
//!   process, since continuing would run threads on inconsistent state.

use thiserror::Error;

use crate::thread::ThreadId;

/// Reasons a spawn request can be refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SpawnError {
    /// Every slot in the thread table holds a live thread.
    #[error("thread table is full")]
    CapacityExhausted,
    /// `init()` has not been called yet.
    #[error("runtime is not initialized")]
    NotInitialized,
}

impl SpawnError {
    /// Legacy integer status: `-1` for a full table, `-2` before init.
    pub const fn code(&self) -> i32 {
        match self {
            SpawnError::CapacityExhausted => -1,
            SpawnError::NotInitialized => -2,
        }
    }
}

/// Program-terminating conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Fatal {
    #[error("thread {caller} released a mutex owned by {}", holder(.owner))]
    NotOwner {
        caller: ThreadId,
        owner: Option<ThreadId>,
    },
    #[error("mutex destroyed while held by thread {owner}")]
    StillHeld { owner: ThreadId },
    #[error("mutex destroyed with {waiters} thread(s) still waiting on it")]
    StillAwaited { waiters: usize },
    #[error("runtime used before init()")]
    NotInitialized,
    #[error("masked-section discipline violated (mask depth {depth})")]
    MaskDiscipline { depth: usize },
    #[error("thread {thread} blocked without a mutex to wait on")]
    MissingWaitTarget { thread: ThreadId },
    #[error("deadlock: no runnable thread left, {live} live")]
    Deadlock { live: usize },
    #[error("thread {thread} dispatched from state {state:?}")]
    BadDispatch {
        thread: ThreadId,
        state: crate::thread::ThreadState,
    },
    #[error("failed to map thread stack (errno {errno})")]
    StackAlloc { errno: i32 },
    #[error("failed to arm preemption timer (errno {errno})")]
    Timer { errno: i32 },
}

fn holder(owner: &Option<ThreadId>) -> String {
    match owner {
        Some(owner) => format!("thread {}", owner),
        None => "nobody".to_string(),
    }
}

/// Report `err` and abort the process.
#[cold]
#[inline(never)]
pub fn fatal(err: Fatal) -> ! {
    log::error!("fatal: {}", err);
    eprintln!("uthread: fatal: {}", err);
    std::process::abort()
}

/// Last OS error number, for diagnostics.
pub(crate) fn errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_error_codes() {
        assert_eq!(SpawnError::CapacityExhausted.code(), -1);
        assert_eq!(SpawnError::NotInitialized.code(), -2);
    }

    #[test]
    fn test_fatal_messages_name_threads() {
        let msg = Fatal::NotOwner {
            caller: ThreadId::new(2),
            owner: Some(ThreadId::new(1)),
        }
        .to_string();
        assert!(msg.contains("thread 2 released a mutex owned by thread 1"));

        let msg = Fatal::NotOwner {
            caller: ThreadId::new(0),
            owner: None,
        }
        .to_string();
        assert!(msg.ends_with("owned by nobody"));

        let msg = Fatal::StillHeld {
            owner: ThreadId::new(3),
        }
        .to_string();
        assert!(msg.contains("held by thread 3"));
    }
}
