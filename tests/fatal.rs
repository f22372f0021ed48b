//! Fatal and process-ending paths.
//!
//! Each case ends the process, so the suite re-runs its own binary once
//! per case with `UTHREAD_FATAL_CASE` set and checks how the child ended:
//! cleanly, with a given exit code, or aborted with a diagnostic.

use std::process::Command;

use uthread::{Config, Mutex, ThreadId, ThreadState};

const CASE_VAR: &str = "UTHREAD_FATAL_CASE";

enum Outcome {
    Clean,
    /// Exits with this status, no diagnostic.
    Exit(i32),
    /// Aborts; the substring is expected in stderr.
    Fatal(&'static str),
}

struct Case {
    name: &'static str,
    run: fn(),
    outcome: Outcome,
}

const CASES: &[Case] = &[
    Case {
        name: "control",
        run: control,
        outcome: Outcome::Clean,
    },
    Case {
        name: "unlock_free_mutex",
        run: unlock_free_mutex,
        outcome: Outcome::Fatal("thread 0 released a mutex owned by nobody"),
    },
    Case {
        name: "unlock_foreign_mutex",
        run: unlock_foreign_mutex,
        outcome: Outcome::Fatal("thread 0 released a mutex owned by thread 1"),
    },
    Case {
        name: "destroy_held_mutex",
        run: destroy_held_mutex,
        outcome: Outcome::Fatal("mutex destroyed while held by thread 0"),
    },
    Case {
        name: "destroy_awaited_mutex",
        run: destroy_awaited_mutex,
        outcome: Outcome::Fatal("mutex destroyed with 1 thread(s) still waiting"),
    },
    Case {
        name: "main_exit_hands_off_slot",
        run: main_exit_hands_off_slot,
        outcome: Outcome::Exit(42),
    },
    Case {
        name: "deadlock",
        run: deadlock,
        outcome: Outcome::Fatal("deadlock"),
    },
    Case {
        name: "unbalanced_unmask",
        run: unbalanced_unmask,
        outcome: Outcome::Fatal("mask depth 0"),
    },
];

// ---------------------------------------------------------------------------
// Child cases
// ---------------------------------------------------------------------------

fn control() {
    uthread::init_with(Config::cooperative());
    let mutex = Mutex::new();
    mutex.lock();
    mutex.unlock();
    mutex.destroy();
}

fn unlock_free_mutex() {
    uthread::init_with(Config::cooperative());
    let mutex = Mutex::new();
    mutex.unlock();
}

static FOREIGN: Mutex = Mutex::new();

fn take_and_exit(_: usize) {
    FOREIGN.lock();
    uthread::exit(0);
}

fn unlock_foreign_mutex() {
    uthread::init_with(Config::cooperative());
    uthread::spawn(take_and_exit, 0).unwrap();
    uthread::yield_now();
    FOREIGN.unlock();
}

fn destroy_held_mutex() {
    uthread::init_with(Config::cooperative());
    let mutex = Mutex::new();
    mutex.lock();
    mutex.destroy();
}

fn lock_at(addr: usize) {
    // SAFETY: `addr` is a `Mutex` on main's stack that outlives the process.
    let mutex = unsafe { &*(addr as *const Mutex) };
    mutex.lock();
    mutex.unlock();
}

fn destroy_awaited_mutex() {
    uthread::init_with(Config::cooperative());
    let mutex = Mutex::new();
    mutex.lock();
    uthread::spawn(lock_at, &mutex as *const Mutex as usize).unwrap();
    // The child blocks on the mutex and stays parked: main never yields again.
    uthread::yield_now();
    assert_eq!(mutex.waiters(), 1);
    mutex.unlock();
    mutex.destroy();
}

static HANDOFF: Mutex = Mutex::new();

fn handoff_worker(n: usize) {
    if n == 1 {
        // Main has exited, so its slot is the lowest free one.
        assert_eq!(uthread::thread_state(ThreadId::MAIN), Some(ThreadState::Done));
        assert_eq!(uthread::exit_code(ThreadId::MAIN), Some(3));
        assert_eq!(uthread::live_threads(), 1);
        assert_eq!(uthread::spawn(handoff_worker, 2), Ok(ThreadId::MAIN));
        assert_eq!(uthread::live_threads(), 2);
    } else {
        // Slot 0 now runs on a mapped stack like any other thread.
        assert_eq!(uthread::current(), ThreadId::MAIN);
        assert_eq!(uthread::exit_code(ThreadId::MAIN), None);
    }
    HANDOFF.lock();
    uthread::yield_now();
    HANDOFF.unlock();
    // The second exit leaves nobody alive and ends the process with 42.
    uthread::exit(40 + n as i32);
}

fn main_exit_hands_off_slot() {
    uthread::init_with(Config::cooperative());
    uthread::spawn(handoff_worker, 1).unwrap();
    uthread::exit(3);
}

static A: Mutex = Mutex::new();
static B: Mutex = Mutex::new();

fn b_then_a(_: usize) {
    B.lock();
    A.lock();
}

fn deadlock() {
    uthread::init_with(Config::cooperative());
    A.lock();
    uthread::spawn(b_then_a, 0).unwrap();
    // The child takes B and blocks on A; main then blocks on B.
    uthread::yield_now();
    B.lock();
}

fn unbalanced_unmask() {
    uthread::sync::unmask();
}

// ---------------------------------------------------------------------------
// Parent
// ---------------------------------------------------------------------------

fn main() {
    if let Ok(name) = std::env::var(CASE_VAR) {
        let case = CASES
            .iter()
            .find(|c| c.name == name)
            .unwrap_or_else(|| panic!("unknown case {}", name));
        (case.run)();
        return;
    }

    let exe = std::env::current_exe().expect("current_exe");
    for case in CASES {
        let output = Command::new(&exe)
            .env(CASE_VAR, case.name)
            .output()
            .expect("spawn child");
        let stderr = String::from_utf8_lossy(&output.stderr);

        match case.outcome {
            Outcome::Clean => assert!(
                output.status.success(),
                "{}: unexpected failure: {}",
                case.name,
                stderr
            ),
            Outcome::Exit(code) => {
                assert_eq!(
                    output.status.code(),
                    Some(code),
                    "{}: wrong exit status, stderr: {}",
                    case.name,
                    stderr
                );
                assert!(!stderr.contains("uthread: fatal:"), "{}: {}", case.name, stderr);
            }
            Outcome::Fatal(expected) => {
                assert!(
                    !output.status.success(),
                    "{}: child survived a fatal error",
                    case.name
                );
                assert!(
                    stderr.contains("uthread: fatal:") && stderr.contains(expected),
                    "{}: expected {:?} in stderr, got: {}",
                    case.name,
                    expected,
                    stderr
                );
            }
        }
        println!("test {} ... ok", case.name);
    }
    println!("\ntest result: ok. {} passed", CASES.len());
}
