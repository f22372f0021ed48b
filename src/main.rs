//! # Dining Philosophers
//!
//! Drives the runtime with five philosopher threads sharing five forks
//! arranged in a ring.
//!
//! | Thread | Forks | Behavior |
//! |--------|-------|----------|
//! | philosopher 1..=5 | `id - 1` and `id % 5` | think, lock both forks, eat, release; three rounds |
//! | main | — | polls `live_threads()` and reports how many are eating |
//!
//! Philosophers never yield: thinking and eating are CPU-bound, so every
//! switch between them comes from the preemption timer or from blocking
//! on a fork. Each philosopher picks up the lower-numbered fork first,
//! which keeps the ring free of circular waits.
//!
//! Set `UTHREAD_LOG=trace` (or `debug`, `info`, ...) to see the runtime's
//! own log output on stderr.

use core::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use log::{Log, Metadata, Record};
use uthread::sync::critical_section;
use uthread::Mutex;

const FORKS: usize = 5;
const ROUNDS: usize = 3;

static FORK: [Mutex; FORKS] = [const { Mutex::new() }; FORKS];

/// Philosophers eating right now.
static EATING: AtomicUsize = AtomicUsize::new(0);

/// Print from a green thread without being preempted mid-write.
macro_rules! say {
    ($($arg:tt)*) => {
        critical_section(|_cs| println!($($arg)*))
    };
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// `env_logger` with every write done masked, so a tick never switches
/// threads while one of them holds the stderr lock.
struct MaskedLogger {
    inner: env_logger::Logger,
}

impl Log for MaskedLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &Record<'_>) {
        if self.inner.matches(record) {
            critical_section(|_cs| self.inner.log(record));
        }
    }

    fn flush(&self) {
        critical_section(|_cs| self.inner.flush());
    }
}

fn init_logging() {
    let env = env_logger::Env::new().filter_or("UTHREAD_LOG", "warn");
    let inner = env_logger::Builder::from_env(env)
        .target(env_logger::Target::Stderr)
        .format_timestamp(None)
        .build();
    let max_level = inner.filter();
    if log::set_boxed_logger(Box::new(MaskedLogger { inner })).is_ok() {
        log::set_max_level(max_level);
    }
}

// ---------------------------------------------------------------------------
// Philosopher
// ---------------------------------------------------------------------------

/// Burn CPU for `d`. Sleeping would stop `ITIMER_VIRTUAL`, which only
/// counts time the process spends running.
fn busy(d: Duration) {
    let start = Instant::now();
    let mut x = 0.0f64;
    while start.elapsed() < d {
        for i in 0..10_000 {
            x = core::hint::black_box(x + (i as f64 * 0.1).cos());
        }
    }
}

/// 40–200 ms, varying by philosopher and round.
fn pause(id: usize, round: usize) -> Duration {
    Duration::from_millis(40 * ((id * 7 + round * 3) % 5 + 1) as u64)
}

fn philosopher(id: usize) {
    let left = id - 1;
    let right = id % FORKS;
    let (first, second) = (left.min(right), left.max(right));

    for round in 0..ROUNDS {
        busy(pause(id, round));
        say!("philosopher {} is hungry", id);

        FORK[first].lock();
        FORK[second].lock();

        EATING.fetch_add(1, Ordering::Relaxed);
        say!("philosopher {} is eating with {} & {}", id, left, right);
        busy(pause(id, round + 1));
        say!("philosopher {} is done", id);
        EATING.fetch_sub(1, Ordering::Relaxed);

        FORK[second].unlock();
        FORK[first].unlock();
    }
    say!("philosopher {} end", id);

    uthread::exit(0);
}

fn main() {
    init_logging();
    uthread::init();

    for id in 1..=FORKS {
        if let Err(err) = uthread::spawn(philosopher, id) {
            eprintln!("cannot start philosopher {}: {} ({})", id, err, err.code());
            std::process::exit(1);
        }
    }

    let mut prev_eating = 0;
    while uthread::live_threads() > 1 {
        let eating = EATING.load(Ordering::Relaxed);
        if eating != prev_eating {
            prev_eating = eating;
            say!("{} philosophers are eating right now.", eating);
        }
        uthread::yield_now();
    }

    say!("All philosophers are done.");
}
