//! Monotonic time source for the poll scheduler and EEPROM settle delays.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Monotonic clock with a blocking sleep.
pub trait Clock {
    /// Time elapsed since an arbitrary fixed origin.
    fn now(&self) -> Duration;

    /// Blocks the calling thread for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Wall-clock time via [`Instant`] and [`std::thread::sleep`].
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

type SleepHook = Box<dyn FnMut(Duration) + Send>;

struct ManualState {
    now: Duration,
    sleeps: Vec<Duration>,
    hook: Option<SleepHook>,
}

/// Fake clock; `sleep` advances time instantly.
///
/// Clones share the same time line. A sleep hook runs after each sleep with
/// the new current time, which lets tests change hardware state while a
/// poller is waiting.
#[derive(Clone)]
pub struct ManualClock {
    state: Arc<Mutex<ManualState>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::starting_at(Duration::ZERO)
    }

    pub fn starting_at(now: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(ManualState {
                now,
                sleeps: Vec::new(),
                hook: None,
            })),
        }
    }

    /// Moves time forward without recording a sleep.
    pub fn advance(&self, by: Duration) {
        self.state.lock().now += by;
    }

    /// Installs a hook called with the current time after every sleep.
    pub fn on_sleep(&self, hook: impl FnMut(Duration) + Send + 'static) {
        self.state.lock().hook = Some(Box::new(hook));
    }

    /// Every sleep requested so far.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.state.lock().sleeps.clone()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ManualClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ManualClock")
            .field("now", &state.now)
            .field("sleeps", &state.sleeps.len())
            .finish()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.state.lock().now
    }

    fn sleep(&self, duration: Duration) {
        // The hook runs outside the lock so it may read the clock.
        let (now, hook) = {
            let mut state = self.state.lock();
            state.now += duration;
            state.sleeps.push(duration);
            (state.now, state.hook.take())
        };
        if let Some(mut hook) = hook {
            hook(now);
            let mut state = self.state.lock();
            if state.hook.is_none() {
                state.hook = Some(hook);
            }
        }
    }
}
