use chrono::{DateTime, TimeDelta, Utc};
use std::{
    sync::Mutex,
    time::{Duration, Instant},
};

/// Wall time for timestamps, a monotonic reading for intervals.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Monotonic reading since an arbitrary per-clock origin.
    fn monotonic(&self) -> Duration;

    fn elapsed_since(&self, started: Duration) -> TimeDelta {
        let elapsed = self.monotonic().saturating_sub(started);
        TimeDelta::from_std(elapsed).unwrap_or(TimeDelta::MAX)
    }
}

/// Host clock. `now` follows the wall clock, including NTP steps; intervals
/// come from [`Instant`] and never go backwards.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn monotonic(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    state: Mutex<ManualState>,
}

#[derive(Debug)]
struct ManualState {
    wall: DateTime<Utc>,
    monotonic: Duration,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new(ManualState {
                wall: start,
                monotonic: Duration::ZERO,
            }),
        }
    }

    /// Moves both readings forward.
    pub fn advance(&self, by: TimeDelta) {
        let mut state = self.lock();
        state.wall += by;
        state.monotonic += by.to_std().unwrap_or_default();
    }

    /// Steps the wall clock only, as an NTP correction would.
    pub fn step_wall(&self, by: TimeDelta) {
        self.lock().wall += by;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.lock().wall
    }

    fn monotonic(&self) -> Duration {
        self.lock().monotonic
    }
}
