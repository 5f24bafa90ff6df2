use std::rc::Rc;
use std::thread::sleep;
use std::time::{Duration, Instant};

use tracing::{debug, info};

/// Source of monotonic time and blocking sleeps.
///
/// Injected into the rate limiter and API client so tests can drive them
/// without real delays.
pub trait Clock {
    /// Time elapsed since an arbitrary fixed origin.
    fn now(&self) -> Duration;
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone)]
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
        sleep(duration);
    }
}

pub struct RateLimiter {
    clock: Rc<dyn Clock>,
    min_interval: Duration,
    last_call: Option<Duration>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration, clock: Rc<dyn Clock>) -> Self {
        Self {
            clock,
            min_interval,
            last_call: None,
        }
    }

    /// Block until `min_interval` has passed since the previous call.
    pub fn wait_if_needed(&mut self) {
        if let Some(last) = self.last_call {
            let elapsed = self.clock.now().saturating_sub(last);
            if elapsed < self.min_interval {
                let remaining = self.min_interval - elapsed;
                debug!("rate limiting: sleeping for {:.2}s", remaining.as_secs_f64());
                self.clock.sleep(remaining);
            }
        }
        self.last_call = Some(self.clock.now());
    }

    pub fn set_interval(&mut self, interval: Duration) {
        self.min_interval = interval;
        info!("API interval set to {:.2}s", interval.as_secs_f64());
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }
}
