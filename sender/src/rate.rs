use std::time::Duration;

use tokio::time::{self, Instant};

// Absorbs float noise when `elapsed * rate` lands exactly on an integer.
const DUE_EPSILON: f64 = 1e-9;

/// Paces emissions to a target rate.
///
/// Instead of sleeping before every item, it sleeps until the next quantum
/// boundary and then releases every item that became due since the start, so
/// the amount emitted never exceeds `floor(elapsed * rate)`.
///
/// It only ever waits on the pacing itself, a sink that can't keep up simply
/// makes the achieved rate fall below the target.
#[derive(Debug)]
pub struct RateLimiter {
    rate: f64,
    quantum: Duration,
    start: Option<Instant>,
    granted: u64,
    allowance: u64,
}

impl RateLimiter {
    /// Creates a new `RateLimiter`.
    ///
    /// # Arguments
    /// * `rate` - The target items per second, must be positive.
    /// * `quantum` - The scheduling granularity, must be positive.
    ///
    /// # Panics
    /// If `rate` isn't positive or `quantum` is zero.
    pub fn new(rate: f64, quantum: Duration) -> Self {
        assert!(rate.is_finite() && rate > 0.0, "rate must be positive");
        assert!(!quantum.is_zero(), "quantum must be positive");

        Self {
            rate,
            quantum,
            start: None,
            granted: 0,
            allowance: 0,
        }
    }

    #[inline]
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// The amount of acquisitions granted so far.
    #[inline]
    pub fn granted(&self) -> u64 {
        self.granted
    }

    /// The instant the stream started, if it did.
    #[inline]
    pub fn started_at(&self) -> Option<Instant> {
        self.start
    }

    /// Starts the clock, otherwise it starts on the first `acquire`.
    pub fn start(&mut self) {
        self.start.get_or_insert_with(Instant::now);
    }

    /// Waits until one more item may be emitted without exceeding the target rate.
    pub async fn acquire(&mut self) {
        let start = *self.start.get_or_insert_with(Instant::now);

        loop {
            if self.granted < self.allowance {
                self.granted += 1;
                return;
            }

            let elapsed = Instant::now() - start;
            self.allowance = self.due(elapsed);

            if self.granted < self.allowance {
                continue;
            }

            time::sleep_until(start + self.next_boundary(elapsed)).await;
        }
    }

    /// The amount of items due after `elapsed` since the start.
    fn due(&self, elapsed: Duration) -> u64 {
        (elapsed.as_secs_f64() * self.rate + DUE_EPSILON).floor() as u64
    }

    /// The first quantum boundary strictly after `elapsed`.
    fn next_boundary(&self, elapsed: Duration) -> Duration {
        let quantum = self.quantum.as_nanos();
        let quanta = elapsed.as_nanos() / quantum + 1;
        Duration::from_nanos((quanta * quantum) as u64)
    }
}
