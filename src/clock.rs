//! Time source and delayed execution for the retry loop.
//!
//! Production uses the system clock and the tokio timer wheel. Tests swap in
//! a fake clock plus a recording scheduler that advances time on demand
//! instead of sleeping, so retry/backoff behaviour is fully deterministic.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Monotonic time source used for total-timeout bookkeeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock backed by `Instant::now`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Executes backoff waits as non-blocking continuations.
///
/// The retry loop never sleeps a thread; it awaits the future returned here.
pub trait Scheduler: Send + Sync {
    fn sleep(&self, delay: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
}

/// Scheduler backed by `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn sleep(&self, delay: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>> {
        Box::pin(tokio::time::sleep(delay))
    }
}

/// Controllable clock for tests: time moves only when `advance` is called.
#[derive(Debug, Clone)]
pub struct FakeClock {
    start: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// Move the clock forward by `delta`.
    pub fn advance(&self, delta: Duration) {
        *self.offset.lock().unwrap() += delta;
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.start + *self.offset.lock().unwrap()
    }
}

/// Scheduler that never sleeps: each requested delay is recorded and applied
/// to the paired `FakeClock`, and the returned future is already complete.
#[derive(Debug)]
pub struct RecordingScheduler {
    clock: FakeClock,
    delays: Mutex<Vec<Duration>>,
}

impl RecordingScheduler {
    pub fn new(clock: FakeClock) -> Self {
        Self {
            clock,
            delays: Mutex::new(Vec::new()),
        }
    }

    /// All delays requested so far, in order.
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }
}

impl Scheduler for RecordingScheduler {
    fn sleep(&self, delay: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>> {
        self.clock.advance(delay);
        self.delays.lock().unwrap().push(delay);
        Box::pin(std::future::ready(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_clock_advances_on_demand() {
        let clock = FakeClock::new();
        let t0 = clock.now();
        assert_eq!(clock.now(), t0);

        clock.advance(Duration::from_millis(5));
        assert_eq!(clock.now() - t0, Duration::from_millis(5));
    }

    #[tokio::test]
    async fn recording_scheduler_advances_clock_without_sleeping() {
        let clock = FakeClock::new();
        let scheduler = RecordingScheduler::new(clock.clone());
        let t0 = clock.now();

        scheduler.sleep(Duration::from_millis(250)).await;
        scheduler.sleep(Duration::from_millis(500)).await;

        assert_eq!(clock.now() - t0, Duration::from_millis(750));
        assert_eq!(
            scheduler.delays(),
            vec![Duration::from_millis(250), Duration::from_millis(500)]
        );
    }
}
