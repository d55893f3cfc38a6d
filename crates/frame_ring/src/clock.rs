//! A pausable frame clock built on a monotonic tick counter.
//!
//! ```text
//!                      |<--- paused --->|
//! ----*----------------*----------------*------------*------> ticks
//!   base             stop             start        current
//!
//! total = (current - paused - base) * seconds_per_tick
//! ```

use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

/// A source of monotonically increasing ticks at a fixed frequency.
pub trait TickSource {
    /// Ticks per second.
    fn frequency(&self) -> i64;

    fn now(&self) -> i64;
}

/// Nanosecond ticks from [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct MonotonicTicks {
    origin: Instant,
}

impl MonotonicTicks {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicTicks {
    fn default() -> Self {
        Self::new()
    }
}

impl TickSource for MonotonicTicks {
    fn frequency(&self) -> i64 {
        1_000_000_000
    }

    fn now(&self) -> i64 {
        self.origin.elapsed().as_nanos() as i64
    }
}

/// The Windows performance counter.
#[cfg(windows)]
#[derive(Debug, Clone, Copy)]
pub struct PerformanceCounter {
    frequency: i64,
}

#[cfg(windows)]
impl PerformanceCounter {
    pub fn new() -> Self {
        use windows::Win32::System::Performance::QueryPerformanceFrequency;

        let mut frequency = 0i64;
        // Cannot fail on Windows XP and later.
        if unsafe { QueryPerformanceFrequency(&mut frequency) }.is_err() || frequency <= 0 {
            frequency = 1;
        }
        Self { frequency }
    }
}

#[cfg(windows)]
impl Default for PerformanceCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(windows)]
impl TickSource for PerformanceCounter {
    fn frequency(&self) -> i64 {
        self.frequency
    }

    fn now(&self) -> i64 {
        use windows::Win32::System::Performance::QueryPerformanceCounter;

        let mut ticks = 0i64;
        let _ = unsafe { QueryPerformanceCounter(&mut ticks) };
        ticks
    }
}

/// A hand-driven tick source. Clones share the same counter, so a test can keep
/// one handle and give the other to a [`Clock`].
#[derive(Debug, Clone)]
pub struct ManualTicks {
    frequency: i64,
    now: Rc<Cell<i64>>,
}

impl ManualTicks {
    pub fn new(frequency: i64) -> Self {
        Self {
            frequency,
            now: Rc::new(Cell::new(0)),
        }
    }

    pub fn set(&self, ticks: i64) {
        self.now.set(ticks);
    }

    pub fn advance(&self, ticks: i64) {
        self.now.set(self.now.get() + ticks);
    }
}

impl TickSource for ManualTicks {
    fn frequency(&self) -> i64 {
        self.frequency
    }

    fn now(&self) -> i64 {
        self.now.get()
    }
}

#[derive(Debug, Clone)]
pub struct Clock<S = MonotonicTicks> {
    source: S,
    seconds_per_tick: f64,
    delta: f64,
    base: i64,
    paused: i64,
    stop: i64,
    prev: i64,
    current: i64,
    stopped: bool,
}

impl Clock<MonotonicTicks> {
    pub fn new() -> Self {
        Self::with_source(MonotonicTicks::new())
    }
}

impl Default for Clock<MonotonicTicks> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: TickSource> Clock<S> {
    pub fn with_source(source: S) -> Self {
        let seconds_per_tick = 1.0 / source.frequency().max(1) as f64;
        let now = source.now();
        Self {
            source,
            seconds_per_tick,
            delta: 0.0,
            base: now,
            paused: 0,
            stop: 0,
            prev: now,
            current: now,
            stopped: false,
        }
    }

    /// Re-bases every timestamp to now and clears the paused state.
    /// Call once right before the main loop starts.
    pub fn reset(&mut self) {
        let now = self.source.now();
        self.base = now;
        self.prev = now;
        self.current = now;
        self.paused = 0;
        self.stop = 0;
        self.stopped = false;
        self.delta = 0.0;
    }

    /// Resumes a stopped clock. Does nothing while running.
    pub fn start(&mut self) {
        if !self.stopped {
            return;
        }
        let now = self.source.now();
        self.paused += now - self.stop;
        // The previous tick predates the pause; without this the next delta
        // would span the whole paused interval.
        self.prev = now;
        self.stop = 0;
        self.stopped = false;
    }

    /// Freezes the clock. Does nothing while already stopped.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stop = self.source.now();
        self.stopped = true;
    }

    /// Advances the clock by one frame.
    pub fn tick(&mut self) {
        if self.stopped {
            self.delta = 0.0;
            return;
        }
        self.current = self.source.now();
        self.delta = (self.current - self.prev) as f64 * self.seconds_per_tick;
        self.prev = self.current;

        // The counter can appear to run backwards when consecutive reads land
        // on different cores or the processor enters a power-saving state.
        if self.delta < 0.0 {
            self.delta = 0.0;
        }
    }

    /// Seconds elapsed since [`reset`](Clock::reset), excluding paused intervals.
    pub fn total_time(&self) -> f32 {
        let end = if self.stopped { self.stop } else { self.current };
        ((end - self.paused - self.base) as f64 * self.seconds_per_tick) as f32
    }

    /// Seconds between the last two ticks; zero while stopped.
    pub fn delta_time(&self) -> f32 {
        self.delta as f32
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HZ: i64 = 1_000;

    fn manual_clock() -> (ManualTicks, Clock<ManualTicks>) {
        let ticks = ManualTicks::new(HZ);
        let mut clock = Clock::with_source(ticks.clone());
        clock.reset();
        (ticks, clock)
    }

    #[test]
    fn tick_reports_delta_and_total() {
        let (ticks, mut clock) = manual_clock();
        ticks.advance(16);
        clock.tick();
        assert!((clock.delta_time() - 0.016).abs() < 1e-6);
        ticks.advance(34);
        clock.tick();
        assert!((clock.delta_time() - 0.034).abs() < 1e-6);
        assert!((clock.total_time() - 0.050).abs() < 1e-6);
    }

    #[test]
    fn pause_is_excluded_from_total_and_delta() {
        let (ticks, mut clock) = manual_clock();
        clock.start();
        ticks.advance(10);
        clock.tick();
        clock.stop();
        ticks.advance(100);
        clock.start();
        ticks.advance(5);
        clock.tick();

        assert!((clock.total_time() - 0.015).abs() < 1e-6);
        assert!((clock.delta_time() - 0.005).abs() < 1e-6);
    }

    #[test]
    fn total_time_is_frozen_while_stopped() {
        let (ticks, mut clock) = manual_clock();
        ticks.advance(20);
        clock.tick();
        clock.stop();
        let frozen = clock.total_time();
        ticks.advance(500);
        clock.tick();
        assert_eq!(clock.total_time(), frozen);
        assert_eq!(clock.delta_time(), 0.0);
    }

    #[test]
    fn repeated_stop_and_start_are_idempotent() {
        let (ticks, mut clock) = manual_clock();
        ticks.advance(10);
        clock.tick();

        clock.stop();
        ticks.advance(30);
        // A second stop must not move the stop point forward.
        clock.stop();
        ticks.advance(30);
        clock.start();
        ticks.advance(7);
        // A second start must not add the interval again.
        clock.start();
        ticks.advance(3);
        clock.tick();

        assert!((clock.total_time() - 0.020).abs() < 1e-6);
        assert!((clock.delta_time() - 0.010).abs() < 1e-6);
    }

    #[test]
    fn backwards_counter_clamps_delta_to_zero() {
        let (ticks, mut clock) = manual_clock();
        ticks.advance(50);
        clock.tick();
        ticks.advance(-5);
        clock.tick();
        assert_eq!(clock.delta_time(), 0.0);
    }

    #[test]
    fn reset_rebases_everything() {
        let (ticks, mut clock) = manual_clock();
        ticks.advance(10);
        clock.tick();
        clock.stop();
        ticks.advance(1_000);
        clock.reset();
        assert!(!clock.is_stopped());
        assert_eq!(clock.total_time(), 0.0);
        ticks.advance(1);
        clock.tick();
        assert!((clock.total_time() - 0.001).abs() < 1e-6);
    }

    #[test]
    fn total_time_never_decreases_while_running() {
        let (ticks, mut clock) = manual_clock();
        let mut last = clock.total_time();
        for step in [3, 0, 7, 1, 12, 0, 4] {
            ticks.advance(step);
            clock.tick();
            let total = clock.total_time();
            assert!(total >= last);
            last = total;
        }
    }

    #[test]
    fn real_sleep_while_stopped_is_not_counted() {
        let mut clock = Clock::new();
        clock.reset();
        clock.start();
        clock.tick();
        clock.stop();
        std::thread::sleep(std::time::Duration::from_millis(100));
        clock.start();
        clock.tick();

        assert!(clock.total_time() < 0.05, "total {}", clock.total_time());
        assert!(clock.delta_time() < 0.05, "delta {}", clock.delta_time());
    }
}
