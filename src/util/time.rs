//! Time utilities for game simulation

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp in milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Server start time for uptime tracking
static SERVER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Get server uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Default simulation rate
pub const DEFAULT_TICK_RATE: u32 = 30;

/// Wall-clock duration of one tick at the given rate
pub fn tick_duration(tick_rate: u32) -> Duration {
    Duration::from_micros(1_000_000 / tick_rate.max(1) as u64)
}

/// Simulation clock advanced once per fixed tick.
///
/// Simulation time is derived from the tick counter rather than accumulated,
/// so `now()` after N ticks is exactly `N * dt` up to one rounding step.
#[derive(Debug, Clone)]
pub struct SimClock {
    tick: u64,
    tick_seconds: f64,
}

impl SimClock {
    pub fn new(tick_rate: u32) -> Self {
        Self {
            tick: 0,
            tick_seconds: 1.0 / tick_rate.max(1) as f64,
        }
    }

    /// Advance one tick, returning the new tick number
    pub fn advance(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Seconds of simulated time since the clock started
    pub fn now(&self) -> f64 {
        self.tick as f64 * self.tick_seconds
    }

    pub fn dt(&self) -> f32 {
        self.tick_seconds as f32
    }
}

/// A simple timer for measuring durations
#[derive(Debug, Clone)]
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_micros(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sim_clock_derives_time_from_ticks() {
        let mut clock = SimClock::new(10);
        assert_eq!(clock.now(), 0.0);

        for _ in 0..20 {
            clock.advance();
        }

        assert_eq!(clock.tick(), 20);
        assert!((clock.now() - 2.0).abs() < 1e-9);
        assert!((clock.dt() - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_tick_duration_guards_zero_rate() {
        assert_eq!(tick_duration(0), Duration::from_secs(1));
        assert_eq!(tick_duration(50), Duration::from_millis(20));
    }
}
