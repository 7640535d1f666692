//! Periodic timer wheel.
//!
//! Peripherals install timers with a microsecond interval; after every
//! executed instruction the stepper feeds the cycle delta to the wheel.
//! An entry fires when its tick accumulator reaches
//! `interval_seconds * frequency_hz`. An interval of zero fires on every
//! step. Entries fire in installation order.

use crate::peripheral::DeviceId;

/// Handle returned by [`TimerWheel::install`].
pub type TimerId = usize;

/// Upper bound on installed timers.
pub const MAX_TIMERS: usize = 256;

#[derive(Debug, Clone)]
struct TimerEntry {
    device: DeviceId,
    /// Accumulated CPU ticks since the last firing.
    ticks: u64,
    /// Interval in seconds.
    interval: f64,
}

/// The fixed table of periodic callbacks.
#[derive(Debug, Default)]
pub struct TimerWheel {
    entries: Vec<TimerEntry>,
}

impl TimerWheel {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Register a new timer owned by `device`. The returned id doubles as
    /// the entry's index. Overflowing the table is a programming error.
    pub fn install(&mut self, device: DeviceId, interval_us: u32) -> TimerId {
        assert!(self.entries.len() < MAX_TIMERS, "timer table overflow");
        self.entries.push(TimerEntry {
            device,
            ticks: 0,
            interval: interval_us as f64 / 1_000_000.0,
        });
        self.entries.len() - 1
    }

    /// Change the interval of an installed timer and restart its
    /// accumulator. Returns false for an unknown id.
    pub fn set_interval(&mut self, id: TimerId, interval_us: u32) -> bool {
        match self.entries.get_mut(id) {
            Some(entry) => {
                entry.ticks = 0;
                entry.interval = interval_us as f64 / 1_000_000.0;
                true
            }
            None => false,
        }
    }

    /// Owning device of an entry.
    pub fn device(&self, id: TimerId) -> DeviceId {
        self.entries[id].device
    }

    /// Accumulated ticks of an entry.
    pub fn ticks(&self, id: TimerId) -> u64 {
        self.entries[id].ticks
    }

    /// Add executed cycles to an entry.
    pub fn accumulate(&mut self, id: TimerId, ticks: u64) {
        self.entries[id].ticks += ticks;
    }

    /// True when the entry's accumulator has reached the firing threshold
    /// at the given CPU frequency.
    pub fn expired(&self, id: TimerId, frequency: u32) -> bool {
        let entry = &self.entries[id];
        entry.ticks >= (entry.interval * frequency as f64) as u64
    }

    /// Zero an entry's accumulator after it fired.
    pub fn rearm(&mut self, id: TimerId) {
        self.entries[id].ticks = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_assigns_sequential_ids() {
        let mut wheel = TimerWheel::new();
        assert_eq!(wheel.install(1, 1000), 0);
        assert_eq!(wheel.install(2, 2000), 1);
        assert_eq!(wheel.len(), 2);
        assert_eq!(wheel.device(0), 1);
        assert_eq!(wheel.device(1), 2);
    }

    #[test]
    fn test_expiry_threshold() {
        let mut wheel = TimerWheel::new();
        // 1 ms at 1 MHz is 1000 ticks.
        let id = wheel.install(1, 1000);

        wheel.accumulate(id, 999);
        assert!(!wheel.expired(id, 1_000_000));

        wheel.accumulate(id, 1);
        assert!(wheel.expired(id, 1_000_000));

        wheel.rearm(id);
        assert_eq!(wheel.ticks(id), 0);
        assert!(!wheel.expired(id, 1_000_000));
    }

    #[test]
    fn test_zero_interval_fires_every_step() {
        let mut wheel = TimerWheel::new();
        let id = wheel.install(1, 0);
        assert!(wheel.expired(id, 1_000_000));
        wheel.accumulate(id, 1);
        assert!(wheel.expired(id, 1_000_000));
    }

    #[test]
    fn test_set_interval_restarts_accumulator() {
        let mut wheel = TimerWheel::new();
        let id = wheel.install(1, 1000);
        wheel.accumulate(id, 500);

        assert!(wheel.set_interval(id, 10));
        assert_eq!(wheel.ticks(id), 0);
        assert!(!wheel.set_interval(99, 10));

        // 10 us at 1 MHz is 10 ticks.
        wheel.accumulate(id, 10);
        assert!(wheel.expired(id, 1_000_000));
    }
}
