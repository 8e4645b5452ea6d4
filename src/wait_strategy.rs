//! Host-side polling backoff for the proxy loop, standing in for the
//! reference's monitor/mwait-style burst budget (`MWAIT_BURST`).

use std::sync::atomic::{ AtomicBool, Ordering };
use std::time::Duration;

/// A backoff policy used while the proxy's `poll` finds no ready slot.
pub trait WaitStrategy: Send + Sync {
    /// Called once per failed poll. `running` can be checked by
    /// implementations that block, so a `kill` can wake them promptly.
    fn idle(&self, running: &AtomicBool);
}

/// Never yields the CPU; lowest latency, highest power draw. Used when
/// `Config::mwait_burst == 0`.
#[derive(Default)]
pub struct BusySpinWaitStrategy;

impl WaitStrategy for BusySpinWaitStrategy {
    #[inline]
    fn idle(&self, _running: &AtomicBool) {
        std::hint::spin_loop();
    }
}

/// Spins for `burst` iterations before yielding the thread, approximating the
/// reference's bounded monitor/mwait burst.
pub struct BurstWaitStrategy {
    burst: usize,
    spins: std::sync::atomic::AtomicUsize,
}

impl BurstWaitStrategy {
    pub fn new(burst: usize) -> Self {
        Self { burst: burst.max(1), spins: std::sync::atomic::AtomicUsize::new(0) }
    }
}

impl WaitStrategy for BurstWaitStrategy {
    fn idle(&self, _running: &AtomicBool) {
        let n = self.spins.fetch_add(1, Ordering::Relaxed) + 1;
        if n % self.burst == 0 {
            std::thread::yield_now();
        } else {
            std::hint::spin_loop();
        }
    }
}

/// Sleeps a fixed short interval; lowest power draw, highest latency. Useful
/// for tests that don't care about throughput.
pub struct SleepingWaitStrategy {
    interval: Duration,
}

impl SleepingWaitStrategy {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Default for SleepingWaitStrategy {
    fn default() -> Self {
        Self::new(Duration::from_micros(50))
    }
}

impl WaitStrategy for SleepingWaitStrategy {
    fn idle(&self, _running: &AtomicBool) {
        std::thread::sleep(self.interval);
    }
}

/// Builds the strategy named by `Config::mwait_burst`: `0` means busy-spin,
/// any other value is treated as a burst budget before yielding.
pub fn from_mwait_burst(mwait_burst: usize) -> Box<dyn WaitStrategy> {
    if mwait_burst == 0 {
        Box::new(BusySpinWaitStrategy)
    } else {
        Box::new(BurstWaitStrategy::new(mwait_burst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_spin_does_not_panic() {
        let running = AtomicBool::new(true);
        BusySpinWaitStrategy.idle(&running);
    }

    #[test]
    fn burst_yields_after_budget() {
        let running = AtomicBool::new(true);
        let strategy = BurstWaitStrategy::new(2);
        strategy.idle(&running);
        strategy.idle(&running);
        strategy.idle(&running);
    }

    #[test]
    fn from_mwait_burst_zero_is_busy_spin() {
        let _ = from_mwait_burst(0);
        let _ = from_mwait_burst(16);
    }
}
