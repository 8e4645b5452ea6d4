//! Lock-free counters for observability on the proxy loop.

use std::sync::atomic::{ AtomicU64, Ordering };

/// Per-`Context` metrics. Cheap enough to update on every request.
pub struct Metrics {
    pub sent: AtomicU64,
    pub dispatched: AtomicU64,
    pub completions_signaled: AtomicU64,
    pub backpressure_spins: AtomicU64,
    pub republish_events: AtomicU64,
    pub backend_errors: AtomicU64,
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            sent: AtomicU64::new(0),
            dispatched: AtomicU64::new(0),
            completions_signaled: AtomicU64::new(0),
            backpressure_spins: AtomicU64::new(0),
            republish_events: AtomicU64::new(0),
            backend_errors: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_completion(&self) {
        self.completions_signaled.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_backpressure_spin(&self) {
        self.backpressure_spins.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_republish(&self) {
        self.republish_events.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_backend_error(&self) {
        self.backend_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sent: self.sent.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            completions_signaled: self.completions_signaled.load(Ordering::Relaxed),
            backpressure_spins: self.backpressure_spins.load(Ordering::Relaxed),
            republish_events: self.republish_events.load(Ordering::Relaxed),
            backend_errors: self.backend_errors.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.sent.store(0, Ordering::Relaxed);
        self.dispatched.store(0, Ordering::Relaxed);
        self.completions_signaled.store(0, Ordering::Relaxed);
        self.backpressure_spins.store(0, Ordering::Relaxed);
        self.republish_events.store(0, Ordering::Relaxed);
        self.backend_errors.store(0, Ordering::Relaxed);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MetricsSnapshot {
    pub sent: u64,
    pub dispatched: u64,
    pub completions_signaled: u64,
    pub backpressure_spins: u64,
    pub republish_events: u64,
    pub backend_errors: u64,
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "sent={} dispatched={} completions={} backpressure={} republish={} backend_errors={}",
            self.sent,
            self.dispatched,
            self.completions_signaled,
            self.backpressure_spins,
            self.republish_events,
            self.backend_errors
        )
    }
}
