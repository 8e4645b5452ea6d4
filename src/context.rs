//! Process-wide proxy state: the request ring, completion table, symmetric
//! heap bookkeeping, message pool, configuration, metrics and backend handle
//! bundled behind a single `Arc`, matching the reference's single mutable
//! global but expressed as an explicitly owned handle passed to producers and
//! the proxy loop rather than process-wide statics.

use std::sync::atomic::{ AtomicBool, Ordering };
use std::sync::Arc;

use crate::addressing::SymmetricHeap;
use crate::backend::Backend;
use crate::completion::CompletionTable;
use crate::config::Config;
use crate::error::Result;
use crate::messages::MessagePool;
use crate::metrics::Metrics;
use crate::ring::RequestRing;
use crate::wait_strategy::{ self, WaitStrategy };

/// Base address of the simulated symmetric heap. Arbitrary; only its
/// relationship to `heap_length` matters since no real device memory is
/// mapped at this address.
const HEAP_BASE: usize = 0x0001_0000_0000;

pub struct Context {
    pub config: Config,
    pub ring: RequestRing,
    pub completions: CompletionTable,
    pub heap: SymmetricHeap,
    pub messages: MessagePool,
    pub metrics: Metrics,
    pub backend: Arc<dyn Backend>,
    pub wait_strategy: Box<dyn WaitStrategy>,
    running: AtomicBool,
}

impl Context {
    /// Brings up every proxy subsystem and the backend, returning a handle
    /// shared by every producer thread and the single proxy thread.
    pub fn init(config: Config, backend: Arc<dyn Backend>) -> Result<Arc<Self>> {
        backend.init()?;
        let heap = SymmetricHeap::new(HEAP_BASE, config.symmetric_size, backend.my_pe());
        let wait_strategy = wait_strategy::from_mwait_burst(config.mwait_burst);
        let ctx = Self {
            ring: RequestRing::new()?,
            completions: CompletionTable::with_default_capacity(),
            heap,
            messages: MessagePool::new(),
            metrics: Metrics::new(),
            backend,
            wait_strategy,
            running: AtomicBool::new(true),
            config,
        };
        Ok(Arc::new(ctx))
    }

    /// Translates a heap pointer into the byte offset the backend addresses
    /// a PE's symmetric segment with.
    pub fn heap_offset(&self, ptr: usize) -> usize {
        ptr - self.heap.heap_base()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Requests that the proxy loop's next iteration be its last.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn running_flag(&self) -> &AtomicBool {
        &self.running
    }

    /// Finalizes the backend. Idempotent only insofar as the backend's own
    /// `finalize` is; callers should not call this more than once.
    pub fn finalize(&self) -> Result<()> {
        self.backend.finalize()
    }
}
