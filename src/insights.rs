//! Observability for the proxy loop. Zero-cost when the `tracing` feature is disabled.
//!
//! ```toml
//! shmem-proxy = { version = "0.1", features = ["diagnostics"] }
//! ```
//! ```rust,ignore
//! shmem_proxy::insights::init_diagnostics();
//! ```

#[cfg(feature = "diagnostics")]
pub fn init_diagnostics() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[cfg(not(feature = "diagnostics"))]
pub fn init_diagnostics() {}

/// Span covering one dispatched request. No-op when `tracing` is disabled.
#[cfg(feature = "tracing")]
#[inline]
pub fn record_dispatch(op: crate::record::Op, type_code: crate::record::TypeCode) {
    let _span = tracing::trace_span!("dispatch", ?op, ?type_code).entered();
}

#[cfg(not(feature = "tracing"))]
#[inline(always)]
pub fn record_dispatch(_op: crate::record::Op, _type_code: crate::record::TypeCode) {}

/// Records a backend failure during dispatch.
#[cfg(feature = "tracing")]
#[inline]
pub fn record_backend_error(reason: &str) {
    tracing::error!(reason, "backend dispatch failed");
}

#[cfg(not(feature = "tracing"))]
#[inline(always)]
pub fn record_backend_error(_reason: &str) {}

/// Records a flow-control backpressure spin.
#[cfg(feature = "tracing")]
#[inline]
pub fn record_backpressure() {
    let _span = tracing::trace_span!("backpressure").entered();
}

#[cfg(not(feature = "tracing"))]
#[inline(always)]
pub fn record_backpressure() {}

/// Records a republish of the consumer index.
#[cfg(feature = "tracing")]
#[inline]
pub fn record_republish(next_receive: u32) {
    tracing::debug!(next_receive, "republished consumer index");
}

#[cfg(not(feature = "tracing"))]
#[inline(always)]
pub fn record_republish(_next_receive: u32) {}

/// Records a `print`/`debug_test` upcall's message.
#[cfg(feature = "tracing")]
#[inline]
pub fn record_print(message: &str) {
    tracing::info!(message, "proxy print upcall");
}

#[cfg(not(feature = "tracing"))]
#[inline(always)]
pub fn record_print(_message: &str) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{ Op, TypeCode };

    #[test]
    fn helpers_compile_and_do_not_panic() {
        record_dispatch(Op::Put, TypeCode::U64);
        record_backend_error("test");
        record_backpressure();
        record_republish(128);
        record_print("hello");
    }
}
