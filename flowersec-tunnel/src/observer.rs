use std::time::Duration;

use flowersec_common::StableReason;

use crate::TunnelError;

/// Structural events the tunnel emits as they happen, from whichever
/// task caused the transition. The default [`NoopObserver`] discards
/// everything; a real deployment wires this to its metrics/logging
/// sink, which this crate does not otherwise depend on.
pub trait TunnelObserver: Send + Sync {
    fn attach(&self, ok: bool, reason: &'static str) {
        let _ = (ok, reason);
    }
    fn replace(&self, ok: bool) {
        let _ = ok;
    }
    fn close(&self, reason: &'static str) {
        let _ = reason;
    }
    fn encrypted(&self) {}
    fn pair_latency(&self, duration: Duration) {
        let _ = duration;
    }
    fn channel_count(&self, n: usize) {
        let _ = n;
    }
    fn conn_count(&self, n: usize) {
        let _ = n;
    }
}

#[derive(Default)]
pub struct NoopObserver;

impl TunnelObserver for NoopObserver {}

pub(crate) fn report_attach_failure(observer: &dyn TunnelObserver, err: &TunnelError) {
    observer.attach(false, err.reason());
}
