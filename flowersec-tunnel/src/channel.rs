use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use flowersec_token::Role;
use tokio::sync::Mutex;

use crate::write_queue::WriteQueue;
use crate::TunnelError;

fn role_index(role: Role) -> usize {
    match role {
        Role::Client => 0,
        Role::Server => 1,
    }
}

/// Sliding-window replacement limiter for one `(channel, role)` pair.
#[derive(Debug, Default, Clone)]
pub struct ReplaceLimiter {
    last: Option<i64>,
    window_start: Option<i64>,
    window_count: u32,
}

impl ReplaceLimiter {
    /// Returns true and records the attempt iff both the cooldown and
    /// the sliding-window cap permit it.
    pub fn allow(
        &mut self,
        now: i64,
        cooldown_secs: i64,
        window_secs: i64,
        max_per_window: u32,
    ) -> bool {
        if let Some(last) = self.last {
            if cooldown_secs > 0 && now - last < cooldown_secs {
                return false;
            }
        }
        let in_window = self
            .window_start
            .map(|start| now - start < window_secs)
            .unwrap_or(false);
        if !in_window {
            self.window_start = Some(now);
            self.window_count = 0;
        }
        if window_secs > 0 && max_per_window > 0 && self.window_count >= max_per_window {
            return false;
        }
        self.last = Some(now);
        self.window_count += 1;
        true
    }
}

/// A connected endpoint's in-memory state for as long as it holds a
/// channel role: frames buffered before pairing and the bounded queue
/// draining to its write pump task.
pub struct EndpointHandle {
    pub conn_id: u64,
    pub endpoint_instance_id: Vec<u8>,
    pub pending: Vec<Vec<u8>>,
    pub pending_bytes: usize,
    pub write_queue: Arc<WriteQueue>,
}

impl EndpointHandle {
    pub fn new(conn_id: u64, endpoint_instance_id: Vec<u8>, write_queue: Arc<WriteQueue>) -> Self {
        Self {
            conn_id,
            endpoint_instance_id,
            pending: Vec::new(),
            pending_bytes: 0,
            write_queue,
        }
    }
}

/// Per-channel state: one slot per role, plus the immutable init
/// window and idle timeout every attach for this channel must agree
/// on. Guarded by its own lock, separate from the registry's map lock.
pub struct ChannelState {
    pub init_exp: i64,
    pub idle_timeout_seconds: i64,
    pub first_seen: i64,
    pub last_active: i64,
    pub saw_record: bool,
    pub flushing: bool,
    pub conns: [Option<EndpointHandle>; 2],
    pub replace: [ReplaceLimiter; 2],
}

impl ChannelState {
    pub fn new(init_exp: i64, idle_timeout_seconds: i64, now: i64) -> Self {
        Self {
            init_exp,
            idle_timeout_seconds,
            first_seen: now,
            last_active: now,
            saw_record: false,
            flushing: false,
            conns: [None, None],
            replace: [ReplaceLimiter::default(), ReplaceLimiter::default()],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.conns[0].is_none() && self.conns[1].is_none()
    }

    pub fn is_paired(&self) -> bool {
        self.conns[0].is_some() && self.conns[1].is_some()
    }

    pub fn slot(&self, role: Role) -> &Option<EndpointHandle> {
        &self.conns[role_index(role)]
    }

    pub fn slot_mut(&mut self, role: Role) -> &mut Option<EndpointHandle> {
        &mut self.conns[role_index(role)]
    }

    pub fn peer_slot_mut(&mut self, role: Role) -> &mut Option<EndpointHandle> {
        &mut self.conns[1 - role_index(role)]
    }

    pub fn replace_limiter_mut(&mut self, role: Role) -> &mut ReplaceLimiter {
        &mut self.replace[role_index(role)]
    }

    /// Flips `sawRecord` to true exactly once, the first time either
    /// direction forwards something that looks like an FSEC record.
    pub fn mark_saw_record_if_needed(&mut self) -> bool {
        if self.saw_record {
            return false;
        }
        self.saw_record = true;
        true
    }
}

/// The arena of live channels, keyed by `channel_id`. Endpoints hold
/// the key rather than a direct reference to their channel, so all
/// access goes through a short-lived lookup under the map lock before
/// taking the channel's own lock.
#[derive(Default)]
pub struct ChannelRegistry {
    channels: Mutex<HashMap<String, Arc<Mutex<ChannelState>>>>,
    global_pending_bytes: AtomicUsize,
    conn_count: AtomicUsize,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn channel_count(&self) -> usize {
        self.channels.lock().await.len()
    }

    pub fn conn_count(&self) -> usize {
        self.conn_count.load(Ordering::SeqCst)
    }

    pub fn global_pending_bytes(&self) -> usize {
        self.global_pending_bytes.load(Ordering::SeqCst)
    }

    pub fn track_conn(&self) {
        self.conn_count.fetch_add(1, Ordering::SeqCst);
    }

    pub fn untrack_conn(&self) {
        self.conn_count.fetch_sub(1, Ordering::SeqCst);
    }

    /// Reserves `bytes` against the global pending-byte budget; fails
    /// without reserving anything if it would exceed `max_total`.
    pub fn try_reserve_pending(&self, bytes: usize, max_total: usize) -> bool {
        let mut current = self.global_pending_bytes.load(Ordering::SeqCst);
        loop {
            if current.saturating_add(bytes) > max_total {
                return false;
            }
            match self.global_pending_bytes.compare_exchange_weak(
                current,
                current + bytes,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn release_pending(&self, bytes: usize) {
        self.global_pending_bytes.fetch_sub(bytes, Ordering::SeqCst);
    }

    pub async fn get(&self, channel_id: &str) -> Option<Arc<Mutex<ChannelState>>> {
        self.channels.lock().await.get(channel_id).cloned()
    }

    /// Returns the channel for `channel_id`, creating it with `New`'s
    /// `init_exp`/`idle_timeout_seconds` if it does not exist yet, and
    /// whether it was freshly created (so the caller only starts pumps
    /// once, on first-ever attach for the channel_id).
    pub async fn get_or_create(
        &self,
        channel_id: &str,
        init_exp: i64,
        idle_timeout_seconds: i64,
        now: i64,
    ) -> Arc<Mutex<ChannelState>> {
        let mut channels = self.channels.lock().await;
        channels
            .entry(channel_id.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(ChannelState::new(init_exp, idle_timeout_seconds, now)))
            })
            .clone()
    }

    pub async fn remove(&self, channel_id: &str) -> Option<Arc<Mutex<ChannelState>>> {
        self.channels.lock().await.remove(channel_id)
    }

    pub async fn ids(&self) -> Vec<String> {
        self.channels.lock().await.keys().cloned().collect()
    }
}

/// Tears a channel down: removes it from the registry, releases both
/// endpoints' still-pending bytes from the global budget, and closes
/// both write queues with `reason` so their write pumps send a close
/// frame and exit. Idempotent against a channel already removed by a
/// concurrent teardown.
pub async fn close_channel(registry: &ChannelRegistry, channel_id: &str, code: u16, reason: &'static str) {
    let Some(state) = registry.remove(channel_id).await else {
        return;
    };
    let guard = state.lock().await;
    for slot in &guard.conns {
        if let Some(handle) = slot {
            registry.release_pending(handle.pending_bytes);
            handle.write_queue.close_with_error(code, reason).await;
        }
    }
}

/// Validates that a (re)attach's `init_exp`/`idle_timeout_seconds`
/// agree with what the channel already recorded, per the invariant
/// that these are immutable for a channel's lifetime.
pub fn check_matches_existing(
    state: &ChannelState,
    init_exp: i64,
    idle_timeout_seconds: i64,
) -> Result<(), TunnelError> {
    if state.init_exp != init_exp {
        return Err(TunnelError::InitExpMismatch);
    }
    if state.idle_timeout_seconds != idle_timeout_seconds {
        return Err(TunnelError::IdleTimeoutMismatch);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_limiter_allows_up_to_window_cap() {
        let mut limiter = ReplaceLimiter::default();
        for _ in 0..5 {
            assert!(limiter.allow(100, 0, 10, 5));
        }
        assert!(!limiter.allow(100, 0, 10, 5));
    }

    #[test]
    fn replace_limiter_resets_after_window_elapses() {
        let mut limiter = ReplaceLimiter::default();
        for _ in 0..5 {
            assert!(limiter.allow(100, 0, 10, 5));
        }
        assert!(limiter.allow(111, 0, 10, 5));
    }

    #[test]
    fn replace_limiter_enforces_cooldown() {
        let mut limiter = ReplaceLimiter::default();
        assert!(limiter.allow(100, 5, 10, 5));
        assert!(!limiter.allow(103, 5, 10, 5));
        assert!(limiter.allow(105, 5, 10, 5));
    }

    #[tokio::test]
    async fn pending_budget_is_atomic_and_releasable() {
        let registry = ChannelRegistry::new();
        assert!(registry.try_reserve_pending(100, 150));
        assert!(!registry.try_reserve_pending(100, 150));
        registry.release_pending(100);
        assert!(registry.try_reserve_pending(100, 150));
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent_per_channel_id() {
        let registry = ChannelRegistry::new();
        let a = registry.get_or_create("ch_1", 1000, 60, 0).await;
        let b = registry.get_or_create("ch_1", 2000, 120, 0).await;
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.lock().await.init_exp, 1000);
    }

    #[test]
    fn matching_window_accepted_mismatch_rejected() {
        let state = ChannelState::new(1000, 60, 0);
        check_matches_existing(&state, 1000, 60).unwrap();
        assert!(matches!(
            check_matches_existing(&state, 1001, 60),
            Err(TunnelError::InitExpMismatch)
        ));
        assert!(matches!(
            check_matches_existing(&state, 1000, 61),
            Err(TunnelError::IdleTimeoutMismatch)
        ));
    }
}
