use std::sync::Arc;

use flowersec_record::looks_like_record_frame;
use flowersec_token::Role;
use tokio::sync::MutexGuard;

use crate::channel::{ChannelRegistry, ChannelState};
use crate::observer::TunnelObserver;
use crate::TunnelError;

/// What the caller must do with a just-received frame, decided while
/// holding the channel's lock. Enqueuing to write queues always
/// happens after the lock is released, so no blocking I/O runs under
/// it.
pub enum RouteDecision {
    /// Buffered locally; nothing to send yet.
    Buffered,
    /// Forward `flush` (any frames buffered before pairing) followed by
    /// `frame` to the peer's write queue, in that order.
    Forward {
        peer_queue: Arc<crate::write_queue::WriteQueue>,
        flush: Vec<Vec<u8>>,
        frame: Vec<u8>,
    },
}

/// Implements the tunnel's core forwarding decision for one frame `src`
/// (identified by `src_role` and `src_conn_id`) just read from its
/// WebSocket. Mutates `state` under the caller's lock; never performs
/// I/O itself.
pub fn route_or_buffer(
    state: &mut MutexGuard<'_, ChannelState>,
    registry: &ChannelRegistry,
    src_role: Role,
    src_conn_id: u64,
    frame: Vec<u8>,
    max_record_bytes: usize,
    max_pending_bytes: usize,
    max_total_pending_bytes: usize,
    observer: &dyn TunnelObserver,
) -> Result<RouteDecision, TunnelError> {
    let is_still_registered = matches!(state.slot(src_role), Some(h) if h.conn_id == src_conn_id);
    if !is_still_registered {
        return Err(TunnelError::MissingSrc);
    }

    if looks_like_record_frame(&frame, max_record_bytes) && state.mark_saw_record_if_needed() {
        observer.encrypted();
    }

    let peer_present = state.peer_slot_mut(src_role).is_some();
    let peer_present_and_ready = peer_present && !state.flushing;

    if !peer_present_and_ready {
        let pending_len = frame.len();
        if !registry.try_reserve_pending(pending_len, max_total_pending_bytes) {
            return Err(TunnelError::PendingOverflow);
        }
        let handle = state.slot_mut(src_role).as_mut().expect("checked above");
        if handle.pending_bytes + pending_len > max_pending_bytes {
            registry.release_pending(pending_len);
            return Err(TunnelError::PendingOverflow);
        }
        handle.pending_bytes += pending_len;
        handle.pending.push(frame);
        return Ok(RouteDecision::Buffered);
    }

    let peer = state.peer_slot_mut(src_role).as_mut().expect("checked above");
    let peer_queue = peer.write_queue.clone();
    Ok(RouteDecision::Forward {
        peer_queue,
        flush: Vec::new(),
        frame,
    })
}

/// Snapshots and clears both sides' pending buffers under the
/// channel's lock, releasing their bytes from the global budget, ready
/// to be enqueued into the peer write queues outside the lock.
pub fn take_pairing_flush(
    state: &mut MutexGuard<'_, ChannelState>,
    registry: &ChannelRegistry,
) -> (Vec<Vec<u8>>, Vec<Vec<u8>>) {
    state.flushing = true;
    let client = std::mem::take(&mut state.conns[0].as_mut().expect("paired").pending);
    let client_bytes = state.conns[0].as_mut().expect("paired").pending_bytes;
    state.conns[0].as_mut().expect("paired").pending_bytes = 0;
    let server = std::mem::take(&mut state.conns[1].as_mut().expect("paired").pending);
    let server_bytes = state.conns[1].as_mut().expect("paired").pending_bytes;
    state.conns[1].as_mut().expect("paired").pending_bytes = 0;
    registry.release_pending(client_bytes);
    registry.release_pending(server_bytes);
    (client, server)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::write_queue::WriteQueue;

    fn handle(conn_id: u64) -> crate::channel::EndpointHandle {
        crate::channel::EndpointHandle::new(conn_id, vec![1; 16], Arc::new(WriteQueue::new(1 << 20)))
    }

    #[tokio::test]
    async fn buffers_when_peer_absent() {
        let registry = ChannelRegistry::new();
        let state = Arc::new(tokio::sync::Mutex::new(ChannelState::new(1000, 60, 0)));
        {
            let mut guard = state.lock().await;
            *guard.slot_mut(Role::Client) = Some(handle(1));
        }
        let mut guard = state.lock().await;
        let decision = route_or_buffer(
            &mut guard,
            &registry,
            Role::Client,
            1,
            b"hello".to_vec(),
            1 << 20,
            1 << 18,
            1 << 28,
            &crate::observer::NoopObserver,
        )
        .unwrap();
        assert!(matches!(decision, RouteDecision::Buffered));
        assert_eq!(guard.slot(Role::Client).as_ref().unwrap().pending_bytes, 5);
    }

    #[tokio::test]
    async fn forwards_when_peer_present() {
        let registry = ChannelRegistry::new();
        let state = Arc::new(tokio::sync::Mutex::new(ChannelState::new(1000, 60, 0)));
        {
            let mut guard = state.lock().await;
            *guard.slot_mut(Role::Client) = Some(handle(1));
            *guard.slot_mut(Role::Server) = Some(handle(2));
        }
        let mut guard = state.lock().await;
        let decision = route_or_buffer(
            &mut guard,
            &registry,
            Role::Client,
            1,
            b"hello".to_vec(),
            1 << 20,
            1 << 18,
            1 << 28,
            &crate::observer::NoopObserver,
        )
        .unwrap();
        match decision {
            RouteDecision::Forward { frame, .. } => assert_eq!(frame, b"hello"),
            _ => panic!("expected Forward"),
        }
    }

    #[tokio::test]
    async fn rejects_frame_from_replaced_source() {
        let registry = ChannelRegistry::new();
        let state = Arc::new(tokio::sync::Mutex::new(ChannelState::new(1000, 60, 0)));
        {
            let mut guard = state.lock().await;
            *guard.slot_mut(Role::Client) = Some(handle(99));
        }
        let mut guard = state.lock().await;
        let err = route_or_buffer(
            &mut guard,
            &registry,
            Role::Client,
            1,
            b"hello".to_vec(),
            1 << 20,
            1 << 18,
            1 << 28,
            &crate::observer::NoopObserver,
        )
        .unwrap_err();
        assert!(matches!(err, TunnelError::MissingSrc));
    }

    #[tokio::test]
    async fn pending_overflow_rejected_at_per_endpoint_budget() {
        let registry = ChannelRegistry::new();
        let state = Arc::new(tokio::sync::Mutex::new(ChannelState::new(1000, 60, 0)));
        {
            let mut guard = state.lock().await;
            *guard.slot_mut(Role::Client) = Some(handle(1));
        }
        let mut guard = state.lock().await;
        let err = route_or_buffer(
            &mut guard,
            &registry,
            Role::Client,
            1,
            vec![0u8; 10],
            1 << 20,
            5,
            1 << 28,
            &crate::observer::NoopObserver,
        )
        .unwrap_err();
        assert!(matches!(err, TunnelError::PendingOverflow));
    }

    #[tokio::test]
    async fn saw_record_flips_exactly_once() {
        let registry = ChannelRegistry::new();
        let state = Arc::new(tokio::sync::Mutex::new(ChannelState::new(1000, 60, 0)));
        {
            let mut guard = state.lock().await;
            *guard.slot_mut(Role::Client) = Some(handle(1));
        }
        let mut record = b"FSEC".to_vec();
        record.extend_from_slice(&[1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 16]);
        record.extend_from_slice(&[0u8; 16]);

        let mut guard = state.lock().await;
        route_or_buffer(
            &mut guard,
            &registry,
            Role::Client,
            1,
            record.clone(),
            1 << 20,
            1 << 18,
            1 << 28,
            &crate::observer::NoopObserver,
        )
        .unwrap();
        assert!(guard.saw_record);
        assert!(!guard.mark_saw_record_if_needed());
    }
}
