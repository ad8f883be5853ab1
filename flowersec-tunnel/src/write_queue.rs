use std::collections::VecDeque;

use tokio::sync::{Mutex, Notify};

/// A WebSocket close code plus the tunnel's stable reason string.
pub type CloseInfo = (u16, String);

struct Inner {
    queue: VecDeque<Vec<u8>>,
    buffered: usize,
    closed: bool,
    err: Option<CloseInfo>,
}

/// Per-endpoint bounded byte queue draining to that endpoint's write
/// pump task. `enqueue` suspends (never drops) until there is capacity
/// or the queue closes; a write failure closes the queue with a sticky
/// error so every other waiter observes the same failure and the write
/// pump knows what close frame to send.
pub struct WriteQueue {
    inner: Mutex<Inner>,
    space_available: Notify,
    item_available: Notify,
    max_bytes: usize,
}

impl WriteQueue {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                buffered: 0,
                closed: false,
                err: None,
            }),
            space_available: Notify::new(),
            item_available: Notify::new(),
            max_bytes,
        }
    }

    /// Blocks until `buffered + frame.len() <= max_bytes` or the queue
    /// is closed. Returns `Err` (the sticky close info, if any) if closed.
    pub async fn enqueue(&self, frame: Vec<u8>) -> Result<(), Option<CloseInfo>> {
        loop {
            // Register as a waiter *before* releasing the lock below, so
            // a `close`/`close_with_error` that only manages to acquire
            // the lock after we drop it is guaranteed to see this waiter
            // and its `notify_waiters()` can't fire into a gap where
            // nothing was listening yet.
            let notified = self.space_available.notified();
            tokio::pin!(notified);
            {
                let mut inner = self.inner.lock().await;
                if inner.closed {
                    return Err(inner.err.clone());
                }
                if inner.buffered + frame.len() <= self.max_bytes {
                    inner.buffered += frame.len();
                    inner.queue.push_back(frame);
                    self.item_available.notify_one();
                    return Ok(());
                }
                notified.as_mut().enable();
            }
            notified.await;
        }
    }

    /// Pops the next frame, waiting if the queue is momentarily empty.
    /// Returns `None` once closed with nothing left to drain.
    pub async fn dequeue(&self) -> Option<Vec<u8>> {
        loop {
            let notified = self.item_available.notified();
            tokio::pin!(notified);
            {
                let mut inner = self.inner.lock().await;
                if let Some(frame) = inner.queue.pop_front() {
                    inner.buffered -= frame.len();
                    self.space_available.notify_one();
                    return Some(frame);
                }
                if inner.closed {
                    return None;
                }
                notified.as_mut().enable();
            }
            notified.await;
        }
    }

    /// Closes the queue with a sticky close code + reason, failing any
    /// waiter. Safe to call more than once; only the first sticks.
    pub async fn close_with_error(&self, code: u16, reason: impl Into<String>) {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return;
        }
        inner.closed = true;
        inner.err = Some((code, reason.into()));
        drop(inner);
        self.space_available.notify_waiters();
        self.item_available.notify_waiters();
    }

    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return;
        }
        inner.closed = true;
        drop(inner);
        self.space_available.notify_waiters();
        self.item_available.notify_waiters();
    }

    /// The close code/reason that closed this queue, if any. Read by
    /// the write pump after `dequeue` drains to `None` so it can send
    /// a matching close frame before tearing down the socket.
    pub async fn close_info(&self) -> Option<CloseInfo> {
        self.inner.lock().await.err.clone()
    }

    pub async fn buffered_bytes(&self) -> usize {
        self.inner.lock().await.buffered
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn enqueue_and_dequeue_preserve_order() {
        let q = WriteQueue::new(1024);
        q.enqueue(b"one".to_vec()).await.unwrap();
        q.enqueue(b"two".to_vec()).await.unwrap();
        assert_eq!(q.dequeue().await, Some(b"one".to_vec()));
        assert_eq!(q.dequeue().await, Some(b"two".to_vec()));
    }

    #[tokio::test]
    async fn enqueue_blocks_until_space_freed() {
        let q = Arc::new(WriteQueue::new(5));
        q.enqueue(b"abcde".to_vec()).await.unwrap();

        let q2 = q.clone();
        let enqueuer = tokio::spawn(async move { q2.enqueue(b"f".to_vec()).await });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!enqueuer.is_finished());

        q.dequeue().await;
        enqueuer.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn close_with_error_fails_waiters() {
        let q = Arc::new(WriteQueue::new(5));
        q.enqueue(b"abcde".to_vec()).await.unwrap();

        let q2 = q.clone();
        let enqueuer = tokio::spawn(async move { q2.enqueue(b"f".to_vec()).await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        q.close_with_error(4500, "write_error").await;
        let result = enqueuer.await.unwrap();
        assert_eq!(result, Err(Some((4500, "write_error".to_string()))));
    }

    #[tokio::test]
    async fn dequeue_returns_none_once_closed_and_drained() {
        let q = WriteQueue::new(1024);
        q.enqueue(b"one".to_vec()).await.unwrap();
        q.close().await;
        assert_eq!(q.dequeue().await, Some(b"one".to_vec()));
        assert_eq!(q.dequeue().await, None);
    }

    #[tokio::test]
    async fn close_info_reports_sticky_reason() {
        let q = WriteQueue::new(1024);
        q.close_with_error(4403, "policy_violation").await;
        assert_eq!(
            q.close_info().await,
            Some((4403, "policy_violation".to_string()))
        );
    }
}
