use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, Mutex};

use super::envelope::{read_envelope, write_envelope, Envelope, EnvelopeError};

#[derive(Debug, Clone)]
pub enum RpcCallError {
    /// The peer replied with `error`.
    Remote { code: u32, message: String },
    /// The local call was canceled before a response arrived.
    Canceled,
    /// The reader task (and therefore the stream) is gone.
    TransportError,
}

struct Pending {
    reply: oneshot::Sender<Result<Value, RpcCallError>>,
}

struct ClientState {
    next_request_id: u64,
    pending: HashMap<u64, Pending>,
}

/// Drives the RPC request/response/notification protocol on the
/// client side of one multiplexed stream. A single reader task owns
/// the read half; `call`/`notify` write directly to the write half
/// under a lock, matching how one logical stream multiplexes many
/// concurrent callers.
pub struct RpcClient<W> {
    write_half: Mutex<W>,
    state: Mutex<ClientState>,
    max_envelope_bytes: usize,
    notifications: mpsc::UnboundedSender<(u64, Value)>,
}

impl<W> RpcClient<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Spawns the reader task over `read_half` and returns the client
    /// handle plus a channel that yields inbound notifications.
    pub fn spawn<R>(
        read_half: R,
        write_half: W,
        max_envelope_bytes: usize,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<(u64, Value)>)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = Arc::new(Self {
            write_half: Mutex::new(write_half),
            state: Mutex::new(ClientState { next_request_id: 1, pending: HashMap::new() }),
            max_envelope_bytes,
            notifications: tx,
        });
        let reader_client = Arc::clone(&client);
        tokio::spawn(async move { reader_client.run_reader(read_half).await });
        (client, rx)
    }

    async fn run_reader<R>(self: Arc<Self>, mut read_half: R)
    where
        R: AsyncRead + Unpin,
    {
        loop {
            let envelope = match read_envelope(&mut read_half, self.max_envelope_bytes).await {
                Ok(envelope) => envelope,
                Err(e) => {
                    tracing::debug!(error = %e, "rpc client reader stopped");
                    break;
                }
            };
            if envelope.is_response() {
                let mut state = self.state.lock().await;
                if let Some(pending) = state.pending.remove(&envelope.response_to) {
                    let result = match envelope.error {
                        Some(EnvelopeError { code, message }) => {
                            Err(RpcCallError::Remote { code, message })
                        }
                        None => Ok(envelope.payload),
                    };
                    let _ = pending.reply.send(result);
                }
                // A response to an id no longer pending (caller
                // canceled) is dropped per the cancellation rule.
            } else if envelope.is_notification() {
                let _ = self.notifications.send((envelope.type_id, envelope.payload));
            }
        }
        self.fail_all_pending().await;
    }

    async fn fail_all_pending(&self) {
        let mut state = self.state.lock().await;
        for (_, pending) in state.pending.drain() {
            let _ = pending.reply.send(Err(RpcCallError::TransportError));
        }
    }

    /// Issues a request and awaits its response. Request id overflow
    /// (wrapping past `u64::MAX`) is a fatal client error, per the
    /// protocol's overflow rule.
    pub async fn call(&self, type_id: u64, payload: Value) -> Result<Value, RpcCallError> {
        let (request_id, rx) = {
            let mut state = self.state.lock().await;
            let request_id = state.next_request_id;
            state.next_request_id = state
                .next_request_id
                .checked_add(1)
                .expect("rpc request id overflow is a fatal client error");
            let (tx, rx) = oneshot::channel();
            state.pending.insert(request_id, Pending { reply: tx });
            (request_id, rx)
        };

        let envelope = Envelope::request(type_id, request_id, payload);
        if let Err(e) = write_envelope(&mut *self.write_half.lock().await, &envelope).await {
            tracing::debug!(error = %e, "rpc call failed to write request");
            self.state.lock().await.pending.remove(&request_id);
            return Err(RpcCallError::TransportError);
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(RpcCallError::TransportError),
        }
    }

    /// Cancels a pending call: the caller should have already awaited
    /// `call` via a `select!` that races cancellation, so this only
    /// needs to free the local bookkeeping. Any response that arrives
    /// afterwards is dropped by `run_reader`.
    pub async fn cancel(&self, request_id: u64) {
        let mut state = self.state.lock().await;
        if let Some(pending) = state.pending.remove(&request_id) {
            let _ = pending.reply.send(Err(RpcCallError::Canceled));
        }
    }

    pub async fn notify(&self, type_id: u64, payload: Value) -> std::io::Result<()> {
        let envelope = Envelope::notification(type_id, payload);
        write_envelope(&mut *self.write_half.lock().await, &envelope).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn call_resolves_from_a_matching_response() {
        let (client_io, mut server_io) = tokio::io::duplex(4096);
        let (read_half, write_half) = tokio::io::split(client_io);
        let (client, _notifications) = RpcClient::spawn(read_half, write_half, 1 << 20);

        let server_task = tokio::spawn(async move {
            let request = read_envelope(&mut server_io, 1 << 20).await.unwrap();
            assert_eq!(request.type_id, 1);
            let response = Envelope::response(1, request.request_id, serde_json::json!({"ok": true}));
            write_envelope(&mut server_io, &response).await.unwrap();
        });

        let result = client.call(1, serde_json::json!({})).await.unwrap();
        assert_eq!(result, serde_json::json!({"ok": true}));
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn call_surfaces_a_remote_error() {
        let (client_io, mut server_io) = tokio::io::duplex(4096);
        let (read_half, write_half) = tokio::io::split(client_io);
        let (client, _notifications) = RpcClient::spawn(read_half, write_half, 1 << 20);

        tokio::spawn(async move {
            let request = read_envelope(&mut server_io, 1 << 20).await.unwrap();
            let response = super::super::envelope::Envelope::error_response(
                request.type_id,
                request.request_id,
                404,
                "handler not found",
            );
            write_envelope(&mut server_io, &response).await.unwrap();
        });

        let err = client.call(99, serde_json::json!({})).await.unwrap_err();
        match err {
            RpcCallError::Remote { code, .. } => assert_eq!(code, 404),
            _ => panic!("expected a remote error"),
        }
    }

    #[tokio::test]
    async fn notifications_are_delivered_out_of_band() {
        let (client_io, mut server_io) = tokio::io::duplex(4096);
        let (read_half, write_half) = tokio::io::split(client_io);
        let (_client, mut notifications) = RpcClient::spawn(read_half, write_half, 1 << 20);

        write_envelope(&mut server_io, &Envelope::notification(2, serde_json::json!({"hello": "world"})))
            .await
            .unwrap();

        let (type_id, payload) = notifications.recv().await.unwrap();
        assert_eq!(type_id, 2);
        assert_eq!(payload, serde_json::json!({"hello": "world"}));
    }
}
