use std::sync::Arc;
use std::time::Duration;

use flowersec_common::{StableReason, SystemClock};
use flowersec_handshake::{run_client, HandshakeConfig, HandshakeError};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use yamux::Mode;

use crate::attach::AttachMessage;
use crate::bridge::MuxSession;
use crate::config::{ConnectOptions, ConnectPath, EndpointRuntimeConfig};
use crate::error::{attach_code_from_close_reason, EndpointError, Path as ErrorPath, Stage};
use crate::rpc::{RpcCallError, RpcClient};
use crate::stream_hello::{write_stream_hello, StreamHello, RPC_STREAM_KIND};
use crate::validate::validate;
use crate::ws_transport::WsFrameTransport;

/// A live client-side connection: the multiplexed session, the RPC
/// client for the canonical stream, a channel of inbound
/// notifications, and the keepalive task driving it.
pub struct ConnectedEndpoint {
    pub session: Arc<MuxSession>,
    pub rpc: Arc<RpcClient<tokio::io::WriteHalf<yamux::Stream>>>,
    pub notifications: mpsc::UnboundedReceiver<(u64, Value)>,
    keepalive: tokio::task::JoinHandle<()>,
}

impl ConnectedEndpoint {
    /// Issues an RPC request and awaits its response.
    pub async fn call(&self, type_id: u64, payload: Value) -> Result<Value, RpcCallError> {
        self.rpc.call(type_id, payload).await
    }

    /// Sends a fire-and-forget notification.
    pub async fn notify(&self, type_id: u64, payload: Value) -> std::io::Result<()> {
        self.rpc.notify(type_id, payload).await
    }

    pub async fn close(self) {
        self.keepalive.abort();
        self.session.close().await;
    }
}

fn classify_handshake_error(error: &HandshakeError, path: ConnectPath) -> EndpointError {
    if let HandshakeError::Io(io_err) = error {
        let message = io_err.to_string();
        if let Some(reason) = message.strip_prefix("ws closed: ") {
            if path == ConnectPath::Tunnel {
                return EndpointError::new(Stage::Attach, attach_code_from_close_reason(reason), path.into());
            }
        }
    }
    EndpointError::new(Stage::Handshake, error.reason(), path.into())
}

/// Runs the client connect path: dial, attach (tunnel path only),
/// handshake, open the multiplexed session, open the canonical RPC
/// stream, and start the keepalive loop.
pub async fn connect(
    options: &ConnectOptions,
    path: ConnectPath,
    runtime_config: &EndpointRuntimeConfig,
    mut cancel: Option<oneshot::Receiver<()>>,
) -> Result<ConnectedEndpoint, EndpointError> {
    let error_path: ErrorPath = path.into();
    let (psk, suite, endpoint_instance_id) = validate(options, path)?;
    let endpoint_instance_id =
        endpoint_instance_id.unwrap_or_else(|| (0..16).map(|_| rand::random::<u8>()).collect());

    let mut request = options
        .ws_url
        .clone()
        .into_client_request()
        .map_err(|_| EndpointError::new(Stage::Connect, "dial_failed", error_path))?;
    if let Some(origin) = &options.origin {
        request.headers_mut().insert(
            "origin",
            origin.parse().map_err(|_| EndpointError::new(Stage::Connect, "dial_failed", error_path))?,
        );
    }

    let dial = tokio_tungstenite::connect_async(request);
    let cancel_fut = async {
        match cancel.as_mut() {
            Some(rx) => {
                let _ = rx.await;
            }
            None => std::future::pending::<()>().await,
        }
    };
    let ws_stream = tokio::select! {
        result = tokio::time::timeout(runtime_config.connect_timeout, dial) => {
            match result {
                Err(_) => return Err(EndpointError::new(Stage::Connect, "timeout", error_path)),
                Ok(Err(_)) => return Err(EndpointError::new(Stage::Connect, "dial_failed", error_path)),
                Ok(Ok((ws, _response))) => ws,
            }
        }
        _ = cancel_fut => return Err(EndpointError::new(Stage::Connect, "canceled", error_path)),
    };

    let mut ws_stream = ws_stream;
    if path == ConnectPath::Tunnel {
        let attach = AttachMessage::new(
            &options.channel_id,
            "client",
            options.token.as_deref().unwrap_or_default(),
            &endpoint_instance_id,
        );
        use futures::SinkExt;
        ws_stream
            .send(Message::Text(attach.to_json()))
            .await
            .map_err(|_| EndpointError::new(Stage::Attach, "invalid_attach", error_path))?;
    }

    let transport = WsFrameTransport::new(ws_stream);
    let handshake_config = HandshakeConfig {
        default_suite: suite,
        max_handshake_payload: runtime_config.max_handshake_payload,
        max_record_bytes: runtime_config.max_record_bytes,
        ..HandshakeConfig::default()
    };
    let clock = SystemClock;

    let secure_channel = tokio::time::timeout(
        runtime_config.handshake_timeout,
        run_client(transport, &psk, &options.channel_id, &handshake_config, &clock),
    )
    .await
    .map_err(|_| EndpointError::new(Stage::Handshake, "timeout", error_path))?
    .map_err(|e| classify_handshake_error(&e, path))?;

    let session = Arc::new(MuxSession::new(secure_channel, Mode::Client, runtime_config.mux_bridge_chunk_bytes));

    let mut rpc_stream = session
        .open_stream()
        .await
        .map_err(|_| EndpointError::new(Stage::Yamux, "open_stream_failed", error_path))?;
    write_stream_hello(&mut rpc_stream, &StreamHello { kind: RPC_STREAM_KIND.to_string() })
        .await
        .map_err(|_| EndpointError::new(Stage::Rpc, "stream_hello_failed", error_path))?;

    let (read_half, write_half) = tokio::io::split(rpc_stream);
    let (rpc, notifications) = RpcClient::spawn(read_half, write_half, runtime_config.max_stream_hello_bytes);

    let keepalive = spawn_keepalive(Arc::clone(&session), options.idle_timeout_seconds);

    Ok(ConnectedEndpoint { session, rpc, notifications, keepalive })
}

/// Sends a `SecureChannel` ping at `max(500ms, idleTimeout/2)` for as
/// long as the bridged connection stays open. This only has an effect
/// on the wire while the bridge task is still alive; once the channel
/// is torn down the ping write fails and the loop stops.
fn spawn_keepalive(session: Arc<MuxSession>, idle_timeout_seconds: i64) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if idle_timeout_seconds <= 0 {
            return;
        }
        let interval = Duration::from_millis(500).max(Duration::from_secs(idle_timeout_seconds as u64 / 2));
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if session.ping().await.is_err() {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_ws_close_during_the_tunnel_path_maps_to_the_attach_stage() {
        let error = HandshakeError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "ws closed: token_replay",
        ));
        let mapped = classify_handshake_error(&error, ConnectPath::Tunnel);
        assert_eq!(mapped.stage, Stage::Attach);
        assert_eq!(mapped.code, "token_replay");
    }

    #[test]
    fn a_ws_close_during_the_direct_path_stays_at_the_handshake_stage() {
        let error = HandshakeError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "ws closed: token_replay",
        ));
        let mapped = classify_handshake_error(&error, ConnectPath::Direct);
        assert_eq!(mapped.stage, Stage::Handshake);
    }

    #[test]
    fn an_ordinary_handshake_failure_maps_to_its_own_reason() {
        let mapped = classify_handshake_error(&HandshakeError::AuthTagMismatch, ConnectPath::Tunnel);
        assert_eq!(mapped.stage, Stage::Handshake);
        assert_eq!(mapped.code, "auth_tag_mismatch");
    }
}
