use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use flowersec_common::{StableReason, SystemClock};
use flowersec_handshake::{run_server, HandshakeConfig, ServerHandshakeCache};
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use yamux::Mode;

use crate::attach::AttachMessage;
use crate::bridge::MuxSession;
use crate::config::{ConnectOptions, ConnectPath, EndpointRuntimeConfig};
use crate::error::{EndpointError, Path as ErrorPath, Stage};
use crate::rpc::RpcServer;
use crate::stream_hello::{read_stream_hello, RPC_STREAM_KIND};
use crate::validate::validate;
use crate::ws_transport::WsFrameTransport;

type StreamHandler = Box<dyn Fn(yamux::Stream) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Registry of application-owned stream handlers keyed by
/// `StreamHello.kind`, plus the canonical RPC server wired in under
/// `"rpc"`.
#[derive(Default)]
pub struct StreamHandlers {
    rpc: Option<Arc<RpcServer<tokio::io::WriteHalf<yamux::Stream>>>>,
    other: HashMap<String, StreamHandler>,
}

impl StreamHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rpc_server(mut self, server: Arc<RpcServer<tokio::io::WriteHalf<yamux::Stream>>>) -> Self {
        self.rpc = Some(server);
        self
    }

    pub fn register<F, Fut>(mut self, kind: impl Into<String>, handler: F) -> Self
    where
        F: Fn(yamux::Stream) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.other.insert(kind.into(), Box::new(move |stream| Box::pin(handler(stream))));
        self
    }

    async fn dispatch(&self, mut stream: yamux::Stream, max_hello_bytes: usize) {
        let hello = match read_stream_hello(&mut stream, max_hello_bytes).await {
            Ok(hello) => hello,
            Err(e) => {
                tracing::debug!(error = %e, "dropping stream with an unreadable hello");
                return;
            }
        };
        if hello.kind == RPC_STREAM_KIND {
            match &self.rpc {
                Some(rpc_server) => {
                    let (read_half, write_half) = tokio::io::split(stream);
                    Arc::clone(rpc_server).serve(read_half, write_half, max_hello_bytes).await;
                }
                None => tracing::debug!("inbound rpc stream but no rpc server is registered"),
            }
        } else if let Some(handler) = self.other.get(&hello.kind) {
            handler(stream).await;
        } else {
            tracing::debug!(kind = %hello.kind, "no handler registered for stream kind");
        }
    }
}

/// A live server-side connection: the multiplexed session and the
/// background task dispatching inbound streams by `StreamHello.kind`.
pub struct AcceptedEndpoint {
    pub session: Arc<MuxSession>,
    dispatch_task: tokio::task::JoinHandle<()>,
}

impl AcceptedEndpoint {
    pub async fn close(self) {
        self.dispatch_task.abort();
        self.session.close().await;
    }
}

/// Runs the server accept path: dial out to the tunnel as a WebSocket
/// client, attach as `role=server`, run the handshake as the
/// responder, open the multiplexed session in server mode, and
/// dispatch each inbound stream by its `StreamHello.kind`.
pub async fn accept(
    options: &ConnectOptions,
    path: ConnectPath,
    runtime_config: &EndpointRuntimeConfig,
    handlers: StreamHandlers,
    replay_cache: &ServerHandshakeCache,
    mut cancel: Option<oneshot::Receiver<()>>,
) -> Result<AcceptedEndpoint, EndpointError> {
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
            "server",
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
        permitted_suites: vec![suite],
        default_suite: suite,
        max_handshake_payload: runtime_config.max_handshake_payload,
        max_record_bytes: runtime_config.max_record_bytes,
        ..HandshakeConfig::default()
    };
    let clock = SystemClock;

    let secure_channel = tokio::time::timeout(
        runtime_config.handshake_timeout,
        run_server(
            transport,
            &psk,
            &options.channel_id,
            options.channel_init_expire_at_unix_s,
            &handshake_config,
            &clock,
            replay_cache,
        ),
    )
    .await
    .map_err(|_| EndpointError::new(Stage::Handshake, "timeout", error_path))?
    .map_err(|e| EndpointError::new(Stage::Handshake, e.reason(), error_path))?;

    let session = Arc::new(MuxSession::new(secure_channel, Mode::Server, runtime_config.mux_bridge_chunk_bytes));

    let max_hello_bytes = runtime_config.max_stream_hello_bytes;
    let handlers = Arc::new(handlers);
    let dispatch_session = Arc::clone(&session);
    let dispatch_task = tokio::spawn(async move {
        loop {
            let stream = match dispatch_session.accept_stream().await {
                Some(stream) => stream,
                None => break,
            };
            let handlers = Arc::clone(&handlers);
            tokio::spawn(async move { handlers.dispatch(stream, max_hello_bytes).await });
        }
    });

    Ok(AcceptedEndpoint { session, dispatch_task })
}
