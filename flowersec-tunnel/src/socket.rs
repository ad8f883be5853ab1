use async_trait::async_trait;

/// A message read off an endpoint's WebSocket, narrowed to the kinds
/// the tunnel cares about; ping/pong frames are handled by the carrier
/// and never surface here.
#[derive(Debug, Clone)]
pub enum SocketMessage {
    Text(String),
    Binary(Vec<u8>),
}

/// The read half of an accepted connection. Mirrors the split side of
/// `warpgate_common::helpers::websocket::pump_websocket`'s source
/// stream, generalized so tests can drive the read pump without a real
/// WebSocket.
#[async_trait]
pub trait TunnelSocketRead: Send {
    async fn recv(&mut self) -> Option<std::io::Result<SocketMessage>>;
}

/// The write half of an accepted connection.
#[async_trait]
pub trait TunnelSocketWrite: Send {
    async fn send_binary(&mut self, data: Vec<u8>) -> std::io::Result<()>;
    async fn send_close(&mut self, code: u16, reason: String);
}
